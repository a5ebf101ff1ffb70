//! # deltapage - Paged, delta-based binary documents
//!
//! `deltapage` is the document model behind a hex editor. It opens binary
//! sources of any size (files, memory blocks, debugger-exposed buffers)
//! without loading them whole, and records edits without rewriting the
//! source:
//!
//! - **Paged reads** through a sharded LRU cache, shareable between documents
//! - **Delta log** of inserts, deletes and overwrites kept in a balanced piece tree
//! - **Undo/redo** with bounded history and a save point
//! - **Windowed search**, exact or ASCII case-insensitive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deltapage::{HexEditor, Result};
//!
//! # fn main() -> Result<()> {
//! let mut editor = HexEditor::open("firmware.bin")?;
//!
//! // Patch a header byte and insert a marker
//! editor.overwrite(0x10, &[0xEB, 0xFE])?;
//! editor.insert(0x200, b"PATCHED")?;
//!
//! // Find it again
//! let at = editor.find_next(b"PATCHED")?;
//! assert_eq!(at, Some(0x200));
//!
//! editor.undo()?;
//! editor.save_as_file("firmware.patched.bin")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use deltapage::{HexEditorBuilder, SearchMode, Result};
//!
//! # fn main() -> Result<()> {
//! let mut editor = HexEditorBuilder::new()
//!     .path("disk.img")
//!     .page_size(64 * 1024)
//!     .cache_pages(1024)
//!     .with_mmap()
//!     .search_mode(SearchMode::IgnoreAsciiCase)
//!     .build()?;
//!
//! let hits = editor.find_all(b"ntfs", 0, 100)?;
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    config::DocumentConfig,
    delta::{DeltaLog, DeltaSegment, Piece},
    document::{ChangeListener, Document, DocumentChange, DocumentReader, DocumentState, ListenerId},
    error::{DocumentError, Result},
    history::OperationStack,
    operation::Operation,
    page::Page,
    page_store::{PageStore, PageStoreStats},
    search::{SearchCursor, SearchMode, DEFAULT_MATCH_LIMIT},
    source::{FileSource, FnSource, MemorySource, MmapSource, Source, StreamSource},
    target::{FileTarget, MemoryTarget, SaveTarget},
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only view of logical bytes
///
/// This is all a renderer needs: it never sees pages, pieces or history.
///
/// # Examples
///
/// ```rust,no_run
/// use deltapage::{ByteView, HexEditor};
///
/// fn hex_line<V: ByteView>(view: &V, offset: u64) -> deltapage::Result<String> {
///     let len = (view.len()? - offset).min(16);
///     let bytes = view.read_range(offset, len)?;
///     Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "))
/// }
///
/// let editor = HexEditor::open("data.bin")?;
/// println!("{}", hex_line(&editor, 0)?);
/// # Ok::<(), deltapage::DocumentError>(())
/// ```
pub trait ByteView {
    /// Logical length in bytes
    fn len(&self) -> Result<u64>;

    /// Read `length` bytes at `offset`
    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl ByteView for Document {
    fn len(&self) -> Result<u64> {
        self.length()
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        Document::read_range(self, offset, length)
    }
}

/// Document with its undo history and search cursor
///
/// Every edit made through the editor is committed to history, so
/// [`HexEditor::undo`] and [`HexEditor::redo`] always have something
/// meaningful to work with.
#[derive(Debug)]
pub struct HexEditor {
    document: Document,
    history: OperationStack,
    cursor: SearchCursor,
}

impl HexEditor {
    /// Open a file with default configuration
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use deltapage::HexEditor;
    ///
    /// let editor = HexEditor::open("dump.bin")?;
    /// println!("{} bytes", editor.length()?);
    /// # Ok::<(), deltapage::DocumentError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        HexEditorBuilder::new().path(path.as_ref()).build()
    }

    /// Edit an in-memory buffer with default configuration
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Result<Self> {
        HexEditorBuilder::new().bytes(bytes).build()
    }

    fn from_document(document: Document, mode: SearchMode) -> Self {
        let history = OperationStack::from_config(document.config());
        let cursor = SearchCursor::from_config(document.config(), mode);
        HexEditor {
            document,
            history,
            cursor,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &OperationStack {
        &self.history
    }

    pub fn search_cursor(&self) -> &SearchCursor {
        &self.cursor
    }

    pub fn search_cursor_mut(&mut self) -> &mut SearchCursor {
        &mut self.cursor
    }

    /// Split into the document and its history
    pub fn into_parts(self) -> (Document, OperationStack) {
        (self.document, self.history)
    }

    pub fn length(&self) -> Result<u64> {
        self.document.length()
    }

    pub fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.document.read_range(offset, length)
    }

    pub fn insert(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let op = self.document.insert(offset, bytes)?;
        self.history.commit(op);
        Ok(())
    }

    pub fn delete(&mut self, offset: u64, length: u64) -> Result<()> {
        let op = self.document.delete(offset, length)?;
        self.history.commit(op);
        Ok(())
    }

    pub fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let op = self.document.overwrite(offset, bytes)?;
        self.history.commit(op);
        Ok(())
    }

    pub fn replace(&mut self, offset: u64, length: u64, bytes: &[u8]) -> Result<()> {
        let op = self.document.replace(offset, length, bytes)?;
        self.history.commit(op);
        Ok(())
    }

    /// Insert `count` copies of `byte` at `offset`
    pub fn insert_fill(&mut self, offset: u64, count: u64, byte: u8) -> Result<()> {
        let op = self.document.insert_fill(offset, count, byte)?;
        self.history.commit(op);
        Ok(())
    }

    /// End the current run of merged edits
    ///
    /// The next insert or overwrite starts a new undo step even when it
    /// continues where the last one stopped.
    pub fn seal_history(&mut self) {
        self.history.seal();
    }

    /// Call `listener` after every change to the document
    pub fn on_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        self.document.on_change(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.document.remove_listener(id)
    }

    pub fn undo(&mut self) -> Result<()> {
        self.history.undo(&mut self.document)
    }

    pub fn redo(&mut self) -> Result<()> {
        self.history.redo(&mut self.document)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// True unless history sits exactly at the last save
    pub fn is_modified(&self) -> bool {
        !self.history.is_at_save_point()
    }

    /// Flatten into `target` and mark the save point
    pub fn save<T: SaveTarget>(&mut self, target: T) -> Result<()> {
        self.document.save(target)?;
        self.history.mark_save_point();
        Ok(())
    }

    /// Save to a file, replacing it atomically
    pub fn save_as_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        info!("Saving to {:?}", path.as_ref());
        self.document.save_to_file(path)?;
        self.history.mark_save_point();
        Ok(())
    }

    /// Search forward from the cursor
    pub fn find_next(&mut self, pattern: &[u8]) -> Result<Option<u64>> {
        self.cursor.find_next(&self.document, pattern)
    }

    /// Search backward from the cursor
    pub fn find_previous(&mut self, pattern: &[u8]) -> Result<Option<u64>> {
        self.cursor.find_previous(&self.document, pattern)
    }

    /// Up to `limit` match offsets at or after `from`
    pub fn find_all(&self, pattern: &[u8], from: u64, limit: usize) -> Result<Vec<u64>> {
        self.cursor.find_all(&self.document, pattern, from, limit)
    }

    /// Replace every non-overlapping match of `pattern` as one undoable step
    ///
    /// Returns the number of matches replaced.
    pub fn replace_all(&mut self, pattern: &[u8], replacement: &[u8]) -> Result<usize> {
        let plen = pattern.len() as u64;
        let mut starts = Vec::new();
        let mut from = 0;
        while let Some(at) = self.cursor.next(&self.document, pattern, from)? {
            starts.push(at);
            from = at + plen;
        }
        if starts.is_empty() {
            return Ok(0);
        }

        // Back to front keeps earlier offsets valid
        let mut ops = Vec::with_capacity(starts.len());
        for &at in starts.iter().rev() {
            match self.document.replace(at, plen, replacement) {
                Ok(op) => ops.push(op),
                Err(e) => {
                    if !ops.is_empty() {
                        self.document.apply(&Operation::Compound(ops).inverse())?;
                    }
                    return Err(e);
                }
            }
        }

        debug!("Replaced {} matches", starts.len());
        self.history.commit(Operation::Compound(ops));
        Ok(starts.len())
    }

    /// Close the document; returns true if unsaved edits were discarded
    pub fn close(&mut self) -> Result<bool> {
        let discarded = self.document.close()?;
        self.history.clear();
        Ok(discarded)
    }
}

impl ByteView for HexEditor {
    fn len(&self) -> Result<u64> {
        self.document.length()
    }

    fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.document.read_range(offset, length)
    }
}

/// Builder for configuring a [`HexEditor`]
///
/// # Examples
///
/// ```rust,no_run
/// use deltapage::HexEditorBuilder;
///
/// # fn main() -> deltapage::Result<()> {
/// let editor = HexEditorBuilder::new()
///     .path("core.dump")
///     .config_file("deltapage.toml")
///     .undo_depth(200)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct HexEditorBuilder {
    source: Option<Arc<dyn Source>>,
    store: Option<Arc<PageStore>>,
    path: Option<PathBuf>,
    config: Option<DocumentConfig>,
    config_file: Option<PathBuf>,
    page_size: Option<usize>,
    cache_pages: Option<usize>,
    undo_depth: Option<usize>,
    undo_max_bytes: Option<usize>,
    merge_edits: Option<bool>,
    use_mmap: Option<bool>,
    search_mode: SearchMode,
}

impl HexEditorBuilder {
    /// Create a new HexEditorBuilder with default settings
    pub fn new() -> Self {
        HexEditorBuilder {
            source: None,
            store: None,
            path: None,
            config: None,
            config_file: None,
            page_size: None,
            cache_pages: None,
            undo_depth: None,
            undo_max_bytes: None,
            merge_edits: None,
            use_mmap: None,
            search_mode: SearchMode::Exact,
        }
    }

    /// Edit a host-supplied source
    pub fn source<S: Source + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Edit a source whose page cache is shared with other documents
    pub fn shared_store(mut self, store: Arc<PageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Edit a file
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Edit an in-memory buffer
    pub fn bytes<B: Into<Vec<u8>>>(self, bytes: B) -> Self {
        self.source(MemorySource::from(bytes.into()))
    }

    /// Start from a complete configuration
    pub fn config(mut self, config: DocumentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the configuration from a TOML or JSON file at build time
    pub fn config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = Some(cache_pages);
        self
    }

    pub fn undo_depth(mut self, undo_depth: usize) -> Self {
        self.undo_depth = Some(undo_depth);
        self
    }

    pub fn undo_max_bytes(mut self, undo_max_bytes: usize) -> Self {
        self.undo_max_bytes = Some(undo_max_bytes);
        self
    }

    /// Fold contiguous inserts and overwrites into one undo step
    pub fn merge_edits(mut self, merge_edits: bool) -> Self {
        self.merge_edits = Some(merge_edits);
        self
    }

    /// Map files into memory
    pub fn with_mmap(mut self) -> Self {
        self.use_mmap = Some(true);
        self
    }

    pub fn search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }

    /// Build the HexEditor instance
    pub fn build(self) -> Result<HexEditor> {
        let mut config = match (&self.config_file, self.config) {
            (Some(path), _) => DocumentConfig::load(path)?,
            (None, Some(config)) => config,
            (None, None) => DocumentConfig::default(),
        };
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(cache_pages) = self.cache_pages {
            config.cache_pages = cache_pages;
        }
        if let Some(undo_depth) = self.undo_depth {
            config.undo_depth = undo_depth;
        }
        if let Some(undo_max_bytes) = self.undo_max_bytes {
            config.undo_max_bytes = undo_max_bytes;
        }
        if let Some(merge_edits) = self.merge_edits {
            config.merge_edits = merge_edits;
        }
        if let Some(use_mmap) = self.use_mmap {
            config.use_mmap = use_mmap;
        }
        config.validate()?;

        let document = if let Some(store) = self.store {
            Document::open_shared(store, config)?
        } else if let Some(source) = self.source {
            Document::open(source, config)?
        } else if let Some(path) = self.path {
            info!("Opening {:?}", path);
            Document::open_file(&path, config)?
        } else {
            return Err(DocumentError::InvalidArgument(
                "a source, shared store or path must be set".to_string(),
            ));
        };

        Ok(HexEditor::from_document(document, self.search_mode))
    }
}

impl Default for HexEditorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_and_undo() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"ABCDEFGHIJ".to_vec())?;
        editor.overwrite(2, b"xy")?;
        assert_eq!(editor.read_range(0, 10)?, b"ABxyEFGHIJ");
        assert!(editor.is_modified());

        editor.undo()?;
        assert_eq!(editor.read_range(0, 10)?, b"ABCDEFGHIJ");
        assert!(!editor.is_modified());

        assert!(matches!(editor.undo(), Err(DocumentError::EmptyStack)));
        editor.redo()?;
        assert_eq!(editor.read_range(0, 10)?, b"ABxyEFGHIJ");
        Ok(())
    }

    #[test]
    fn test_builder_requires_source() {
        assert!(matches!(
            HexEditorBuilder::new().build(),
            Err(DocumentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_builder_overrides() -> Result<()> {
        let editor = HexEditorBuilder::new()
            .bytes(vec![0u8; 100])
            .page_size(1024)
            .cache_pages(3)
            .undo_depth(5)
            .search_mode(SearchMode::IgnoreAsciiCase)
            .build()?;

        assert_eq!(editor.document().config().page_size, 1024);
        assert_eq!(editor.document().page_store().capacity(), 3);
        assert_eq!(editor.history().max_depth(), 5);
        assert_eq!(editor.search_cursor().mode(), SearchMode::IgnoreAsciiCase);
        Ok(())
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let result = HexEditorBuilder::new()
            .bytes(vec![1, 2, 3])
            .page_size(1000)
            .build();
        assert!(matches!(result, Err(DocumentError::Config(_))));
    }

    #[test]
    fn test_builder_config_file() -> Result<()> {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("deltapage.toml");
        std::fs::write(&path, "page_size = 2048\nundo_depth = 7\n").unwrap();

        let editor = HexEditorBuilder::new()
            .bytes(b"abc".to_vec())
            .config_file(&path)
            .build()?;
        assert_eq!(editor.document().config().page_size, 2048);
        assert_eq!(editor.history().max_depth(), 7);
        Ok(())
    }

    #[test]
    fn test_replace_all_is_one_step() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"cat dog cat bird cat".to_vec())?;
        assert_eq!(editor.replace_all(b"cat", b"lion")?, 3);
        assert_eq!(
            editor.read_range(0, editor.length()?)?,
            b"lion dog lion bird lion"
        );
        assert_eq!(editor.history().undo_len(), 1);

        editor.undo()?;
        assert_eq!(editor.read_range(0, editor.length()?)?, b"cat dog cat bird cat");
        assert_eq!(editor.replace_all(b"zebra", b"x")?, 0);
        Ok(())
    }

    #[test]
    fn test_replace_all_non_overlapping() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"aaaaa".to_vec())?;
        assert_eq!(editor.replace_all(b"aa", b"b")?, 2);
        assert_eq!(editor.read_range(0, editor.length()?)?, b"bba");
        Ok(())
    }

    #[test]
    fn test_save_clears_modified() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"0123".to_vec())?;
        editor.insert(4, b"45")?;
        editor.save(MemoryTarget::new())?;
        assert!(!editor.is_modified());
        assert_eq!(editor.document().state(), DocumentState::Open);

        editor.undo()?;
        assert!(editor.is_modified());
        assert_eq!(editor.read_range(0, editor.length()?)?, b"0123");
        Ok(())
    }

    #[test]
    fn test_byte_view_is_generic() -> Result<()> {
        fn first_byte<V: ByteView>(view: &V) -> Result<Option<u8>> {
            if view.is_empty()? {
                return Ok(None);
            }
            Ok(view.read_range(0, 1)?.first().copied())
        }

        let editor = HexEditor::from_bytes(b"Z".to_vec())?;
        assert_eq!(first_byte(&editor)?, Some(b'Z'));
        assert_eq!(first_byte(editor.document())?, Some(b'Z'));
        assert_eq!(first_byte(&HexEditor::from_bytes(Vec::new())?)?, None);
        Ok(())
    }

    #[test]
    fn test_close_discards() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"abc".to_vec())?;
        editor.delete(0, 1)?;
        assert!(editor.close()?);
        assert!(!editor.can_undo());
        assert!(matches!(editor.length(), Err(DocumentError::Closed)));
        Ok(())
    }

    #[test]
    fn test_typing_run_undoes_as_one_step() -> Result<()> {
        let mut editor = HexEditor::from_bytes(vec![0u8; 100])?;
        for i in 0..50 {
            editor.overwrite(i, &[b'a' + (i % 26) as u8])?;
        }
        assert_eq!(editor.history().undo_len(), 1);

        editor.undo()?;
        assert_eq!(editor.read_range(0, 100)?, vec![0u8; 100]);
        assert!(!editor.can_undo());
        Ok(())
    }

    #[test]
    fn test_seal_history_starts_new_step() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"....".to_vec())?;
        editor.overwrite(0, b"a")?;
        editor.seal_history();
        editor.overwrite(1, b"b")?;
        assert_eq!(editor.history().undo_len(), 2);

        let mut editor = HexEditorBuilder::new()
            .bytes(b"....".to_vec())
            .merge_edits(false)
            .build()?;
        editor.overwrite(0, b"a")?;
        editor.overwrite(1, b"b")?;
        assert_eq!(editor.history().undo_len(), 2);
        Ok(())
    }

    #[test]
    fn test_undo_restores_pristine_document() -> Result<()> {
        let mut editor = HexEditor::from_bytes(b"ABCDEFGHIJ".to_vec())?;
        editor.overwrite(3, b"zz")?;
        assert!(editor.document().has_changes()?);

        editor.undo()?;
        assert!(!editor.document().has_changes()?);
        assert_eq!(editor.document().piece_count(), 1);
        Ok(())
    }

    #[test]
    fn test_insert_fill_and_listener() -> Result<()> {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut editor = HexEditor::from_bytes(b"AB".to_vec())?;
        let sink = seen.clone();
        let id = editor.on_change(move |change| sink.lock().unwrap().push(change.clone()));

        editor.insert_fill(1, 3, 0xff)?;
        assert_eq!(editor.read_range(0, 5)?, [b'A', 0xff, 0xff, 0xff, b'B']);
        editor.undo()?;
        assert_eq!(editor.read_range(0, 2)?, b"AB");

        assert!(editor.remove_listener(id));
        editor.insert(0, b"x")?;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                DocumentChange::Edited { offset: 1, removed: 0, inserted: 3 },
                DocumentChange::Edited { offset: 1, removed: 3, inserted: 0 },
            ]
        );
        Ok(())
    }
}
