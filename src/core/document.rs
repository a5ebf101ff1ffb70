//! Logical byte document
//!
//! A [`Document`] presents a source with its pending edits applied as one
//! contiguous byte sequence. Unmodified ranges are read through the shared
//! [`PageStore`]; edited ranges come from the document's own [`DeltaLog`].
//! The source itself is never written; [`Document::save`] flattens the
//! content into a new source and starts over from there.

use crate::core::config::DocumentConfig;
use crate::core::delta::{DeltaLog, DeltaSegment};
use crate::core::error::{DocumentError, Result};
use crate::core::operation::Operation;
use crate::core::page_store::PageStore;
use crate::core::source::{FileSource, MemorySource, MmapSource, Source};
use crate::core::target::{FileTarget, SaveTarget};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What changed in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DocumentChange {
    /// `removed` bytes at `offset` were replaced by `inserted` bytes
    Edited {
        offset: u64,
        removed: u64,
        inserted: u64,
    },
    /// Content was flattened into a new source
    Saved { length: u64 },
    /// Cached source bytes in `range` were dropped
    SourceInvalidated { range: Range<u64> },
    /// The document was closed
    Closed { discarded: bool },
}

/// Callback run after every change
pub type ChangeListener = dyn Fn(&DocumentChange) + Send + Sync;

/// Handle returned by [`Document::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Box<ChangeListener>)>,
}

impl Listeners {
    fn add(&mut self, listener: Box<ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    fn notify(&self, change: &DocumentChange) {
        for (_, listener) in &self.entries {
            listener(change);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentState {
    /// Attached to a source with no unsaved edits
    Open,
    /// Edited since open or the last save
    Dirty,
    /// Detached; every call fails with [`DocumentError::Closed`]
    Closed,
}

/// Source plus pending edits
#[derive(Debug)]
pub struct Document {
    store: Arc<PageStore>,
    delta: DeltaLog,
    config: DocumentConfig,
    state: DocumentState,
    listeners: Listeners,
}

impl Document {
    /// Open a document over a source
    ///
    /// A source of unknown length is searched to its end here, so every
    /// later offset check runs against a real bound.
    pub fn open(source: Arc<dyn Source>, config: DocumentConfig) -> Result<Self> {
        let store = Arc::new(PageStore::new(source, &config)?);
        Self::open_shared(store, config)
    }

    /// Open a document over a page store other documents may also use
    pub fn open_shared(store: Arc<PageStore>, config: DocumentConfig) -> Result<Self> {
        config.validate()?;
        let length = store.resolve_length()?;
        info!(
            "Opened document over {} ({} bytes)",
            store.source().describe(),
            length
        );
        Ok(Document {
            store,
            delta: DeltaLog::new(length).with_compact_threshold(config.compact_threshold),
            config,
            state: DocumentState::Open,
            listeners: Listeners::default(),
        })
    }

    /// Open a file, memory-mapped if the configuration asks for it
    pub fn open_file<P: AsRef<Path>>(path: P, config: DocumentConfig) -> Result<Self> {
        let source: Arc<dyn Source> = if config.use_mmap {
            Arc::new(MmapSource::open(&path)?)
        } else {
            Arc::new(FileSource::open(&path)?)
        };
        Self::open(source, config)
    }

    /// Open an in-memory buffer with default configuration
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Result<Self> {
        let source = Arc::new(MemorySource::from(bytes.into()));
        Self::open(source, DocumentConfig::default())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == DocumentState::Closed {
            return Err(DocumentError::Closed);
        }
        Ok(())
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == DocumentState::Dirty
    }

    pub fn is_closed(&self) -> bool {
        self.state == DocumentState::Closed
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn page_store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        self.store.source()
    }

    /// Register a callback run after every edit, save, invalidation and
    /// close
    ///
    /// Callbacks run on the thread making the change, after it completed.
    pub fn on_change<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        self.listeners.add(Box::new(listener))
    }

    /// Unregister a callback; false if it was not registered
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn edited(&self, offset: u64, removed: usize, inserted: usize) {
        self.listeners.notify(&DocumentChange::Edited {
            offset,
            removed: removed as u64,
            inserted: inserted as u64,
        });
    }

    /// Logical length
    pub fn length(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.delta.len())
    }

    /// True if the logical content differs from the source
    ///
    /// Unlike [`Document::is_dirty`] this turns false again when edits
    /// cancel out.
    pub fn has_changes(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(!self.delta.is_pristine())
    }

    /// Read `length` bytes at `offset`
    pub fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.delta.read_vec(&self.store, offset, length)
    }

    /// Fill `buf` with the bytes at `offset`
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        self.delta.read(&self.store, offset, buf)
    }

    pub fn byte_at(&self, offset: u64) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_into(offset, &mut byte)?;
        Ok(byte[0])
    }

    fn mark_dirty(&mut self, op: &Operation) {
        if self.state == DocumentState::Open {
            debug!("Document over {} is now dirty", self.store.source().describe());
        }
        self.state = DocumentState::Dirty;
        trace!(
            "Applied {} at {:?} (delta {}), length now {}",
            op.kind(),
            op.offset(),
            op.net_delta(),
            self.delta.len()
        );
    }

    /// Insert bytes at `offset`
    pub fn insert(&mut self, offset: u64, bytes: &[u8]) -> Result<Operation> {
        self.ensure_open()?;
        self.delta.insert(&self.store, offset, bytes)?;
        self.edited(offset, 0, bytes.len());
        let op = Operation::Insert {
            offset,
            bytes: bytes.to_vec(),
        };
        self.mark_dirty(&op);
        Ok(op)
    }

    /// Insert `count` copies of `byte` at `offset`
    pub fn insert_fill(&mut self, offset: u64, count: u64, byte: u8) -> Result<Operation> {
        self.ensure_open()?;
        if count == 0 {
            return Err(DocumentError::InvalidArgument(
                "cannot insert zero bytes".to_string(),
            ));
        }
        let len = self.delta.len();
        if offset > len {
            return Err(DocumentError::out_of_range(offset, count, len));
        }
        let count = usize::try_from(count).map_err(|_| {
            DocumentError::InvalidArgument(format!("fill of {} bytes is too large", count))
        })?;
        self.insert(offset, &vec![byte; count])
    }

    /// Remove `length` bytes at `offset`
    pub fn delete(&mut self, offset: u64, length: u64) -> Result<Operation> {
        self.ensure_open()?;
        let bytes = self.delta.delete(&self.store, offset, length)?;
        self.edited(offset, bytes.len(), 0);
        let op = Operation::Delete { offset, bytes };
        self.mark_dirty(&op);
        Ok(op)
    }

    /// Write bytes over the content at `offset`
    ///
    /// Bytes that fall past the end extend the document.
    pub fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> Result<Operation> {
        self.ensure_open()?;
        let old = self.delta.overwrite(&self.store, offset, bytes)?;
        self.edited(offset, old.len(), bytes.len());
        let op = Operation::Overwrite {
            offset,
            old,
            new: bytes.to_vec(),
        };
        self.mark_dirty(&op);
        Ok(op)
    }

    /// Replace `length` bytes at `offset` with `bytes`
    pub fn replace(&mut self, offset: u64, length: u64, bytes: &[u8]) -> Result<Operation> {
        self.ensure_open()?;
        let old = self.delta.replace(&self.store, offset, length, bytes)?;
        self.edited(offset, old.len(), bytes.len());
        let op = Operation::Replace {
            offset,
            old,
            new: bytes.to_vec(),
        };
        self.mark_dirty(&op);
        Ok(op)
    }

    /// Replay an operation
    ///
    /// A compound operation either applies completely or, if one of its
    /// steps fails, leaves the document as it was.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        self.ensure_open()?;
        self.apply_step(op)?;
        self.mark_dirty(op);
        Ok(())
    }

    fn apply_step(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Insert { offset, bytes } => {
                self.delta.insert(&self.store, *offset, bytes)?;
                self.edited(*offset, 0, bytes.len());
                Ok(())
            }
            Operation::Delete { offset, bytes } => {
                self.delta.delete(&self.store, *offset, bytes.len() as u64)?;
                self.edited(*offset, bytes.len(), 0);
                Ok(())
            }
            Operation::Overwrite { offset, old, new } | Operation::Replace { offset, old, new } => {
                self.delta.replace(&self.store, *offset, old.len() as u64, new)?;
                self.edited(*offset, old.len(), new.len());
                Ok(())
            }
            Operation::Compound(ops) => {
                for (applied, step) in ops.iter().enumerate() {
                    if let Err(e) = self.apply_step(step) {
                        for done in ops[..applied].iter().rev() {
                            if let Err(rollback) = self.apply_step(&done.inverse()) {
                                warn!("Rollback of {} failed: {}", done.kind(), rollback);
                            }
                        }
                        return Err(e);
                    }
                }
                Ok(())
            }
        }
    }

    /// Normalized list of pending edits against the source
    pub fn segments(&self) -> Result<Vec<DeltaSegment>> {
        self.ensure_open()?;
        Ok(self.delta.segments())
    }

    /// Number of pieces in the delta log
    pub fn piece_count(&self) -> usize {
        self.delta.piece_count()
    }

    fn for_each_window<F>(&self, mut f: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let length = self.delta.len();
        let window = self.store.page_size() as u64;
        let mut buf = vec![0u8; window.min(length) as usize];
        let mut offset = 0;
        while offset < length {
            let count = window.min(length - offset) as usize;
            self.delta.read(&self.store, offset, &mut buf[..count])?;
            f(&buf[..count])?;
            offset += count as u64;
        }
        Ok(length)
    }

    /// Flatten the logical content into `target` and reopen over it
    ///
    /// On success the delta log is empty and the document is `Open` over
    /// the committed source. On failure the document is unchanged and the
    /// target is dropped uncommitted.
    pub fn save<T: SaveTarget>(&mut self, mut target: T) -> Result<()> {
        self.ensure_open()?;
        let written = self.for_each_window(|chunk| Ok(target.write_chunk(chunk)?))?;
        let source = target.commit()?;

        let store = Arc::new(PageStore::new(source, &self.config)?);
        let length = store.resolve_length()?;
        if length != written {
            warn!(
                "Saved source reports {} bytes, {} were written",
                length, written
            );
        }
        info!(
            "Saved document to {} ({} bytes, {} pieces flattened)",
            store.source().describe(),
            length,
            self.delta.piece_count()
        );

        self.store = store;
        self.delta.reset(length);
        self.state = DocumentState::Open;
        self.listeners.notify(&DocumentChange::Saved { length });
        Ok(())
    }

    /// Save to a file, replacing it atomically
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let target = FileTarget::create(path)?.with_mmap(self.config.use_mmap);
        self.save(target)
    }

    /// Stream the logical content into a writer without flattening
    ///
    /// Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<u64> {
        self.ensure_open()?;
        let written = self.for_each_window(|chunk| Ok(writer.write_all(chunk)?))?;
        writer.flush()?;
        Ok(written)
    }

    /// `Read + Seek` view of the logical content
    pub fn reader(&self) -> Result<DocumentReader<'_>> {
        self.ensure_open()?;
        Ok(DocumentReader {
            document: self,
            position: 0,
        })
    }

    /// Drop cached pages for a source range that changed underneath
    pub fn invalidate_source(&self, range: Range<u64>) -> Result<()> {
        self.ensure_open()?;
        self.store.invalidate(range.clone());
        self.listeners
            .notify(&DocumentChange::SourceInvalidated { range });
        Ok(())
    }

    /// Detach from the source
    ///
    /// Returns true if unsaved edits were discarded.
    pub fn close(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let discarded = self.state == DocumentState::Dirty;
        if discarded {
            warn!(
                "Closing document over {} with unsaved edits",
                self.store.source().describe()
            );
        } else {
            info!("Closed document over {}", self.store.source().describe());
        }
        self.delta.reset(0);
        self.state = DocumentState::Closed;
        self.listeners.notify(&DocumentChange::Closed { discarded });
        Ok(discarded)
    }
}

/// Streaming reader over a document's logical content
#[derive(Debug)]
pub struct DocumentReader<'a> {
    document: &'a Document,
    position: u64,
}

impl DocumentReader<'_> {
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for DocumentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let length = self.document.length()?;
        if self.position >= length || buf.is_empty() {
            return Ok(0);
        }
        let count = (buf.len() as u64).min(length - self.position) as usize;
        self.document.read_into(self.position, &mut buf[..count])?;
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for DocumentReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => {
                self.position = offset;
                return Ok(offset);
            }
            SeekFrom::End(delta) => (self.document.length()?, delta),
            SeekFrom::Current(delta) => (self.position, delta),
        };
        match base.checked_add_signed(delta) {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of document",
            )),
        }
    }
}
