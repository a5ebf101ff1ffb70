//! Integration tests across core components
//!
//! Tests the interaction between:
//! - Page store sharing and eviction
//! - Delta log edits and history
//! - Search over edited content
//! - Save and reopen

#[cfg(test)]
mod tests {
    use crate::core::config::DocumentConfig;
    use crate::core::document::{Document, DocumentState};
    use crate::core::history::OperationStack;
    use crate::core::page_store::PageStore;
    use crate::core::search::{SearchCursor, SearchMode};
    use crate::core::source::{MemorySource, Source};
    use crate::core::target::{FileTarget, MemoryTarget};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_edit_undo_save_workflow() {
        let data = pattern(10_000);
        let config = DocumentConfig::default()
            .with_page_size(512)
            .with_cache_pages(2);
        let source: Arc<dyn Source> = Arc::new(MemorySource::from(data.clone()));
        let mut doc = Document::open(source, config.clone()).unwrap();
        let mut history = OperationStack::from_config(&config);

        // Edits spanning page boundaries
        history.commit(doc.overwrite(510, b"ACROSS").unwrap());
        history.commit(doc.insert(1024, b"<inserted>").unwrap());
        history.commit(doc.delete(4000, 2000).unwrap());

        let mut expected = data.clone();
        expected[510..516].copy_from_slice(b"ACROSS");
        expected.splice(1024..1024, b"<inserted>".iter().copied());
        expected.drain(4000..6000);
        assert_eq!(doc.read_range(0, doc.length().unwrap()).unwrap(), expected);

        // Search finds edited bytes
        let cursor = SearchCursor::with_window(SearchMode::Exact, 300);
        assert_eq!(cursor.next(&doc, b"<inserted>", 0).unwrap(), Some(1024));
        assert_eq!(cursor.previous(&doc, b"ACROSS", 9_000).unwrap(), Some(510));

        // Undo everything restores the source
        assert_eq!(history.undo_many(&mut doc, 10).unwrap(), 3);
        assert_eq!(doc.read_range(0, doc.length().unwrap()).unwrap(), data);
        assert!(!doc.has_changes().unwrap());

        // Redo and save
        assert_eq!(history.redo_many(&mut doc, 10).unwrap(), 3);
        doc.save(MemoryTarget::new()).unwrap();
        history.mark_save_point();
        assert_eq!(doc.state(), DocumentState::Open);
        assert_eq!(doc.read_range(0, doc.length().unwrap()).unwrap(), expected);

        // History still works against the flattened source
        history.undo(&mut doc).unwrap();
        assert_eq!(doc.length().unwrap(), expected.len() as u64 + 2000);
        assert!(!history.is_at_save_point());
        history.redo(&mut doc).unwrap();
        assert!(history.is_at_save_point());
    }

    #[test]
    fn test_documents_share_page_store() {
        let data = pattern(8192);
        let config = DocumentConfig::default().with_page_size(1024);
        let source: Arc<dyn Source> = Arc::new(MemorySource::from(data.clone()));
        let store = Arc::new(PageStore::new(source, &config).unwrap());

        let mut first = Document::open_shared(store.clone(), config.clone()).unwrap();
        let second = Document::open_shared(store.clone(), config).unwrap();

        first.overwrite(0, b"first only").unwrap();
        assert_eq!(second.read_range(0, 10).unwrap(), &data[..10]);
        assert_eq!(first.read_range(0, 10).unwrap(), b"first only");

        // Page 0 was loaded once for both documents
        assert_eq!(store.stats().loads, 1);
    }

    #[test]
    fn test_save_to_file_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        std::fs::write(&path, pattern(5000)).unwrap();

        let config = DocumentConfig::default().with_page_size(1024);
        let mut doc = Document::open_file(&path, config.clone()).unwrap();
        doc.insert(0, b"HEADER").unwrap();
        doc.delete(100, 100).unwrap();
        let expected = doc.read_range(0, doc.length().unwrap()).unwrap();

        doc.save(FileTarget::create(&path).unwrap()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), expected);

        let reopened = Document::open_file(&path, config.with_mmap(true)).unwrap();
        assert_eq!(
            reopened.read_range(0, reopened.length().unwrap()).unwrap(),
            expected
        );
    }
}
