//! File-backed documents: open, edit, save, reopen, and source failures

use deltapage::{
    ByteView, Document, DocumentConfig, DocumentError, FileTarget, FnSource, HexEditor,
    HexEditorBuilder, PageStore, Source,
};
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 256) as u8).collect()
}

#[test]
fn test_save_in_place_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("image.bin");
    std::fs::write(&path, sample(100_000)).unwrap();

    let mut editor = HexEditorBuilder::new()
        .path(&path)
        .page_size(4096)
        .cache_pages(4)
        .build()
        .unwrap();
    editor.overwrite(0, b"MAGIC").unwrap();
    editor.insert(50_000, &[0xEE; 3000]).unwrap();
    editor.delete(90_000, 10_000).unwrap();
    let expected = editor.read_range(0, editor.length().unwrap()).unwrap();
    assert!(editor.is_modified());

    editor.save_as_file(&path).unwrap();
    assert!(!editor.is_modified());
    assert_eq!(std::fs::read(&path).unwrap(), expected);

    let reopened = HexEditor::open(&path).unwrap();
    assert_eq!(reopened.len().unwrap(), expected.len() as u64);
    assert_eq!(reopened.read_range(49_999, 3).unwrap(), [expected[49_999], 0xEE, 0xEE]);
}

#[test]
fn test_save_as_leaves_original() {
    let temp_dir = TempDir::new().unwrap();
    let original = temp_dir.path().join("original.bin");
    let copy = temp_dir.path().join("copy.bin");
    std::fs::write(&original, b"original content").unwrap();

    let mut editor = HexEditor::open(&original).unwrap();
    editor.overwrite(0, b"ORIGINAL").unwrap();
    editor.save_as_file(&copy).unwrap();

    assert_eq!(std::fs::read(&original).unwrap(), b"original content");
    assert_eq!(std::fs::read(&copy).unwrap(), b"ORIGINAL content");
    assert_eq!(
        editor.document().source().describe(),
        format!("file:{}", copy.display())
    );
}

#[test]
fn test_mmap_document() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mapped.bin");
    std::fs::write(&path, sample(20_000)).unwrap();

    let config = DocumentConfig::default().with_mmap(true);
    let mut doc = Document::open_file(&path, config).unwrap();
    assert!(doc.source().describe().starts_with("mmap:"));

    doc.replace(10, 10, b"x").unwrap();
    let out = temp_dir.path().join("out.bin");
    doc.save(FileTarget::create(&out).unwrap().with_mmap(true)).unwrap();

    let mut expected = sample(20_000);
    expected.splice(10..20, *b"x");
    assert_eq!(std::fs::read(&out).unwrap(), expected);
}

#[test]
fn test_reader_streams_edits() {
    let mut doc = Document::from_bytes(sample(10_000)).unwrap();
    doc.insert(5_000, b"<<marker>>").unwrap();

    let mut reader = doc.reader().unwrap();
    reader.seek(SeekFrom::Start(4_995)).unwrap();
    let mut buf = [0u8; 20];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[5..15], b"<<marker>>");

    let mut all = Vec::new();
    doc.reader().unwrap().read_to_end(&mut all).unwrap();
    assert_eq!(all.len(), 10_010);
}

#[test]
fn test_failed_page_load_is_retried() {
    let fail = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicUsize::new(0));
    let data = sample(2048);

    let (fail_flag, call_count) = (fail.clone(), calls.clone());
    let source = FnSource::new(Some(data.len() as u64), move |offset, buf| {
        call_count.fetch_add(1, Ordering::SeqCst);
        if offset >= 1024 && fail_flag.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "device not ready",
            ));
        }
        let start = offset as usize;
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    })
    .with_label("debugger:buffer");

    let config = DocumentConfig::default().with_page_size(1024);
    let mut doc = Document::open(Arc::new(source), config).unwrap();

    // Second page fails; the first stays cached and the edit is rejected
    let err = doc.delete(1000, 100).unwrap_err();
    assert!(matches!(err, DocumentError::Io(_)));
    assert!(err.is_retryable());
    assert!(!doc.page_store().contains(1));
    assert!(doc.page_store().contains(0));
    assert!(!doc.has_changes().unwrap());

    fail.store(false, Ordering::SeqCst);
    let op = doc.delete(1000, 100).unwrap();
    assert_eq!(op.net_delta(), -100);
    assert_eq!(doc.length().unwrap(), 1948);
    assert!(calls.load(Ordering::SeqCst) >= 3);
}

#[test]
fn test_invalidate_after_external_change() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("watched.bin");
    std::fs::write(&path, vec![1u8; 8192]).unwrap();

    let config = DocumentConfig::default().with_page_size(4096);
    let doc = Document::open_file(&path, config).unwrap();
    assert_eq!(doc.byte_at(5000).unwrap(), 1);

    // Rewrite in place so the open handle sees new bytes
    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    std::io::Write::write_all(&mut file, &vec![2u8; 8192]).unwrap();
    drop(file);

    assert_eq!(doc.byte_at(5000).unwrap(), 1);
    doc.invalidate_source(4096..4097).unwrap();
    assert_eq!(doc.byte_at(5000).unwrap(), 2);
    assert_eq!(doc.byte_at(0).unwrap(), 1);
}

#[test]
fn test_store_stats_after_scan() {
    let source: Arc<dyn Source> = Arc::new(deltapage::MemorySource::from(sample(64 * 1024)));
    let config = DocumentConfig::default().with_page_size(4096).with_cache_pages(4);
    let store = PageStore::new(source, &config).unwrap();

    let mut buf = vec![0u8; 64 * 1024];
    store.read_into(0, &mut buf).unwrap();
    let stats = store.stats();
    assert_eq!(stats.loads, 16);
    assert!(stats.evictions >= 12);
    assert!(stats.resident <= 4);
    assert_eq!(stats.hit_rate(), 0.0);
}
