#![no_main]
use deltapage::{Document, DocumentConfig, MemorySource, PageStore, Source};
use libfuzzer_sys::{arbitrary::{Arbitrary, Unstructured}, fuzz_target};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
struct Read {
    offset: u16,
    length: u16,
}

// Concurrent readers on two documents over one store always see source bytes
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let reads: Vec<Read> = match u.arbitrary() {
        Ok(reads) => reads,
        Err(_) => return,
    };
    if reads.is_empty() {
        return;
    }

    let data: Vec<u8> = (0..65_536u32).map(|i| (i % 253) as u8).collect();
    let config = DocumentConfig::default()
        .with_page_size(512)
        .with_cache_pages(3)
        .with_cache_shards(2);
    let source: Arc<dyn Source> = Arc::new(MemorySource::from(data.clone()));
    let store = Arc::new(PageStore::new(source, &config).unwrap());
    let docs = Arc::new([
        RwLock::new(Document::open_shared(store.clone(), config.clone()).unwrap()),
        RwLock::new(Document::open_shared(store, config).unwrap()),
    ]);
    let reads = Arc::new(reads);
    let data = Arc::new(data);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let docs = docs.clone();
            let reads = reads.clone();
            let data = data.clone();
            std::thread::spawn(move || {
                let doc = docs[t % 2].read();
                for r in reads.iter().take(32) {
                    let offset = r.offset as u64;
                    let length = (r.length as u64).min(data.len() as u64 - offset);
                    let bytes = doc.read_range(offset, length).unwrap();
                    assert_eq!(bytes.as_slice(), &data[offset as usize..(offset + length) as usize]);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
});
