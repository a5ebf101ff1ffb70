#![no_main]
use deltapage::{Document, DocumentConfig, MemorySource, OperationStack, Source};
use libfuzzer_sys::{arbitrary::{Arbitrary, Unstructured}, fuzz_target};
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
enum Op {
    Insert { offset: u16, bytes: Vec<u8> },
    Delete { offset: u16, length: u16 },
    Overwrite { offset: u16, bytes: Vec<u8> },
    Replace { offset: u16, length: u8, bytes: Vec<u8> },
    Undo,
    Redo,
}

// Every edit sequence must agree with a plain Vec model, and errors must
// leave both unchanged
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let initial: Vec<u8> = match u.arbitrary() {
        Ok(bytes) => bytes,
        Err(_) => return,
    };
    let ops: Vec<Op> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let config = DocumentConfig::default().with_page_size(512).with_cache_pages(2);
    let source: Arc<dyn Source> = Arc::new(MemorySource::from(initial.clone()));
    let mut doc = Document::open(source, config).unwrap();
    let mut history = OperationStack::new(16, 4096);

    for op in ops.iter().take(64) {
        let result = match op {
            Op::Insert { offset, bytes } => doc.insert(*offset as u64, bytes).map(Some),
            Op::Delete { offset, length } => doc.delete(*offset as u64, *length as u64).map(Some),
            Op::Overwrite { offset, bytes } => doc.overwrite(*offset as u64, bytes).map(Some),
            Op::Replace { offset, length, bytes } => {
                doc.replace(*offset as u64, *length as u64, bytes).map(Some)
            }
            Op::Undo => history.undo(&mut doc).map(|_| None),
            Op::Redo => history.redo(&mut doc).map(|_| None),
        };
        if let Ok(Some(op)) = result {
            history.commit(op);
        }

        let len = doc.length().unwrap();
        let content = doc.read_range(0, len).unwrap();
        let mut replayed = initial.clone();
        for segment in doc.segments().unwrap() {
            segment.apply_to(&mut replayed);
        }
        assert_eq!(replayed, content);
    }
});
