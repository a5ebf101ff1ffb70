//! Property-based tests for document correctness
//!
//! Uses proptest to check that the paged, delta-based document always
//! agrees with a plain `Vec<u8>` model under random edit sequences

use deltapage::{
    Document, DocumentConfig, MemorySource, MemoryTarget, OperationStack, SearchCursor,
    SearchMode, Source,
};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Edit {
    Insert(u64, Vec<u8>),
    Delete(u64, u64),
    Overwrite(u64, Vec<u8>),
    Replace(u64, u64, Vec<u8>),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<u64>(), prop::collection::vec(any::<u8>(), 1..64)).prop_map(|(o, b)| Edit::Insert(o, b)),
        (any::<u64>(), 1u64..200).prop_map(|(o, l)| Edit::Delete(o, l)),
        (any::<u64>(), prop::collection::vec(any::<u8>(), 1..64)).prop_map(|(o, b)| Edit::Overwrite(o, b)),
        (any::<u64>(), 0u64..100, prop::collection::vec(any::<u8>(), 1..32))
            .prop_map(|(o, l, b)| Edit::Replace(o, l, b)),
    ]
}

fn open(data: &[u8], page_size: usize, cache_pages: usize) -> Document {
    let config = DocumentConfig::default()
        .with_page_size(page_size)
        .with_cache_pages(cache_pages)
        .with_cache_shards(2);
    let source: Arc<dyn Source> = Arc::new(MemorySource::from(data.to_vec()));
    Document::open(source, config).unwrap()
}

/// Apply an edit clamped into range to both the document and the model
fn apply(doc: &mut Document, model: &mut Vec<u8>, edit: &Edit) -> Option<deltapage::Operation> {
    let len = model.len() as u64;
    match edit {
        Edit::Insert(o, bytes) => {
            let at = o % (len + 1);
            model.splice(at as usize..at as usize, bytes.iter().copied());
            Some(doc.insert(at, bytes).unwrap())
        }
        Edit::Delete(o, l) => {
            if len == 0 {
                return None;
            }
            let at = o % len;
            let count = (*l).min(len - at);
            model.drain(at as usize..(at + count) as usize);
            Some(doc.delete(at, count).unwrap())
        }
        Edit::Overwrite(o, bytes) => {
            let at = (o % (len + 1)) as usize;
            let covered = bytes.len().min(model.len() - at);
            model.splice(at..at + covered, bytes.iter().copied());
            Some(doc.overwrite(at as u64, bytes).unwrap())
        }
        Edit::Replace(o, l, bytes) => {
            let at = o % (len + 1);
            let count = (*l).min(len - at);
            model.splice(at as usize..(at + count) as usize, bytes.iter().copied());
            Some(doc.replace(at, count, bytes).unwrap())
        }
    }
}

fn content(doc: &Document) -> Vec<u8> {
    doc.read_range(0, doc.length().unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_matches_model_and_length_delta(
        data in prop::collection::vec(any::<u8>(), 0..3000),
        edits in prop::collection::vec(edit_strategy(), 1..40)
    ) {
        let mut doc = open(&data, 512, 4);
        let mut model = data.clone();

        for edit in &edits {
            let before = doc.length().unwrap();
            if let Some(op) = apply(&mut doc, &mut model, edit) {
                let after = doc.length().unwrap();
                prop_assert_eq!(after as i64, before as i64 + op.net_delta());
            }
            prop_assert_eq!(doc.length().unwrap(), model.len() as u64);
        }
        prop_assert_eq!(content(&doc), model.clone());

        let mut replayed = data.clone();
        for segment in doc.segments().unwrap() {
            segment.apply_to(&mut replayed);
        }
        prop_assert_eq!(replayed, model);
    }

    #[test]
    fn prop_undo_redo_idempotent(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        prior in prop::collection::vec(edit_strategy(), 0..10),
        edit in edit_strategy()
    ) {
        let mut doc = open(&data, 512, 8);
        let mut model = data.clone();
        let mut history = OperationStack::default();

        for e in &prior {
            if let Some(op) = apply(&mut doc, &mut model, e) {
                history.commit(op);
            }
        }
        let before = content(&doc);

        let Some(op) = apply(&mut doc, &mut model, &edit) else {
            return Ok(());
        };
        // A contiguous edit would otherwise fold into the previous entry
        history.seal();
        history.commit(op);
        let after = content(&doc);

        history.undo(&mut doc).unwrap();
        prop_assert_eq!(content(&doc), before);
        history.redo(&mut doc).unwrap();
        prop_assert_eq!(content(&doc), after);
    }

    #[test]
    fn prop_save_round_trip(
        data in prop::collection::vec(any::<u8>(), 0..5000),
        edits in prop::collection::vec(edit_strategy(), 0..20)
    ) {
        let mut doc = open(&data, 1024, 2);
        let mut model = data.clone();
        for edit in &edits {
            apply(&mut doc, &mut model, edit);
        }
        let before = content(&doc);

        doc.save(MemoryTarget::new()).unwrap();
        prop_assert_eq!(content(&doc), before.clone());

        let source = doc.source().clone();
        let mut saved = vec![0u8; before.len()];
        let mut filled = 0;
        while filled < saved.len() {
            let n = source.read_at(filled as u64, &mut saved[filled..]).unwrap();
            prop_assert!(n > 0);
            filled += n;
        }
        prop_assert_eq!(saved, before);
    }

    #[test]
    fn prop_eviction_never_changes_reads(
        data in prop::collection::vec(any::<u8>(), 1..8000),
        cache_pages in 1usize..6,
        reads in prop::collection::vec((any::<u64>(), 0u64..1500), 1..30)
    ) {
        let doc = open(&data, 512, cache_pages);
        for (offset, length) in reads {
            let offset = offset % data.len() as u64;
            let length = length.min(data.len() as u64 - offset);
            let bytes = doc.read_range(offset, length).unwrap();
            prop_assert_eq!(
                bytes.as_slice(),
                &data[offset as usize..(offset + length) as usize]
            );
        }
        prop_assert!(doc.page_store().resident() <= doc.page_store().capacity());
    }

    #[test]
    fn prop_search_agrees_with_naive_scan(
        data in prop::collection::vec(0u8..4, 0..3000),
        pattern in prop::collection::vec(0u8..4, 1..5),
        window in 1usize..300
    ) {
        let doc = open(&data, 512, 4);
        let cursor = SearchCursor::with_window(SearchMode::Exact, window);

        let expected: Vec<u64> = data
            .windows(pattern.len())
            .enumerate()
            .filter(|(_, w)| *w == pattern.as_slice())
            .map(|(i, _)| i as u64)
            .take(20)
            .collect();
        prop_assert_eq!(cursor.find_all(&doc, &pattern, 0, 20).unwrap(), expected.clone());

        if let Some(&last) = expected.last() {
            prop_assert_eq!(
                cursor.previous(&doc, &pattern, last).unwrap(),
                Some(last)
            );
        }
    }
}
