#![no_main]
use deltapage::{Document, SearchCursor, SearchMode};
use libfuzzer_sys::{arbitrary::{Arbitrary, Unstructured}, fuzz_target};

#[derive(Debug, Arbitrary)]
struct Input {
    data: Vec<u8>,
    pattern: Vec<u8>,
    window: u8,
    from: u16,
    ignore_case: bool,
}

// Windowed search must match a naive scan for every window size
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let input: Input = match u.arbitrary() {
        Ok(input) => input,
        Err(_) => return,
    };
    if input.pattern.is_empty() {
        return;
    }

    let mode = if input.ignore_case {
        SearchMode::IgnoreAsciiCase
    } else {
        SearchMode::Exact
    };
    let doc = Document::from_bytes(input.data.clone()).unwrap();
    let cursor = SearchCursor::with_window(mode, input.window as usize + 1);

    let fold = |bytes: &[u8]| match mode {
        SearchMode::Exact => bytes.to_vec(),
        SearchMode::IgnoreAsciiCase => bytes.to_ascii_lowercase(),
    };
    let haystack = fold(&input.data);
    let needle = fold(&input.pattern);
    let from = input.from as usize;

    let expected = haystack
        .windows(needle.len())
        .enumerate()
        .skip(from)
        .find(|(_, w)| *w == needle.as_slice())
        .map(|(i, _)| i as u64);
    assert_eq!(cursor.next(&doc, &input.pattern, from as u64).unwrap(), expected);

    let expected_back = haystack
        .windows(needle.len())
        .enumerate()
        .take(from + 1)
        .filter(|(_, w)| *w == needle.as_slice())
        .map(|(i, _)| i as u64)
        .last();
    assert_eq!(cursor.previous(&doc, &input.pattern, from as u64).unwrap(), expected_back);
});
