/// A cached, immutable slice of source content
///
/// Pages are fixed-size except for the last page of a source, which holds
/// whatever remains. Once loaded a page never changes; the page store
/// hands out `Arc<Page>` so readers keep a consistent view even if the
/// page is evicted meanwhile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    index: u64,
    data: Vec<u8>,
}

impl Page {
    pub fn new(index: u64, data: Vec<u8>) -> Self {
        Page { index, data }
    }

    /// Page index within the source
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of valid bytes (less than the page size for a tail page)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte offset of the first byte in the source
    pub fn start_offset(&self, page_size: usize) -> u64 {
        self.index * page_size as u64
    }

    /// True if this page holds fewer bytes than a full page
    pub fn is_tail(&self, page_size: usize) -> bool {
        self.data.len() < page_size
    }
}
