//! Windowed byte search
//!
//! Content is scanned through [`ByteView::read_range`] in bounded windows,
//! so searching a multi-gigabyte document never holds more than one window
//! in memory. Consecutive windows overlap by one byte less than the pattern
//! so no match straddling a boundary is missed.

use crate::core::config::DocumentConfig;
use crate::core::error::{DocumentError, Result};
use crate::ByteView;
use memchr::memmem::{Finder, FinderRev};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Default cap on matches returned by [`SearchCursor::find_all`]
pub const DEFAULT_MATCH_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Byte-for-byte comparison
    #[default]
    Exact,
    /// ASCII letters compare equal regardless of case; other bytes exactly
    IgnoreAsciiCase,
}

/// Search position over a document
///
/// The cursor holds nothing but its position, so it can be restarted from
/// any offset and shared freely between documents.
#[derive(Debug, Clone)]
pub struct SearchCursor {
    position: u64,
    mode: SearchMode,
    window: usize,
}

impl SearchCursor {
    pub fn new(mode: SearchMode) -> Self {
        Self::with_window(mode, DocumentConfig::default().search_window)
    }

    pub fn with_window(mode: SearchMode, window: usize) -> Self {
        SearchCursor {
            position: 0,
            mode,
            window: window.max(1),
        }
    }

    pub fn from_config(config: &DocumentConfig, mode: SearchMode) -> Self {
        Self::with_window(mode, config.search_window)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SearchMode) {
        self.mode = mode;
    }

    fn needle(&self, pattern: &[u8]) -> Result<Vec<u8>> {
        if pattern.is_empty() {
            return Err(DocumentError::InvalidArgument(
                "search pattern is empty".to_string(),
            ));
        }
        Ok(match self.mode {
            SearchMode::Exact => pattern.to_vec(),
            SearchMode::IgnoreAsciiCase => pattern.to_ascii_lowercase(),
        })
    }

    fn fold(&self, mut window: Vec<u8>) -> Vec<u8> {
        if self.mode == SearchMode::IgnoreAsciiCase {
            window.make_ascii_lowercase();
        }
        window
    }

    // Windows must hold at least one whole match
    fn window_len(&self, pattern_len: usize) -> u64 {
        self.window.max(pattern_len) as u64
    }

    /// First match starting at or after `from`
    pub fn next<V: ByteView + ?Sized>(
        &self,
        view: &V,
        pattern: &[u8],
        from: u64,
    ) -> Result<Option<u64>> {
        let needle = self.needle(pattern)?;
        let finder = Finder::new(&needle);
        let plen = needle.len() as u64;
        let length = view.len()?;
        let window = self.window_len(needle.len());

        let mut start = from;
        while start.checked_add(plen).is_some_and(|end| end <= length) {
            let end = length.min(start + window);
            let haystack = self.fold(view.read_range(start, end - start)?);
            if let Some(at) = finder.find(&haystack) {
                return Ok(Some(start + at as u64));
            }
            if end == length {
                break;
            }
            start = end - (plen - 1);
        }
        Ok(None)
    }

    /// Last match starting at or before `from`
    pub fn previous<V: ByteView + ?Sized>(
        &self,
        view: &V,
        pattern: &[u8],
        from: u64,
    ) -> Result<Option<u64>> {
        let needle = self.needle(pattern)?;
        let finder = FinderRev::new(&needle);
        let plen = needle.len() as u64;
        let length = view.len()?;
        if plen > length {
            return Ok(None);
        }
        let window = self.window_len(needle.len());

        let mut end = from.min(length - plen) + plen;
        loop {
            let start = end.saturating_sub(window);
            let haystack = self.fold(view.read_range(start, end - start)?);
            if let Some(at) = finder.rfind(&haystack) {
                return Ok(Some(start + at as u64));
            }
            if start == 0 {
                return Ok(None);
            }
            end = start + plen - 1;
        }
    }

    /// Search forward from the cursor and move past the match
    pub fn find_next<V: ByteView + ?Sized>(
        &mut self,
        view: &V,
        pattern: &[u8],
    ) -> Result<Option<u64>> {
        let found = self.next(view, pattern, self.position)?;
        if let Some(at) = found {
            trace!("Match at {} searching forward from {}", at, self.position);
            self.position = at + 1;
        }
        Ok(found)
    }

    /// Search backward from just before the cursor and move onto the match
    pub fn find_previous<V: ByteView + ?Sized>(
        &mut self,
        view: &V,
        pattern: &[u8],
    ) -> Result<Option<u64>> {
        if pattern.is_empty() {
            return Err(DocumentError::InvalidArgument(
                "search pattern is empty".to_string(),
            ));
        }
        if self.position == 0 {
            return Ok(None);
        }
        let found = self.previous(view, pattern, self.position - 1)?;
        if let Some(at) = found {
            trace!("Match at {} searching backward from {}", at, self.position);
            self.position = at;
        }
        Ok(found)
    }

    /// Starts of up to `limit` matches at or after `from`, in order
    ///
    /// Overlapping matches are all reported.
    pub fn find_all<V: ByteView + ?Sized>(
        &self,
        view: &V,
        pattern: &[u8],
        from: u64,
        limit: usize,
    ) -> Result<Vec<u64>> {
        let mut matches = Vec::new();
        let mut start = from;
        while matches.len() < limit {
            match self.next(view, pattern, start)? {
                Some(at) => {
                    matches.push(at);
                    start = at + 1;
                }
                None => break,
            }
        }
        Ok(matches)
    }
}

impl Default for SearchCursor {
    fn default() -> Self {
        Self::new(SearchMode::Exact)
    }
}
