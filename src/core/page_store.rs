//! Sharded page cache over an immutable source
//!
//! Pages are fetched on demand and kept in a bounded least-recently-used
//! cache. The cache is split into lock stripes keyed by page index; each
//! stripe maps an index to a load-once slot. A reader takes the stripe lock
//! only long enough to find or create the slot, then performs (or waits
//! for) the load outside the lock. Concurrent readers of the same page
//! therefore trigger a single source read and never see a partially filled
//! page.
//!
//! Eviction only drops the cache's reference: a reader already holding an
//! `Arc<Page>` keeps a valid page. Failed loads leave nothing behind, so
//! the next request retries the read.

use crate::core::config::DocumentConfig;
use crate::core::error::{DocumentError, Result};
use crate::core::page::Page;
use crate::core::source::Source;
use ahash::RandomState;
use crossbeam::utils::CachePadded;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

const UNKNOWN_LENGTH: u64 = u64::MAX;

/// Fewest pages a stripe may hold; fewer stripes are used for small caches
const MIN_STRIPE_PAGES: usize = 4;

type Slot = Arc<OnceCell<Arc<Page>>>;
type Stripe = Mutex<LruCache<u64, Slot, RandomState>>;

/// Page store statistics
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageStoreStats {
    /// Requests served from a loaded page
    pub hits: u64,
    /// Requests that had to load or wait for a load
    pub misses: u64,
    /// Successful source reads
    pub loads: u64,
    /// Pages dropped to make room
    pub evictions: u64,
    /// Pages currently held (including in-flight loads)
    pub resident: usize,
    /// Maximum resident pages
    pub capacity: usize,
    /// Page size in bytes
    pub page_size: usize,
}

impl PageStoreStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    loads: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
}

/// Paged, cached view of a [`Source`]
pub struct PageStore {
    source: Arc<dyn Source>,
    page_size: usize,
    capacity: usize,
    stripes: Vec<Stripe>,
    length: AtomicU64,
    counters: Counters,
}

impl PageStore {
    /// Create a page store with the given configuration
    pub fn new(source: Arc<dyn Source>, config: &DocumentConfig) -> Result<Self> {
        config.validate()?;

        // Split the budget exactly; the first `extra` stripes take one more
        let stripe_count = config
            .cache_shards
            .min(config.cache_pages / MIN_STRIPE_PAGES)
            .max(1);
        let base = config.cache_pages / stripe_count;
        let extra = config.cache_pages % stripe_count;

        let hasher = RandomState::new();
        let stripes = (0..stripe_count)
            .map(|i| {
                let pages = base + usize::from(i < extra);
                let capacity = NonZeroUsize::new(pages).ok_or_else(|| {
                    DocumentError::Config("cache stripe would hold no pages".to_string())
                })?;
                Ok(Mutex::new(LruCache::with_hasher(capacity, hasher.clone())))
            })
            .collect::<Result<Vec<_>>>()?;

        let length = source.len().unwrap_or(UNKNOWN_LENGTH);
        debug!(
            "Page store over {}: page_size={}, capacity={}, stripes={}",
            source.describe(),
            config.page_size,
            config.cache_pages,
            stripe_count
        );

        Ok(PageStore {
            source,
            page_size: config.page_size,
            capacity: config.cache_pages,
            stripes,
            length: AtomicU64::new(length),
            counters: Counters::default(),
        })
    }

    /// Create a page store with default configuration
    pub fn with_defaults(source: Arc<dyn Source>) -> Result<Self> {
        Self::new(source, &DocumentConfig::default())
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Source length, if known or already discovered
    pub fn length(&self) -> Option<u64> {
        match self.length.load(Ordering::Acquire) {
            UNKNOWN_LENGTH => {
                let len = self.source.len()?;
                self.length.store(len, Ordering::Release);
                Some(len)
            }
            len => Some(len),
        }
    }

    /// Source length, searching the source if it is not known yet
    ///
    /// Loads pages at exponentially growing indices until one comes
    /// back empty, then bisects down to the last non-empty page.
    pub fn resolve_length(&self) -> Result<u64> {
        if let Some(len) = self.length() {
            return Ok(len);
        }
        debug!("Searching for the length of {}", self.source.describe());

        if !self.page_exists(0)? {
            self.length.store(0, Ordering::Release);
            return Ok(0);
        }

        let mut present = 0u64;
        let mut absent = 1u64;
        while self.page_exists(absent)? {
            if let Some(len) = self.length() {
                return Ok(len);
            }
            present = absent;
            absent = absent.checked_mul(2).ok_or_else(|| {
                DocumentError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "source did not report an end",
                ))
            })?;
        }

        while absent - present > 1 {
            if let Some(len) = self.length() {
                return Ok(len);
            }
            let mid = present + (absent - present) / 2;
            if self.page_exists(mid)? {
                present = mid;
            } else {
                absent = mid;
            }
        }

        let last = self.get(present)?;
        let len = last.start_offset(self.page_size) + last.len() as u64;
        self.length.store(len, Ordering::Release);
        debug!("Resolved length of {}: {} bytes", self.source.describe(), len);
        Ok(len)
    }

    fn page_exists(&self, index: u64) -> Result<bool> {
        match self.get(index) {
            Ok(_) => Ok(true),
            Err(DocumentError::OutOfRange { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn stripe(&self, index: u64) -> &Stripe {
        &self.stripes[(index % self.stripes.len() as u64) as usize]
    }

    /// Fetch a page, loading it from the source on a miss
    pub fn get(&self, index: u64) -> Result<Arc<Page>> {
        let start = index
            .checked_mul(self.page_size as u64)
            .ok_or_else(|| DocumentError::out_of_range(u64::MAX, self.page_size as u64, 0))?;
        if let Some(len) = self.length() {
            if start >= len {
                return Err(DocumentError::out_of_range(start, self.page_size as u64, len));
            }
        }

        let slot = {
            let mut pages = self.stripe(index).lock();
            let cached = pages.get(&index).cloned();
            match cached {
                Some(slot) => slot,
                None => {
                    let slot: Slot = Arc::new(OnceCell::new());
                    if let Some((evicted, _)) = pages.push(index, slot.clone()) {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                        trace!("Evicted page {}", evicted);
                    }
                    slot
                }
            }
        };

        if let Some(page) = slot.get() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page.clone());
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        match slot.get_or_try_init(|| self.load(index)) {
            Ok(page) => Ok(page.clone()),
            Err(e) => {
                let mut pages = self.stripe(index).lock();
                if pages.peek(&index).is_some_and(|cached| Arc::ptr_eq(cached, &slot)) {
                    pages.pop(&index);
                }
                Err(e)
            }
        }
    }

    fn load(&self, index: u64) -> Result<Arc<Page>> {
        let offset = index * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size];
        let mut filled = 0;

        while filled < buf.len() {
            match self.source.read_at(offset + filled as u64, &mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to load page {} from {}: {}", index, self.source.describe(), e);
                    return Err(e.into());
                }
            }
        }

        if filled < self.page_size && (filled > 0 || index == 0) {
            // A short page is the tail; its end is the source length
            self.length.store(offset + filled as u64, Ordering::Release);
        }
        if filled == 0 {
            let bound = self.length().unwrap_or(offset);
            return Err(DocumentError::out_of_range(offset, self.page_size as u64, bound));
        }

        buf.truncate(filled);
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        trace!("Loaded page {} ({} bytes)", index, filled);
        Ok(Arc::new(Page::new(index, buf)))
    }

    /// Copy `buf.len()` bytes starting at `offset`
    ///
    /// Pages are fetched one at a time; a caller abandoning a large read
    /// between calls leaves every loaded page validly cached.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| DocumentError::out_of_range(offset, buf.len() as u64, u64::MAX))?;
        if let Some(len) = self.length() {
            if end > len {
                return Err(DocumentError::out_of_range(offset, buf.len() as u64, len));
            }
        }

        let page_size = self.page_size as u64;
        let mut pos = offset;
        let mut copied = 0;
        while copied < buf.len() {
            let page = self.get(pos / page_size)?;
            let within = (pos % page_size) as usize;
            if within >= page.len() {
                let bound = page.start_offset(self.page_size) + page.len() as u64;
                return Err(DocumentError::out_of_range(offset, buf.len() as u64, bound));
            }
            let count = (page.len() - within).min(buf.len() - copied);
            buf[copied..copied + count].copy_from_slice(&page.data()[within..within + count]);
            copied += count;
            pos += count as u64;
        }
        Ok(())
    }

    /// Drop cached pages overlapping a byte range
    ///
    /// Used when the source changed underneath, e.g. the file was modified
    /// externally.
    pub fn invalidate(&self, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        let page_size = self.page_size as u64;
        let first = range.start / page_size;
        let last = (range.end - 1) / page_size;

        let mut dropped = 0;
        for stripe in &self.stripes {
            let mut pages = stripe.lock();
            let stale: Vec<u64> = pages
                .iter()
                .map(|(index, _)| *index)
                .filter(|index| (first..=last).contains(index))
                .collect();
            for index in stale {
                pages.pop(&index);
                dropped += 1;
            }
        }
        debug!("Invalidated {} pages in {:?}", dropped, range);
    }

    /// Drop every cached page and forget any discovered length
    pub fn clear(&self) {
        for stripe in &self.stripes {
            stripe.lock().clear();
        }
        self.length
            .store(self.source.len().unwrap_or(UNKNOWN_LENGTH), Ordering::Release);
        debug!("Cleared page cache for {}", self.source.describe());
    }

    /// True if the page is loaded and resident
    pub fn contains(&self, index: u64) -> bool {
        self.stripe(index)
            .lock()
            .peek(&index)
            .is_some_and(|slot| slot.get().is_some())
    }

    /// Number of pages currently held
    pub fn resident(&self) -> usize {
        self.stripes.iter().map(|stripe| stripe.lock().len()).sum()
    }

    /// Maximum resident pages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get page store statistics
    pub fn stats(&self) -> PageStoreStats {
        PageStoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            resident: self.resident(),
            capacity: self.capacity(),
            page_size: self.page_size,
        }
    }
}

impl fmt::Debug for PageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStore")
            .field("source", &self.source.describe())
            .field("page_size", &self.page_size)
            .field("length", &self.length())
            .field("capacity", &self.capacity())
            .finish()
    }
}
