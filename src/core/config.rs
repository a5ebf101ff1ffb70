//! Document configuration
//!
//! Tunables for paging, caching, search windows and undo history.
//! Every field has a default, so a config file only needs the keys it
//! wants to change:
//!
//! ```toml
//! page_size = 16384
//! cache_pages = 512
//! undo_depth = 200
//! ```

use crate::core::error::{DocumentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CACHE_PAGES: usize = 256;
pub const DEFAULT_CACHE_SHARDS: usize = 8;
pub const DEFAULT_SEARCH_WINDOW: usize = 64 * 1024;
pub const DEFAULT_UNDO_DEPTH: usize = 1024;
pub const DEFAULT_UNDO_MAX_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_COMPACT_THRESHOLD: usize = 1024 * 1024;

/// Configuration shared by the page store, document, history and search cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Page size in bytes (power of two)
    pub page_size: usize,

    /// Maximum number of pages kept resident
    pub cache_pages: usize,

    /// Most lock stripes in the page index; small caches use fewer so each
    /// stripe keeps a useful share of `cache_pages`
    pub cache_shards: usize,

    /// Bytes read per search step
    pub search_window: usize,

    /// Maximum number of undoable operations
    pub undo_depth: usize,

    /// Maximum payload bytes held by undoable operations
    pub undo_max_bytes: usize,

    /// Fold an insert or overwrite that continues the previous one into a
    /// single undo step
    pub merge_edits: bool,

    /// Insertion buffer size at which unreachable bytes are reclaimed
    /// (0 disables compaction until save)
    pub compact_threshold: usize,

    /// Map files into memory instead of reading through a file handle
    pub use_mmap: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            cache_shards: DEFAULT_CACHE_SHARDS,
            search_window: DEFAULT_SEARCH_WINDOW,
            undo_depth: DEFAULT_UNDO_DEPTH,
            undo_max_bytes: DEFAULT_UNDO_MAX_BYTES,
            merge_edits: true,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            use_mmap: false,
        }
    }
}

impl DocumentConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: DocumentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: DocumentConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, choosing JSON for `.json` and TOML otherwise
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Serialize as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DocumentError::Config(e.to_string()))
    }

    /// Validate all fields
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(DocumentError::Config(format!(
                "page_size must be a power of two between {} and {}, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.cache_pages == 0 {
            return Err(DocumentError::Config(
                "cache_pages must be at least 1".to_string(),
            ));
        }
        if self.cache_shards == 0 {
            return Err(DocumentError::Config(
                "cache_shards must be at least 1".to_string(),
            ));
        }
        if self.search_window == 0 {
            return Err(DocumentError::Config(
                "search_window must be at least 1".to_string(),
            ));
        }
        if self.undo_depth == 0 {
            return Err(DocumentError::Config(
                "undo_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn with_cache_shards(mut self, cache_shards: usize) -> Self {
        self.cache_shards = cache_shards;
        self
    }

    pub fn with_search_window(mut self, search_window: usize) -> Self {
        self.search_window = search_window;
        self
    }

    pub fn with_undo_depth(mut self, undo_depth: usize) -> Self {
        self.undo_depth = undo_depth;
        self
    }

    pub fn with_undo_max_bytes(mut self, undo_max_bytes: usize) -> Self {
        self.undo_max_bytes = undo_max_bytes;
        self
    }

    pub fn with_merge_edits(mut self, merge_edits: bool) -> Self {
        self.merge_edits = merge_edits;
        self
    }

    pub fn with_compact_threshold(mut self, compact_threshold: usize) -> Self {
        self.compact_threshold = compact_threshold;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DocumentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.merge_edits);
        assert!(!config.use_mmap);
    }

    #[test]
    fn test_partial_toml() {
        let config = DocumentConfig::from_toml_str("page_size = 16384\nundo_depth = 10\n").unwrap();
        assert_eq!(config.page_size, 16384);
        assert_eq!(config.undo_depth, 10);
        assert_eq!(config.cache_pages, DEFAULT_CACHE_PAGES);
    }

    #[test]
    fn test_json() {
        let config = DocumentConfig::from_json_str(r#"{"cache_pages": 3, "use_mmap": true}"#).unwrap();
        assert_eq!(config.cache_pages, 3);
        assert!(config.use_mmap);
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let result = DocumentConfig::from_toml_str("page_size = 1000");
        assert!(matches!(result, Err(DocumentError::Config(_))));

        let result = DocumentConfig::default().with_page_size(256).validate();
        assert!(matches!(result, Err(DocumentError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_cache() {
        let result = DocumentConfig::default().with_cache_pages(0).validate();
        assert!(matches!(result, Err(DocumentError::Config(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = DocumentConfig::from_toml_str("page_size = \"big\"");
        assert!(matches!(result, Err(DocumentError::Config(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = DocumentConfig::default()
            .with_cache_pages(7)
            .with_merge_edits(false)
            .with_compact_threshold(0)
            .with_mmap(true);
        let text = config.to_toml_string().unwrap();
        assert_eq!(DocumentConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let toml_path = dir.path().join("deltapage.toml");
        std::fs::write(&toml_path, "cache_pages = 9").unwrap();
        assert_eq!(DocumentConfig::load(&toml_path).unwrap().cache_pages, 9);

        let json_path = dir.path().join("deltapage.json");
        std::fs::write(&json_path, r#"{"cache_pages": 11}"#).unwrap();
        assert_eq!(DocumentConfig::load(&json_path).unwrap().cache_pages, 11);
    }
}
