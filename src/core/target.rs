//! Save targets
//!
//! A [`SaveTarget`] receives the flattened content of a document and turns
//! it into the new backing [`Source`] once everything has been written.

use crate::core::source::{FileSource, MemorySource, MmapSource, Source};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Destination for a document save
pub trait SaveTarget {
    /// Append bytes in logical order
    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Finish writing and expose the result as a source
    ///
    /// Dropping a target without committing discards what was written.
    fn commit(self) -> io::Result<Arc<dyn Source>>;
}

/// Collects content in memory
#[derive(Debug, Default)]
pub struct MemoryTarget {
    buffer: Vec<u8>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        MemoryTarget { buffer: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryTarget {
            buffer: Vec::with_capacity(capacity),
        }
    }
}

impl SaveTarget for MemoryTarget {
    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(self) -> io::Result<Arc<dyn Source>> {
        Ok(Arc::new(MemorySource::from(self.buffer)))
    }
}

/// Writes to a temporary file next to the destination and renames it into
/// place on commit, so the destination is never left half-written
pub struct FileTarget {
    path: PathBuf,
    writer: BufWriter<NamedTempFile>,
    use_mmap: bool,
}

impl FileTarget {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        Ok(FileTarget {
            path,
            writer: BufWriter::new(temp),
            use_mmap: false,
        })
    }

    /// Reopen the committed file through a memory map
    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SaveTarget for FileTarget {
    fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn commit(self) -> io::Result<Arc<dyn Source>> {
        let temp = self.writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        if self.use_mmap {
            Ok(Arc::new(MmapSource::open(&self.path)?))
        } else {
            Ok(Arc::new(FileSource::open(&self.path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_source(source: &dyn Source) -> Vec<u8> {
        let len = source.len().unwrap() as usize;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = source.read_at(filled as u64, &mut buf[filled..]).unwrap();
            assert!(n > 0);
            filled += n;
        }
        buf
    }

    #[test]
    fn test_memory_target() {
        let mut target = MemoryTarget::new();
        target.write_chunk(b"abc").unwrap();
        target.write_chunk(b"def").unwrap();
        let source = target.commit().unwrap();
        assert_eq!(read_source(source.as_ref()), b"abcdef");
    }

    #[test]
    fn test_file_target_replaces_destination() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"old content").unwrap();

        let mut target = FileTarget::create(&path).unwrap();
        target.write_chunk(b"new").unwrap();

        // Destination untouched until commit
        assert_eq!(std::fs::read(&path).unwrap(), b"old content");

        let source = target.commit().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(read_source(source.as_ref()), b"new");
    }

    #[test]
    fn test_file_target_dropped_without_commit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("never.bin");

        let mut target = FileTarget::create(&path).unwrap();
        target.write_chunk(b"discarded").unwrap();
        drop(target);

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_file_target_mmap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mapped.bin");

        let mut target = FileTarget::create(&path).unwrap().with_mmap(true);
        target.write_chunk(&[7u8; 5000]).unwrap();
        let source = target.commit().unwrap();
        assert!(source.describe().starts_with("mmap:"));
        assert_eq!(read_source(source.as_ref()), vec![7u8; 5000]);
    }
}
