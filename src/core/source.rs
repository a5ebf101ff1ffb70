//! Backing byte sources
//!
//! A [`Source`] is an immutable, randomly addressable provider of bytes.
//! The page store is the only component that reads from it. Length may be
//! unknown up front (sequential streams); the page store discovers it by
//! reading ahead until pages come back empty.

use parking_lot::Mutex;
use memmap2::{Mmap, MmapOptions};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable random-access byte provider
pub trait Source: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`
    ///
    /// Returns the number of bytes read. Zero means `offset` is at or past
    /// the end. A short count does not imply end of data; callers loop.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length, if known
    fn len(&self) -> Option<u64>;

    /// Short label used in log output
    fn describe(&self) -> String {
        "source".to_string()
    }
}

impl fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({})", self.describe())
    }
}

/// In-memory buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new<D: Into<Arc<[u8]>>>(data: D) -> Self {
        MemorySource { data: data.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        MemorySource::new(data)
    }
}

impl From<&[u8]> for MemorySource {
    fn from(data: &[u8]) -> Self {
        MemorySource::new(data)
    }
}

impl Source for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn describe(&self) -> String {
        format!("memory:{}b", self.data.len())
    }
}

/// File read through a shared handle
///
/// Reads are positional, so concurrent readers never wait on each other.
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
    // No positional read here; seek and read must stay paired
    #[cfg(not(any(unix, windows)))]
    cursor: Mutex<()>,
}

impl FileSource {
    /// Open a file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(FileSource {
            file,
            path: path.as_ref().to_path_buf(),
            len,
            #[cfg(not(any(unix, windows)))]
            cursor: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_file_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_file_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_file_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::{Seek, SeekFrom};
        let _guard = self.cursor.lock();
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

impl Source for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let wanted = buf.len().min((self.len - offset) as usize);
        loop {
            match self.read_file_at(offset, &mut buf[..wanted]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Memory-mapped file
pub struct MmapSource {
    // Zero-length files cannot be mapped
    mmap: Option<Mmap>,
    path: PathBuf,
}

impl MmapSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: the map is read-only; truncation of the file by another
            // process is the host's responsibility, as with any mapped file
            Some(unsafe { MmapOptions::new().map(&file)? })
        };
        Ok(MmapSource {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl Source for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.bytes();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    fn len(&self) -> Option<u64> {
        Some(self.bytes().len() as u64)
    }

    fn describe(&self) -> String {
        format!("mmap:{}", self.path.display())
    }
}

struct StreamState<R> {
    reader: R,
    consumed: Vec<u8>,
    eof: bool,
}

/// Sequential reader exposed as a random-access source
///
/// Bytes are pulled from the reader on demand and retained, so every
/// offset stays addressable after it has been reached once. The length is
/// unknown until the reader reports end of data.
pub struct StreamSource<R> {
    state: Mutex<StreamState<R>>,
    chunk_size: usize,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, 64 * 1024)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        StreamSource {
            state: Mutex::new(StreamState {
                reader,
                consumed: Vec::new(),
                eof: false,
            }),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Bytes pulled from the reader so far
    pub fn buffered(&self) -> u64 {
        self.state.lock().consumed.len() as u64
    }
}

impl<R: Read + Send> Source for StreamSource<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let wanted = offset.saturating_add(buf.len() as u64);
        // Pull straight into the retained buffer; nothing is allocated when
        // the range is already buffered
        while !state.eof && (state.consumed.len() as u64) < wanted {
            let filled = state.consumed.len();
            state.consumed.resize(filled + self.chunk_size, 0);
            let result = state.reader.read(&mut state.consumed[filled..]);
            let pulled = match &result {
                Ok(n) => *n,
                Err(_) => 0,
            };
            state.consumed.truncate(filled + pulled);
            match result {
                Ok(0) => state.eof = true,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let have = state.consumed.len() as u64;
        if offset >= have {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(state.consumed.len() - start);
        buf[..count].copy_from_slice(&state.consumed[start..start + count]);
        Ok(count)
    }

    fn len(&self) -> Option<u64> {
        let state = self.state.lock();
        if state.eof {
            Some(state.consumed.len() as u64)
        } else {
            None
        }
    }

    fn describe(&self) -> String {
        "stream".to_string()
    }
}

type ReadFn = dyn Fn(u64, &mut [u8]) -> io::Result<usize> + Send + Sync;

/// Closure-backed accessor, e.g. a debugger memory range
pub struct FnSource {
    read: Box<ReadFn>,
    len: Option<u64>,
    label: String,
}

impl FnSource {
    pub fn new<F>(len: Option<u64>, read: F) -> Self
    where
        F: Fn(u64, &mut [u8]) -> io::Result<usize> + Send + Sync + 'static,
    {
        FnSource {
            read: Box::new(read),
            len,
            label: "accessor".to_string(),
        }
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = label.into();
        self
    }
}

impl Source for FnSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(len) = self.len {
            if offset >= len {
                return Ok(0);
            }
            let remaining = (len - offset).min(buf.len() as u64) as usize;
            return (self.read)(offset, &mut buf[..remaining]);
        }
        (self.read)(offset, buf)
    }

    fn len(&self) -> Option<u64> {
        self.len
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
