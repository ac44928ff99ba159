//! Byte-oriented readers that fill a buffer a bounded block at a time.
//!
//! A reader never hands out partial ownership: the state machine polls it
//! until [`AsyncReader::is_complete`] and then takes the whole buffer.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::error::LoadError;

/// Default number of bytes read per poll.
pub const DEFAULT_READ_BLOCK: usize = 64 * 1024;

/// A source of bytes that makes bounded progress on each poll.
pub trait AsyncReader {
    /// Read at most one block. Returns the number of newly available bytes.
    ///
    /// `Ok(0)` means "nothing new since the last poll", not end of file;
    /// end of file is reported through [`is_complete`](Self::is_complete).
    fn poll(&mut self) -> Result<usize, LoadError>;

    /// All bytes buffered so far.
    fn available(&self) -> &[u8];

    /// Whether the whole source has been buffered.
    fn is_complete(&self) -> bool;

    /// Take the buffered bytes, leaving the reader empty.
    fn take(&mut self) -> Vec<u8>;

    /// Stop reading and release the source. Idempotent.
    fn cancel(&mut self);
}

// ── FileReader ──────────────────────────────────────────────────────

/// Reads a file from disk one block per poll.
#[derive(Debug)]
pub struct FileReader {
    file: Option<File>,
    expected: u64,
    data: Vec<u8>,
    block_size: usize,
    complete: bool,
}

impl FileReader {
    /// Open `path` and reserve a buffer for its full length.
    ///
    /// Issues no reads; the first byte arrives on the first [`poll`](AsyncReader::poll).
    pub fn open(path: &Path, block_size: usize) -> Result<Self, LoadError> {
        let open_failed = |source| LoadError::IoOpenFailed {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_failed)?;
        let len = file.metadata().map_err(open_failed)?.len();
        Self::from_file(file, len, block_size)
    }

    pub(crate) fn from_file(file: File, expected: u64, block_size: usize) -> Result<Self, LoadError> {
        let len = usize::try_from(expected)
            .map_err(|_| LoadError::ContextAllocFailed(format!("file of {expected} bytes")))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| LoadError::ContextAllocFailed(e.to_string()))?;
        Ok(Self {
            file: Some(file),
            expected,
            data,
            block_size: block_size.max(1),
            complete: false,
        })
    }

    /// File length reported when the file was opened.
    pub fn expected_len(&self) -> u64 {
        self.expected
    }
}

impl AsyncReader for FileReader {
    fn poll(&mut self) -> Result<usize, LoadError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let start = self.data.len();
        let remaining = usize::try_from(self.expected)
            .unwrap_or(usize::MAX)
            .saturating_sub(start);
        let read = if remaining > 0 {
            // stays within the capacity reserved at open
            self.data.resize(start + self.block_size.min(remaining), 0);
            let result = read_retrying(file, &mut self.data[start..]);
            self.data.truncate(start + result.as_ref().copied().unwrap_or(0));
            result?
        } else {
            // the file grew since open, or this poll confirms end of file
            let mut spill = [0u8; 4096];
            let len = self.block_size.min(spill.len());
            let n = read_retrying(file, &mut spill[..len])?;
            self.data
                .try_reserve(n)
                .map_err(|e| LoadError::ContextAllocFailed(e.to_string()))?;
            self.data.extend_from_slice(&spill[..n]);
            n
        };
        if read == 0 {
            self.complete = true;
            self.file = None;
        }
        Ok(read)
    }

    fn available(&self) -> &[u8] {
        &self.data
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    fn cancel(&mut self) {
        self.file = None;
    }
}

fn read_retrying(file: &mut File, buf: &mut [u8]) -> Result<usize, LoadError> {
    loop {
        match file.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(LoadError::Read(e)),
        }
    }
}

// ── MemoryReader ────────────────────────────────────────────────────

/// Serves an in-memory buffer one block per poll.
///
/// Useful for embedded assets and for driving the state machine in tests;
/// [`with_stall`](Self::with_stall) makes the first polls report no data.
#[derive(Clone, Debug)]
pub struct MemoryReader {
    source: Vec<u8>,
    served: usize,
    block_size: usize,
    stall_polls: usize,
    cancelled: bool,
}

impl MemoryReader {
    pub fn new(source: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            served: 0,
            block_size: DEFAULT_READ_BLOCK,
            stall_polls: 0,
            cancelled: false,
        }
    }

    /// Serve at most `block_size` bytes per poll.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Report no progress for the first `polls` polls.
    ///
    /// `usize::MAX` models a source that never makes progress.
    pub fn with_stall(mut self, polls: usize) -> Self {
        self.stall_polls = polls;
        self
    }
}

impl AsyncReader for MemoryReader {
    fn poll(&mut self) -> Result<usize, LoadError> {
        if self.cancelled {
            return Ok(0);
        }
        if self.stall_polls > 0 {
            self.stall_polls -= 1;
            return Ok(0);
        }
        let n = self.block_size.min(self.source.len() - self.served);
        self.served += n;
        Ok(n)
    }

    fn available(&self) -> &[u8] {
        &self.source[..self.served]
    }

    fn is_complete(&self) -> bool {
        !self.cancelled && self.served == self.source.len()
    }

    fn take(&mut self) -> Vec<u8> {
        self.source.truncate(self.served);
        self.served = 0;
        std::mem::take(&mut self.source)
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    struct TempFile(PathBuf);

    impl TempFile {
        fn new(name: &str, bytes: &[u8]) -> Self {
            let path = std::env::temp_dir()
                .join(format!("zenload-reader-{}-{name}", std::process::id()));
            std::fs::write(&path, bytes).unwrap();
            Self(path)
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn drain(r: &mut FileReader) {
        for _ in 0..10_000 {
            r.poll().unwrap();
            if r.is_complete() {
                return;
            }
        }
        panic!("reader never completed");
    }

    #[test]
    fn file_reader_stays_within_reservation() {
        let bytes: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let file = TempFile::new("blocks.bin", &bytes);
        let mut r = FileReader::open(&file.0, 4096).unwrap();
        let reserved = r.data.capacity();
        assert!(reserved >= bytes.len());
        drain(&mut r);
        assert_eq!(r.data.capacity(), reserved);
        assert_eq!(r.take(), bytes);
    }

    #[test]
    fn huge_block_size_reads_whole_file() {
        let file = TempFile::new("tiny.bin", b"hello");
        let mut r = FileReader::open(&file.0, usize::MAX).unwrap();
        assert_eq!(r.poll().unwrap(), 5);
        assert!(!r.is_complete());
        assert_eq!(r.poll().unwrap(), 0);
        assert!(r.is_complete());
        assert_eq!(r.available(), b"hello");
        assert_eq!(r.expected_len(), 5);
    }

    #[test]
    fn empty_file_completes_on_first_poll() {
        let file = TempFile::new("empty.bin", b"");
        let mut r = FileReader::open(&file.0, 16).unwrap();
        assert_eq!(r.poll().unwrap(), 0);
        assert!(r.is_complete());
        assert!(r.take().is_empty());
    }

    #[test]
    fn memory_reader_serves_blocks() {
        let mut r = MemoryReader::new(vec![1u8, 2, 3, 4, 5]).with_block_size(2);
        assert_eq!(r.poll().unwrap(), 2);
        assert!(!r.is_complete());
        assert_eq!(r.poll().unwrap(), 2);
        assert_eq!(r.poll().unwrap(), 1);
        assert!(r.is_complete());
        assert_eq!(r.available(), &[1, 2, 3, 4, 5]);
        assert_eq!(r.take(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn stalled_reader_reports_no_progress() {
        let mut r = MemoryReader::new(vec![9u8; 4]).with_stall(2);
        assert_eq!(r.poll().unwrap(), 0);
        assert_eq!(r.poll().unwrap(), 0);
        assert_eq!(r.poll().unwrap(), 4);
        assert!(r.is_complete());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut r = MemoryReader::new(vec![1u8; 8]).with_block_size(4);
        r.poll().unwrap();
        r.cancel();
        r.cancel();
        assert_eq!(r.poll().unwrap(), 0);
        assert!(!r.is_complete());
    }

    #[test]
    fn empty_source_completes_immediately() {
        let mut r = MemoryReader::new(Vec::new());
        assert_eq!(r.poll().unwrap(), 0);
        assert!(r.is_complete());
    }
}
