//! Byte sources an upload reads its chunks from.

use crate::errors::UploadError;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Random-access, fixed-length byte source.
///
/// Reads are issued in ascending order by the uploader, but a restart after
/// session loss rewinds to offset 0, so implementations must support seeking.
#[async_trait::async_trait]
pub trait SequentialByteSource: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Whether the source has no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the half-open range `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Source` if the range is out of bounds or the
    /// underlying read fails.
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes, UploadError>;
}

fn check_range(start: u64, end: u64, len: u64) -> Result<(), UploadError> {
    if start > end || end > len {
        return Err(UploadError::Source(format!(
            "range {start}..{end} out of bounds for length {len}"
        )));
    }
    Ok(())
}

/// Source backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait::async_trait]
impl SequentialByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes, UploadError> {
        check_range(start, end, self.len())?;
        let start = usize::try_from(start).map_err(|e| UploadError::Source(e.to_string()))?;
        let end = usize::try_from(end).map_err(|e| UploadError::Source(e.to_string()))?;
        Ok(self.data.slice(start..end))
    }
}

/// Source backed by a file on disk.
///
/// The length is captured when the file is opened.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
    file: Mutex<File>,
}

impl FileSource {
    /// Open `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Source` if the file cannot be opened or stat'd.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(|e| UploadError::Source(format!("{}: {e}", path.display())))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| UploadError::Source(format!("{}: {e}", path.display())))?
            .len();

        Ok(Self {
            path,
            len,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl SequentialByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes, UploadError> {
        check_range(start, end, self.len)?;
        let size = usize::try_from(end - start).map_err(|e| UploadError::Source(e.to_string()))?;

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| UploadError::Source(format!("{}: {e}", self.path.display())))?;

        let mut buf = vec![0u8; size];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| UploadError::Source(format!("{}: {e}", self.path.display())))?;

        Ok(Bytes::from(buf))
    }
}
