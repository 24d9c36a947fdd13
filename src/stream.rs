//! Chunked input sources.
//!
//! The analyzer consumes uploads as a pull stream of chunks so detection
//! can run on the first chunk and cancel the transfer before the body
//! finishes arriving. [`BytesSource`] adapts an in-memory buffer (and gives
//! tests deterministic chunk boundaries); [`FileSource`] reads from disk
//! through tokio.

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::Result;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A pull source of upload chunks. `cancel` tells the producer the rest of
/// the body is unwanted; implementations stop yielding afterwards.
pub trait ChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
    async fn cancel(&mut self) -> Result<()>;
}

/// One upload: declared name and size plus its chunk source.
#[derive(Debug)]
pub struct FileInput<S> {
    pub name: String,
    pub size: u64,
    pub source: S,
}

impl<S: ChunkSource> FileInput<S> {
    pub fn new(name: impl Into<String>, size: u64, source: S) -> Self {
        Self {
            name: name.into(),
            size,
            source,
        }
    }
}

/// In-memory source, chunked at a fixed size.
#[derive(Debug)]
pub struct BytesSource {
    data: Bytes,
    pos: usize,
    chunk_size: usize,
    cancelled: bool,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_chunk_size(data, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            chunk_size: chunk_size.max(1),
            cancelled: false,
        }
    }
}

impl ChunkSource for BytesSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.cancelled || self.pos >= self.data.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(Some(chunk))
    }

    async fn cancel(&mut self) -> Result<()> {
        self.cancelled = true;
        Ok(())
    }
}

/// File-backed source reading fixed-size chunks.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    chunk_size: usize,
    cancelled: bool,
}

impl FileSource {
    /// Opens `path` and wraps it in a [`FileInput`] named after the file.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<FileInput<FileSource>> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(%name, size, "opened file source");
        Ok(FileInput::new(
            name,
            size,
            Self {
                file,
                chunk_size: DEFAULT_CHUNK_SIZE,
                cancelled: false,
            },
        ))
    }
}

impl ChunkSource for FileSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.cancelled {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.chunk_size];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    async fn cancel(&mut self) -> Result<()> {
        self.cancelled = true;
        Ok(())
    }
}
