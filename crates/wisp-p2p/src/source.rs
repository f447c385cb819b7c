use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// A sliceable byte source, supplied by the sender (mirrors the "file-like
/// source with size and sliceable byte ranges" used by the hosted upload
/// path too).
#[async_trait]
pub trait FileSource: Send + Sync {
    fn size(&self) -> u64;
    async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

/// Where the receiver delivers bytes as they arrive, in order.
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn write(&self, data: &[u8]) -> std::io::Result<()>;
}

/// An in-memory [`FileSource`], handy for tests and small transfers.
pub struct MemorySource(Vec<u8>);

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
}

#[async_trait]
impl FileSource for MemorySource {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = offset as usize;
        let end = (start + len).min(self.0.len());
        Ok(self.0[start..end].to_vec())
    }
}

/// A [`FileSource`] reading directly from disk, for hosts that don't want
/// to hold the whole file in memory. One shared seek position, guarded by
/// a mutex, since reads are sequential (the upload/P2P engines never
/// issue concurrent `read_range` calls against the same source).
pub struct DiskFileSource {
    file: Mutex<tokio::fs::File>,
    size: u64,
}

impl DiskFileSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

#[async_trait]
impl FileSource for DiskFileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }
}

/// An in-memory [`DataSink`] backed by a mutex, handy for tests.
#[derive(Default)]
pub struct MemorySink(tokio::sync::Mutex<Vec<u8>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn into_inner(self) -> Vec<u8> {
        self.0.into_inner()
    }

    pub async fn snapshot(&self) -> Vec<u8> {
        self.0.lock().await.clone()
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        self.0.lock().await.extend_from_slice(data);
        Ok(())
    }
}
