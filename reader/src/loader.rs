//! Sources of bytes for [`crate::PagedReader`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::trace;

/// Fetches byte ranges from somewhere: a buffer, a file, a network resource.
///
/// Loaders do no caching. [`crate::PagedReader`] owns the cache.
#[async_trait(?Send)]
pub trait Loader {
    /// Total size of the source in bytes. This is authoritative; readers over this loader never
    /// report a larger size.
    fn size(&self) -> u64;

    /// Fetches `offset..offset + len`. The result is clamped to the end of the source, so it may
    /// be shorter than `len`.
    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
}

/// Serves reads from an in-memory buffer.
pub struct BufferLoader {
    data: Arc<[u8]>,
    reads: RefCell<Vec<(u64, u64)>>,
}

impl BufferLoader {
    /// Takes ownership of `data`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            reads: Default::default(),
        }
    }

    /// Number of calls to [`Loader::read`] so far.
    pub fn read_count(&self) -> usize {
        self.reads.borrow().len()
    }

    /// The `(offset, len)` of every read so far, in call order.
    pub fn reads(&self) -> Vec<(u64, u64)> {
        self.reads.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Loader for BufferLoader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.reads.borrow_mut().push((offset, len));

        let size = self.data.len() as u64;
        let start = offset.min(size);
        let end = offset.saturating_add(len).min(size);
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}

/// Reads byte ranges from a file on disk.
pub struct FileLoader {
    file: tokio::sync::Mutex<tokio::fs::File>,
    size: u64,
}

impl FileLoader {
    /// Opens `path` for reading.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
            size,
        })
    }
}

#[async_trait(?Send)]
impl Loader for FileLoader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let start = offset.min(self.size);
        let end = offset.saturating_add(len).min(self.size);
        trace!(offset = start, len = end - start, "FileLoader::read");

        let mut buf = vec![0u8; (end - start) as usize];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
