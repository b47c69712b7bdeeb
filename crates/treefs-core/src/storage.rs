//! Storage backends for TreeFS Core
//!
//! [`AsyncStore`] is the interface of a backend whose I/O completes on an
//! async runtime. [`BridgedStore`] puts a [`Bridge`] in front of one so that
//! regular files can read and write it synchronously.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::trace;

use crate::bridge::{abandoned, Bridge};
use crate::config::BridgeConfig;
use crate::error::{FsError, FsResult};
use crate::types::ContentId;

/// Largest size a file's content may grow to
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// End of the byte range `offset..offset + len`, bounded by [`MAX_FILE_SIZE`]
fn range_end(offset: u64, len: usize) -> FsResult<usize> {
    let len = u64::try_from(len).map_err(|_| FsError::InvalidArgument)?;
    let end = offset.checked_add(len).ok_or(FsError::InvalidArgument)?;
    if end > MAX_FILE_SIZE {
        return Err(FsError::NoSpace);
    }
    usize::try_from(end).map_err(|_| FsError::NoSpace)
}

/// Copy bytes of `content` starting at `offset` into `buf`
pub(crate) fn read_slice(content: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let start = match usize::try_from(offset) {
        Ok(start) if start < content.len() => start,
        _ => return 0,
    };

    let bytes_to_copy = std::cmp::min(buf.len(), content.len() - start);
    buf[..bytes_to_copy].copy_from_slice(&content[start..start + bytes_to_copy]);
    bytes_to_copy
}

/// Write `data` into `content` at `offset`, growing it as needed
pub(crate) fn write_slice(content: &mut Vec<u8>, offset: u64, data: &[u8]) -> FsResult<usize> {
    let end = range_end(offset, data.len())?;
    let start = end - data.len();

    if end > content.len() {
        content.resize(end, 0);
    }

    content[start..end].copy_from_slice(data);
    Ok(data.len())
}

/// Grow with zeros or shrink `content` to `new_len` bytes
pub(crate) fn resize_content(content: &mut Vec<u8>, new_len: u64) -> FsResult<()> {
    content.resize(range_end(new_len, 0)?, 0);
    Ok(())
}

/// Content storage whose operations complete asynchronously
#[async_trait]
pub trait AsyncStore: Send + Sync {
    async fn allocate(&self, initial: &[u8]) -> FsResult<ContentId>;
    async fn read(&self, id: ContentId, offset: u64, len: usize) -> FsResult<Vec<u8>>;
    async fn write(&self, id: ContentId, offset: u64, data: &[u8]) -> FsResult<usize>;
    async fn truncate(&self, id: ContentId, new_len: u64) -> FsResult<()>;
    async fn len(&self, id: ContentId) -> FsResult<u64>;
}

/// In-memory store, optionally delaying every operation to stand in for a
/// remote backend
pub struct MemoryStore {
    next_id: AtomicU64,
    data: Mutex<HashMap<ContentId, Vec<u8>>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            data: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncStore for MemoryStore {
    async fn allocate(&self, initial: &[u8]) -> FsResult<ContentId> {
        self.delay().await;
        let id = ContentId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.data.lock().insert(id, initial.to_vec());
        Ok(id)
    }

    async fn read(&self, id: ContentId, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        self.delay().await;
        let data = self.data.lock();
        let content = data.get(&id).ok_or(FsError::NotFound)?;
        let mut buf = vec![0u8; len];
        let n = read_slice(content, offset, &mut buf);
        buf.truncate(n);
        Ok(buf)
    }

    async fn write(&self, id: ContentId, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.delay().await;
        let mut storage_data = self.data.lock();
        let content = storage_data.get_mut(&id).ok_or(FsError::NotFound)?;
        write_slice(content, offset, data)
    }

    async fn truncate(&self, id: ContentId, new_len: u64) -> FsResult<()> {
        self.delay().await;
        let mut data = self.data.lock();
        let content = data.get_mut(&id).ok_or(FsError::NotFound)?;
        resize_content(content, new_len)
    }

    async fn len(&self, id: ContentId) -> FsResult<u64> {
        self.delay().await;
        let data = self.data.lock();
        let content = data.get(&id).ok_or(FsError::NotFound)?;
        Ok(content.len() as u64)
    }
}

/// Synchronous front for an [`AsyncStore`] driven by a tokio runtime.
///
/// Each call spawns the store operation on `runtime` and blocks until it
/// completes there. Calling it from one of that runtime's own threads can
/// starve the runtime; use it from plain threads.
pub struct BridgedStore {
    store: Arc<dyn AsyncStore>,
    runtime: Handle,
    bridge: Bridge,
}

impl BridgedStore {
    pub fn new(store: Arc<dyn AsyncStore>, runtime: Handle) -> FsResult<Self> {
        Self::with_config(store, runtime, &BridgeConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn AsyncStore>,
        runtime: Handle,
        config: &BridgeConfig,
    ) -> FsResult<Self> {
        Ok(Self {
            store,
            runtime,
            bridge: Bridge::with_config(config)?,
        })
    }

    fn run<T, F, Fut>(&self, op: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn AsyncStore>) -> Fut + Send + 'static,
        Fut: Future<Output = FsResult<T>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let runtime = self.runtime.clone();
        self.bridge
            .call(move |done| {
                runtime.spawn(async move {
                    done.complete(op(store).await);
                });
            })
            .unwrap_or_else(|| Err(FsError::Io(abandoned())))
    }

    pub fn allocate(&self, initial: &[u8]) -> FsResult<ContentId> {
        let initial = initial.to_vec();
        let id = self.run(move |store| async move { store.allocate(&initial).await })?;
        trace!("Allocated bridged content {:?}", id);
        Ok(id)
    }

    pub fn read(&self, id: ContentId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let len = buf.len();
        let bytes = self.run(move |store| async move { store.read(id, offset, len).await })?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    pub fn write(&self, id: ContentId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let data = data.to_vec();
        self.run(move |store| async move { store.write(id, offset, &data).await })
    }

    pub fn truncate(&self, id: ContentId, new_len: u64) -> FsResult<()> {
        self.run(move |store| async move { store.truncate(id, new_len).await })
    }

    pub fn len(&self, id: ContentId) -> FsResult<u64> {
        self.run(move |store| async move { store.len(id).await })
    }
}
