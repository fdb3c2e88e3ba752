//! Single-owner channel front-end for the [`CacheStore`].
//!
//! The reactive loop sends requests and moves on; the worker applies them in
//! order under the store lock. While the upload loop holds the lock, requests
//! simply queue up behind it.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{AppendOutcome, CacheStore};
use crate::error::{Result, TrackerError};
use crate::fix::protocol::PersistedState;

/// Requests handled by the cache worker
#[derive(Debug)]
pub enum CacheRequest {
    /// Buffer a wire record
    Append(String),
    /// Replace the last-known-position snapshot
    UpdateState(PersistedState),
    /// Clear logs (and all tracking data when `include_data`)
    Wipe { include_data: bool },
    /// Move the buffer to the cache file, reporting the result
    Flush(oneshot::Sender<Result<()>>),
}

/// Cloneable sender side of the cache worker.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    tx: mpsc::UnboundedSender<CacheRequest>,
}

impl CacheHandle {
    pub fn new(tx: mpsc::UnboundedSender<CacheRequest>) -> Self {
        Self { tx }
    }

    pub fn append(&self, record: String) -> Result<()> {
        self.send(CacheRequest::Append(record))
    }

    pub fn update_state(&self, state: PersistedState) -> Result<()> {
        self.send(CacheRequest::UpdateState(state))
    }

    pub fn wipe(&self, include_data: bool) -> Result<()> {
        self.send(CacheRequest::Wipe { include_data })
    }

    /// Flushes the buffer to the cache file and waits for the result.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(CacheRequest::Flush(reply))?;
        rx.await.map_err(|_| TrackerError::ChannelClosed("cache flush reply"))?
    }

    fn send(&self, request: CacheRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| TrackerError::ChannelClosed("cache worker"))
    }
}

/// Spawns the cache worker.
///
/// The worker exits when every [`CacheHandle`] has been dropped.
pub fn spawn(cache: Arc<Mutex<CacheStore>>) -> (CacheHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(cache, rx));
    (CacheHandle::new(tx), task)
}

/// Worker loop, applying requests in arrival order.
pub async fn run(cache: Arc<Mutex<CacheStore>>, mut rx: mpsc::UnboundedReceiver<CacheRequest>) {
    while let Some(request) = rx.recv().await {
        let mut store = cache.lock().await;
        match request {
            CacheRequest::Append(record) => {
                if store.append(record.as_bytes()) == AppendOutcome::Buffered {
                    debug!("Buffered {} bytes ({} total)", record.len(), store.buffer().len());
                }
            }
            CacheRequest::UpdateState(state) => store.update_state(state),
            CacheRequest::Wipe { include_data } => match store.wipe(include_data) {
                Ok(()) => info!("Storage wiped (data: {})", include_data),
                Err(e) => error!("Wipe failed: {}", e),
            },
            CacheRequest::Flush(reply) => {
                let _ = reply.send(store.flush_to_persistent());
            }
        }
    }
    debug!("Cache worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CACHE_FILE;
    use crate::status::DeviceStatus;
    use crate::storage::{FsStorage, Storage};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<FsStorage>, Arc<Mutex<CacheStore>>) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let store = CacheStore::new(storage.clone(), 64, 1024, DeviceStatus::new());
        (dir, storage, Arc::new(Mutex::new(store)))
    }

    #[tokio::test]
    async fn test_requests_applied_in_order() {
        let (_dir, storage, cache) = setup();
        let (handle, _task) = spawn(cache.clone());

        handle.append("A\n".to_string()).unwrap();
        handle.append("B\n".to_string()).unwrap();
        handle.flush().await.unwrap();

        assert_eq!(storage.read(CACHE_FILE).unwrap().unwrap(), b"A\nB\n");
        assert!(cache.lock().await.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_appends_queue_behind_held_lock() {
        let (_dir, _storage, cache) = setup();
        let (handle, _task) = spawn(cache.clone());

        let guard = cache.lock().await;
        handle.append("A\n".to_string()).unwrap();
        tokio::task::yield_now().await;
        assert!(guard.buffer().is_empty());
        drop(guard);

        let (reply, rx) = oneshot::channel();
        handle.send(CacheRequest::Flush(reply)).unwrap();
        rx.await.unwrap().unwrap();
        assert!(cache.lock().await.read_cache_file().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_worker_stops_when_handles_dropped() {
        let (_dir, _storage, cache) = setup();
        let (handle, task) = spawn(cache);
        drop(handle);
        tokio_test::assert_ok!(task.await);
    }
}
