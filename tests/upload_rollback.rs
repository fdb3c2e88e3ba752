//! Upload delivery through the public API: partial-failure rollback, cache file
//! ordering and the permanent log.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

use telemetry_tracker::cache::{CacheStore, CACHE_FILE, PERMANENT_LOG};
use telemetry_tracker::config::{Config, ConfigHandle};
use telemetry_tracker::error::{Result, TrackerError};
use telemetry_tracker::network::{NetworkStack, PdpContext, Readiness};
use telemetry_tracker::status::DeviceStatus;
use telemetry_tracker::storage::{FsStorage, Storage};
use telemetry_tracker::upload::{Transport, UploadFailure, UploadManager, UploadSession, UploadTiming};

/// Network whose data session state is set by the test
#[derive(Default)]
struct FakeNetwork {
    active: AtomicBool,
}

#[async_trait]
impl NetworkStack for FakeNetwork {
    async fn attach_status(&self) -> Result<bool> {
        Ok(true)
    }

    async fn attach(&self) -> Result<()> {
        Ok(())
    }

    async fn activate(&self, _context: &PdpContext) -> Result<()> {
        Ok(())
    }

    async fn poll_active(&self) -> Result<bool> {
        Ok(self.active.load(Ordering::SeqCst))
    }

    async fn resolve(&self, host: &str) -> Result<String> {
        Ok(host.to_string())
    }
}

/// Collector that records lines and can refuse one
#[derive(Clone, Default)]
struct FakeCollector {
    lines: Arc<StdMutex<Vec<String>>>,
    reject: Arc<StdMutex<Option<String>>>,
}

impl FakeCollector {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn reject(&self, line: Option<&str>) {
        *self.reject.lock().unwrap() = line.map(str::to_string);
    }
}

struct FakeSession(FakeCollector);

#[async_trait]
impl Transport for FakeCollector {
    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn UploadSession>> {
        Ok(Box::new(FakeSession(self.clone())))
    }
}

#[async_trait]
impl UploadSession for FakeSession {
    async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(line).trim_end().to_string();
        if self.0.reject.lock().unwrap().as_deref() == Some(text.as_str()) {
            return Err(TrackerError::Transport("connection reset".to_string()));
        }
        self.0.lines.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) {}
}

struct Harness {
    _dir: TempDir,
    storage: Arc<FsStorage>,
    store: Arc<Mutex<CacheStore>>,
    network: Arc<FakeNetwork>,
    collector: FakeCollector,
    manager: UploadManager,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
    let status = DeviceStatus::new();
    status.set_registered(true);
    status.set_active(true);

    let mut store = CacheStore::new(storage.clone(), 32, 64 * 1024, status.clone());
    store.load();
    let store = Arc::new(Mutex::new(store));

    let network = Arc::new(FakeNetwork::default());
    network.active.store(true, Ordering::SeqCst);
    let collector = FakeCollector::default();
    let config = ConfigHandle::new(Config {
        server: "collector.example.org".to_string(),
        ..Config::default()
    });

    let manager = UploadManager::new(
        store.clone(),
        Arc::new(collector.clone()),
        Readiness::new(network.clone(), status.clone()),
        config,
        status,
        UploadTiming {
            retry_delay: Duration::from_secs(60),
            pulse: Duration::from_secs(1),
            receiver_cadence: Duration::from_secs(10),
            receiver_retry_pause: Duration::ZERO,
            no_fix_limit: 60,
        },
    );

    Harness {
        _dir: dir,
        storage,
        store,
        network,
        collector,
        manager,
    }
}

#[tokio::test]
async fn test_failed_line_and_rest_are_requeued() {
    let h = harness();
    h.store.lock().await.append(b"A\nB\nC\n");
    h.collector.reject(Some("B"));

    assert_eq!(h.manager.upload_once().await, Err(UploadFailure::Upload));

    assert_eq!(h.store.lock().await.buffer().as_bytes(), b"B\nC\n");
    assert_eq!(h.collector.lines(), vec!["A"]);
    assert_eq!(h.storage.read(PERMANENT_LOG).unwrap().unwrap(), b"A\n");

    // The retry delivers the remainder in order
    h.collector.reject(None);
    assert_eq!(h.manager.upload_once().await, Ok(()));
    assert_eq!(h.collector.lines(), vec!["A", "B", "C"]);
    assert!(h.store.lock().await.buffer().is_empty());
    assert_eq!(h.storage.read(PERMANENT_LOG).unwrap().unwrap(), b"A\nB\nC\n");
}

#[tokio::test]
async fn test_overflowed_records_are_sent_before_buffer() {
    let h = harness();
    {
        let mut store = h.store.lock().await;
        // Capacity is 32 bytes: the third record pushes the first two to disk
        store.append(b"*IVR,first#\n");
        store.append(b"*IVR,second#\n");
        store.append(b"*IVR,third#\n");
    }
    assert_eq!(
        h.storage.read(CACHE_FILE).unwrap().unwrap(),
        b"*IVR,first#\n*IVR,second#\n"
    );

    assert_eq!(h.manager.upload_once().await, Ok(()));

    assert_eq!(h.collector.lines(), vec!["*IVR,first#", "*IVR,second#", "*IVR,third#"]);
    assert!(!h.storage.exists(CACHE_FILE));
}

#[tokio::test]
async fn test_cache_file_failure_keeps_newer_buffer_back() {
    let h = harness();
    h.storage.append(CACHE_FILE, b"old1\nold2\n").unwrap();
    h.store.lock().await.append(b"new\n");
    h.collector.reject(Some("old2"));

    assert_eq!(h.manager.upload_once().await, Err(UploadFailure::Upload));

    assert_eq!(h.collector.lines(), vec!["old1"]);
    assert_eq!(h.storage.read(CACHE_FILE).unwrap().unwrap(), b"old2\n");
    assert_eq!(h.store.lock().await.buffer().as_bytes(), b"new\n");
}

#[tokio::test(start_paused = true)]
async fn test_no_upload_without_confirmed_session() {
    let mut h = harness();
    h.store.lock().await.append(b"A\n");
    // Event flags still claim an active session, the poll disagrees
    h.network.active.store(false, Ordering::SeqCst);

    assert_eq!(h.manager.iteration().await, Err(UploadFailure::NotReady));

    assert!(h.collector.lines().is_empty());
    assert_eq!(h.store.lock().await.buffer().as_bytes(), b"A\n");
}
