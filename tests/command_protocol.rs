//! Text command protocol through the reactive loop.

use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};

use telemetry_tracker::app::{App, AppParts};
use telemetry_tracker::cache::{self, CacheStore, PERMANENT_LOG};
use telemetry_tracker::command::CommandProcessor;
use telemetry_tracker::config::{Config, ConfigHandle, ConfigStore, CONFIG_FILE_NAME};
use telemetry_tracker::error::Result;
use telemetry_tracker::event::{self, Event};
use telemetry_tracker::fix::FixProcessor;
use telemetry_tracker::network::{ConnectivityTracker, NetworkStack, PdpContext};
use telemetry_tracker::platform::{Battery, BatteryLevel, Lifecycle, PowerAction};
use telemetry_tracker::status::DeviceStatus;
use telemetry_tracker::storage::{FsStorage, Storage};
use telemetry_tracker::timer::TimerService;

/// Network stack recording activation requests
#[derive(Default)]
struct RecordingNetwork {
    activations: StdMutex<Vec<PdpContext>>,
}

#[async_trait]
impl NetworkStack for RecordingNetwork {
    async fn attach_status(&self) -> Result<bool> {
        Ok(true)
    }

    async fn attach(&self) -> Result<()> {
        Ok(())
    }

    async fn activate(&self, context: &PdpContext) -> Result<()> {
        self.activations.lock().unwrap().push(context.clone());
        Ok(())
    }

    async fn poll_active(&self) -> Result<bool> {
        Ok(false)
    }

    async fn resolve(&self, host: &str) -> Result<String> {
        Ok(host.to_string())
    }
}

struct MainsPower;

impl Battery for MainsPower {
    fn level(&self) -> BatteryLevel {
        BatteryLevel {
            millivolts: 0,
            percent: 100,
        }
    }
}

struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn execute(&self, _action: PowerAction) {}
}

struct Harness {
    _dir: TempDir,
    storage: Arc<FsStorage>,
    config: ConfigHandle,
    network: Arc<RecordingNetwork>,
    app: App,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
    let status = DeviceStatus::new();
    let config = ConfigHandle::new(Config::default());
    let config_store = ConfigStore::new(storage.clone(), config.clone());
    config_store.load_or_bootstrap(Config::default()).unwrap();

    let mut store = CacheStore::new(storage.clone(), 1024, 64 * 1024, status.clone());
    store.load();
    let (cache, _worker) = cache::worker::spawn(Arc::new(Mutex::new(store)));
    let (events, _events_rx) = event::channel();
    let network = Arc::new(RecordingNetwork::default());
    let battery: Arc<dyn Battery> = Arc::new(MainsPower);

    let commands = CommandProcessor::new(
        config_store,
        network.clone(),
        cache.clone(),
        storage.clone(),
        status.clone(),
        TimerService::new(events.clone()),
    )
    .with_battery(battery.clone());

    let app = App::new(AppParts {
        status: status.clone(),
        config: config.clone(),
        cache,
        fixes: FixProcessor::new("000000000000000", 10),
        tracker: ConnectivityTracker::new(network.clone(), config.clone(), status),
        commands,
        timers: TimerService::new(events),
        battery,
        lifecycle: Arc::new(NoopLifecycle),
    });

    Harness {
        _dir: dir,
        storage,
        config,
        network,
        app,
    }
}

async fn send(app: &mut App, text: &str) -> Option<String> {
    let (reply, mut rx) = mpsc::unbounded_channel();
    app.dispatch(Event::Command {
        text: text.to_string(),
        reply,
    })
    .await;
    rx.try_recv()
        .ok()
        .map(|bytes| String::from_utf8(bytes).unwrap())
}

fn stored_config(storage: &FsStorage) -> Config {
    let text = String::from_utf8(storage.read(CONFIG_FILE_NAME).unwrap().unwrap()).unwrap();
    Config::parse(&text, Config::default())
}

#[tokio::test]
async fn test_apn_command_persists_and_reactivates() {
    let mut h = harness();

    let reply = send(&mut h.app, "apn foo bar baz").await.unwrap();

    assert!(reply.contains("foo"));
    let config = h.config.get();
    assert_eq!(config.apn, "foo");
    assert_eq!(config.apn_user, "bar");
    assert_eq!(config.apn_password, "baz");

    let stored = stored_config(&h.storage);
    assert_eq!((stored.apn, stored.apn_user, stored.apn_password), ("foo".into(), "bar".into(), "baz".into()));

    let activations = h.network.activations.lock().unwrap();
    assert_eq!(activations.len(), 1);
    assert_eq!(activations[0].apn, "foo");
}

#[tokio::test]
async fn test_frq_command_sets_intervals() {
    let mut h = harness();

    let reply = send(&mut h.app, "frq 60 600").await.unwrap();

    assert_eq!(reply, "Times updated: 60 600");
    assert_eq!(h.config.get().gps_interval, 60);
    assert_eq!(h.config.get().upload_interval, 600);
    assert_eq!(stored_config(&h.storage).upload_interval, 600);
}

#[tokio::test]
async fn test_unknown_command_gets_no_reply() {
    let mut h = harness();
    assert_eq!(send(&mut h.app, "bogus").await, None);
}

#[tokio::test]
async fn test_help_is_case_insensitive() {
    let mut h = harness();
    let reply = send(&mut h.app, "HELP").await.unwrap();
    assert!(reply.starts_with("Commands:"));
}

#[tokio::test]
async fn test_log_streams_sent_records() {
    let mut h = harness();
    h.storage.append(PERMANENT_LOG, b"*IVR,a#\n*IVR,b#\n").unwrap();

    let reply = send(&mut h.app, "log").await.unwrap();

    assert_eq!(reply, "*IVR,a#\n*IVR,b#\n");
}

#[tokio::test]
async fn test_empty_log_sends_nothing() {
    let mut h = harness();
    assert_eq!(send(&mut h.app, "log").await, None);
}
