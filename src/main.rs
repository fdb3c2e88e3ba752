//! # Telemetry Tracker
//!
//! Store-and-forward GPS tracker for a Linux host.
//!
//! # Boot Sequence
//!
//! 1. **Initialization**
//!    - Load host settings (first argument, default `config/tracker.toml`)
//!    - Open the storage root, the serial console and the logging sinks
//!    - Load the record cache (creating the permanent log) and the device config
//!
//! 2. **Tasks**
//!    - Cache worker, upload loop, fix feed, console reader/writer, power key
//!    - The reactive loop runs on the main task
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C stops the loops and moves unsent records to the cache file
//!
//! A device config that can neither be read nor created is fatal: the status
//! shows "SD failure. Power off!!!" and the tracker powers off.
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/tracker.toml
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use telemetry_tracker::app::{App, AppParts};
use telemetry_tracker::cache::{self, CacheStore};
use telemetry_tracker::command::{CommandDelays, CommandProcessor};
use telemetry_tracker::config::settings::Settings;
use telemetry_tracker::config::{ConfigHandle, ConfigStore};
use telemetry_tracker::event::{self, EventSender};
use telemetry_tracker::fix::{FixProcessor, ReceiverControl};
use telemetry_tracker::input::spawn_power_key_source;
use telemetry_tracker::logging;
use telemetry_tracker::network::{ConnectivityTracker, Readiness};
use telemetry_tracker::platform::{
    run_fix_feed, Battery, HostNetwork, HostWatchdog, Lifecycle, NullReceiver, PowerAction, ProcessLifecycle,
    SerialReceiver, SysfsBattery,
};
use telemetry_tracker::serial::{run_console_reader, run_console_writer, TrackerSerial};
use telemetry_tracker::status::DeviceStatus;
use telemetry_tracker::storage::FsStorage;
use telemetry_tracker::timer::TimerService;
use telemetry_tracker::upload::{TcpTransport, UploadManager, UploadTiming};

/// Host settings used when no path is given
const DEFAULT_SETTINGS_PATH: &str = "config/tracker.toml";

/// How long the fatal boot message stays up before powering off
const FATAL_NOTICE_DELAY: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    let settings = Settings::load_or_default(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path))?;

    let storage = Arc::new(
        FsStorage::open(&settings.storage.root)
            .with_context(|| format!("Failed to open storage root {}", settings.storage.root))?,
    );

    // The console doubles as a log sink, so it opens before logging starts
    let console = if settings.console.enabled {
        match TrackerSerial::open_with_paths(&[settings.console.port.as_str()], settings.console.baud_rate) {
            Ok(serial) => Some(serial),
            Err(e) => {
                eprintln!("Console unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };
    let (console_tx, console_rx) = mpsc::unbounded_channel();
    let _log_guard = logging::init(storage.root(), console.as_ref().map(|_| console_tx.clone()));

    info!("Telemetry tracker v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Storage root: {}", settings.storage.root);

    let status = DeviceStatus::new();
    let lifecycle: Arc<dyn Lifecycle> = Arc::new(ProcessLifecycle);
    let battery: Arc<dyn Battery> = Arc::new(SysfsBattery::default());
    let (events_tx, events_rx) = event::channel();

    let mut store = CacheStore::new(
        storage.clone(),
        settings.storage.buffer_capacity,
        settings.storage.log_roll_size,
        status.clone(),
    );
    store.load();
    let store = Arc::new(Mutex::new(store));
    let (cache, cache_task) = cache::worker::spawn(store.clone());

    let config = ConfigHandle::new(settings.device.defaults.clone());
    let config_store = ConfigStore::new(storage.clone(), config.clone());
    match config_store.load_or_bootstrap(settings.device.defaults.clone()) {
        Ok(loaded) => logging::set_mask(loaded.log_level),
        Err(e) => {
            error!("Config failure: {}", e);
            status.set_display_on(true);
            status.set_message("SD failure. Power off!!!");
            tokio::time::sleep(FATAL_NOTICE_DELAY).await;
            if let Err(e) = cache.flush().await {
                error!("Unable to store buffer: {}", e);
            }
            lifecycle.execute(PowerAction::PowerOff);
            return Ok(());
        }
    }

    spawn_status_log(&status);

    let network = Arc::new(HostNetwork::new(events_tx.clone()));
    let receiver = open_receiver(&settings, &events_tx);

    if let Some(serial) = console {
        info!("Console on {}", serial.device_path());
        let (reader, writer) = serial.split();
        let events = events_tx.clone();
        let replies = console_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_console_reader(reader, events, replies).await {
                warn!("Console reader stopped: {}", e);
            }
        });
        tokio::spawn(run_console_writer(writer, console_rx));
    }

    if !settings.power.key_device.is_empty() {
        if let Err(e) = spawn_power_key_source(&settings.power.key_device, events_tx.clone()) {
            warn!("Power key disabled: {}", e);
        }
    }

    let transport = Arc::new(TcpTransport::new(
        Duration::from_millis(settings.upload.connect_timeout_ms),
        Duration::from_millis(settings.upload.send_timeout_ms),
    ));
    let upload = UploadManager::new(
        store.clone(),
        transport,
        Readiness::new(network.clone(), status.clone()),
        config.clone(),
        status.clone(),
        UploadTiming::from_settings(&settings),
    )
    .with_receiver(receiver)
    .with_watchdog(Arc::new(HostWatchdog))
    .with_events(events_tx.clone())
    .with_imei(settings.device.imei.clone());
    let upload_task = tokio::spawn(upload.run());

    let commands = CommandProcessor::new(
        config_store,
        network.clone(),
        cache.clone(),
        storage.clone(),
        status.clone(),
        TimerService::new(events_tx.clone()),
    )
    .with_battery(battery.clone())
    .with_delays(CommandDelays {
        action: Duration::from_millis(settings.power.action_delay_ms),
        wipe_restart: Duration::from_millis(settings.power.wipe_restart_delay_ms),
    });

    let app = App::new(AppParts {
        status: status.clone(),
        config: config.clone(),
        cache: cache.clone(),
        fixes: FixProcessor::new(settings.device.imei.clone(), settings.receiver.fix_interval_s),
        tracker: ConnectivityTracker::new(network.clone(), config.clone(), status.clone()),
        commands,
        timers: TimerService::new(events_tx.clone()),
        battery,
        lifecycle,
    });

    network.start().context("Failed to start network stack")?;
    drop(events_tx);

    info!("Press Ctrl+C to exit");
    tokio::select! {
        _ = app.run(events_rx) => {
            info!("All event sources closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    upload_task.abort();
    if let Err(e) = cache.flush().await {
        error!("Unable to store buffer: {}", e);
    }
    drop(cache);
    let _ = cache_task.await;
    info!("Shutdown complete");

    Ok(())
}

/// Opens the fix feed and returns the matching receiver control.
///
/// Without a configured or working port no fixes arrive and receiver control
/// requests are dropped.
fn open_receiver(settings: &Settings, events: &EventSender) -> Arc<dyn ReceiverControl> {
    if settings.receiver.port.is_empty() {
        info!("No receiver port configured");
        return Arc::new(NullReceiver);
    }

    match TrackerSerial::open_with_paths(&[settings.receiver.port.as_str()], settings.receiver.baud_rate) {
        Ok(serial) => {
            info!("Fix feed on {}", serial.device_path());
            let (reader, writer) = serial.split();
            let events = events.clone();
            tokio::spawn(async move {
                if let Err(e) = run_fix_feed(reader, events).await {
                    warn!("Fix feed stopped: {}", e);
                }
            });
            Arc::new(SerialReceiver::new(writer))
        }
        Err(e) => {
            warn!("Receiver unavailable: {}", e);
            Arc::new(NullReceiver)
        }
    }
}

/// Traces every status change, standing in for the status display.
fn spawn_status_log(status: &DeviceStatus) {
    let mut updates = status.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            debug!(
                "Status: mob {} dat {} gps {} sats {} dsk {} display {} '{}'",
                snapshot.registered,
                snapshot.active,
                snapshot.fix,
                snapshot.satellites,
                snapshot.disk_dirty,
                snapshot.display_on,
                logging::escape_log(&snapshot.message)
            );
        }
    });
}
