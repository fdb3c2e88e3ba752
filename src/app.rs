//! # Reactive Loop
//!
//! Serially dispatches [`Event`]s: every dispatch runs to completion before the
//! next event is taken, so handlers never preempt each other.
//!
//! Cache mutations go through the [`CacheHandle`] and never wait on an upload in
//! progress.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::cache::CacheHandle;
use crate::command::{CommandProcessor, Reply};
use crate::config::ConfigHandle;
use crate::event::{Event, EventReceiver, KeyEvent, ReplySender, TimerKind};
use crate::fix::protocol::RawFix;
use crate::fix::FixProcessor;
use crate::input::{KeyAction, PowerKeyTracker, TICK_INTERVAL};
use crate::logging::escape_log;
use crate::network::ConnectivityTracker;
use crate::platform::{Battery, Lifecycle, PowerAction};
use crate::status::DeviceStatus;
use crate::timer::TimerService;

/// Everything the reactive loop owns or shares
pub struct AppParts {
    pub status: DeviceStatus,
    pub config: ConfigHandle,
    pub cache: CacheHandle,
    pub fixes: FixProcessor,
    pub tracker: ConnectivityTracker,
    pub commands: CommandProcessor,
    pub timers: TimerService,
    pub battery: Arc<dyn Battery>,
    pub lifecycle: Arc<dyn Lifecycle>,
}

/// The reactive event handler
pub struct App {
    status: DeviceStatus,
    config: ConfigHandle,
    cache: CacheHandle,
    fixes: FixProcessor,
    tracker: ConnectivityTracker,
    commands: CommandProcessor,
    timers: TimerService,
    battery: Arc<dyn Battery>,
    lifecycle: Arc<dyn Lifecycle>,
    power_key: PowerKeyTracker,
}

impl App {
    pub fn new(parts: AppParts) -> Self {
        Self {
            status: parts.status,
            config: parts.config,
            cache: parts.cache,
            fixes: parts.fixes,
            tracker: parts.tracker,
            commands: parts.commands,
            timers: parts.timers,
            battery: parts.battery,
            lifecycle: parts.lifecycle,
            power_key: PowerKeyTracker::new(),
        }
    }

    /// Dispatches events until every sender is gone.
    pub async fn run(mut self, mut events: EventReceiver) {
        info!("Reactive loop started");
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("Reactive loop stopped");
    }

    /// Handles one event to completion.
    pub async fn dispatch(&mut self, event: Event) {
        match event {
            Event::Fix(raw) => self.on_fix(&raw),
            Event::Network(event) => {
                debug!("Network event {:?}", event);
                self.tracker.handle(event).await;
            }
            Event::Command { text, reply } => self.on_command(&text, &reply).await,
            Event::Key(key) => self.on_key(key),
            Event::Timer(kind) => self.on_timer(kind).await,
            Event::Running => {
                let screen_time = Duration::from_secs(u64::from(self.config.get().screen_time));
                self.timers.schedule(TimerKind::ScreenOff, screen_time);
            }
        }
    }

    fn on_fix(&mut self, raw: &RawFix) {
        if !self.status.receiver_ready() {
            trace!("Receiver not ready, fix ignored");
            return;
        }

        let interval = self.config.get().gps_interval;
        let battery = self.battery.level();
        let outcome = self.fixes.process(raw, interval, battery.percent, &self.status);

        if let Some(state) = outcome.snapshot {
            if let Err(e) = self.cache.update_state(state) {
                warn!("Unable to update position: {}", e);
            }
        }
        if let Some(record) = outcome.record {
            if let Err(e) = self.cache.append(record) {
                warn!("Unable to cache record: {}", e);
            }
        }
    }

    async fn on_command(&mut self, text: &str, reply_tx: &ReplySender) {
        let mut reply = Reply::new();
        if !self.commands.handle(text, &mut reply).await {
            debug!("Unhandled command '{}'", escape_log(text));
            return;
        }
        if self.commands.take_reactivation() {
            self.tracker.activate().await;
        }
        if reply.is_empty() {
            return;
        }
        if reply_tx.send(reply.into_bytes()).is_err() {
            warn!("Reply channel closed");
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.power_key.on_key(key) {
            self.timers.schedule(TimerKind::PowerKeyTick, TICK_INTERVAL);
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        self.timers.fired(kind);
        match kind {
            TimerKind::PowerOff => self.shutdown(PowerAction::PowerOff).await,
            TimerKind::Reboot => self.shutdown(PowerAction::Reboot).await,
            TimerKind::ScreenOff => {
                debug!("Screen timeout");
                self.status.set_display_on(false);
            }
            TimerKind::PowerKeyTick => self.on_key_tick().await,
        }
    }

    async fn on_key_tick(&mut self) {
        let action = self.power_key.tick();
        match action {
            KeyAction::Wait | KeyAction::Reset => {}
            KeyAction::Countdown(seconds) => {
                self.status.set_display_on(true);
                self.status.set_message(format!("Power off in {}", seconds));
            }
            KeyAction::PowerOff => {
                self.status.set_display_on(true);
                self.status.set_message("Power off!");
                self.shutdown(PowerAction::PowerOff).await;
            }
            KeyAction::ToggleDisplay => {
                let on = !self.status.display_on();
                self.status.set_display_on(on);
            }
        }
        if action.keep_ticking() {
            self.timers.schedule(TimerKind::PowerKeyTick, TICK_INTERVAL);
        }
    }

    /// Saves unsent records, then hands over to the platform.
    async fn shutdown(&mut self, action: PowerAction) {
        info!("{:?} requested", action);
        if let Err(e) = self.cache.flush().await {
            warn!("Unable to store buffer before {:?}: {}", action, e);
        }
        if action == PowerAction::PowerOff {
            self.status.set_display_on(false);
        }
        self.lifecycle.execute(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, CacheStore, CACHE_FILE};
    use crate::config::{Config, ConfigStore};
    use crate::event;
    use crate::fix::protocol::{FixDate, FixTime, ScaledValue};
    use crate::network::{ConnectivityPhase, MockNetworkStack, NetworkEvent};
    use crate::platform::BatteryLevel;
    use crate::storage::{FsStorage, Storage};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, Mutex};

    struct FullBattery;

    impl Battery for FullBattery {
        fn level(&self) -> BatteryLevel {
            BatteryLevel {
                millivolts: 4100,
                percent: 100,
            }
        }
    }

    #[derive(Default)]
    struct RecordingLifecycle {
        actions: StdMutex<Vec<PowerAction>>,
    }

    impl Lifecycle for RecordingLifecycle {
        fn execute(&self, action: PowerAction) {
            self.actions.lock().unwrap().push(action);
        }
    }

    struct Fixture {
        _dir: TempDir,
        storage: Arc<FsStorage>,
        store: Arc<Mutex<CacheStore>>,
        status: DeviceStatus,
        lifecycle: Arc<RecordingLifecycle>,
        app: App,
    }

    fn fixture(network: MockNetworkStack) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsStorage::open(dir.path()).unwrap());
        let status = DeviceStatus::new();
        let config = ConfigHandle::new(Config {
            gps_interval: 10,
            ..Config::default()
        });
        let store = Arc::new(Mutex::new(CacheStore::new(storage.clone(), 1024, 4096, status.clone())));
        let (cache, _worker) = cache::worker::spawn(store.clone());
        let (events, _events_rx) = event::channel();
        let network: Arc<MockNetworkStack> = Arc::new(network);
        let lifecycle = Arc::new(RecordingLifecycle::default());

        let commands = CommandProcessor::new(
            ConfigStore::new(storage.clone(), config.clone()),
            network.clone(),
            cache.clone(),
            storage.clone(),
            status.clone(),
            TimerService::new(events.clone()),
        )
        .with_battery(Arc::new(FullBattery));

        let app = App::new(AppParts {
            status: status.clone(),
            config: config.clone(),
            cache,
            fixes: FixProcessor::new("123456789012345", 10),
            tracker: ConnectivityTracker::new(network, config, status.clone()),
            commands,
            timers: TimerService::new(events),
            battery: Arc::new(FullBattery),
            lifecycle: lifecycle.clone(),
        });

        Fixture {
            _dir: dir,
            storage,
            store,
            status,
            lifecycle,
            app,
        }
    }

    fn good_fix() -> RawFix {
        RawFix {
            gsa_fix_types: vec![3],
            fix_quality: 1,
            satellites_tracked: 8,
            latitude: ScaledValue::new(51_301_234, 10_000),
            longitude: ScaledValue::new(-7_200, 10_000),
            date: FixDate { year: 24, month: 5, day: 17 },
            time: FixTime { hours: 12, minutes: 30, seconds: 5 },
            ..RawFix::default()
        }
    }

    #[tokio::test]
    async fn test_fix_ignored_until_receiver_ready() {
        let mut f = fixture(MockNetworkStack::new());

        f.app.dispatch(Event::Fix(good_fix())).await;
        f.app.cache.flush().await.unwrap();

        assert!(f.store.lock().await.buffer().is_empty());
        assert_eq!(f.status.fix_count(), 0);
    }

    #[tokio::test]
    async fn test_fix_is_buffered_and_snapshot_kept() {
        let mut f = fixture(MockNetworkStack::new());
        f.status.set_receiver_ready(true);

        f.app.dispatch(Event::Fix(good_fix())).await;
        // Flush waits for the worker, so the append has landed
        f.app.cache.flush().await.unwrap();

        let cached = f.storage.read(CACHE_FILE).unwrap().unwrap();
        let text = String::from_utf8(cached).unwrap();
        assert!(text.starts_with("*IVR,123456789012345,240517123005,"));
        assert!(text.ends_with("#\n"));
        assert!(f.store.lock().await.persisted_state().has_position());
    }

    #[tokio::test]
    async fn test_command_reply_sent_to_origin() {
        let mut f = fixture(MockNetworkStack::new());
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        f.app
            .dispatch(Event::Command {
                text: "frq 60 600".to_string(),
                reply: reply_tx.clone(),
            })
            .await;
        f.app
            .dispatch(Event::Command {
                text: "bogus".to_string(),
                reply: reply_tx,
            })
            .await;

        assert_eq!(reply_rx.try_recv().unwrap(), b"Times updated: 60 600".to_vec());
        assert!(reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_apn_command_activates_through_tracker() {
        let mut network = MockNetworkStack::new();
        network
            .expect_activate()
            .withf(|ctx| ctx.apn == "foo" && ctx.user == "bar" && ctx.password == "baz")
            .times(1)
            .returning(|_| Ok(()));
        let mut f = fixture(network);
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        f.app
            .dispatch(Event::Command {
                text: "apn foo bar baz".to_string(),
                reply: reply_tx,
            })
            .await;

        assert_eq!(reply_rx.try_recv().unwrap(), b"APN updated: foo".to_vec());
        assert_eq!(f.app.tracker.phase(), ConnectivityPhase::Activating);
    }

    #[tokio::test]
    async fn test_network_events_reach_tracker() {
        let mut network = MockNetworkStack::new();
        network.expect_attach_status().returning(|| Ok(false));
        network.expect_attach().times(1).returning(|| Ok(()));
        let mut f = fixture(network);

        f.app
            .dispatch(Event::Network(NetworkEvent::Registered { roaming: false }))
            .await;

        assert!(f.status.registered());
    }

    #[tokio::test]
    async fn test_power_off_timer_flushes_first() {
        let mut f = fixture(MockNetworkStack::new());
        f.store.lock().await.append(b"A\n");

        f.app.dispatch(Event::Timer(TimerKind::PowerOff)).await;

        assert_eq!(f.storage.read(CACHE_FILE).unwrap().unwrap(), b"A\n");
        assert_eq!(*f.lifecycle.actions.lock().unwrap(), vec![PowerAction::PowerOff]);
        assert!(!f.status.display_on());
    }

    #[tokio::test]
    async fn test_screen_timeout_turns_display_off() {
        let mut f = fixture(MockNetworkStack::new());
        assert!(f.status.display_on());

        f.app.dispatch(Event::Timer(TimerKind::ScreenOff)).await;

        assert!(!f.status.display_on());
    }

    #[tokio::test]
    async fn test_short_press_toggles_display() {
        let mut f = fixture(MockNetworkStack::new());

        f.app.dispatch(Event::Key(KeyEvent::PowerDown)).await;
        f.app.dispatch(Event::Key(KeyEvent::PowerUp)).await;
        f.app.dispatch(Event::Timer(TimerKind::PowerKeyTick)).await;

        assert!(!f.status.display_on());
        assert!(f.lifecycle.actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_long_press_powers_off() {
        let mut f = fixture(MockNetworkStack::new());

        f.app.dispatch(Event::Key(KeyEvent::PowerDown)).await;
        for _ in 0..4 {
            f.app.dispatch(Event::Timer(TimerKind::PowerKeyTick)).await;
        }
        assert_eq!(f.status.message(), "Power off in 4");

        for _ in 0..8 {
            f.app.dispatch(Event::Timer(TimerKind::PowerKeyTick)).await;
        }
        assert_eq!(*f.lifecycle.actions.lock().unwrap(), vec![PowerAction::PowerOff]);
    }
}
