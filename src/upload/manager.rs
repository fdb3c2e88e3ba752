//! # Upload Manager
//!
//! The long-running connect/upload/backoff loop.
//!
//! ## Startup
//!
//! 1. Wait for the data session (keep-alive pulses while waiting)
//! 2. Initialise the receiver and mark it ready
//! 3. Tell the reactive loop we are running, announce the track start
//!
//! ## Iteration
//!
//! 1. Degraded-fix watchdog: reset the receiver after a prolonged loss of fix
//! 2. Re-poll readiness; if ready, drain the cache file, then the buffer
//! 3. Success: low-power rest for the upload interval. Failure: retry delay
//!
//! The cache store lock is held for a whole attempt, so records appended
//! meanwhile queue up behind it and the cache file is always sent before newer
//! buffered records.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::transport::Transport;
use crate::cache::CacheStore;
use crate::config::settings::Settings;
use crate::config::ConfigHandle;
use crate::event::{Event, EventSender};
use crate::fix::receiver::{self, RebootMode, ReceiverControl};
use crate::fix::record::encode_announce;
use crate::network::Readiness;
use crate::platform::{HostWatchdog, NullReceiver, Watchdog};
use crate::status::DeviceStatus;

/// Shown while everything is up
pub const MSG_OK: &str = "OK.";

/// Shown after a successful upload
pub const MSG_RUN: &str = "Running";

/// Loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTiming {
    /// Pause after a failed attempt
    pub retry_delay: Duration,
    /// Keep-alive granularity
    pub pulse: Duration,
    /// Receiver output interval
    pub receiver_cadence: Duration,
    /// Pause between retried receiver calls
    pub receiver_retry_pause: Duration,
    /// Records without a usable fix before the receiver is reset
    pub no_fix_limit: u32,
}

impl UploadTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_delay: Duration::from_secs(u64::from(settings.upload.retry_delay_s)),
            pulse: Duration::from_secs(1),
            receiver_cadence: Duration::from_secs(u64::from(settings.receiver.fix_interval_s)),
            receiver_retry_pause: Duration::from_secs(1),
            no_fix_limit: settings.receiver.no_fix_limit(),
        }
    }
}

impl Default for UploadTiming {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailure {
    /// Not registered or no data session
    NotReady,
    /// Connect, send or storage failure
    Upload,
}

impl UploadFailure {
    /// Short reason shown on the status display
    pub fn reason(self) -> &'static str {
        match self {
            UploadFailure::NotReady => "register",
            UploadFailure::Upload => "upload",
        }
    }
}

/// Outcome of sending one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    /// Bytes from the start of the payload that were sent (whole lines only)
    pub sent: usize,
    /// Every line was sent
    pub complete: bool,
}

/// Sends a payload line by line over one session.
///
/// Each non-empty line goes out with a trailing newline. The session is closed
/// after the last line or the first failure; `sent` then marks where the unsent
/// remainder (including the failed line) starts.
pub async fn transmit(transport: &dyn Transport, host: &str, port: u16, payload: &[u8]) -> Transmission {
    if payload.is_empty() {
        return Transmission { sent: 0, complete: true };
    }

    let mut session = match transport.connect(host, port).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Socket connect fail ip:{}, port:{}: {}", host, port, e);
            return Transmission { sent: 0, complete: false };
        }
    };

    let mut sent = 0;
    for line in payload.split_inclusive(|b| *b == b'\n') {
        let body = line.strip_suffix(b"\n").unwrap_or(line);
        if !body.is_empty() {
            let mut framed = Vec::with_capacity(body.len() + 1);
            framed.extend_from_slice(body);
            framed.push(b'\n');
            if let Err(e) = session.send_line(&framed).await {
                warn!("socket write fail: {}", e);
                session.close().await;
                return Transmission { sent, complete: false };
            }
        }
        sent += line.len();
    }

    session.close().await;
    debug!("Sent {} bytes to {}:{}", sent, host, port);
    Transmission { sent, complete: true }
}

/// Owner of the connect/upload/backoff cycle
pub struct UploadManager {
    cache: Arc<Mutex<CacheStore>>,
    transport: Arc<dyn Transport>,
    readiness: Readiness,
    config: ConfigHandle,
    status: DeviceStatus,
    timing: UploadTiming,
    receiver: Arc<dyn ReceiverControl>,
    watchdog: Arc<dyn Watchdog>,
    events: Option<EventSender>,
    imei: String,
}

impl UploadManager {
    pub fn new(
        cache: Arc<Mutex<CacheStore>>,
        transport: Arc<dyn Transport>,
        readiness: Readiness,
        config: ConfigHandle,
        status: DeviceStatus,
        timing: UploadTiming,
    ) -> Self {
        Self {
            cache,
            transport,
            readiness,
            config,
            status,
            timing,
            receiver: Arc::new(NullReceiver),
            watchdog: Arc::new(HostWatchdog),
            events: None,
            imei: String::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: Arc<dyn ReceiverControl>) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn with_watchdog(mut self, watchdog: Arc<dyn Watchdog>) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Reactive loop queue, told when startup completes
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_imei(mut self, imei: impl Into<String>) -> Self {
        self.imei = imei.into();
        self
    }

    /// Runs forever.
    pub async fn run(mut self) {
        self.start().await;
        loop {
            self.iteration().await;
        }
    }

    /// Startup sequence: wait for data, initialise the receiver, announce.
    pub async fn start(&mut self) {
        self.status.set_message("GPRS Connect");
        info!("Wait for GPRS activation");
        while !self.readiness.is_ready().await {
            self.keep_alive_for(self.timing.pulse).await;
        }
        info!("GPRS connected");
        self.status.set_message("Connected");

        self.status.set_message("GPS Start");
        self.initialise_receiver().await;

        self.status.set_message(MSG_RUN);
        if let Some(events) = &self.events {
            if events.send(Event::Running).is_err() {
                warn!("Reactive loop gone");
            }
        }

        let announce = encode_announce(&self.imei);
        let (host, port) = self.collector();
        let sent = transmit(self.transport.as_ref(), &host, port, announce.as_bytes()).await;
        if !sent.complete {
            warn!("Track start announcement failed");
        }
    }

    /// One pass of the loop, including its trailing sleep.
    ///
    /// Returns the attempt outcome.
    pub async fn iteration(&mut self) -> Result<(), UploadFailure> {
        if self.status.fix() && self.status.active() && self.status.registered() {
            self.status.set_message(MSG_OK);
        }

        self.check_fix_watchdog().await;

        let outcome = if self.readiness.is_ready().await {
            self.upload_once().await
        } else {
            Err(UploadFailure::NotReady)
        };

        match outcome {
            Ok(()) => {
                self.status.set_message(MSG_RUN);
                let interval = Duration::from_secs(u64::from(self.config.get().upload_interval));
                debug!("Sleep (slow) for {:?}", interval);
                self.watchdog.set_low_power(true);
                self.keep_alive_for(interval).await;
                self.watchdog.set_low_power(false);
                tokio::time::sleep(self.timing.pulse).await;
            }
            Err(failure) => {
                info!("failed, retry in {:?}", self.timing.retry_delay);
                self.status.set_message(format!("Fail retry\n({})", failure.reason()));
                self.keep_alive_for(self.timing.retry_delay).await;
            }
        }
        outcome
    }

    /// Drains the cache file, then the buffer, under the cache lock.
    pub async fn upload_once(&self) -> Result<(), UploadFailure> {
        let (host, port) = self.collector();
        if host.is_empty() {
            warn!("No collector address configured");
            return Err(UploadFailure::Upload);
        }

        let mut cache = self.cache.lock().await;

        match cache.read_cache_file() {
            Ok(Some(data)) => {
                debug!("Uploading {} cached bytes", data.len());
                let sent = transmit(self.transport.as_ref(), &host, port, &data).await;
                record_sent(&mut cache, &data[..sent.sent]);
                if !sent.complete {
                    if let Err(e) = cache.restore_cache_file(&data[sent.sent..]) {
                        error!("Unable to rewrite cache: {}", e);
                    }
                    return Err(UploadFailure::Upload);
                }
                if let Err(e) = cache.delete_cache_file() {
                    error!("Unable to delete delivered cache: {}", e);
                    return Err(UploadFailure::Upload);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Unable to read cache: {}", e);
                return Err(UploadFailure::Upload);
            }
        }

        if cache.buffer().is_empty() {
            return Ok(());
        }

        let data = cache.take_buffer();
        debug!("Uploading {} buffered bytes", data.len());
        let sent = transmit(self.transport.as_ref(), &host, port, &data).await;
        record_sent(&mut cache, &data[..sent.sent]);
        if !sent.complete {
            cache.requeue(&data[sent.sent..]);
            info!("Unable to upload from RAM");
            return Err(UploadFailure::Upload);
        }
        Ok(())
    }

    /// Resets the receiver after a prolonged loss of fix.
    ///
    /// Cold (forgetting the last position) if no fix was ever acquired this
    /// session, warm otherwise.
    pub async fn check_fix_watchdog(&self) -> Option<RebootMode> {
        if self.status.no_fix_count() <= self.timing.no_fix_limit {
            return None;
        }

        self.status.set_display_on(true);
        self.status.set_message("Reboot GPS...");

        let mode = if self.status.fix_count() == 0 {
            info!("Never fix, COLD GPS reboot");
            {
                let mut cache = self.cache.lock().await;
                if let Err(e) = cache.clear_position() {
                    warn!("Unable to clear saved position: {}", e);
                }
            }
            if let Err(e) = self.receiver.reboot(RebootMode::Cold).await {
                warn!("GPS reboot failed: {}", e);
            }
            self.initialise_receiver().await;
            RebootMode::Cold
        } else {
            info!("Previous fixed, WARM GPS reboot");
            if let Err(e) = self.receiver.reboot(RebootMode::Warm).await {
                warn!("GPS reboot failed: {}", e);
            }
            RebootMode::Warm
        };

        self.status.reset_no_fix();
        Some(mode)
    }

    async fn initialise_receiver(&self) {
        let state = self.cache.lock().await.persisted_state();
        receiver::initialise(
            self.receiver.as_ref(),
            &self.status,
            &state,
            self.timing.receiver_cadence,
            self.timing.receiver_retry_pause,
        )
        .await;
    }

    /// Collector address, preferring the resolved numeric address.
    fn collector(&self) -> (String, u16) {
        let config = self.config.get();
        let host = if config.server_ip.is_empty() {
            config.server
        } else {
            config.server_ip
        };
        (host, config.port)
    }

    /// Sleeps for `duration`, pulsing the watchdog every `pulse`.
    async fn keep_alive_for(&self, duration: Duration) {
        let mut remaining = duration;
        loop {
            self.watchdog.keep_alive();
            if remaining.is_zero() {
                break;
            }
            let step = remaining.min(self.timing.pulse);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }
}

fn record_sent(cache: &mut CacheStore, sent: &[u8]) {
    if let Err(e) = cache.append_permanent_log(sent) {
        warn!("SaveToSDLog failed: {}", e);
    }
}
