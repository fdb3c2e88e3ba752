//! # Platform Collaborators
//!
//! Thin traits over the platform capabilities the core relies on (watchdog,
//! battery, power lifecycle) and the host implementations used by the binary:
//!
//! - [`HostNetwork`] - network stack adapter for a host that is always online
//! - [`SerialReceiver`] - receiver control as JSON lines on the fix feed port
//! - [`run_fix_feed`] - JSON-lines fix feed reader
//! - [`SysfsBattery`], [`HostWatchdog`], [`ProcessLifecycle`]

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TrackerError};
use crate::event::{Event, EventSender};
use crate::fix::protocol::RawFix;
use crate::fix::receiver::{FastFixHint, FixMode, LowPowerMode, RebootMode, ReceiverControl, SearchMode};
use crate::logging::escape_log;
use crate::network::{NetworkEvent, NetworkStack, PdpContext};
use crate::serial::SerialPortIO;

/// Process exit code requesting a power off from the supervisor
pub const EXIT_POWER_OFF: i32 = 0;

/// Process exit code requesting a restart from the supervisor
pub const EXIT_REBOOT: i32 = 75;

/// Hardware watchdog and CPU power control
pub trait Watchdog: Send + Sync {
    /// Must be called at least once a minute
    fn keep_alive(&self);

    /// Allows the system to drop to a lower-power mode
    fn set_low_power(&self, enabled: bool);
}

/// Battery reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryLevel {
    pub millivolts: u32,
    pub percent: u8,
}

pub trait Battery: Send + Sync {
    fn level(&self) -> BatteryLevel;
}

/// Deferred lifecycle actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    PowerOff,
    Reboot,
}

/// Executes lifecycle actions. Callers flush state first.
pub trait Lifecycle: Send + Sync {
    fn execute(&self, action: PowerAction);
}

/// Watchdog for a host without one: pulses are only traced.
#[derive(Debug, Default)]
pub struct HostWatchdog;

impl Watchdog for HostWatchdog {
    fn keep_alive(&self) {
        trace!("watchdog keep alive");
    }

    fn set_low_power(&self, enabled: bool) {
        debug!("Low power mode {}", if enabled { "on" } else { "off" });
    }
}

/// Battery read from a Linux `power_supply` class directory.
///
/// Hosts without a battery report 100% and 0 mV.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    dir: PathBuf,
}

impl SysfsBattery {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read_number(&self, name: &str) -> Option<u64> {
        std::fs::read_to_string(self.dir.join(name))
            .ok()
            .and_then(|text| text.trim().parse().ok())
    }
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new("/sys/class/power_supply/BAT0")
    }
}

impl Battery for SysfsBattery {
    fn level(&self) -> BatteryLevel {
        let percent = self.read_number("capacity").map(|p| p.min(100) as u8).unwrap_or(100);
        let millivolts = self
            .read_number("voltage_now")
            .map(|uv| (uv / 1000) as u32)
            .unwrap_or(0);
        BatteryLevel { millivolts, percent }
    }
}

/// Ends the process with an exit code the supervisor maps to the action.
#[derive(Debug, Default)]
pub struct ProcessLifecycle;

impl Lifecycle for ProcessLifecycle {
    fn execute(&self, action: PowerAction) {
        let code = match action {
            PowerAction::PowerOff => EXIT_POWER_OFF,
            PowerAction::Reboot => EXIT_REBOOT,
        };
        info!("{:?}, exiting with code {}", action, code);
        std::process::exit(code);
    }
}

/// Network stack adapter for a host with permanent connectivity.
///
/// Requests complete immediately and post the matching notification.
#[derive(Debug)]
pub struct HostNetwork {
    events: EventSender,
    active: AtomicBool,
}

impl HostNetwork {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            active: AtomicBool::new(false),
        }
    }

    /// Reports registration to start the connectivity sequence.
    pub fn start(&self) -> Result<()> {
        self.post(NetworkEvent::Registered { roaming: false })
    }

    fn post(&self, event: NetworkEvent) -> Result<()> {
        self.events
            .send(Event::Network(event))
            .map_err(|_| TrackerError::ChannelClosed("network events"))
    }
}

#[async_trait]
impl NetworkStack for HostNetwork {
    async fn attach_status(&self) -> Result<bool> {
        Ok(false)
    }

    async fn attach(&self) -> Result<()> {
        self.post(NetworkEvent::Attached)
    }

    async fn activate(&self, context: &PdpContext) -> Result<()> {
        debug!("Host data session (APN {} ignored)", context.apn);
        self.active.store(true, Ordering::SeqCst);
        self.post(NetworkEvent::Activated)
    }

    async fn poll_active(&self) -> Result<bool> {
        Ok(self.active.load(Ordering::SeqCst))
    }

    async fn resolve(&self, host: &str) -> Result<String> {
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| TrackerError::Network(format!("lookup {} failed: {}", host, e)))?;
        addrs
            .find(|addr| addr.is_ipv4())
            .map(|addr| addr.ip().to_string())
            .ok_or_else(|| TrackerError::Network(format!("no IPv4 address for {}", host)))
    }
}

/// Control command written to the receiver, one JSON object per line
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ReceiverCommand {
    FixMode { mode: &'static str },
    LowPower { mode: &'static str },
    SearchMode { gps: bool, glonass: bool, galileo: bool, beidou: bool },
    FastFix { latitude: f64, longitude: f64, altitude: f64, time: String },
    OutputInterval { ms: u64 },
    Reboot { mode: &'static str },
}

/// Receiver control over the fix feed serial port.
pub struct SerialReceiver<P: SerialPortIO> {
    port: Mutex<P>,
}

impl<P: SerialPortIO> SerialReceiver<P> {
    pub fn new(port: P) -> Self {
        Self { port: Mutex::new(port) }
    }

    async fn send(&self, command: ReceiverCommand) -> Result<()> {
        let mut line = serde_json::to_vec(&command)?;
        line.push(b'\n');
        let mut port = self.port.lock().await;
        port.write_all(&line)
            .await
            .map_err(|e| TrackerError::Receiver(format!("write failed: {}", e)))?;
        port.flush()
            .await
            .map_err(|e| TrackerError::Receiver(format!("flush failed: {}", e)))?;
        debug!("Receiver command {:?}", command);
        Ok(())
    }
}

#[async_trait]
impl<P: SerialPortIO + 'static> ReceiverControl for SerialReceiver<P> {
    async fn set_fix_mode(&self, mode: FixMode) -> Result<()> {
        let mode = match mode {
            FixMode::Normal => "normal",
            FixMode::Elevation => "elevation",
            FixMode::HighSpeed => "high_speed",
            FixMode::LowSpeed => "low_speed",
        };
        self.send(ReceiverCommand::FixMode { mode }).await
    }

    async fn set_low_power_mode(&self, mode: LowPowerMode) -> Result<()> {
        let mode = match mode {
            LowPowerMode::Normal => "normal",
            LowPowerMode::LowPower => "low_power",
            LowPowerMode::SuperLowPower => "super_low_power",
        };
        self.send(ReceiverCommand::LowPower { mode }).await
    }

    async fn set_search_mode(&self, mode: SearchMode) -> Result<()> {
        self.send(ReceiverCommand::SearchMode {
            gps: mode.gps,
            glonass: mode.glonass,
            galileo: mode.galileo,
            beidou: mode.beidou,
        })
        .await
    }

    async fn set_fast_fix_hint(&self, hint: FastFixHint) -> Result<()> {
        self.send(ReceiverCommand::FastFix {
            latitude: hint.latitude,
            longitude: hint.longitude,
            altitude: hint.altitude,
            time: hint.time.to_rfc3339(),
        })
        .await
    }

    async fn set_output_interval(&self, interval: Duration) -> Result<()> {
        self.send(ReceiverCommand::OutputInterval {
            ms: interval.as_millis() as u64,
        })
        .await
    }

    async fn reboot(&self, mode: RebootMode) -> Result<()> {
        let mode = match mode {
            RebootMode::Cold => "cold",
            RebootMode::Warm => "warm",
        };
        self.send(ReceiverCommand::Reboot { mode }).await
    }
}

/// Receiver stand-in when no fix feed is configured.
#[derive(Debug, Default)]
pub struct NullReceiver;

#[async_trait]
impl ReceiverControl for NullReceiver {
    async fn set_fix_mode(&self, _mode: FixMode) -> Result<()> {
        Ok(())
    }

    async fn set_low_power_mode(&self, _mode: LowPowerMode) -> Result<()> {
        Ok(())
    }

    async fn set_search_mode(&self, _mode: SearchMode) -> Result<()> {
        Ok(())
    }

    async fn set_fast_fix_hint(&self, _hint: FastFixHint) -> Result<()> {
        Ok(())
    }

    async fn set_output_interval(&self, _interval: Duration) -> Result<()> {
        Ok(())
    }

    async fn reboot(&self, mode: RebootMode) -> Result<()> {
        info!("No receiver to reboot ({:?})", mode);
        Ok(())
    }
}

/// Reads JSON fix records, one per line, and posts them to the reactive loop.
///
/// Unparseable or non-UTF-8 lines are logged and skipped. Returns at end of input.
///
/// # Errors
///
/// Returns error if the reader fails or the reactive loop has stopped.
pub async fn run_fix_feed<R: AsyncRead + Unpin>(reader: R, events: EventSender) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(_) => {
                warn!("Bad fix record '{}': not UTF-8", escape_log(&String::from_utf8_lossy(&buf)));
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawFix>(line) {
            Ok(raw) => events
                .send(Event::Fix(raw))
                .map_err(|_| TrackerError::ChannelClosed("fix events"))?,
            Err(e) => warn!("Bad fix record '{}': {}", escape_log(line), e),
        }
    }
    info!("Fix feed closed");
    Ok(())
}
