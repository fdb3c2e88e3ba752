//! # Command Processor
//!
//! Short text commands arriving on any inbound channel.
//!
//! | Command                      | Effect                                   |
//! |------------------------------|------------------------------------------|
//! | `help`                       | lists commands                           |
//! | `info`                       | data session, battery, fix, intervals    |
//! | `poweroff` / `reboot`        | scheduled after the action delay         |
//! | `apn <server> <user> <pwd>`  | new credentials, persisted, reactivates  |
//! | `frq <gps> <upload>`         | new intervals, persisted                 |
//! | `clear`                      | full wipe, then restart                  |
//! | `loglevel <mask>`            | log sink mask, persisted                 |
//! | `log`                        | streams the permanent log                |
//!
//! Matching is a case-insensitive prefix match; arguments are separated by
//! spaces, commas or newlines.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheHandle, PERMANENT_LOG};
use crate::config::ConfigStore;
use crate::event::TimerKind;
use crate::logging::{self, escape_log};
use crate::network::NetworkStack;
use crate::platform::{Battery, SysfsBattery};
use crate::status::DeviceStatus;
use crate::storage::Storage;
use crate::timer::TimerService;

/// Longest reply a command transport has to carry
pub const MAX_REPLY_LEN: usize = 256;

const HELP_TEXT: &str =
    "Commands: info, poweroff, reboot, log, loglevel <n>, clear, apn <s> <u> <p>, frq <gps> <up>\n";

/// Reply to a handled command.
///
/// Short text, capped at [`MAX_REPLY_LEN`] bytes, plus an optional bulk stream
/// (`log`). Nothing is sent for an empty reply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
    stream: Option<Vec<u8>>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reply text, truncated on a character boundary.
    pub fn set(&mut self, text: impl Into<String>) {
        let mut text = text.into();
        if text.len() > MAX_REPLY_LEN {
            let mut end = MAX_REPLY_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        self.text = text;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_stream(&mut self, data: Vec<u8>) {
        self.stream = Some(data);
    }

    pub fn stream(&self) -> Option<&[u8]> {
        self.stream.as_deref()
    }

    /// True if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.stream.as_ref().map_or(true, |s| s.is_empty())
    }

    /// Reply text followed by the stream, as sent on a byte transport.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = self.text.into_bytes();
        if let Some(stream) = self.stream {
            bytes.extend_from_slice(&stream);
        }
        bytes
    }
}

/// Delays for deferred lifecycle actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDelays {
    /// `poweroff` and `reboot`
    pub action: Duration,
    /// Restart after `clear`
    pub wipe_restart: Duration,
}

impl Default for CommandDelays {
    fn default() -> Self {
        Self {
            action: Duration::from_secs(5),
            wipe_restart: Duration::from_secs(6),
        }
    }
}

/// Parses and executes text commands
pub struct CommandProcessor {
    config: ConfigStore,
    network: Arc<dyn NetworkStack>,
    cache: CacheHandle,
    storage: Arc<dyn Storage>,
    status: DeviceStatus,
    timers: TimerService,
    battery: Arc<dyn Battery>,
    delays: CommandDelays,
    reactivate: bool,
}

impl CommandProcessor {
    pub fn new(
        config: ConfigStore,
        network: Arc<dyn NetworkStack>,
        cache: CacheHandle,
        storage: Arc<dyn Storage>,
        status: DeviceStatus,
        timers: TimerService,
    ) -> Self {
        Self {
            config,
            network,
            cache,
            storage,
            status,
            timers,
            battery: Arc::new(SysfsBattery::default()),
            delays: CommandDelays::default(),
            reactivate: false,
        }
    }

    pub fn with_battery(mut self, battery: Arc<dyn Battery>) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_delays(mut self, delays: CommandDelays) -> Self {
        self.delays = delays;
        self
    }

    /// True once after a command changed the data session credentials. The
    /// caller re-issues activation through the connectivity tracker.
    pub fn take_reactivation(&mut self) -> bool {
        std::mem::take(&mut self.reactivate)
    }

    /// True if a lifecycle action of `kind` is scheduled.
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.timers.is_pending(kind)
    }

    /// Handles one command.
    ///
    /// Returns false for unrecognized input, in which case `reply` is untouched.
    pub async fn handle(&mut self, command: &str, reply: &mut Reply) -> bool {
        let command = command.trim_start();

        if has_prefix(command, "help") {
            reply.set(HELP_TEXT);
        } else if has_prefix(command, "info") {
            let text = self.info().await;
            reply.set(text);
        } else if has_prefix(command, "poweroff") {
            reply.set(format!("Poweroff in {}s", self.delays.action.as_secs()));
            self.timers.schedule(TimerKind::PowerOff, self.delays.action);
        } else if has_prefix(command, "reboot") {
            reply.set(format!("Reboot in {}s", self.delays.action.as_secs()));
            self.timers.schedule(TimerKind::Reboot, self.delays.action);
        } else if has_prefix(command, "apn") {
            let text = self.apn(&arguments(command, "apn"));
            reply.set(text);
        } else if has_prefix(command, "frq") {
            reply.set(self.frq(&arguments(command, "frq")));
        } else if has_prefix(command, "clear") {
            reply.set("logs cleared");
            if let Err(e) = self.cache.wipe(true) {
                warn!("Wipe request failed: {}", e);
            }
            self.timers.schedule(TimerKind::Reboot, self.delays.wipe_restart);
        } else if has_prefix(command, "loglevel") {
            reply.set(self.loglevel(&arguments(command, "loglevel")));
        } else if has_prefix(command, "log") {
            match self.storage.read(PERMANENT_LOG) {
                Ok(data) => reply.set_stream(data.unwrap_or_default()),
                Err(e) => warn!("Unable to read {}: {}", PERMANENT_LOG, e),
            }
        } else {
            return false;
        }

        info!("Command '{}' -> '{}'", escape_log(command), escape_log(reply.text()));
        true
    }

    async fn info(&self) -> String {
        let active = match self.network.poll_active().await {
            Ok(active) => active,
            Err(e) => {
                warn!("Active poll failed: {}", e);
                false
            }
        };
        let battery = self.battery.level();
        let config = self.config.handle().get();
        format!(
            "GPRS {}, Power {}mV {}%, FIX {}, GPS {}s, UP {}s",
            u8::from(active),
            battery.millivolts,
            battery.percent,
            self.status.satellites(),
            config.gps_interval,
            config.upload_interval
        )
    }

    fn apn(&mut self, args: &[&str]) -> String {
        let [server, user, password] = args else {
            return "Usage: apn <server> <user> <pwd>".to_string();
        };

        let config = self.config.handle().update(|c| {
            c.apn = server.to_string();
            c.apn_user = user.to_string();
            c.apn_password = password.to_string();
        });
        self.persist();
        self.reactivate = true;
        format!("APN updated: {}", config.apn)
    }

    fn frq(&self, args: &[&str]) -> String {
        let parsed = match args {
            [gps, upload] => gps.parse::<u32>().ok().zip(upload.parse::<u32>().ok()),
            _ => None,
        };
        let Some((gps, upload)) = parsed.filter(|(gps, upload)| *gps > 0 && *upload > 0) else {
            return "Usage: frq <gps> <up>".to_string();
        };

        let config = self.config.handle().update(|c| {
            c.gps_interval = gps;
            c.upload_interval = upload;
        });
        self.persist();
        format!("Times updated: {} {}", config.gps_interval, config.upload_interval)
    }

    fn loglevel(&self, args: &[&str]) -> String {
        let Some(level) = args.first().and_then(|level| level.parse::<u8>().ok()) else {
            return "Usage: loglevel <n>".to_string();
        };

        self.config.handle().update(|c| c.log_level = level);
        self.persist();
        logging::set_mask(level);
        format!("Log level {}", level)
    }

    fn persist(&self) {
        if let Err(e) = self.config.persist() {
            warn!("Unable to write config: {}", e);
        }
    }
}

fn has_prefix(command: &str, word: &str) -> bool {
    command
        .as_bytes()
        .get(..word.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(word.as_bytes()))
}

fn arguments<'a>(command: &'a str, word: &str) -> Vec<&'a str> {
    command[word.len()..]
        .split([' ', ',', '\n'])
        .filter(|token| !token.is_empty())
        .collect()
}
