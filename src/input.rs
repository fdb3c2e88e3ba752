//! # Power Key
//!
//! Hold tracking for the power key and the evdev source that feeds it.
//!
//! While the key is held the reactive loop ticks the tracker every
//! [`TICK_INTERVAL`]:
//!
//! | Held for | Action                         |
//! |----------|--------------------------------|
//! | > 1 s    | status shows "Power off in N"  |
//! | > 5 s    | power off                      |
//!
//! The first tick after release resets the hold time and toggles the display,
//! so a short press switches the display on or off.

use evdev::{Device, InputEvent, InputEventKind, Key};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::event::{Event, EventSender, KeyEvent};

/// Tick period while the power key is held
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Ticks per second
const TICKS_PER_SECOND: u32 = 2;

/// Seconds held before the countdown shows
const WARN_AFTER_S: u32 = 1;

/// Seconds held before powering off
const POWER_OFF_AFTER_S: u32 = 5;

/// Hold time that is treated as a stale press left over from power-on
const STALE_TICKS: u32 = 20;

/// What a tick asks the reactive loop to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Nothing to show yet, keep ticking
    Wait,
    /// Show the power-off countdown, keep ticking
    Countdown(u32),
    /// Held long enough: power off
    PowerOff,
    /// Released: toggle the display, stop ticking
    ToggleDisplay,
    /// Stale hold discarded, stop ticking
    Reset,
}

impl KeyAction {
    /// True if another tick should be scheduled.
    pub fn keep_ticking(self) -> bool {
        matches!(self, KeyAction::Wait | KeyAction::Countdown(_))
    }
}

/// Power key hold tracker
#[derive(Debug, Default)]
pub struct PowerKeyTracker {
    down: bool,
    ticking: bool,
    ticks: u32,
}

impl PowerKeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Applies a key transition. Returns true if ticking should start.
    pub fn on_key(&mut self, event: KeyEvent) -> bool {
        match event {
            KeyEvent::PowerDown => {
                if self.down {
                    return false;
                }
                self.down = true;
                let start = !self.ticking;
                self.ticking = true;
                start
            }
            KeyEvent::PowerUp => {
                self.down = false;
                false
            }
        }
    }

    /// Advances the hold timer by one tick.
    pub fn tick(&mut self) -> KeyAction {
        if self.ticks > STALE_TICKS {
            self.ticks = 0;
            self.ticking = false;
            return KeyAction::Reset;
        }
        self.ticks += 1;
        let held_s = self.ticks / TICKS_PER_SECOND;

        if !self.down {
            self.ticks = 0;
            self.ticking = false;
            return KeyAction::ToggleDisplay;
        }

        if held_s > POWER_OFF_AFTER_S {
            self.ticking = false;
            KeyAction::PowerOff
        } else if held_s > WARN_AFTER_S {
            KeyAction::Countdown(POWER_OFF_AFTER_S + 1 - held_s)
        } else {
            KeyAction::Wait
        }
    }
}

/// Maps an evdev event to a power key transition.
///
/// Autorepeat (value 2) and other keys are ignored.
pub fn map_key_event(event: &InputEvent) -> Option<KeyEvent> {
    match event.kind() {
        InputEventKind::Key(Key::KEY_POWER) => match event.value() {
            1 => Some(KeyEvent::PowerDown),
            0 => Some(KeyEvent::PowerUp),
            _ => None,
        },
        _ => None,
    }
}

/// Opens the power key device and forwards its transitions to the reactive loop.
///
/// Reading blocks, so it runs on the blocking pool until the device fails or
/// the reactive loop stops.
///
/// # Errors
///
/// Returns error if the device cannot be opened
pub fn spawn_power_key_source(path: &str, events: EventSender) -> Result<JoinHandle<()>> {
    let mut device =
        Device::open(path).map_err(|e| TrackerError::Input(format!("Failed to open {}: {}", path, e)))?;
    info!("Power key on {} ({})", path, device.name().unwrap_or("unnamed"));

    Ok(tokio::task::spawn_blocking(move || loop {
        let batch = match device.fetch_events() {
            Ok(batch) => batch.filter_map(|ev| map_key_event(&ev)).collect::<Vec<_>>(),
            Err(e) => {
                warn!("Power key read failed: {}", e);
                return;
            }
        };
        for key in batch {
            debug!("Power key {:?}", key);
            if events.send(Event::Key(key)).is_err() {
                return;
            }
        }
    }))
}
