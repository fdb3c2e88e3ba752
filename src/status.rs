//! # Device Status
//!
//! Single shared value object holding component health: connectivity flags,
//! fix state, unsent-disk-data flag, fix counters and the status message.
//!
//! All fields are atomics behind accessor methods. Every mutation that changes
//! what the status display would show publishes a fresh [`StatusSnapshot`] on a
//! `watch` channel, so the display collaborator refreshes itself without any
//! component writing raw shared fields.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Point-in-time copy of the device status, as shown on the status display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Registered on the mobile network
    pub registered: bool,
    /// Attached to the packet data service
    pub attached: bool,
    /// Data session active
    pub active: bool,
    /// Usable fix
    pub fix: bool,
    /// Visible/tracked satellite count
    pub satellites: u32,
    /// Unsent records exist in the cache file
    pub disk_dirty: bool,
    /// Display powered on
    pub display_on: bool,
    /// Free-form status line
    pub message: String,
}

#[derive(Debug)]
struct Inner {
    registered: AtomicBool,
    attached: AtomicBool,
    active: AtomicBool,
    fix: AtomicBool,
    satellites: AtomicU32,
    disk_dirty: AtomicBool,
    display_on: AtomicBool,
    receiver_ready: AtomicBool,
    no_fix_count: AtomicU32,
    fix_count: AtomicU32,
    message: Mutex<String>,
    refresh: watch::Sender<StatusSnapshot>,
}

/// Cloneable handle to the shared device status.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    inner: Arc<Inner>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! flag_accessors {
    ($($get:ident, $set:ident;)*) => {
        $(
            pub fn $get(&self) -> bool {
                self.inner.$get.load(Ordering::SeqCst)
            }

            pub fn $set(&self, value: bool) {
                if self.inner.$get.swap(value, Ordering::SeqCst) != value {
                    self.refresh();
                }
            }
        )*
    };
}

impl DeviceStatus {
    /// Creates a status object with every flag cleared and the display on.
    pub fn new() -> Self {
        let (refresh, _) = watch::channel(StatusSnapshot {
            display_on: true,
            ..StatusSnapshot::default()
        });
        Self {
            inner: Arc::new(Inner {
                registered: AtomicBool::new(false),
                attached: AtomicBool::new(false),
                active: AtomicBool::new(false),
                fix: AtomicBool::new(false),
                satellites: AtomicU32::new(0),
                disk_dirty: AtomicBool::new(false),
                display_on: AtomicBool::new(true),
                receiver_ready: AtomicBool::new(false),
                no_fix_count: AtomicU32::new(0),
                fix_count: AtomicU32::new(0),
                message: Mutex::new(String::new()),
                refresh,
            }),
        }
    }

    flag_accessors! {
        registered, set_registered;
        attached, set_attached;
        active, set_active;
        disk_dirty, set_disk_dirty;
        display_on, set_display_on;
    }

    /// Usable fix currently held.
    pub fn fix(&self) -> bool {
        self.inner.fix.load(Ordering::SeqCst)
    }

    /// Satellite count last reported.
    pub fn satellites(&self) -> u32 {
        self.inner.satellites.load(Ordering::SeqCst)
    }

    /// Updates fix state and satellite count together.
    ///
    /// Returns true (and refreshes the display) if either changed.
    pub fn set_fix(&self, fix: bool, satellites: u32) -> bool {
        let fix_changed = self.inner.fix.swap(fix, Ordering::SeqCst) != fix;
        let sats_changed = self.inner.satellites.swap(satellites, Ordering::SeqCst) != satellites;
        let changed = fix_changed || sats_changed;
        if changed {
            self.refresh();
        }
        changed
    }

    /// Receiver configured and fixes may be processed.
    pub fn receiver_ready(&self) -> bool {
        self.inner.receiver_ready.load(Ordering::SeqCst)
    }

    pub fn set_receiver_ready(&self, ready: bool) {
        self.inner.receiver_ready.store(ready, Ordering::SeqCst);
    }

    /// Consecutive raw records without a usable fix.
    pub fn no_fix_count(&self) -> u32 {
        self.inner.no_fix_count.load(Ordering::SeqCst)
    }

    /// Usable fixes seen this session ("has ever fixed" counter).
    pub fn fix_count(&self) -> u32 {
        self.inner.fix_count.load(Ordering::SeqCst)
    }

    /// Records a usable fix: resets the no-fix counter, bumps the fix counter.
    pub fn record_fix(&self) {
        self.inner.no_fix_count.store(0, Ordering::SeqCst);
        self.inner.fix_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a raw record without a usable fix.
    pub fn record_no_fix(&self) {
        self.inner.no_fix_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Clears the no-fix counter after a receiver reset.
    pub fn reset_no_fix(&self) {
        self.inner.no_fix_count.store(0, Ordering::SeqCst);
    }

    /// Current status message.
    pub fn message(&self) -> String {
        self.lock_message().clone()
    }

    /// Sets the status message and refreshes the display.
    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut current = self.lock_message();
            if *current == message {
                return;
            }
            *current = message;
        }
        self.refresh();
    }

    /// Takes a snapshot of the current status.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            registered: self.registered(),
            attached: self.attached(),
            active: self.active(),
            fix: self.fix(),
            satellites: self.satellites(),
            disk_dirty: self.disk_dirty(),
            display_on: self.display_on(),
            message: self.message(),
        }
    }

    /// Subscribes to display refreshes.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.refresh.subscribe()
    }

    /// Publishes the current snapshot to the display.
    pub fn refresh(&self) {
        self.inner.refresh.send_replace(self.snapshot());
    }

    fn lock_message(&self) -> std::sync::MutexGuard<'_, String> {
        self.inner
            .message
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
