//! # Timer Service
//!
//! Cancellable one-shot timers that post an [`Event::Timer`] back into the
//! reactive loop when they fire.
//!
//! Each [`TimerKind`] has at most one pending timer; scheduling a kind again
//! replaces (cancels) the previous one.

use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::event::{Event, EventSender, TimerKind};

/// Schedules [`TimerKind`] events on the reactive loop.
#[derive(Debug)]
pub struct TimerService {
    events: EventSender,
    pending: HashMap<TimerKind, JoinHandle<()>>,
}

impl TimerService {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            pending: HashMap::new(),
        }
    }

    /// Fires `kind` after `delay`, replacing any pending timer of the same kind.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::Timer(kind));
        });
        debug!("Timer {:?} in {:?}", kind, delay);
        self.pending.insert(kind, handle);
    }

    /// Cancels a pending timer. Returns true if one was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.pending.remove(&kind) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// True if `kind` is scheduled and has not fired yet.
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.get(&kind).is_some_and(|handle| !handle.is_finished())
    }

    /// Marks a fired timer as consumed.
    pub fn fired(&mut self, kind: TimerKind) {
        self.pending.remove(&kind);
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}
