//! Notifications dispatched by the reactive loop.

use tokio::sync::mpsc;

use crate::fix::protocol::RawFix;
use crate::network::NetworkEvent;

/// Sender half of the reactive loop queue
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiver half of the reactive loop queue
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Channel that carries reply text (and streamed log contents) back to the
/// transport a command arrived on
pub type ReplySender = mpsc::UnboundedSender<Vec<u8>>;

/// Scheduled one-shot events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    PowerOff,
    Reboot,
    ScreenOff,
    PowerKeyTick,
}

/// Power key transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    PowerDown,
    PowerUp,
}

/// Everything the reactive loop reacts to
#[derive(Debug)]
pub enum Event {
    /// Raw receiver record
    Fix(RawFix),
    /// Network stack notification
    Network(NetworkEvent),
    /// Inbound text command and where to send the reply
    Command { text: String, reply: ReplySender },
    Key(KeyEvent),
    Timer(TimerKind),
    /// Startup finished: receiver ready and uploads running
    Running,
}

/// Creates the reactive loop queue.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
