//! # Fix Handling
//!
//! Raw receiver fixes in, debounced position samples and wire records out.
//!
//! ## Modules
//!
//! - [`protocol`] - Raw fix types, quality classes and the last-known-position snapshot
//! - [`processor`] - Debounce and normalization ([`FixProcessor`])
//! - [`record`] - Wire record formatting
//! - [`receiver`] - Receiver control calls and initialisation

pub mod processor;
pub mod protocol;
pub mod receiver;
pub mod record;

pub use processor::{FixOutcome, FixProcessor};
pub use protocol::{FixQuality, PersistedState, PositionSample, RawFix};
pub use receiver::{ReceiverControl, RebootMode};
