//! # Upload Module
//!
//! Store-and-forward delivery of buffered and cached records to the collector.

pub mod manager;
pub mod transport;

pub use manager::{transmit, Transmission, UploadFailure, UploadManager, UploadTiming};
pub use transport::{TcpTransport, Transport, UploadSession};
