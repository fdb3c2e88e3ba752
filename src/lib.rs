//! # Telemetry Tracker Library
//!
//! Store-and-forward GPS tracker: samples a position fix at a bounded cadence,
//! buffers formatted records locally while there is no data session, and
//! uploads them to a remote collector once connectivity returns. A narrow text
//! command protocol controls it remotely.
//!
//! Two activities run side by side: the reactive loop ([`app::App`]) that
//! dispatches fixes, network notifications, commands, key presses and timers,
//! and the upload loop ([`upload::UploadManager`]). They share the record cache
//! only through [`cache::CacheStore`]'s lock.

pub mod app;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod fix;
pub mod input;
pub mod logging;
pub mod network;
pub mod platform;
pub mod serial;
pub mod status;
pub mod storage;
pub mod timer;
pub mod upload;
