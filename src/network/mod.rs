//! # Network Module
//!
//! Interface to the mobile network stack and the connectivity state tracker.
//!
//! The stack is an event source (registration, attach and activation
//! notifications delivered as [`NetworkEvent`]s) and a request sink
//! ([`NetworkStack`]). The core never talks to the modem directly.

pub mod tracker;

use async_trait::async_trait;

pub use tracker::{ConnectivityPhase, ConnectivityTracker, Readiness};

use crate::config::Config;
use crate::error::Result;

/// Asynchronous notifications from the network stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Searching,
    Registered { roaming: bool },
    Denied,
    NotRegistered,
    Attached,
    AttachFailed,
    Detached,
    Activated,
    ActivateFailed,
    Deactivated,
    NoSim,
}

/// Packet data context credentials
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PdpContext {
    pub apn: String,
    pub user: String,
    pub password: String,
}

impl PdpContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            apn: config.apn.clone(),
            user: config.apn_user.clone(),
            password: config.apn_password.clone(),
        }
    }
}

/// Requests accepted by the network stack.
///
/// Every request only starts the operation; completion arrives later as a
/// [`NetworkEvent`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkStack: Send + Sync {
    /// Whether the packet data service is attached right now
    async fn attach_status(&self) -> Result<bool>;

    /// Starts attaching to the packet data service
    async fn attach(&self) -> Result<()>;

    /// Starts activating a data session
    async fn activate(&self, context: &PdpContext) -> Result<()>;

    /// Polls the data session state directly
    async fn poll_active(&self) -> Result<bool>;

    /// Resolves a host name to a numeric address
    async fn resolve(&self, host: &str) -> Result<String>;
}
