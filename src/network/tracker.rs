//! # Connectivity Tracker
//!
//! Finite-state tracker over network notifications:
//!
//! ```text
//! Idle -> Searching -> Registered{home|roaming} -> Attaching -> Attached -> Activating -> Active
//! ```
//!
//! | Notification                    | Next phase   | Flag cleared |
//! |---------------------------------|--------------|--------------|
//! | `Denied`, `NotRegistered`       | `Idle`       | registered   |
//! | `AttachFailed`, `Detached`      | `Registered` | attached     |
//! | `ActivateFailed`, `Deactivated` | `Attached`   | active       |
//!
//! The connectivity flags live in [`DeviceStatus`] so the upload loop can read
//! them without touching the tracker. Upload readiness is decided by
//! [`Readiness`], which always re-polls the stack.
//!
//! Collector resolution runs in its own task so a slow resolver never holds up
//! the reactive loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{NetworkEvent, NetworkStack, PdpContext};
use crate::config::ConfigHandle;
use crate::status::DeviceStatus;

/// Upper bound on one collector lookup
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connectivity phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityPhase {
    #[default]
    Idle,
    Searching,
    Registered { roaming: bool },
    Attaching,
    Attached,
    Activating,
    Active,
}

/// Tracks connectivity from network notifications and issues the follow-up
/// attach and activation requests.
pub struct ConnectivityTracker {
    network: Arc<dyn NetworkStack>,
    config: ConfigHandle,
    status: DeviceStatus,
    phase: ConnectivityPhase,
    roaming: bool,
    resolving: Option<JoinHandle<()>>,
}

impl ConnectivityTracker {
    pub fn new(network: Arc<dyn NetworkStack>, config: ConfigHandle, status: DeviceStatus) -> Self {
        Self {
            network,
            config,
            status,
            phase: ConnectivityPhase::Idle,
            roaming: false,
            resolving: None,
        }
    }

    pub fn phase(&self) -> ConnectivityPhase {
        self.phase
    }

    /// Applies one network notification.
    pub async fn handle(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Searching => {
                info!("network register searching");
                self.phase = ConnectivityPhase::Searching;
            }
            NetworkEvent::Denied | NetworkEvent::NotRegistered => {
                info!("network register lost ({:?})", event);
                self.status.set_registered(false);
                self.phase = ConnectivityPhase::Idle;
            }
            NetworkEvent::Registered { roaming } => self.on_registered(roaming).await,
            NetworkEvent::Attached => {
                info!("Attached");
                self.on_attached().await;
            }
            NetworkEvent::AttachFailed | NetworkEvent::Detached => {
                info!("Attach lost ({:?})", event);
                self.status.set_attached(false);
                self.phase = ConnectivityPhase::Registered { roaming: self.roaming };
            }
            NetworkEvent::Activated => self.on_activated().await,
            NetworkEvent::ActivateFailed | NetworkEvent::Deactivated => {
                info!("Activated off ({:?})", event);
                self.status.set_active(false);
                self.phase = ConnectivityPhase::Attached;
            }
            NetworkEvent::NoSim => {
                warn!("!!NO SIM CARD!!");
                self.status.set_message("NO SIM CARD!");
            }
        }
    }

    /// Issues an activation request with the current credentials.
    ///
    /// Used on attach and whenever the APN settings change.
    pub async fn activate(&mut self) {
        let context = PdpContext::from_config(&self.config.get());
        info!("Activate {} {}", context.apn, context.user);
        match self.network.activate(&context).await {
            Ok(()) => self.phase = ConnectivityPhase::Activating,
            Err(e) => warn!("Activation request failed: {}", e),
        }
    }

    async fn on_registered(&mut self, roaming: bool) {
        info!("Registered ({})", if roaming { "roaming" } else { "home" });
        self.roaming = roaming;
        self.status.set_registered(true);
        self.phase = ConnectivityPhase::Registered { roaming };

        let attached = match self.network.attach_status().await {
            Ok(attached) => attached,
            Err(e) => {
                warn!("Attach status unavailable: {}", e);
                false
            }
        };
        debug!("Attach status {} vs attach flag {}", attached, self.status.attached());

        if attached {
            self.on_attached().await;
            return;
        }

        match self.network.attach().await {
            Ok(()) => self.phase = ConnectivityPhase::Attaching,
            Err(e) => warn!("network attach fail: {}", e),
        }
    }

    async fn on_attached(&mut self) {
        self.status.set_attached(true);
        self.phase = ConnectivityPhase::Attached;
        self.activate().await;
    }

    async fn on_activated(&mut self) {
        info!("network activate success");
        self.status.set_active(true);
        self.phase = ConnectivityPhase::Active;
        self.resolve_collector();
    }

    /// Starts a lookup of the collector host unless an address is known or a
    /// lookup is already running.
    fn resolve_collector(&mut self) {
        let config = self.config.get();
        if !config.server_ip.is_empty() || config.server.is_empty() {
            return;
        }
        if self.resolving.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Lookup of {} still running", config.server);
            return;
        }

        let network = self.network.clone();
        let handle = self.config.clone();
        let server = config.server;
        self.resolving = Some(tokio::spawn(async move {
            match tokio::time::timeout(RESOLVE_TIMEOUT, network.resolve(&server)).await {
                Ok(Ok(ip)) => {
                    info!("Resolved {} to {}", server, ip);
                    handle.update(|c| c.server_ip = ip);
                }
                Ok(Err(e)) => warn!("Get Host fail for {}: {}", server, e),
                Err(_) => warn!("Get Host for {} timed out", server),
            }
        }));
    }
}

/// Upload readiness predicate, shared with the upload loop.
#[derive(Clone)]
pub struct Readiness {
    network: Arc<dyn NetworkStack>,
    status: DeviceStatus,
}

impl Readiness {
    pub fn new(network: Arc<dyn NetworkStack>, status: DeviceStatus) -> Self {
        Self { network, status }
    }

    /// True only if registered, the active flag is set, and a fresh poll
    /// confirms the data session.
    pub async fn is_ready(&self) -> bool {
        if !self.status.registered() || !self.status.active() {
            return false;
        }
        match self.network.poll_active().await {
            Ok(active) => active,
            Err(e) => {
                debug!("Active poll failed: {}", e);
                false
            }
        }
    }
}
