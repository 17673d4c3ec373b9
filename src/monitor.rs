//! Network reachability classification and auto-reconnect.
//!
//! The monitor consumes push-driven path updates from a platform source
//! (delivered over a channel), classifies them into a `NetworkStatus`,
//! de-duplicates churn, and drives the reconnection policy: stop the proxy
//! when the path dies, schedule one delayed restart when it comes back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, ProxyStatusEvent};
use crate::supervisor::ProxySupervisor;

/// Classified state of the host's active network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Unavailable,
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One platform path-update event: whether the path is usable and which
/// interface kinds it runs over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathUpdate {
    pub satisfied: bool,
    pub wifi: bool,
    pub cellular: bool,
    pub ethernet: bool,
}

impl PathUpdate {
    /// A dead path.
    pub fn lost() -> Self {
        Self::default()
    }

    pub fn on_wifi() -> Self {
        Self {
            satisfied: true,
            wifi: true,
            ..Self::default()
        }
    }

    pub fn on_cellular() -> Self {
        Self {
            satisfied: true,
            cellular: true,
            ..Self::default()
        }
    }

    pub fn on_ethernet() -> Self {
        Self {
            satisfied: true,
            ethernet: true,
            ..Self::default()
        }
    }
}

/// Classify a path update by priority: unsatisfied first, then wifi,
/// cellular, wired, and unknown last.
pub fn classify(update: &PathUpdate) -> NetworkStatus {
    if !update.satisfied {
        NetworkStatus::Unavailable
    } else if update.wifi {
        NetworkStatus::Wifi
    } else if update.cellular {
        NetworkStatus::Cellular
    } else if update.ethernet {
        NetworkStatus::Ethernet
    } else {
        NetworkStatus::Unknown
    }
}

/// Reconnection policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Watches network-path updates and drives the supervisor accordingly.
///
/// Holds only a read view of the supervisor's remembered config and epoch;
/// every state change goes through the supervisor's start/stop contract.
pub struct ReachabilityMonitor {
    supervisor: Arc<ProxySupervisor>,
    events: Arc<EventBus>,
    options: MonitorOptions,
    status: Mutex<NetworkStatus>,
}

impl ReachabilityMonitor {
    pub fn new(
        supervisor: Arc<ProxySupervisor>,
        events: Arc<EventBus>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            supervisor,
            events,
            options,
            status: Mutex::new(NetworkStatus::Unknown),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.lock()
    }

    /// Consume path updates until the channel closes or `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        mut updates: mpsc::Receiver<PathUpdate>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => match update {
                        Some(update) => self.handle_update(&update),
                        None => break,
                    },
                }
            }
        })
    }

    /// Classify one update; observers are notified (and policy runs) only
    /// when the classified status differs from the stored one.
    pub fn handle_update(&self, update: &PathUpdate) {
        let new_status = classify(update);
        {
            let mut status = self.status.lock();
            if *status == new_status {
                return;
            }
            *status = new_status;
        }
        tracing::info!("network status changed to {new_status}");
        self.events.emit_network(new_status);

        if new_status == NetworkStatus::Unavailable {
            // Never leave a local proxy bound on a dead network path.
            self.supervisor.stop_for_path_loss();
            return;
        }

        if self.options.auto_reconnect && self.supervisor.remembered_config().is_some() {
            self.schedule_reconnect();
        }
    }

    /// Schedule exactly one delayed reconnect attempt for this transition.
    ///
    /// The supervisor epoch captured here invalidates the attempt when a
    /// stop (or another start) lands inside the delay window, and the
    /// attempt re-checks eligibility before acting. Rapid flapping can
    /// still schedule overlapping attempts; each one guards itself the same
    /// way.
    fn schedule_reconnect(&self) {
        let supervisor = Arc::clone(&self.supervisor);
        let events = Arc::clone(&self.events);
        let delay = self.options.reconnect_delay;
        let epoch = supervisor.epoch();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if supervisor.epoch() != epoch {
                return;
            }
            let Some(config) = supervisor.remembered_config() else {
                return;
            };
            if supervisor.is_active() {
                return;
            }
            match supervisor.start(config) {
                // Success surfaces as the supervisor's Connected event.
                Ok(()) => tracing::info!("auto-reconnect restored the proxy session"),
                Err(e) => {
                    tracing::warn!("auto-reconnect failed: {e}");
                    events.emit_status(ProxyStatusEvent::Error(e.to_string()));
                }
            }
        });
    }
}
