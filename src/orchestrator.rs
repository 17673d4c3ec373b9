//! Top-level wiring.
//!
//! The orchestrator constructs and owns the rule engine, the supervisor,
//! the reachability monitor, and the message-bus bindings, passing explicit
//! references between them. Nothing in the crate reaches for a process-wide
//! singleton.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    LocalBus, MessageBus, CHANNEL_PROXY_STATUS, CHANNEL_TRAFFIC_REQUEST, CHANNEL_TRAFFIC_UPDATE,
    CHANNEL_VPN_CONFIG,
};
use crate::config::ProxyConfig;
use crate::error::StartError;
use crate::events::EventBus;
use crate::monitor::{MonitorOptions, PathUpdate, ReachabilityMonitor};
use crate::rules::RuleEngine;
use crate::supervisor::{ProxySupervisor, TrafficSnapshot};

pub struct Orchestrator {
    events: Arc<EventBus>,
    supervisor: Arc<ProxySupervisor>,
    monitor: Arc<ReachabilityMonitor>,
    rules: Arc<Mutex<RuleEngine>>,
    bus: Arc<LocalBus>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(binary: PathBuf, rules: RuleEngine, options: MonitorOptions) -> Self {
        let events = Arc::new(EventBus::new());
        let supervisor = Arc::new(ProxySupervisor::new(binary, Arc::clone(&events)));
        let monitor = Arc::new(ReachabilityMonitor::new(
            Arc::clone(&supervisor),
            Arc::clone(&events),
            options,
        ));
        Self {
            events,
            supervisor,
            monitor,
            rules: Arc::new(Mutex::new(rules)),
            bus: Arc::new(LocalBus::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn supervisor(&self) -> &Arc<ProxySupervisor> {
        &self.supervisor
    }

    pub fn bus(&self) -> &Arc<LocalBus> {
        &self.bus
    }

    pub fn rules(&self) -> &Arc<Mutex<RuleEngine>> {
        &self.rules
    }

    pub fn start_session(&self, config: ProxyConfig) -> Result<(), StartError> {
        self.supervisor.start(config)
    }

    pub fn stop_session(&self) {
        self.supervisor.stop();
    }

    /// Per-connection routing decision; consulted by whatever component
    /// performs the actual socket dispatch.
    pub fn should_proxy(&self, host: &str, url: &str) -> bool {
        self.rules.lock().should_proxy(host, url)
    }

    pub fn generate_pac(&self) -> String {
        self.rules.lock().generate_pac()
    }

    pub fn traffic_totals(&self) -> TrafficSnapshot {
        self.supervisor.traffic_totals()
    }

    /// Feed platform path updates into the reachability monitor.
    pub fn watch_path_updates(
        &self,
        updates: mpsc::Receiver<PathUpdate>,
    ) -> tokio::task::JoinHandle<()> {
        Arc::clone(&self.monitor).spawn(updates, self.cancel.child_token())
    }

    /// Service the cross-process message channels: apply pushed configs and
    /// answer traffic snapshots.
    pub fn serve_bus(&self) -> tokio::task::JoinHandle<()> {
        let mut config_rx = self.bus.subscribe(CHANNEL_VPN_CONFIG);
        let mut traffic_rx = self.bus.subscribe(CHANNEL_TRAFFIC_REQUEST);
        let bus = Arc::clone(&self.bus);
        let supervisor = Arc::clone(&self.supervisor);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    payload = config_rx.recv() => match payload {
                        Ok(payload) => apply_pushed_config(&*bus, &supervisor, payload),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("dropped {skipped} pushed configs under load");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    request = traffic_rx.recv() => match request {
                        Ok(_) => {
                            let totals = supervisor.traffic_totals();
                            bus.post(
                                CHANNEL_TRAFFIC_UPDATE,
                                json!({"upload": totals.upload, "download": totals.download}),
                            );
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Cancel background tasks and stop any running session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.supervisor.stop();
    }
}

/// Decode and apply a config pushed over `vpn_config`; failures are
/// reported on `proxy_status`, never raised.
fn apply_pushed_config(
    bus: &dyn MessageBus,
    supervisor: &ProxySupervisor,
    payload: serde_json::Value,
) {
    let config: ProxyConfig = match serde_json::from_value(payload) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("rejected pushed proxy config: {e}");
            bus.post(CHANNEL_PROXY_STATUS, json!({"error": e.to_string()}));
            return;
        }
    };
    if let Err(e) = supervisor.start(config) {
        tracing::warn!("failed to apply pushed proxy config: {e}");
        bus.post(CHANNEL_PROXY_STATUS, json!({"error": e.to_string()}));
    }
}
