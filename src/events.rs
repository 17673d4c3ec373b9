//! Event fan-out for state changes.
//!
//! Replaces delegate/callback protocols with broadcast channels: the
//! supervisor and the reachability monitor publish here, and the
//! orchestrator (or any other observer) subscribes. Sends never block and
//! are fire-and-forget — an event with no subscribers is simply dropped.

use tokio::sync::broadcast;

use crate::monitor::NetworkStatus;
use crate::supervisor::{LogLevel, TrafficSnapshot};

/// Proxy session status notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyStatusEvent {
    Connecting,
    Connected,
    Disconnected,
    /// A failed operation observed out-of-band (e.g. an auto-reconnect
    /// attempt); observational, never fatal to the control plane.
    Error(String),
}

/// One parsed line from the supervised process's combined output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

/// One traffic sample extracted from the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficEvent {
    /// Bytes since the previous sample.
    pub delta: TrafficSnapshot,
    /// Cumulative totals for the current process instance.
    pub totals: TrafficSnapshot,
}

const CHANNEL_CAPACITY: usize = 64;

/// Shared broadcast channels for every observable state change.
pub struct EventBus {
    status: broadcast::Sender<ProxyStatusEvent>,
    network: broadcast::Sender<NetworkStatus>,
    logs: broadcast::Sender<LogEvent>,
    traffic: broadcast::Sender<TrafficEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            status: broadcast::channel(CHANNEL_CAPACITY).0,
            network: broadcast::channel(CHANNEL_CAPACITY).0,
            logs: broadcast::channel(CHANNEL_CAPACITY).0,
            traffic: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ProxyStatusEvent> {
        self.status.subscribe()
    }

    pub fn subscribe_network(&self) -> broadcast::Receiver<NetworkStatus> {
        self.network.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.logs.subscribe()
    }

    pub fn subscribe_traffic(&self) -> broadcast::Receiver<TrafficEvent> {
        self.traffic.subscribe()
    }

    pub(crate) fn emit_status(&self, event: ProxyStatusEvent) {
        let _ = self.status.send(event);
    }

    pub(crate) fn emit_network(&self, status: NetworkStatus) {
        let _ = self.network.send(status);
    }

    pub(crate) fn emit_log(&self, event: LogEvent) {
        let _ = self.logs.send(event);
    }

    pub(crate) fn emit_traffic(&self, event: TrafficEvent) {
        let _ = self.traffic.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_events_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_status();
        bus.emit_status(ProxyStatusEvent::Connected);
        assert_eq!(rx.recv().await.unwrap(), ProxyStatusEvent::Connected);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.emit_status(ProxyStatusEvent::Disconnected);
        bus.emit_log(LogEvent {
            level: LogLevel::Info,
            message: "hello".into(),
        });
        // A late subscriber sees only what comes after it.
        let mut rx = bus.subscribe_status();
        bus.emit_status(ProxyStatusEvent::Connecting);
        assert_eq!(rx.recv().await.unwrap(), ProxyStatusEvent::Connecting);
    }
}
