//! Cross-process notification channel (collaborator seam).
//!
//! A host application and a background extension exchange named messages:
//! `vpn_config` pushes a configuration, `traffic_request` / `traffic_update`
//! pull cumulative counters, and `proxy_status` carries error detail when a
//! pushed configuration fails to apply. `MessageBus` is the seam; `LocalBus`
//! is the in-process implementation the orchestrator and tests run against.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

pub const CHANNEL_VPN_CONFIG: &str = "vpn_config";
pub const CHANNEL_TRAFFIC_REQUEST: &str = "traffic_request";
pub const CHANNEL_TRAFFIC_UPDATE: &str = "traffic_update";
pub const CHANNEL_PROXY_STATUS: &str = "proxy_status";

const CHANNEL_CAPACITY: usize = 32;

/// Bidirectional message bus with named channels.
pub trait MessageBus: Send + Sync {
    /// Post a payload to the named channel. Posting to a channel nobody
    /// listens on is not an error.
    fn post(&self, channel: &str, payload: serde_json::Value);

    /// Subscribe to the named channel, creating it if needed.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<serde_json::Value>;
}

/// In-process bus backed by one broadcast channel per name.
pub struct LocalBus {
    channels: RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<serde_json::Value> {
        if let Some(sender) = self.channels.read().get(channel) {
            return sender.clone();
        }
        self.channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for LocalBus {
    fn post(&self, channel: &str, payload: serde_json::Value) {
        let _ = self.sender(channel).send(payload);
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<serde_json::Value> {
        self.sender(channel).subscribe()
    }
}
