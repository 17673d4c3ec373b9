//! sockspilot — control plane for a local SOCKS/HTTP proxy client.
//!
//! The crate decides, per outbound connection, whether traffic is proxied,
//! sent direct, or rejected (`rules`); supervises the lifecycle of the
//! underlying proxy executable (`supervisor`); and reacts to host
//! network-path changes by tearing down and re-establishing the session
//! (`monitor`). Everything is wired by an explicitly constructed
//! `orchestrator::Orchestrator` — no process-wide singletons.

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod rules;
pub mod store;
pub mod supervisor;

pub use config::{EncryptionMethod, ProxyConfig, RoutingMode, RoutingStrategy};
pub use error::{RuleError, StartError};
pub use events::{EventBus, LogEvent, ProxyStatusEvent, TrafficEvent};
pub use monitor::{MonitorOptions, NetworkStatus, PathUpdate, ReachabilityMonitor};
pub use rules::{ProxyRule, RuleAction, RuleEngine, RuleMatch};
pub use supervisor::{LogLevel, ProxySupervisor, SupervisorState, TrafficSnapshot};
