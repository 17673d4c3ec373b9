//! Proxy process supervision: lifecycle, log-stream parsing, traffic
//! statistics.

pub mod logline;
pub mod process;
pub mod stats;

pub use logline::{parse_log_line, parse_traffic_tokens, LogLevel, ParsedLine};
pub use process::{ProxySupervisor, SupervisorState};
pub use stats::{StatisticsAggregator, TrafficSnapshot};
