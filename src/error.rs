//! Error taxonomy for the control plane.
//!
//! `StartError` covers everything `ProxySupervisor::start` can surface;
//! process exit (any code) is deliberately *not* an error — it is a normal
//! `Stopped` transition. Malformed log lines and traffic tokens are
//! default-valued, never raised.

use thiserror::Error;

/// Errors surfaced by configuration validation and `ProxySupervisor::start`.
#[derive(Debug, Error)]
pub enum StartError {
    /// Local, user-correctable; never retried automatically.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The proxy executable is missing from its resolved path.
    #[error("proxy binary not found")]
    BinaryNotFound,

    /// A session is already starting or running; callers must `stop` first.
    /// No state is changed by the rejected call.
    #[error("proxy process already running")]
    AlreadyRunning,

    /// The OS-level spawn itself failed; the supervisor transitions to
    /// `Failed` with this reason.
    #[error("failed to start proxy process: {0}")]
    StartFailed(String),
}

/// Errors from user-rule mutations on the rule engine.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Caller passed an index past the end of the user-rule list.
    #[error("rule index {index} out of range for {len} user rules")]
    IndexOutOfRange { index: usize, len: usize },

    /// The rule-store collaborator failed to persist the updated list.
    #[error("failed to persist user rules: {0}")]
    Persist(String),
}
