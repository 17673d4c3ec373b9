//! Proxy child-process lifecycle.
//!
//! At most one process instance is live at a time. `start` validates the
//! config, builds the argument vector, spawns the binary with piped
//! stdout+stderr, and registers the termination watcher atomically with the
//! spawn. `stop` signals termination and returns without waiting for the
//! reap. Process exit with any code is a normal `Stopped` transition — the
//! exit code is logged, never interpreted.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::StartError;
use crate::events::{EventBus, LogEvent, ProxyStatusEvent, TrafficEvent};

use super::logline::{parse_log_line, parse_traffic_tokens};
use super::stats::{StatisticsAggregator, TrafficSnapshot};

/// Supervisor lifecycle states.
///
/// `Failed` is reachable from any state on a fatal error; only a fresh
/// `start` leaves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed(String),
}

struct Shared {
    state: Mutex<SupervisorState>,
    /// Config of the live session; present only while Starting/Running.
    current: Mutex<Option<ProxyConfig>>,
    /// Config remembered for auto-reconnect. Survives path-loss stops and
    /// natural process exit; cleared only by an explicit `stop`.
    remembered: Mutex<Option<ProxyConfig>>,
    stats: Mutex<StatisticsAggregator>,
    kill: Mutex<Option<CancellationToken>>,
    /// Bumped on every start and stop. Stream pumps, the termination
    /// watcher, and scheduled reconnect attempts capture the value they were
    /// born under and stand down once it moves on.
    epoch: AtomicU64,
    events: Arc<EventBus>,
}

/// Owner of the proxy child process.
pub struct ProxySupervisor {
    binary: PathBuf,
    shared: Arc<Shared>,
}

impl ProxySupervisor {
    pub fn new(binary: impl Into<PathBuf>, events: Arc<EventBus>) -> Self {
        Self {
            binary: binary.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(SupervisorState::Idle),
                current: Mutex::new(None),
                remembered: Mutex::new(None),
                stats: Mutex::new(StatisticsAggregator::new()),
                kill: Mutex::new(None),
                epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Resolve the proxy executable: `sslocal` or `ss-local` on PATH, with
    /// the bundled location under the state directory as fallback.
    pub fn resolve_binary() -> PathBuf {
        which::which("sslocal")
            .or_else(|_| which::which("ss-local"))
            .unwrap_or_else(|_| default_binary_path())
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state.lock().clone()
    }

    /// Whether a session is starting or running.
    pub fn is_active(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            SupervisorState::Starting | SupervisorState::Running
        )
    }

    pub fn current_config(&self) -> Option<ProxyConfig> {
        self.shared.current.lock().clone()
    }

    /// Config available for auto-reconnect, if a session was active before.
    pub fn remembered_config(&self) -> Option<ProxyConfig> {
        self.shared.remembered.lock().clone()
    }

    /// Current start/stop epoch; see `ReachabilityMonitor`'s reconnect guard.
    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    pub fn traffic_totals(&self) -> TrafficSnapshot {
        self.shared.stats.lock().totals()
    }

    pub fn reset_statistics(&self) {
        self.shared.stats.lock().reset();
    }

    /// Validate `config` and spawn the proxy process.
    ///
    /// Synchronous up to and including the spawn; stream parsing and the
    /// termination watcher run on background tasks. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, config: ProxyConfig) -> Result<(), StartError> {
        config.validate()?;

        if !self.binary.exists() {
            return Err(StartError::BinaryNotFound);
        }

        if self.is_active() {
            return Err(StartError::AlreadyRunning);
        }

        // A leftover process (e.g. still reaping after a previous stop) is
        // cancelled before the respawn; not an error path.
        if let Some(token) = self.shared.kill.lock().take() {
            token.cancel();
        }

        *self.shared.state.lock() = SupervisorState::Starting;
        self.shared.events.emit_status(ProxyStatusEvent::Connecting);
        *self.shared.current.lock() = Some(config.clone());
        *self.shared.remembered.lock() = Some(config.clone());
        self.shared.stats.lock().reset();

        let args = build_args(&config);
        tracing::debug!("spawning proxy process {}", self.binary.display());

        let spawned = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let reason = e.to_string();
                *self.shared.current.lock() = None;
                *self.shared.state.lock() = SupervisorState::Failed(reason.clone());
                return Err(StartError::StartFailed(reason));
            }
        };

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let token = CancellationToken::new();
        *self.shared.kill.lock() = Some(token.clone());

        // Both output streams feed the same parsing path.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, Arc::clone(&self.shared), epoch));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, Arc::clone(&self.shared), epoch));
        }

        // The transition to Running happens before the watcher task starts:
        // exits are only ever observed by the watcher, so even a process
        // that dies instantly yields Connecting, Connected, Disconnected in
        // that order.
        *self.shared.state.lock() = SupervisorState::Running;
        self.shared.events.emit_status(ProxyStatusEvent::Connected);

        // Termination watcher; owns the child handle, no exit can be missed.
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = token.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            match status {
                Ok(status) => tracing::info!("proxy process exited with {status}"),
                Err(e) => tracing::warn!("failed to reap proxy process: {e}"),
            }
            // Only the watcher of the live instance performs the transition;
            // a stop or a newer start has already moved the epoch on.
            if shared.epoch.load(Ordering::SeqCst) == epoch {
                finish_stopped(&shared);
            }
        });

        Ok(())
    }

    /// Stop the session on user request. Idempotent; clears the remembered
    /// config so no auto-reconnect will revive the session.
    pub fn stop(&self) {
        self.stop_inner(true);
    }

    /// Fail-safe stop on network-path loss: identical to `stop`, but the
    /// remembered config survives so auto-reconnect can restore the session
    /// when the path comes back.
    pub fn stop_for_path_loss(&self) {
        self.stop_inner(false);
    }

    fn stop_inner(&self, clear_remembered: bool) {
        // Invalidate scheduled reconnect attempts even when nothing is
        // running; a stop during the reconnect delay must win.
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if clear_remembered {
            *self.shared.remembered.lock() = None;
        }

        let token = self.shared.kill.lock().take();
        let Some(token) = token else {
            return;
        };

        *self.shared.state.lock() = SupervisorState::Stopping;
        token.cancel();
        *self.shared.current.lock() = None;
        *self.shared.state.lock() = SupervisorState::Stopped;
        self.shared.events.emit_status(ProxyStatusEvent::Disconnected);
    }

    #[cfg(test)]
    fn force_state(&self, state: SupervisorState) {
        *self.shared.state.lock() = state;
    }
}

/// Transition to `Stopped` after process exit, emitting `Disconnected`
/// exactly once per logical transition.
fn finish_stopped(shared: &Shared) {
    {
        let mut state = shared.state.lock();
        if *state == SupervisorState::Stopped {
            return;
        }
        *state = SupervisorState::Stopped;
    }
    *shared.current.lock() = None;
    shared.events.emit_status(ProxyStatusEvent::Disconnected);
}

/// Deterministic argument vector for the proxy binary.
pub fn build_args(config: &ProxyConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-s".into(),
        config.server.clone(),
        "-p".into(),
        config.server_port.to_string(),
        "-k".into(),
        config.password.clone(),
        "-m".into(),
        config.method.as_str().into(),
        "-b".into(),
        config.local_address.clone(),
        "-l".into(),
        config.local_port.to_string(),
        "--log-without-time".into(),
    ];
    if config.enable_udp {
        args.push("--enable-udp".into());
    }
    args.push("--timeout".into());
    args.push(config.timeout_secs.to_string());
    args.push("--dns".into());
    args.push(config.dns_server.clone());
    if config.enable_tls {
        args.push("--tls".into());
        if let Some(cert) = &config.tls_cert_path {
            args.push("--tls-cert".into());
            args.push(cert.display().to_string());
        }
    }
    args
}

/// Read one output stream line by line, forwarding parsed log events and
/// traffic samples. Stops once the epoch it was born under has passed.
async fn pump_lines<R>(reader: R, shared: Arc<Shared>, epoch: u64)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if shared.epoch.load(Ordering::SeqCst) != epoch {
            break;
        }
        let parsed = parse_log_line(&line);
        shared.events.emit_log(LogEvent {
            level: parsed.level,
            message: parsed.message.clone(),
        });
        // Traffic extraction happens strictly after level parsing of the
        // same line, preserving causal order for observers.
        if let Some(snapshot) = parse_traffic_tokens(&parsed.message) {
            let (delta, totals) = {
                let mut stats = shared.stats.lock();
                let delta = stats.record(snapshot);
                (delta, stats.totals())
            };
            shared.events.emit_traffic(TrafficEvent { delta, totals });
        }
    }
}

fn default_binary_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sockspilot")
        .join("bin")
        .join("sslocal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionMethod;

    fn config() -> ProxyConfig {
        ProxyConfig::new("proxy.example.com", 8388, "secret")
    }

    fn supervisor_with_dummy_binary(dir: &tempfile::TempDir) -> ProxySupervisor {
        let binary = dir.path().join("sslocal");
        std::fs::write(&binary, "").unwrap();
        ProxySupervisor::new(binary, Arc::new(EventBus::new()))
    }

    #[test]
    fn build_args_minimal() {
        let args = build_args(&config());
        assert_eq!(
            args,
            vec![
                "-s",
                "proxy.example.com",
                "-p",
                "8388",
                "-k",
                "secret",
                "-m",
                "aes-256-gcm",
                "-b",
                "127.0.0.1",
                "-l",
                "1080",
                "--log-without-time",
                "--enable-udp",
                "--timeout",
                "300",
                "--dns",
                "8.8.8.8",
            ]
        );
    }

    #[test]
    fn build_args_with_tls_and_no_udp() {
        let mut cfg = config();
        cfg.enable_udp = false;
        cfg.method = EncryptionMethod::Chacha20Poly1305;
        cfg.enable_tls = true;
        cfg.tls_cert_path = Some(PathBuf::from("/tmp/cert.pem"));

        let args = build_args(&cfg);
        assert!(!args.contains(&"--enable-udp".to_string()));
        assert!(args.contains(&"chacha20-poly1305".to_string()));
        let tls_pos = args.iter().position(|a| a == "--tls").unwrap();
        assert_eq!(args[tls_pos + 1], "--tls-cert");
        assert_eq!(args[tls_pos + 2], "/tmp/cert.pem");
    }

    #[test]
    fn start_rejects_invalid_config_without_state_change() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with_dummy_binary(&dir);

        let mut bad = config();
        bad.password.clear();
        let err = supervisor.start(bad).unwrap_err();
        assert!(matches!(err, StartError::InvalidConfiguration(_)));
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert!(supervisor.current_config().is_none());
    }

    #[test]
    fn start_rejects_missing_binary() {
        let supervisor = ProxySupervisor::new("/definitely/not/sslocal", Arc::new(EventBus::new()));
        let err = supervisor.start(config()).unwrap_err();
        assert!(matches!(err, StartError::BinaryNotFound));
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[test]
    fn second_start_while_running_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with_dummy_binary(&dir);
        supervisor.force_state(SupervisorState::Running);

        let err = supervisor.start(config()).unwrap_err();
        assert!(matches!(err, StartError::AlreadyRunning));
        // The rejected call changed nothing.
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(supervisor.current_config().is_none());
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_silent_no_op() {
        let events = Arc::new(EventBus::new());
        let supervisor = ProxySupervisor::new("/nonexistent", Arc::clone(&events));
        let mut rx = events.subscribe_status();

        supervisor.stop();
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn explicit_stop_clears_remembered_config() {
        let events = Arc::new(EventBus::new());
        let supervisor = ProxySupervisor::new("/nonexistent", events);
        *supervisor.shared.remembered.lock() = Some(config());

        supervisor.stop();
        assert!(supervisor.remembered_config().is_none());
    }

    #[test]
    fn stop_bumps_epoch_even_when_idle() {
        let supervisor = ProxySupervisor::new("/nonexistent", Arc::new(EventBus::new()));
        let before = supervisor.epoch();
        supervisor.stop();
        assert_eq!(supervisor.epoch(), before + 1);
    }
}
