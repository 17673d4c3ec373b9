//! Parsing of the proxy process's line-oriented output.
//!
//! Each line is scanned for a bracketed level token; everything after the
//! first matching bracket is the message. Lines containing `statistics:`
//! additionally carry `upload=<uint>` / `download=<uint>` traffic tokens.
//! Parsing never fails: unrecognized lines default to INFO, malformed
//! traffic tokens default to 0.

use std::fmt;

use super::stats::TrafficSnapshot;

/// Log level of one process output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Bracket tokens in match-priority order.
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    fn token(self) -> &'static str {
        match self {
            Self::Error => "[ERROR]",
            Self::Warn => "[WARN]",
            Self::Info => "[INFO]",
            Self::Debug => "[DEBUG]",
            Self::Trace => "[TRACE]",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        };
        f.write_str(s)
    }
}

/// One parsed output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub level: LogLevel,
    pub message: String,
}

/// Split a raw output line into level and message.
///
/// Levels are checked in `[ERROR] [WARN] [INFO] [DEBUG] [TRACE]` priority
/// order; the message is everything after the first matching bracket,
/// trimmed. Lines with no recognized bracket become INFO with the full line
/// as the message.
pub fn parse_log_line(line: &str) -> ParsedLine {
    for level in LogLevel::ALL {
        if let Some(idx) = line.find(level.token()) {
            let message = line[idx + level.token().len()..].trim().to_string();
            return ParsedLine { level, message };
        }
    }
    ParsedLine {
        level: LogLevel::Info,
        message: line.trim().to_string(),
    }
}

/// Extract a traffic sample from a message, if it carries one.
///
/// Only messages containing `statistics:` are considered. Tokens are
/// space-delimited `upload=<uint>` / `download=<uint>`; a missing or
/// malformed token defaults that value to 0 for the sample.
pub fn parse_traffic_tokens(message: &str) -> Option<TrafficSnapshot> {
    if !message.contains("statistics:") {
        return None;
    }

    let mut snapshot = TrafficSnapshot::default();
    for token in message.split_whitespace() {
        if let Some(value) = token.strip_prefix("upload=") {
            snapshot.upload = value.parse().unwrap_or(0);
        } else if let Some(value) = token.strip_prefix("download=") {
            snapshot.download = value.parse().unwrap_or(0);
        }
    }
    Some(snapshot)
}
