//! Proxy session configuration.
//!
//! `ProxyConfig` is the value object handed to the supervisor. It is built
//! by the caller (CLI, config store, or message bus), checked once with
//! [`ProxyConfig::validate`], and then treated as immutable for the lifetime
//! of the running session.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StartError;

/// Ciphers accepted by the supervised proxy executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMethod {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "aes-128-cfb")]
    Aes128Cfb,
    #[serde(rename = "aes-256-cfb")]
    Aes256Cfb,
    #[serde(rename = "chacha20")]
    Chacha20,
    #[serde(rename = "chacha20-poly1305")]
    Chacha20Poly1305,
    #[serde(rename = "xchacha20")]
    Xchacha20,
    #[serde(rename = "xchacha20-poly1305")]
    Xchacha20Poly1305,
}

impl EncryptionMethod {
    /// Wire form passed to the proxy binary via `-m`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Aes256Gcm => "aes-256-gcm",
            Self::Aes128Cfb => "aes-128-cfb",
            Self::Aes256Cfb => "aes-256-cfb",
            Self::Chacha20 => "chacha20",
            Self::Chacha20Poly1305 => "chacha20-poly1305",
            Self::Xchacha20 => "xchacha20",
            Self::Xchacha20Poly1305 => "xchacha20-poly1305",
        }
    }
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        Self::Aes256Gcm
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-128-gcm" => Ok(Self::Aes128Gcm),
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "aes-128-cfb" => Ok(Self::Aes128Cfb),
            "aes-256-cfb" => Ok(Self::Aes256Cfb),
            "chacha20" => Ok(Self::Chacha20),
            "chacha20-poly1305" => Ok(Self::Chacha20Poly1305),
            "xchacha20" => Ok(Self::Xchacha20),
            "xchacha20-poly1305" => Ok(Self::Xchacha20Poly1305),
            other => Err(format!("unsupported encryption method '{other}'")),
        }
    }
}

/// Routing mode governing default behavior when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// All traffic is proxied, rules are not consulted.
    Global,
    /// Unlisted hosts are proxied; `direct` rules carve out exceptions.
    Whitelist,
    /// Unlisted hosts go direct; `proxy` rules carve out exceptions.
    Blacklist,
}

impl Default for RoutingMode {
    fn default() -> Self {
        Self::Whitelist
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
        };
        f.write_str(s)
    }
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "whitelist" => Ok(Self::Whitelist),
            "blacklist" => Ok(Self::Blacklist),
            other => Err(format!("unknown routing mode '{other}'")),
        }
    }
}

/// Server-selection strategy. Carried and persisted with the config; the
/// control plane does not interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    Direct,
    Proxy,
    ByLocation,
    ByLatency,
    LoadBalance,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        Self::Proxy
    }
}

fn default_local_address() -> String {
    "127.0.0.1".to_string()
}

fn default_local_port() -> u16 {
    1080
}

fn default_enable_udp() -> bool {
    true
}

fn default_timeout_secs() -> i64 {
    300
}

fn default_dns_server() -> String {
    "8.8.8.8".to_string()
}

/// Configuration for one proxy session.
///
/// Ports are `u16`, so the 1–65535 upper bound is enforced by the type;
/// `validate` rejects the remaining invalid value, 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    #[serde(default)]
    pub method: EncryptionMethod,
    #[serde(default = "default_local_address")]
    pub local_address: String,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_enable_udp")]
    pub enable_udp: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64,
    #[serde(default = "default_dns_server")]
    pub dns_server: String,
    #[serde(default)]
    pub mode: RoutingMode,
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default)]
    pub enable_tls: bool,
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
}

impl ProxyConfig {
    /// Build a config with the standard defaults for everything except the
    /// server endpoint and secret.
    pub fn new(server: impl Into<String>, server_port: u16, password: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            server_port,
            password: password.into(),
            method: EncryptionMethod::default(),
            local_address: default_local_address(),
            local_port: default_local_port(),
            enable_udp: default_enable_udp(),
            timeout_secs: default_timeout_secs(),
            dns_server: default_dns_server(),
            mode: RoutingMode::default(),
            strategy: RoutingStrategy::default(),
            enable_tls: false,
            tls_cert_path: None,
        }
    }

    /// Check the config is complete and internally consistent.
    ///
    /// Must succeed before the config is handed to the supervisor; `start`
    /// calls this itself as its first step.
    pub fn validate(&self) -> Result<(), StartError> {
        if self.server.trim().is_empty() {
            return Err(invalid("server address must not be empty"));
        }
        if self.server_port == 0 {
            return Err(invalid("server port must be in 1-65535"));
        }
        if self.password.is_empty() {
            return Err(invalid("password must not be empty"));
        }
        if self.local_address.trim().is_empty() {
            return Err(invalid("local bind address must not be empty"));
        }
        if self.local_port == 0 {
            return Err(invalid("local port must be in 1-65535"));
        }
        if self.timeout_secs < 0 {
            return Err(invalid("timeout must not be negative"));
        }
        if self.dns_server.trim().is_empty() {
            return Err(invalid("DNS server must not be empty"));
        }
        if self.enable_tls {
            match &self.tls_cert_path {
                None => return Err(invalid("TLS enabled but no certificate path given")),
                Some(path) if !path.exists() => {
                    return Err(invalid(format!(
                        "TLS certificate file does not exist: {}",
                        path.display()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> StartError {
    StartError::InvalidConfiguration(reason.into())
}
