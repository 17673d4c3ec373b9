//! Persisted named-configuration storage (collaborator seam).
//!
//! A single JSON file holds named `ProxyConfig` records plus the selected
//! name. Missing or corrupt files load as an empty store; every mutation
//! persists immediately, stamped with the write time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ProxyConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredConfigs {
    /// RFC-3339 timestamp of the last write.
    #[serde(default)]
    saved_at: Option<String>,
    #[serde(default)]
    selected: Option<String>,
    #[serde(default)]
    configs: BTreeMap<String, ProxyConfig>,
}

/// Named `ProxyConfig` records backed by a JSON file.
pub struct ConfigStore {
    path: PathBuf,
    state: StoredConfigs,
}

impl ConfigStore {
    /// Open the store at `path`, tolerating a missing or corrupt file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("corrupt config store at {}, ignoring: {e}", path.display());
                    StoredConfigs::default()
                }
            },
            Err(_) => StoredConfigs::default(),
        };
        Self { path, state }
    }

    /// Default location: `~/.sockspilot/state/configs.json`.
    pub fn default_path() -> PathBuf {
        state_dir().join("configs.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> Vec<String> {
        self.state.configs.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<ProxyConfig> {
        self.state.configs.get(name).cloned()
    }

    /// Name and config of the current selection, if any.
    pub fn selected(&self) -> Option<(String, ProxyConfig)> {
        let name = self.state.selected.as_ref()?;
        let config = self.state.configs.get(name)?;
        Some((name.clone(), config.clone()))
    }

    /// Add or replace a named config and persist.
    pub fn add(&mut self, name: impl Into<String>, config: ProxyConfig) -> Result<()> {
        self.state.configs.insert(name.into(), config);
        self.persist()
    }

    /// Remove a named config, clearing the selection if it pointed there.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.state.configs.remove(name);
        if self.state.selected.as_deref() == Some(name) {
            self.state.selected = None;
        }
        self.persist()
    }

    /// Select a named config and persist the choice. Returns the config, or
    /// `None` (without persisting) when the name is unknown.
    pub fn select(&mut self, name: &str) -> Result<Option<ProxyConfig>> {
        let Some(config) = self.state.configs.get(name).cloned() else {
            return Ok(None);
        };
        self.state.selected = Some(name.to_string());
        self.persist()?;
        Ok(Some(config))
    }

    fn persist(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.state.saved_at = Some(chrono::Utc::now().to_rfc3339());
        let json = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write config store {}", self.path.display()))?;
        Ok(())
    }
}

/// State directory for everything sockspilot persists.
pub fn state_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sockspilot")
        .join("state")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server: &str) -> ProxyConfig {
        ProxyConfig::new(server, 8388, "pw")
    }

    #[test]
    fn add_select_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("configs.json");

        let mut store = ConfigStore::open(&path);
        store.add("tokyo", config("tokyo.example.com")).unwrap();
        store.add("osaka", config("osaka.example.com")).unwrap();
        assert_eq!(
            store.select("tokyo").unwrap().unwrap().server,
            "tokyo.example.com"
        );

        let reopened = ConfigStore::open(&path);
        assert_eq!(reopened.names(), vec!["osaka", "tokyo"]);
        let (name, cfg) = reopened.selected().unwrap();
        assert_eq!(name, "tokyo");
        assert_eq!(cfg.server, "tokyo.example.com");
    }

    #[test]
    fn select_unknown_name_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("configs.json"));
        assert!(store.select("missing").unwrap().is_none());
        assert!(store.selected().is_none());
    }

    #[test]
    fn remove_clears_dangling_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("configs.json"));
        store.add("only", config("only.example.com")).unwrap();
        store.select("only").unwrap();
        store.remove("only").unwrap();
        assert!(store.selected().is_none());
        assert!(store.names().is_empty());
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configs.json");
        fs::write(&path, "{{ not json").unwrap();
        let store = ConfigStore::open(&path);
        assert!(store.names().is_empty());
    }

    #[test]
    fn writes_are_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configs.json");
        let mut store = ConfigStore::open(&path);
        store.add("a", config("a.example.com")).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["saved_at"].is_string());
    }
}
