//! Persisted user-rule storage.
//!
//! The on-disk format is a JSON array of
//! `{"type": "domain"|"ip"|"keyword"|"useragent", "action": "proxy"|"direct"|"reject",
//! "value": "...", "description"?: "..."}` records. A missing file is an
//! empty list; corrupt files and unknown record kinds are tolerated (logged
//! as warnings), never hard errors.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::engine::{ProxyRule, RuleAction, RuleMatch};

/// Persistence seam for the rule engine's user rules.
pub trait RuleStore: Send + Sync {
    fn load(&self) -> Result<Vec<ProxyRule>>;
    fn save(&self, rules: &[ProxyRule]) -> Result<()>;
}

/// One serialized rule record.
#[derive(Debug, Serialize, Deserialize)]
struct RuleRecord {
    #[serde(rename = "type")]
    kind: String,
    action: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

fn record_to_rule(record: RuleRecord) -> Option<ProxyRule> {
    let matcher = match record.kind.as_str() {
        "domain" => RuleMatch::Domain(record.value),
        "ip" => RuleMatch::IpRange(record.value),
        "keyword" => RuleMatch::Keyword(record.value),
        "useragent" => RuleMatch::UserAgent(record.value),
        _ => return None,
    };
    let action = match record.action.as_str() {
        "proxy" => RuleAction::Proxy,
        "direct" => RuleAction::Direct,
        "reject" => RuleAction::Reject,
        _ => return None,
    };
    Some(ProxyRule {
        matcher,
        action,
        description: record.description,
    })
}

fn rule_to_record(rule: &ProxyRule) -> RuleRecord {
    let (kind, value) = match &rule.matcher {
        RuleMatch::Domain(v) => ("domain", v),
        RuleMatch::IpRange(v) => ("ip", v),
        RuleMatch::Keyword(v) => ("keyword", v),
        RuleMatch::UserAgent(v) => ("useragent", v),
    };
    let action = match rule.action {
        RuleAction::Proxy => "proxy",
        RuleAction::Direct => "direct",
        RuleAction::Reject => "reject",
    };
    RuleRecord {
        kind: kind.to_string(),
        action: action.to_string(),
        value: value.clone(),
        description: rule.description.clone(),
    }
}

/// Rule store backed by a single JSON file.
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleStore for JsonRuleStore {
    fn load(&self) -> Result<Vec<ProxyRule>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read rule file {}", self.path.display()))?;

        let records: Vec<RuleRecord> = match serde_json::from_str(&data) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("corrupt rule file at {}, ignoring: {e}", self.path.display());
                return Ok(Vec::new());
            }
        };

        let mut rules = Vec::with_capacity(records.len());
        for record in records {
            let kind = record.kind.clone();
            match record_to_rule(record) {
                Some(rule) => rules.push(rule),
                None => tracing::warn!("skipping rule record with unknown kind/action '{kind}'"),
            }
        }
        Ok(rules)
    }

    fn save(&self, rules: &[ProxyRule]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let records: Vec<RuleRecord> = rules.iter().map(rule_to_record).collect();
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write rule file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rules() -> Vec<ProxyRule> {
        vec![
            ProxyRule::new(RuleMatch::Domain("google.com".into()), RuleAction::Proxy)
                .with_description("Google"),
            ProxyRule::new(RuleMatch::IpRange("10.0.0.0/8".into()), RuleAction::Direct),
            ProxyRule::new(RuleMatch::Keyword("tracker".into()), RuleAction::Reject),
            ProxyRule::new(RuleMatch::UserAgent("BadBot".into()), RuleAction::Reject),
        ]
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::new(dir.path().join("rules").join("user_rules.json"));

        let rules = sample_rules();
        store.save(&rules).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, rules);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, "not json {{{").unwrap();
        let store = JsonRuleStore::new(path);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn unknown_record_kinds_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.json");
        fs::write(
            &path,
            r#"[
                {"type": "domain", "action": "proxy", "value": "example.com"},
                {"type": "regex", "action": "proxy", "value": ".*"},
                {"type": "keyword", "action": "teleport", "value": "x"}
            ]"#,
        )
        .unwrap();

        let store = JsonRuleStore::new(path);
        let rules = store.load().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].matcher, RuleMatch::Domain("example.com".into()));
    }

    #[test]
    fn description_is_optional_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let store = JsonRuleStore::new(&path);
        store
            .save(&[ProxyRule::new(
                RuleMatch::Domain("a.example".into()),
                RuleAction::Direct,
            )])
            .unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("description"));
    }
}
