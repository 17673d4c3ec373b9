//! Routing decision engine.
//!
//! Holds two ordered rule lists — builtin rules loaded once at startup and
//! user rules mutated at runtime — and a routing mode. Matching is
//! first-match-wins, builtin before user; the mode decides the default for
//! hosts no rule matches.

use std::sync::Arc;

use crate::config::RoutingMode;
use crate::error::RuleError;

use super::pac;
use super::store::RuleStore;

/// What a rule matches against. Each variant carries a single value string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    /// Case-sensitive suffix match against the host.
    Domain(String),
    /// Exact string comparison against the host. Not CIDR containment: the
    /// PAC script renders these values verbatim, and the engine must agree
    /// with it.
    IpRange(String),
    /// Substring match against the full URL.
    Keyword(String),
    /// Requires request-time header inspection, which happens outside this
    /// engine; never matches here. Still rendered into the PAC script.
    UserAgent(String),
}

/// What to do with traffic a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Proxy,
    Direct,
    Reject,
}

/// A single immutable routing rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRule {
    pub matcher: RuleMatch,
    pub action: RuleAction,
    pub description: Option<String>,
}

impl ProxyRule {
    pub fn new(matcher: RuleMatch, action: RuleAction) -> Self {
        Self {
            matcher,
            action,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether this rule matches the given destination.
    pub fn matches(&self, host: &str, url: &str) -> bool {
        match &self.matcher {
            RuleMatch::Domain(suffix) => host.ends_with(suffix.as_str()),
            RuleMatch::IpRange(addr) => host == addr,
            RuleMatch::Keyword(keyword) => url.contains(keyword.as_str()),
            RuleMatch::UserAgent(_) => false,
        }
    }
}

/// Builtin rule set used when no builtin rule file is provided.
fn default_builtin_rules() -> Vec<ProxyRule> {
    vec![
        ProxyRule::new(RuleMatch::Domain("google.com".into()), RuleAction::Proxy)
            .with_description("Google"),
        ProxyRule::new(RuleMatch::Domain("facebook.com".into()), RuleAction::Proxy)
            .with_description("Facebook"),
        ProxyRule::new(RuleMatch::Domain("twitter.com".into()), RuleAction::Proxy)
            .with_description("Twitter"),
        ProxyRule::new(RuleMatch::Domain("github.com".into()), RuleAction::Proxy)
            .with_description("GitHub"),
        ProxyRule::new(RuleMatch::Domain("baidu.com".into()), RuleAction::Direct)
            .with_description("Baidu"),
        ProxyRule::new(RuleMatch::Domain("qq.com".into()), RuleAction::Direct)
            .with_description("Tencent"),
        ProxyRule::new(RuleMatch::IpRange("192.168.0.0/16".into()), RuleAction::Direct)
            .with_description("LAN"),
        ProxyRule::new(RuleMatch::Keyword("adware".into()), RuleAction::Reject)
            .with_description("Ad software"),
    ]
}

/// Deterministic routing decisions for a rule set and mode.
pub struct RuleEngine {
    mode: RoutingMode,
    builtin: Vec<ProxyRule>,
    user: Vec<ProxyRule>,
    store: Option<Arc<dyn RuleStore>>,
}

impl RuleEngine {
    /// Engine with the builtin default rules and no persistence.
    pub fn new(mode: RoutingMode) -> Self {
        Self {
            mode,
            builtin: default_builtin_rules(),
            user: Vec::new(),
            store: None,
        }
    }

    /// Engine whose user rules are loaded from and persisted through `store`.
    pub fn with_store(mode: RoutingMode, store: Arc<dyn RuleStore>) -> anyhow::Result<Self> {
        let user = store.load()?;
        Ok(Self {
            mode,
            builtin: default_builtin_rules(),
            user,
            store: Some(store),
        })
    }

    /// Replace the builtin rule list (loaded once at startup).
    pub fn set_builtin_rules(&mut self, rules: Vec<ProxyRule>) {
        self.builtin = rules;
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RoutingMode) {
        self.mode = mode;
    }

    pub fn builtin_rules(&self) -> &[ProxyRule] {
        &self.builtin
    }

    pub fn user_rules(&self) -> &[ProxyRule] {
        &self.user
    }

    /// Should traffic to `(host, url)` enter the proxy path?
    ///
    /// First match wins, builtin rules before user rules. `Reject` always
    /// answers no; `Proxy` always answers yes; `Direct` is terminal-no under
    /// whitelist mode and redundant (skipped) under blacklist mode, where
    /// direct is already the default. Unmatched hosts are proxied only in
    /// whitelist mode.
    pub fn should_proxy(&self, host: &str, url: &str) -> bool {
        if self.mode == RoutingMode::Global {
            return true;
        }

        for rule in self.builtin.iter().chain(self.user.iter()) {
            if !rule.matches(host, url) {
                continue;
            }
            match rule.action {
                RuleAction::Reject => return false,
                RuleAction::Proxy => return true,
                RuleAction::Direct => {
                    if self.mode == RoutingMode::Whitelist {
                        return false;
                    }
                    // Blacklist: direct is the default; keep scanning.
                }
            }
        }

        self.mode == RoutingMode::Whitelist
    }

    /// Append a user rule (lowest priority) and persist the updated list.
    pub fn add_user_rule(&mut self, rule: ProxyRule) -> Result<(), RuleError> {
        self.user.push(rule);
        self.persist()
    }

    /// Remove the user rule at `index` and persist the updated list.
    pub fn remove_user_rule(&mut self, index: usize) -> Result<ProxyRule, RuleError> {
        if index >= self.user.len() {
            return Err(RuleError::IndexOutOfRange {
                index,
                len: self.user.len(),
            });
        }
        let removed = self.user.remove(index);
        self.persist()?;
        Ok(removed)
    }

    /// Render the current rule set and mode as a PAC script.
    pub fn generate_pac(&self) -> String {
        pac::render(&self.builtin, &self.user, self.mode)
    }

    fn persist(&self) -> Result<(), RuleError> {
        if let Some(store) = &self.store {
            store
                .save(&self.user)
                .map_err(|e| RuleError::Persist(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mode: RoutingMode, rules: Vec<ProxyRule>) -> RuleEngine {
        let mut engine = RuleEngine::new(mode);
        engine.set_builtin_rules(rules);
        engine
    }

    fn url(host: &str) -> String {
        format!("https://{host}/index.html")
    }

    #[test]
    fn global_mode_proxies_everything() {
        let engine = engine(
            RoutingMode::Global,
            vec![ProxyRule::new(
                RuleMatch::Domain("example.com".into()),
                RuleAction::Reject,
            )],
        );
        // Rules are not even consulted.
        assert!(engine.should_proxy("example.com", &url("example.com")));
        assert!(engine.should_proxy("anything.net", &url("anything.net")));
    }

    #[test]
    fn whitelist_proxy_match_returns_true() {
        let engine = engine(
            RoutingMode::Whitelist,
            vec![ProxyRule::new(
                RuleMatch::Domain("google.com".into()),
                RuleAction::Proxy,
            )],
        );
        assert!(engine.should_proxy("www.google.com", &url("www.google.com")));
    }

    #[test]
    fn reject_match_returns_false_in_every_mode() {
        for mode in [
            RoutingMode::Whitelist,
            RoutingMode::Blacklist,
        ] {
            let engine = engine(
                mode,
                vec![ProxyRule::new(
                    RuleMatch::Keyword("adware".into()),
                    RuleAction::Reject,
                )],
            );
            assert!(
                !engine.should_proxy("ads.example.com", "https://ads.example.com/adware.js"),
                "reject must win under {mode}"
            );
        }
    }

    #[test]
    fn unmatched_host_defaults_by_mode() {
        let whitelist = engine(RoutingMode::Whitelist, vec![]);
        let blacklist = engine(RoutingMode::Blacklist, vec![]);
        assert!(whitelist.should_proxy("nowhere.example", &url("nowhere.example")));
        assert!(!blacklist.should_proxy("nowhere.example", &url("nowhere.example")));
    }

    #[test]
    fn whitelist_direct_match_is_terminal() {
        // A later proxy rule that also matches must NOT rescue the host:
        // the first direct match ends the scan with "do not proxy".
        let engine = engine(
            RoutingMode::Whitelist,
            vec![
                ProxyRule::new(RuleMatch::Domain("example.com".into()), RuleAction::Direct),
                ProxyRule::new(RuleMatch::Domain("com".into()), RuleAction::Proxy),
            ],
        );
        assert!(!engine.should_proxy("www.example.com", &url("www.example.com")));
    }

    #[test]
    fn blacklist_direct_match_falls_through() {
        // Under blacklist, direct is the default; the match is skipped and a
        // later proxy rule wins.
        let engine = engine(
            RoutingMode::Blacklist,
            vec![
                ProxyRule::new(RuleMatch::Domain("example.com".into()), RuleAction::Direct),
                ProxyRule::new(RuleMatch::Domain("com".into()), RuleAction::Proxy),
            ],
        );
        assert!(engine.should_proxy("www.example.com", &url("www.example.com")));
    }

    #[test]
    fn blacklist_proxy_match_returns_true() {
        let engine = engine(
            RoutingMode::Blacklist,
            vec![ProxyRule::new(
                RuleMatch::Domain("blocked.example".into()),
                RuleAction::Proxy,
            )],
        );
        assert!(engine.should_proxy("www.blocked.example", &url("www.blocked.example")));
    }

    #[test]
    fn builtin_rules_win_over_user_rules() {
        let mut engine = engine(
            RoutingMode::Whitelist,
            vec![ProxyRule::new(
                RuleMatch::Domain("example.com".into()),
                RuleAction::Direct,
            )],
        );
        engine
            .add_user_rule(ProxyRule::new(
                RuleMatch::Domain("example.com".into()),
                RuleAction::Proxy,
            ))
            .unwrap();
        assert!(!engine.should_proxy("www.example.com", &url("www.example.com")));
    }

    #[test]
    fn domain_match_is_case_sensitive_suffix() {
        let rule = ProxyRule::new(RuleMatch::Domain("google.com".into()), RuleAction::Proxy);
        assert!(rule.matches("www.google.com", ""));
        assert!(rule.matches("google.com", ""));
        assert!(!rule.matches("www.Google.com", ""));
        assert!(!rule.matches("google.com.evil.net", ""));
    }

    #[test]
    fn ip_range_match_is_exact_string_equality() {
        let rule = ProxyRule::new(RuleMatch::IpRange("192.168.0.0/16".into()), RuleAction::Direct);
        assert!(rule.matches("192.168.0.0/16", ""));
        // Containment is deliberately not implemented.
        assert!(!rule.matches("192.168.1.10", ""));
    }

    #[test]
    fn keyword_matches_full_url_not_host() {
        let rule = ProxyRule::new(RuleMatch::Keyword("tracker".into()), RuleAction::Reject);
        assert!(rule.matches("cdn.example.com", "https://cdn.example.com/tracker.js"));
        assert!(!rule.matches("cdn.example.com", "https://cdn.example.com/app.js"));
    }

    #[test]
    fn user_agent_rules_never_match() {
        let rule = ProxyRule::new(RuleMatch::UserAgent("Mozilla".into()), RuleAction::Proxy);
        assert!(!rule.matches("example.com", "https://example.com/Mozilla"));
    }

    #[test]
    fn remove_user_rule_out_of_range_is_an_error() {
        let mut engine = RuleEngine::new(RoutingMode::Whitelist);
        let err = engine.remove_user_rule(0).unwrap_err();
        assert!(matches!(err, RuleError::IndexOutOfRange { index: 0, len: 0 }));
    }

    #[test]
    fn add_then_remove_user_rule() {
        let mut engine = RuleEngine::new(RoutingMode::Whitelist);
        engine
            .add_user_rule(ProxyRule::new(
                RuleMatch::Domain("mysite.dev".into()),
                RuleAction::Proxy,
            ))
            .unwrap();
        assert_eq!(engine.user_rules().len(), 1);
        let removed = engine.remove_user_rule(0).unwrap();
        assert_eq!(removed.matcher, RuleMatch::Domain("mysite.dev".into()));
        assert!(engine.user_rules().is_empty());
    }
}
