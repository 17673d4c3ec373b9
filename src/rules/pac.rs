//! PAC (Proxy Auto-Config) script rendering.
//!
//! The output embeds the proxy directive, three host lists partitioned by
//! rule action, and a dispatcher that branches on the routing mode the same
//! way `RuleEngine::should_proxy` does. Rendering is a pure function of
//! (builtin rules, user rules, mode).

use crate::config::RoutingMode;

use super::engine::{ProxyRule, RuleAction, RuleMatch};

/// Directive handed to PAC clients for proxied traffic; points at the
/// supervisor's local SOCKS endpoint.
const PROXY_DIRECTIVE: &str = "SOCKS5 127.0.0.1:1080; SOCKS 127.0.0.1:1080; DIRECT;";

/// Static tail of the script: list matcher plus the mode dispatcher.
/// Reject wins first; whitelist falls back to proxy, blacklist to direct.
const PAC_DISPATCH: &str = r#"
    function checkRules(rules) {
        for (var i = 0; i < rules.length; i++) {
            if (shExpMatch(host, rules[i])) {
                return true;
            }
        }
        return false;
    }

    if (mode === 'global') {
        return proxy;
    }
    if (checkRules(rejectList)) {
        return "REJECT";
    }
    if (mode === 'whitelist') {
        if (checkRules(directList)) {
            return "DIRECT";
        }
        return proxy;
    }
    if (mode === 'blacklist') {
        if (checkRules(proxyList)) {
            return proxy;
        }
        return "DIRECT";
    }
    return "DIRECT";
}
"#;

/// Render the rule set as a `FindProxyForURL` script.
pub fn render(builtin: &[ProxyRule], user: &[ProxyRule], mode: RoutingMode) -> String {
    let mut pac = String::with_capacity(2048);

    pac.push_str("function FindProxyForURL(url, host) {\n");
    pac.push_str(&format!("    var proxy = \"{PROXY_DIRECTIVE}\";\n"));
    pac.push_str(&format!("    var mode = \"{mode}\";\n\n"));
    pac.push_str("    var directList = [];\n");
    pac.push_str("    var proxyList = [];\n");
    pac.push_str("    var rejectList = [];\n\n");

    for rule in builtin.iter().chain(user.iter()) {
        append_rule(&mut pac, rule);
    }

    pac.push_str(PAC_DISPATCH);
    pac
}

/// Append one rule: a list entry for host-matched kinds, an inline
/// conditional for user-agent rules (which the list mechanism cannot
/// express).
fn append_rule(pac: &mut String, rule: &ProxyRule) {
    let list = match rule.action {
        RuleAction::Direct => "directList",
        RuleAction::Proxy => "proxyList",
        RuleAction::Reject => "rejectList",
    };

    match &rule.matcher {
        RuleMatch::Domain(value) | RuleMatch::IpRange(value) => {
            pac.push_str(&format!("    {list}.push('{}');\n", escape_js(value)));
        }
        RuleMatch::Keyword(value) => {
            pac.push_str(&format!("    {list}.push('*{}*');\n", escape_js(value)));
        }
        RuleMatch::UserAgent(value) => {
            let verdict = match rule.action {
                RuleAction::Proxy => "proxy",
                RuleAction::Direct => "\"DIRECT\"",
                RuleAction::Reject => "\"REJECT\"",
            };
            pac.push_str(&format!(
                "    if (navigator.userAgent.indexOf('{}') !== -1) {{\n        return {verdict};\n    }}\n",
                escape_js(value)
            ));
        }
    }
}

/// Escape special characters for JavaScript single-quoted strings.
fn escape_js(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
