//! Rule-based routing: decision engine, PAC rendering, persisted user rules.

pub mod engine;
pub mod pac;
pub mod store;

pub use engine::{ProxyRule, RuleAction, RuleEngine, RuleMatch};
pub use store::{JsonRuleStore, RuleStore};
