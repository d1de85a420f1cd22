//! Declarative subscriber filters.
//!
//! A [`FilterSpec`] maps attribute names to match rules. Every rule must
//! match for the filter to match; a rule whose attribute is absent from the
//! event never matches. An empty filter matches everything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::{ChangeEvent, EventKind, ATTR_EVENT_KIND, ATTR_OBJECT_KEY};

/// A rule applied to one attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Value equals the given string.
    Exact(String),
    /// Value is one of the given strings.
    AnyOf(Vec<String>),
    /// Value starts with the given string.
    Prefix(String),
    /// Value ends with the given string.
    Suffix(String),
    /// Value satisfies every nested rule.
    All(Vec<MatchRule>),
}

impl MatchRule {
    /// Returns true if `value` satisfies the rule.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            MatchRule::Exact(expected) => value == expected,
            MatchRule::AnyOf(allowed) => allowed.iter().any(|a| a == value),
            MatchRule::Prefix(prefix) => value.starts_with(prefix.as_str()),
            MatchRule::Suffix(suffix) => value.ends_with(suffix.as_str()),
            MatchRule::All(rules) => rules.iter().all(|r| r.matches(value)),
        }
    }
}

/// Attribute-to-rule mapping attached to a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    rules: BTreeMap<String, MatchRule>,
}

impl FilterSpec {
    /// A filter with no rules; matches every event.
    pub fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) the rule for `attribute`.
    pub fn with_rule(mut self, attribute: &str, rule: MatchRule) -> Self {
        self.rules.insert(attribute.to_string(), rule);
        self
    }

    /// Restricts the filter to the given event kinds.
    pub fn with_event_kinds(self, kinds: &[EventKind]) -> Self {
        let allowed = kinds.iter().map(|k| k.as_str().to_string()).collect();
        self.with_rule(ATTR_EVENT_KIND, MatchRule::AnyOf(allowed))
    }

    /// Restricts the filter to object keys starting with `prefix`.
    pub fn with_key_prefix(self, prefix: &str) -> Self {
        self.and_rule(ATTR_OBJECT_KEY, MatchRule::Prefix(prefix.to_string()))
    }

    /// Restricts the filter to object keys ending with `suffix`.
    pub fn with_key_suffix(self, suffix: &str) -> Self {
        self.and_rule(ATTR_OBJECT_KEY, MatchRule::Suffix(suffix.to_string()))
    }

    // Narrows an existing rule on `attribute` instead of replacing it.
    fn and_rule(mut self, attribute: &str, rule: MatchRule) -> Self {
        let combined = match self.rules.remove(attribute) {
            None => rule,
            Some(MatchRule::All(mut rules)) => {
                rules.push(rule);
                MatchRule::All(rules)
            }
            Some(existing) => MatchRule::All(vec![existing, rule]),
        };
        self.rules.insert(attribute.to_string(), combined);
        self
    }

    /// Restricts the filter to events carrying `tag` with exactly `value`.
    pub fn with_tag(self, tag: &str, value: &str) -> Self {
        self.with_rule(tag, MatchRule::Exact(value.to_string()))
    }

    /// Returns true if the filter has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates the filter against an event.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.rules.iter().all(|(attribute, rule)| {
            event
                .attribute(attribute)
                .map(|value| rule.matches(value))
                .unwrap_or(false)
        })
    }
}
