//! Address routing.
//!
//! A [`RoutingConfig`] is an ordered list of regex rules. The first rule
//! whose pattern matches a recipient decides where the message goes:
//!
//! ```text
//! "abc@def.ghi" ──► abc@(def).ghi  =>  "$1.abc" ──► "def.abc"
//! ```
//!
//! The configuration is built once at startup and shared read-only.

pub mod loader;

use regex::Regex;
use tracing::debug;

use crate::error::{MapError, RoutingError};

pub use loader::{load_routing, parse_routing};

/// Declared (uncompiled) routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub pattern: String,
    pub replacement: String,
}

impl RuleSpec {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// A compiled routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pattern: Regex,
    replacement: String,
}

impl RoutingRule {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }
}

/// Ordered, non-empty set of routing rules.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    rules: Vec<RoutingRule>,
}

impl RoutingConfig {
    /// Compile the given rules, keeping their declaration order.
    pub fn new(specs: Vec<RuleSpec>) -> Result<Self, RoutingError> {
        if specs.is_empty() {
            return Err(RoutingError::EmptyRuleSet);
        }

        let rules = specs
            .into_iter()
            .map(|spec| {
                let pattern =
                    Regex::new(&spec.pattern).map_err(|source| RoutingError::InvalidPattern {
                        pattern: spec.pattern.clone(),
                        source,
                    })?;
                Ok::<_, RoutingError>(RoutingRule {
                    pattern,
                    replacement: spec.replacement,
                })
            })
            .collect::<Result<Vec<_>, RoutingError>>()?;

        Ok(Self { rules })
    }

    /// Map a recipient to its destination.
    ///
    /// Only the first matching rule fires. Its pattern is substituted into
    /// the candidate with the rule's replacement template, so capture-group
    /// references like `$1` are expanded and text outside the match is kept.
    pub fn map(&self, candidate: &str) -> Result<String, MapError> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.pattern.is_match(candidate) {
                let destination = rule
                    .pattern
                    .replace_all(candidate, rule.replacement.as_str())
                    .into_owned();
                debug!(
                    candidate = %candidate,
                    rule_index = index,
                    pattern = %rule.pattern,
                    destination = %destination,
                    "routing_rule_matched"
                );
                return Ok(destination);
            }
        }

        Err(MapError::NoMatch(candidate.to_string()))
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
