//! Routing configuration loading.
//!
//! Three JSON layouts are accepted and flattened into the same ordered rule
//! list:
//!
//! ```text
//! [{"regex": ".*@a.com", "forward_to": ["x@b.com", "y@b.com"]}]   // entries
//! {".*@a.com": ["x@b.com"]}  or  {"emails": {".*@a.com": [...]}}  // mapping
//! {"translations": [{"regex": ".*@a.com", "replace": "x@b.com"}]} // legacy
//! ```
//!
//! Object keys keep their document order (`serde_json/preserve_order`), so
//! the rule order always follows the file.

use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::{RoutingConfig, RuleSpec};
use crate::config::Config;
use crate::error::RoutingError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoutingDocument {
    // Sequences first: serde also accepts a one-element array for the
    // struct variants below.
    Entries(Vec<ForwardEntry>),
    Translations { translations: Vec<TranslationEntry> },
    Emails { emails: Map<String, Value> },
    Mapping(Map<String, Value>),
}

#[derive(Debug, Deserialize)]
struct TranslationEntry {
    regex: String,
    replace: String,
}

#[derive(Debug, Deserialize)]
struct ForwardEntry {
    regex: String,
    #[serde(default)]
    forward_to: Vec<String>,
}

/// Parse routing JSON into a compiled [`RoutingConfig`].
pub fn parse_routing(raw: &str) -> Result<RoutingConfig, RoutingError> {
    let document: RoutingDocument = serde_json::from_str(raw)?;

    let specs = match document {
        RoutingDocument::Translations { translations } => translations
            .into_iter()
            .map(|entry| RuleSpec::new(entry.regex, entry.replace))
            .collect(),
        RoutingDocument::Entries(entries) => entries
            .into_iter()
            .flat_map(|entry| {
                let regex = entry.regex;
                entry
                    .forward_to
                    .into_iter()
                    .map(move |alias| RuleSpec::new(regex.clone(), alias))
            })
            .collect(),
        RoutingDocument::Emails { emails: mapping } | RoutingDocument::Mapping(mapping) => {
            flatten_mapping(mapping)?
        }
    };

    RoutingConfig::new(specs)
}

fn flatten_mapping(mapping: Map<String, Value>) -> Result<Vec<RuleSpec>, RoutingError> {
    let mut specs = Vec::new();
    for (regex, aliases) in mapping {
        let aliases: Vec<String> = serde_json::from_value(aliases)?;
        specs.extend(
            aliases
                .into_iter()
                .map(|alias| RuleSpec::new(regex.clone(), alias)),
        );
    }
    Ok(specs)
}

/// Load the routing configuration named by the process configuration.
///
/// Inline JSON from `ROUTING_CONFIG` wins over the file at
/// `ROUTING_CONFIG_PATH`.
pub fn load_routing(config: &Config) -> Result<RoutingConfig> {
    let (source, raw) = match &config.routing_config {
        Some(inline) => ("env".to_string(), inline.clone()),
        None => {
            let raw = fs::read_to_string(&config.routing_config_path).with_context(|| {
                format!(
                    "Failed to read routing config {}",
                    config.routing_config_path.display()
                )
            })?;
            (config.routing_config_path.display().to_string(), raw)
        }
    };

    let routing = parse_routing(&raw)
        .with_context(|| format!("Failed to load routing config from {}", source))?;

    info!(source = %source, rules = routing.len(), "routing_config_loaded");

    Ok(routing)
}
