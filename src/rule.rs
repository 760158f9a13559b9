use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

/// Apex sentinel used by record values.
pub const APEX: &str = "@";

/// One proxy entry from the Lucky rule list.
///
/// Only `Key` and `Domains` are interpreted, every other field is kept as-is so
/// that two rules compare equal only when the whole upstream entry is equal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rule {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Domains", alias = "domains", default, deserialize_with = "nullable_domains")]
    pub domains: Domains,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Rule {
    pub fn new<K: Into<String>>(key: K, domains: Domains) -> Self {
        Self {
            key: key.into(),
            domains,
            extra: serde_json::Map::new(),
        }
    }
}

/// Domains as Lucky sends them: either a list or a single comma-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Domains {
    List(Vec<String>),
    Joined(String),
}

impl Default for Domains {
    fn default() -> Self {
        Domains::List(Vec::new())
    }
}

/// `null` reads as no domains.
fn nullable_domains<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Domains, D::Error> {
    Ok(Option::<Domains>::deserialize(deserializer)?.unwrap_or_default())
}

impl Domains {
    /// Trimmed, non-empty host-specs in upstream order.
    pub fn normalize(&self) -> Vec<String> {
        let parts: Box<dyn Iterator<Item = &str>> = match self {
            Domains::List(list) => Box::new(list.iter().map(String::as_str)),
            Domains::Joined(joined) => Box::new(joined.split(',')),
        };
        parts
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }
}

/// Strips the `:port` suffix off a host-spec.
pub fn strip_port(host_spec: &str) -> &str {
    let host = host_spec.trim();
    host.split_once(':').map_or(host, |(host, _)| host)
}

/// Returns the port of a host-spec, if any.
pub fn port(host_spec: &str) -> Option<&str> {
    host_spec.trim().split_once(':').map(|(_, port)| port)
}

/// Record value of a host-spec relative to its registrable domain.
///
/// The registrable domain is assumed to be the last two labels, so compound
/// suffixes such as `co.uk` come out one label too long.
pub fn record_value(host_spec: &str) -> String {
    let labels: Vec<_> = strip_port(host_spec).split('.').collect();
    if labels.len() < 2 {
        return APEX.to_owned();
    }

    let prefix = labels[..labels.len() - 2].join(".");
    if prefix.is_empty() {
        APEX.to_owned()
    } else {
        prefix
    }
}

/// Everything after the first label of a host-spec, port stripped.
pub fn parent(host_spec: &str) -> &str {
    strip_port(host_spec).split_once('.').map_or("", |(_, rest)| rest)
}

/// The last two labels of a host-spec, port stripped.
pub fn root(host_spec: &str) -> String {
    let labels: Vec<_> = strip_port(host_spec).split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

/// Rules from `current` that are new relative to `previous`.
///
/// This is the value-level difference `current \ previous` restricted to keys
/// that never appeared in `previous`; a rule whose domains changed under a
/// known key is not new. Result order follows `current`.
pub fn diff(current: &[Rule], previous: &[Rule]) -> Vec<Rule> {
    let known: HashSet<&str> = previous.iter().map(|r| r.key.as_str()).collect();

    current
        .iter()
        .filter(|rule| !previous.contains(*rule))
        .filter(|rule| !known.contains(rule.key.as_str()))
        .cloned()
        .collect()
}

/// Number of rules in `current` whose key is known but whose content changed.
///
/// Such changes are never reconciled against the providers.
pub fn changed_under_known_key(current: &[Rule], previous: &[Rule]) -> usize {
    current
        .iter()
        .filter(|rule| {
            previous
                .iter()
                .any(|old| old.key == rule.key && old != *rule)
        })
        .count()
}
