use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::rule::{self, Rule};
use crate::settings::{non_empty, EdgeSettings};

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]*)\}").unwrap());

/// Derives the origin value a new rule's records point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResolver {
    /// `record_value(first domain)` joined onto a fixed suffix, or onto the
    /// domain's parent with an `a` separator when no suffix is set.
    Convention { suffix: Option<String> },
    /// A `{placeholder}` template, parsed on each resolution.
    Template(String),
}

impl TargetResolver {
    /// A configured template takes precedence over the convention.
    pub fn from_settings(edge: &EdgeSettings) -> Self {
        match non_empty(edge.target_template.as_deref()) {
            Some(template) => TargetResolver::Template(template.to_owned()),
            None => TargetResolver::Convention {
                suffix: non_empty(edge.target_suffix.as_deref()).map(ToOwned::to_owned),
            },
        }
    }

    /// Target value for `rule`, or `None` when nothing usable comes out.
    pub fn resolve(&self, rule: &Rule) -> Result<Option<String>, ResolverError> {
        let domains = rule.domains.normalize();
        let Some(first) = domains.first() else {
            return Ok(None);
        };

        let value = match self {
            TargetResolver::Convention { suffix: Some(suffix) } => {
                format!("{}.{}", rule::record_value(first), suffix)
            }
            TargetResolver::Convention { suffix: None } => {
                format!("{}a.{}", rule::record_value(first), rule::parent(first))
            }
            TargetResolver::Template(template) => {
                Template::parse(template)?.render(&rule.key, first)
            }
        };

        Ok(Some(value).filter(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Record,
    Host,
    Parent,
    Root,
    Port,
    Key,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "record" => Placeholder::Record,
            "host" => Placeholder::Host,
            "parent" => Placeholder::Parent,
            "root" => Placeholder::Root,
            "port" => Placeholder::Port,
            "key" => Placeholder::Key,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Literal text interleaved with `{name}` placeholders. Nothing else is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(source: &str) -> Result<Self, ResolverError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER_REGEX.captures_iter(source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            push_literal(&mut segments, &source[last..whole.start()], last)?;
            let placeholder = Placeholder::from_name(name.as_str().trim())
                .ok_or_else(|| ResolverError::UnknownPlaceholder(name.as_str().to_owned()))?;
            segments.push(Segment::Placeholder(placeholder));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..], last)?;

        Ok(Self { segments })
    }

    fn render(&self, key: &str, host_spec: &str) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(Placeholder::Record) => rule::record_value(host_spec),
                Segment::Placeholder(Placeholder::Host) => rule::strip_port(host_spec).to_owned(),
                Segment::Placeholder(Placeholder::Parent) => rule::parent(host_spec).to_owned(),
                Segment::Placeholder(Placeholder::Root) => rule::root(host_spec),
                Segment::Placeholder(Placeholder::Port) => {
                    rule::port(host_spec).unwrap_or_default().to_owned()
                }
                Segment::Placeholder(Placeholder::Key) => key.to_owned(),
            })
            .collect()
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str, offset: usize) -> Result<(), ResolverError> {
    if let Some(pos) = text.find(['{', '}']) {
        return Err(ResolverError::UnbalancedBrace(offset + pos));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_owned()));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolverError {
    #[error("unknown placeholder {{{0}}} in target template")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace at offset {0} in target template")]
    UnbalancedBrace(usize),
}
