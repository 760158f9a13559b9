pub mod lucky;

use crate::rule::Rule;

/// Where to fetch the rule list from, read from the config on every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    pub url: String,
    pub token: String,
}

/// Upstream proxy whose rule list is polled.
#[cfg_attr(test, mockall::automock(type Error = lucky::LuckyError;))]
#[async_trait::async_trait]
pub trait RuleSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches a full snapshot of the proxy rules, in upstream order.
    async fn fetch_rules(&self, endpoint: &SourceEndpoint) -> Result<Vec<Rule>, Self::Error>;
}
