use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::SourceEndpoint;
use crate::rule::Rule;

/// Lucky reverse-proxy rule API.
#[derive(Debug, Clone)]
pub struct LuckySource {
    client: Client,
}

impl LuckySource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl super::RuleSource for LuckySource {
    type Error = LuckyError;

    #[tracing::instrument(skip(self, endpoint), fields(url = %endpoint.url))]
    async fn fetch_rules(&self, endpoint: &SourceEndpoint) -> Result<Vec<Rule>, Self::Error> {
        let mut url = Url::parse(&endpoint.url)?;
        if url.cannot_be_a_base() {
            return Err(LuckyError::BadBaseUrl);
        }
        url.query_pairs_mut()
            .append_pair("_", &Utc::now().timestamp_millis().to_string())
            .append_pair("openToken", &endpoint.token);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(LuckyError::Status(status));
        }

        let groups = response.json::<RuleListResponse>().await?.rule_list;
        let rules: Vec<Rule> = groups
            .into_iter()
            .flat_map(|g| g.proxy_list.unwrap_or_default())
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(error = %e, "skipping malformed proxy entry");
                    None
                }
            })
            .collect();

        debug!("got {} rules from Lucky", rules.len());

        Ok(rules)
    }
}

#[derive(Debug, Error)]
pub enum LuckyError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error("bad base url")]
    BadBaseUrl,
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Deserialize)]
struct RuleListResponse {
    #[serde(rename = "ruleList")]
    rule_list: Vec<RuleGroup>,
}

#[derive(Debug, Deserialize)]
struct RuleGroup {
    #[serde(rename = "ProxyList", default)]
    proxy_list: Option<Vec<serde_json::Value>>,
}
