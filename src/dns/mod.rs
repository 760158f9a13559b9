pub mod alidns;
pub mod aliyun;
pub mod dnspod;
pub mod esa;

use crate::settings::{AuthoritativeKind, SettingsError};
use thiserror::Error;

pub const DEFAULT_EDGE_TTL: u32 = 1;
pub const DEFAULT_CNAME_TTL: u32 = 600;
pub const DEFAULT_BIZ_NAME: &str = "web";
pub const DEFAULT_HOST_POLICY: &str = "follow_hostname";

/// Record creation request for the edge-acceleration platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub record_name: String,
    pub target_value: String,
    pub site_id: i64,
    pub ttl: u32,
    pub proxied: bool,
    pub biz_name: String,
    pub comment: String,
    pub host_policy: String,
}

impl ProvisionRequest {
    pub fn new(record_name: String, target_value: String, site_id: i64) -> Self {
        Self {
            record_name,
            target_value,
            site_id,
            ttl: DEFAULT_EDGE_TTL,
            proxied: true,
            biz_name: DEFAULT_BIZ_NAME.to_owned(),
            comment: String::new(),
            host_policy: DEFAULT_HOST_POLICY.to_owned(),
        }
    }
}

/// Record creation request for an authoritative DNS zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnameRequest {
    pub record_type: &'static str,
    /// Host relative to `domain`, `@` for the apex.
    pub host: String,
    pub value: String,
    pub domain: String,
    pub ttl: u32,
}

impl CnameRequest {
    pub fn new(host: String, value: String, domain: String) -> Self {
        Self {
            record_type: "CNAME",
            host,
            value,
            domain,
            ttl: DEFAULT_CNAME_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub record_id: String,
    pub raw: serde_json::Value,
}

/// An edge record as stored by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub record_name: String,
    /// Platform-assigned CNAME target that the authoritative zone must point at.
    pub record_cname: String,
}

/// Edge-acceleration platform: first provisioning stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EdgeProvider: Send + Sync {
    async fn create_record(&self, request: &ProvisionRequest) -> Result<CreatedRecord, ProviderError>;
    async fn get_record(&self, record_id: &str) -> Result<EdgeRecord, ProviderError>;
}

/// Authoritative DNS host: optional second provisioning stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DnsProvider: Send + Sync {
    fn kind(&self) -> AuthoritativeKind;

    async fn create_record(&self, request: &CnameRequest) -> Result<CreatedRecord, ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("bad endpoint: {0}")]
    BadEndpoint(#[from] url::ParseError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{code}: {message}")]
    Api { code: String, message: String },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Reads a vendor-assigned id that may be encoded as a JSON number or string.
pub(crate) fn id_field(raw: &serde_json::Value, field: &str) -> Result<String, ProviderError> {
    match raw.get(field) {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
        _ => Err(ProviderError::UnexpectedResponse(format!("missing {field}"))),
    }
}
