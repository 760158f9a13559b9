//! Tencent Cloud DNSPod, API version 2021-03-23, signed with TC3-HMAC-SHA256.

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{id_field, CnameRequest, CreatedRecord, DnsProvider, ProviderError};
use crate::rule::APEX;
use crate::settings::{non_empty, AuthoritativeKind, ConfigStore};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "dnspod";
const API_VERSION: &str = "2021-03-23";
const DEFAULT_ENDPOINT: &str = "https://dnspod.tencentcloudapi.com/";
const DEFAULT_REGION: &str = "ap-beijing";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const DEFAULT_RECORD_LINE: &str = "默认";

struct Session {
    http: Client,
    endpoint: Url,
    host: String,
    region: String,
    secret_id: String,
    secret_key: String,
}

pub struct DnspodProvider {
    store: Arc<dyn ConfigStore>,
    http: Client,
    session: OnceCell<Session>,
}

impl DnspodProvider {
    pub fn new(store: Arc<dyn ConfigStore>, http: Client) -> Self {
        Self {
            store,
            http,
            session: OnceCell::new(),
        }
    }

    async fn session(&self) -> Result<&Session, ProviderError> {
        self.session
            .get_or_try_init(|| async {
                let dnspod = self.store.get()?.dnspod;

                let secret_id = non_empty(dnspod.secret_id.as_deref())
                    .ok_or(ProviderError::MissingCredentials("dnspod.secret_id"))?;
                let secret_key = non_empty(dnspod.secret_key.as_deref())
                    .ok_or(ProviderError::MissingCredentials("dnspod.secret_key"))?;
                let region = non_empty(dnspod.region.as_deref()).unwrap_or(DEFAULT_REGION);
                let endpoint =
                    Url::parse(non_empty(dnspod.endpoint.as_deref()).unwrap_or(DEFAULT_ENDPOINT))?;

                let host = match (endpoint.host_str(), endpoint.port()) {
                    (Some(host), Some(port)) => format!("{host}:{port}"),
                    (Some(host), None) => host.to_owned(),
                    (None, _) => {
                        return Err(ProviderError::InvalidRequest(format!(
                            "endpoint {endpoint} has no host"
                        )))
                    }
                };

                info!(%endpoint, region, "dnspod session initialized");
                Ok(Session {
                    http: self.http.clone(),
                    endpoint,
                    host,
                    region: region.to_owned(),
                    secret_id: secret_id.to_owned(),
                    secret_key: secret_key.to_owned(),
                })
            })
            .await
    }
}

#[async_trait::async_trait]
impl DnsProvider for DnspodProvider {
    fn kind(&self) -> AuthoritativeKind {
        AuthoritativeKind::Dnspod
    }

    #[tracing::instrument(skip(self))]
    async fn create_record(&self, request: &CnameRequest) -> Result<CreatedRecord, ProviderError> {
        if request.host.is_empty() || request.value.is_empty() || request.domain.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "host, value and domain are required".into(),
            ));
        }

        let session = self.session().await?;

        // DNSPod addresses the apex with an empty sub-domain.
        let sub_domain = if request.host == APEX { "" } else { request.host.as_str() };
        let payload = serde_json::json!({
            "Domain": request.domain,
            "SubDomain": sub_domain,
            "RecordType": request.record_type,
            "RecordLine": DEFAULT_RECORD_LINE,
            "Value": request.value,
            "TTL": request.ttl,
        })
        .to_string();

        let timestamp = Utc::now().timestamp();
        let authorization = authorization(
            &session.secret_id,
            &session.secret_key,
            &session.host,
            &payload,
            timestamp,
        )?;

        let response = session
            .http
            .post(session.endpoint.clone())
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", "CreateRecord")
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Region", &session.region)
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        let raw: serde_json::Value = response.json().await?;
        debug!(%status, "dnspod responded");

        let body = raw
            .get("Response")
            .ok_or_else(|| ProviderError::UnexpectedResponse(format!("{status}: no Response")))?;
        if let Some(err) = body.get("Error") {
            return Err(ProviderError::Api {
                code: err["Code"].as_str().unwrap_or_default().to_owned(),
                message: err["Message"].as_str().unwrap_or_default().to_owned(),
            });
        }

        let record_id = id_field(body, "RecordId")?;
        info!(
            outcome = "success",
            %record_id,
            "dnspod record created: {}.{} ({}) -> {}",
            request.host,
            request.domain,
            request.record_type,
            request.value
        );

        Ok(CreatedRecord { record_id, raw })
    }
}

/// `Authorization` header value for a JSON POST to `/` at `timestamp`.
pub fn authorization(
    secret_id: &str,
    secret_key: &str,
    host: &str,
    payload: &str,
    timestamp: i64,
) -> Result<String, ProviderError> {
    let date = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| ProviderError::InvalidRequest(format!("bad timestamp {timestamp}")))?
        .format("%Y-%m-%d")
        .to_string();

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{CONTENT_TYPE}\nhost:{host}\n\ncontent-type;host\n{}",
        hex::encode(Sha256::digest(payload.as_bytes()))
    );
    let credential_scope = format!("{date}/{SERVICE}/tc3_request");
    let string_to_sign = format!(
        "TC3-HMAC-SHA256\n{timestamp}\n{credential_scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let secret_date = hmac_sha256(format!("TC3{secret_key}").as_bytes(), &date)?;
    let secret_service = hmac_sha256(&secret_date, SERVICE)?;
    let secret_signing = hmac_sha256(&secret_service, "tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign)?);

    Ok(format!(
        "TC3-HMAC-SHA256 Credential={secret_id}/{credential_scope}, SignedHeaders=content-type;host, Signature={signature}"
    ))
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
