//! Alibaba Cloud RPC-style API client, shared by the ESA and alidns adapters.
//!
//! Requests are GETs carrying every parameter in the query string, signed with
//! signature version 1.0 (HMAC-SHA1 over the canonicalized query).

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use sha1::Sha1;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::ProviderError;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

pub struct RpcClient {
    http: Client,
    endpoint: Url,
    version: &'static str,
    access_key_id: String,
    access_key_secret: String,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("version", &self.version)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<REDACTED>")
            .finish()
    }
}

impl RpcClient {
    pub fn new(
        http: Client,
        endpoint: Url,
        version: &'static str,
        access_key_id: String,
        access_key_secret: String,
    ) -> Self {
        Self {
            http,
            endpoint,
            version,
            access_key_id,
            access_key_secret,
        }
    }

    /// Calls `action` with the given parameters and decodes the JSON response body.
    #[tracing::instrument(skip(self, params), fields(endpoint = %self.endpoint))]
    pub async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<T, ProviderError> {
        let mut query: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        query.insert("Action".into(), action.to_owned());
        query.insert("Format".into(), "JSON".into());
        query.insert("Version".into(), self.version.to_owned());
        query.insert("AccessKeyId".into(), self.access_key_id.clone());
        query.insert("SignatureMethod".into(), "HMAC-SHA1".into());
        query.insert("SignatureVersion".into(), "1.0".into());
        query.insert("SignatureNonce".into(), Uuid::new_v4().to_string());
        query.insert(
            "Timestamp".into(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );

        let canonical = canonical_query(&query);
        let signature = hmac_sha1_base64(
            &format!("{}&", self.access_key_secret),
            &string_to_sign("GET", &canonical),
        )?;

        let mut url = self.endpoint.clone();
        url.set_query(Some(&format!(
            "{canonical}&Signature={}",
            urlencoding::encode(&signature)
        )));

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, "{action} responded");

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))
    }
}

/// Sorted `key=value` pairs, both sides RFC 3986 encoded.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn string_to_sign(method: &str, canonical_query: &str) -> String {
    format!(
        "{method}&{}&{}",
        urlencoding::encode("/"),
        urlencoding::encode(canonical_query)
    )
}

pub fn hmac_sha1_base64(key: &str, data: &str) -> Result<String, ProviderError> {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn api_error(status: StatusCode, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => ProviderError::Api {
            code: err.code,
            message: err.message,
        },
        Err(_) => ProviderError::Api {
            code: status.as_str().to_owned(),
            message: body.to_owned(),
        },
    }
}
