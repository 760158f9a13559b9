use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::aliyun::RpcClient;
use super::{id_field, CreatedRecord, EdgeProvider, EdgeRecord, ProviderError, ProvisionRequest};
use crate::settings::{non_empty, ConfigStore};

const API_VERSION: &str = "2024-09-10";
const DEFAULT_REGION: &str = "cn-hangzhou";

/// Alibaba Cloud ESA (Edge Security Acceleration) site records.
pub struct EsaProvider {
    store: Arc<dyn ConfigStore>,
    http: Client,
    session: OnceCell<RpcClient>,
}

#[derive(Debug, Deserialize)]
struct GetRecordResponse {
    #[serde(rename = "RecordModel")]
    record_model: RecordModel,
}

#[derive(Debug, Deserialize)]
struct RecordModel {
    #[serde(rename = "RecordName")]
    record_name: String,
    #[serde(rename = "RecordCname")]
    record_cname: String,
}

impl EsaProvider {
    pub fn new(store: Arc<dyn ConfigStore>, http: Client) -> Self {
        Self {
            store,
            http,
            session: OnceCell::new(),
        }
    }

    /// Builds the API client on first use. A failed attempt is not cached.
    async fn session(&self) -> Result<&RpcClient, ProviderError> {
        self.session
            .get_or_try_init(|| async {
                let edge = self.store.get()?.edge;

                let key_id = non_empty(edge.access_key_id.as_deref())
                    .ok_or(ProviderError::MissingCredentials("edge.access_key_id"))?;
                let key_secret = non_empty(edge.access_key_secret.as_deref())
                    .ok_or(ProviderError::MissingCredentials("edge.access_key_secret"))?;

                let region = non_empty(edge.region.as_deref()).unwrap_or(DEFAULT_REGION);
                let endpoint = match non_empty(edge.endpoint.as_deref()) {
                    Some(endpoint) => Url::parse(endpoint)?,
                    None => Url::parse(&format!("https://esa.{region}.aliyuncs.com/"))?,
                };

                info!(%endpoint, region, "ESA session initialized");
                Ok::<_, ProviderError>(RpcClient::new(
                    self.http.clone(),
                    endpoint,
                    API_VERSION,
                    key_id.to_owned(),
                    key_secret.to_owned(),
                ))
            })
            .await
    }
}

#[async_trait::async_trait]
impl EdgeProvider for EsaProvider {
    #[tracing::instrument(skip(self), fields(record = %request.record_name))]
    async fn create_record(&self, request: &ProvisionRequest) -> Result<CreatedRecord, ProviderError> {
        if request.record_name.is_empty() || request.target_value.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "record name and target value are required".into(),
            ));
        }

        let session = self.session().await?;
        debug!(target_value = %request.target_value, "creating ESA record");

        let mut params = vec![
            ("SiteId", request.site_id.to_string()),
            ("RecordName", request.record_name.clone()),
            ("Type", "CNAME".to_owned()),
            ("Ttl", request.ttl.to_string()),
            ("Proxied", request.proxied.to_string()),
            ("BizName", request.biz_name.clone()),
            ("SourceType", "Domain".to_owned()),
            ("HostPolicy", request.host_policy.clone()),
            ("Data", serde_json::json!({ "Value": request.target_value }).to_string()),
            ("AuthConf", "{}".to_owned()),
        ];
        if !request.comment.is_empty() {
            params.push(("Comment", request.comment.clone()));
        }

        let raw: serde_json::Value = session.call("CreateRecord", params).await?;
        Ok(CreatedRecord {
            record_id: id_field(&raw, "RecordId")?,
            raw,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_record(&self, record_id: &str) -> Result<EdgeRecord, ProviderError> {
        let session = self.session().await?;
        let response: GetRecordResponse = session
            .call("GetRecord", vec![("RecordId", record_id.to_owned())])
            .await?;

        Ok(EdgeRecord {
            record_name: response.record_model.record_name,
            record_cname: response.record_model.record_cname,
        })
    }
}
