use reqwest::{Client, Url};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::aliyun::RpcClient;
use super::{id_field, CnameRequest, CreatedRecord, DnsProvider, ProviderError};
use crate::settings::{non_empty, AuthoritativeKind, ConfigStore};

const API_VERSION: &str = "2015-01-09";
const DEFAULT_ENDPOINT: &str = "https://alidns.aliyuncs.com/";

/// Alibaba Cloud DNS. Authenticates with the ESA key pair.
pub struct AlidnsProvider {
    store: Arc<dyn ConfigStore>,
    http: Client,
    session: OnceCell<RpcClient>,
}

impl AlidnsProvider {
    pub fn new(store: Arc<dyn ConfigStore>, http: Client) -> Self {
        Self {
            store,
            http,
            session: OnceCell::new(),
        }
    }

    async fn session(&self) -> Result<&RpcClient, ProviderError> {
        self.session
            .get_or_try_init(|| async {
                let settings = self.store.get()?;

                let key_id = non_empty(settings.edge.access_key_id.as_deref())
                    .ok_or(ProviderError::MissingCredentials("edge.access_key_id"))?;
                let key_secret = non_empty(settings.edge.access_key_secret.as_deref())
                    .ok_or(ProviderError::MissingCredentials("edge.access_key_secret"))?;
                let endpoint = Url::parse(
                    non_empty(settings.alidns.endpoint.as_deref()).unwrap_or(DEFAULT_ENDPOINT),
                )?;

                info!(%endpoint, "alidns session initialized");
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
impl DnsProvider for AlidnsProvider {
    fn kind(&self) -> AuthoritativeKind {
        AuthoritativeKind::Alidns
    }

    #[tracing::instrument(skip(self))]
    async fn create_record(&self, request: &CnameRequest) -> Result<CreatedRecord, ProviderError> {
        if request.host.is_empty() || request.value.is_empty() || request.domain.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "host, value and domain are required".into(),
            ));
        }

        let session = self.session().await?;
        let params = vec![
            ("DomainName", request.domain.clone()),
            ("RR", request.host.clone()),
            ("Type", request.record_type.to_owned()),
            ("Value", request.value.clone()),
            ("TTL", request.ttl.to_string()),
        ];

        let raw: serde_json::Value = session.call("AddDomainRecord", params).await?;
        let record_id = id_field(&raw, "RecordId")?;

        info!(
            outcome = "success",
            %record_id,
            "alidns record created: {}.{} ({}) -> {}",
            request.host,
            request.domain,
            request.record_type,
            request.value
        );

        Ok(CreatedRecord { record_id, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryConfigStore;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    #[tokio::test]
    async fn apex_host_is_sent_literally() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/"),
                request::query(url_decoded(contains(("Action", "AddDomainRecord")))),
                request::query(url_decoded(contains(("Version", "2015-01-09")))),
                request::query(url_decoded(contains(("DomainName", "example.com")))),
                request::query(url_decoded(contains(("RR", "@")))),
                request::query(url_decoded(contains(("Type", "CNAME")))),
                request::query(url_decoded(contains(("TTL", "600")))),
            ])
            .respond_with(json_encoded(json!({"RequestId": "r", "RecordId": "9001"}))),
        );

        let store = Arc::new(MemoryConfigStore::from_toml(&format!(
            "[edge]\naccess_key_id = \"id\"\naccess_key_secret = \"secret\"\n[alidns]\nendpoint = \"{}\"",
            server.url_str("/")
        )));
        let provider = AlidnsProvider::new(store, Client::new());
        let request = CnameRequest::new("@".into(), "x.cname.example.net".into(), "example.com".into());

        let created = provider.create_record(&request).await.unwrap();
        assert_eq!(created.record_id, "9001");
        assert_eq!(provider.kind(), AuthoritativeKind::Alidns);
    }

    #[tokio::test]
    async fn rejects_incomplete_request_before_calling_out() {
        let store = Arc::new(MemoryConfigStore::default());
        let provider = AlidnsProvider::new(store, Client::new());
        let request = CnameRequest::new("www".into(), "x.example.net".into(), String::new());

        let err = provider.create_record(&request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
