use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    dns::{
        CnameRequest, DnsProvider, EdgeProvider, ProviderError, ProvisionRequest,
        DEFAULT_BIZ_NAME, DEFAULT_HOST_POLICY,
    },
    rate_limit::RateLimit,
    resolver::TargetResolver,
    rule::{self, Rule},
    settings::{non_empty, AuthoritativeKind, Settings},
};

/// Per-cycle provisioning options derived from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub site_id: i64,
    pub host_policy: String,
    pub biz_name: String,
    /// When set, edge records are named `<record value>.<record_domain>`.
    pub record_domain: Option<String>,
    pub resolver: TargetResolver,
    /// Present when the authoritative second stage is enabled.
    pub secondary: Option<SecondaryStage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryStage {
    pub provider: Option<AuthoritativeKind>,
    pub domain: Option<String>,
}

impl ProvisionOptions {
    /// Returns `None` when no edge site is configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let edge = &settings.edge;
        let site_id = edge.site_id?;

        let secondary = edge.secondary_analysis.then(|| SecondaryStage {
            provider: edge.secondary_provider,
            domain: edge
                .secondary_provider
                .and_then(|kind| settings.authoritative_domain(kind))
                .map(ToOwned::to_owned),
        });

        Some(Self {
            site_id,
            host_policy: non_empty(edge.host_policy.as_deref())
                .unwrap_or(DEFAULT_HOST_POLICY)
                .to_owned(),
            biz_name: non_empty(edge.biz_name.as_deref())
                .unwrap_or(DEFAULT_BIZ_NAME)
                .to_owned(),
            record_domain: non_empty(edge.record_domain.as_deref()).map(ToOwned::to_owned),
            resolver: TargetResolver::from_settings(edge),
            secondary,
        })
    }

    fn record_name(&self, domain: &str) -> String {
        match &self.record_domain {
            Some(record_domain) => format!("{}.{}", rule::record_value(domain), record_domain),
            None => rule::strip_port(domain).to_owned(),
        }
    }

    fn request(&self, domain: &str, target_value: &str) -> ProvisionRequest {
        ProvisionRequest {
            host_policy: self.host_policy.clone(),
            biz_name: self.biz_name.clone(),
            ..ProvisionRequest::new(self.record_name(domain), target_value.to_owned(), self.site_id)
        }
    }
}

/// Outcome for a single attempted domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResult {
    pub success: bool,
    pub domain: String,
    pub target_value: String,
    pub record_id: Option<String>,
    pub error: Option<String>,
}

/// Drives record creation for new rules, one domain at a time.
pub struct Provisioner {
    edge: Arc<dyn EdgeProvider>,
    authoritative: Vec<Arc<dyn DnsProvider>>,
    rate_limit: RateLimit,
}

impl Provisioner {
    pub fn new(
        edge: Arc<dyn EdgeProvider>,
        authoritative: Vec<Arc<dyn DnsProvider>>,
        rate_limit: RateLimit,
    ) -> Self {
        Self {
            edge,
            authoritative,
            rate_limit,
        }
    }

    /// Provisions every domain of every rule. A failing domain never stops its
    /// siblings; rules without domains or target value produce no results.
    pub async fn provision_all(&self, rules: &[Rule], opts: &ProvisionOptions) -> Vec<ProvisionResult> {
        let mut results = Vec::new();

        for rule in rules {
            let domains = rule.domains.normalize();
            if domains.is_empty() {
                warn!(key = %rule.key, "rule has no usable domains, skipping");
                continue;
            }

            let target_value = match opts.resolver.resolve(rule) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    warn!(key = %rule.key, "no target value for rule, skipping");
                    continue;
                }
                Err(e) => {
                    error!(key = %rule.key, error = %e, "target value resolution failed, skipping rule");
                    continue;
                }
            };
            debug!(domain = %domains[0], %target_value, "resolved target value");

            for domain in domains {
                let result = match self.provision_domain(&domain, &target_value, opts).await {
                    Ok(record_id) => ProvisionResult {
                        success: true,
                        domain,
                        target_value: target_value.clone(),
                        record_id: Some(record_id),
                        error: None,
                    },
                    Err(e) => {
                        error!(%domain, error = %e, "failed to provision domain");
                        ProvisionResult {
                            success: false,
                            domain,
                            target_value: target_value.clone(),
                            record_id: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                results.push(result);
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        info!(
            success = succeeded,
            fail = failed,
            total = results.len(),
            "DNS provisioning finished: {succeeded} succeeded, {failed} failed"
        );
        for r in results.iter().filter(|r| !r.success) {
            error!(domain = %r.domain, error = r.error.as_deref().unwrap_or_default(), "provisioning failed");
        }

        results
    }

    #[tracing::instrument(skip(self, opts))]
    async fn provision_domain(
        &self,
        domain: &str,
        target_value: &str,
        opts: &ProvisionOptions,
    ) -> Result<String, ProvisionError> {
        let request = opts.request(domain, target_value);

        self.rate_limit.ready().await;
        let created = self
            .edge
            .create_record(&request)
            .await
            .map_err(ProvisionError::Edge)?;
        info!(
            outcome = "success",
            record_id = %created.record_id,
            "edge record created: {} -> {}",
            request.record_name,
            target_value
        );

        if let Some(stage) = &opts.secondary {
            self.chain_authoritative(&created.record_id, stage).await?;
        }

        Ok(created.record_id)
    }

    /// Points the authoritative zone at the edge platform's own CNAME target.
    async fn chain_authoritative(&self, record_id: &str, stage: &SecondaryStage) -> Result<(), ProvisionError> {
        let kind = stage.provider.ok_or(ProvisionError::NoSecondaryProvider)?;
        let provider = self
            .authoritative
            .iter()
            .find(|p| p.kind() == kind)
            .ok_or(ProvisionError::ProviderUnavailable(kind))?;
        let domain = stage
            .domain
            .clone()
            .ok_or(ProvisionError::NoAuthoritativeDomain(kind))?;

        self.rate_limit.ready().await;
        let record = self
            .edge
            .get_record(record_id)
            .await
            .map_err(ProvisionError::Lookup)?;

        let host = record
            .record_name
            .split('.')
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProvisionError::EmptyHost(record.record_name.clone()))?
            .to_owned();
        info!(
            outcome = "success",
            cname = %record.record_cname,
            %host,
            provider = %kind,
            "edge CNAME target resolved"
        );

        self.rate_limit.ready().await;
        provider
            .create_record(&CnameRequest::new(host, record.record_cname, domain))
            .await
            .map_err(|e| ProvisionError::Authoritative(kind, e))?;

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("edge record creation failed: {0}")]
    Edge(#[source] ProviderError),
    #[error("edge record lookup failed: {0}")]
    Lookup(#[source] ProviderError),
    #[error("{0} record creation failed: {1}")]
    Authoritative(AuthoritativeKind, #[source] ProviderError),
    #[error("secondary analysis is enabled but no secondary provider is configured")]
    NoSecondaryProvider,
    #[error("{0} provider is not available")]
    ProviderUnavailable(AuthoritativeKind),
    #[error("no domain configured for {0}")]
    NoAuthoritativeDomain(AuthoritativeKind),
    #[error("edge record name {0:?} has no host label")]
    EmptyHost(String),
}
