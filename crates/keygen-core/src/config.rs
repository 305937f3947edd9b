//! Settings
//!
//! Loaded once from TOML at startup and threaded into every component.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::model::{EmailDomain, ServicePlan};

/// Full configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub run: RunSettings,
    pub aws: AwsSettings,
    pub policies: PolicySettings,
    #[serde(default)]
    pub report: ReportSettings,
}

/// PostgreSQL connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

/// Batch shape and fixture identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub tenants_count: usize,
    pub management_keys_per_tenant: usize,
    pub attestation_keys_per_tenant: usize,
    pub maintainer_email: String,
    pub management_product_id: String,
    pub attestation_product_id: String,
    pub email_domain: String,
    #[serde(default)]
    pub tenant_source: Option<String>,
    /// Delay between management key issuance and policy registration
    #[serde(default = "default_propagation_wait")]
    pub propagation_wait_secs: u64,
    /// Tenant tasks running at once; 0 runs all of them together
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// API Gateway client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Policy service endpoint and template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    pub url: String,
    /// Policy body; `{token}` placeholders are filled at registration time
    pub policy: String,
    pub policy_name: String,
    pub policy_type: String,
    pub attestation_type: String,
    pub service_offer_id: String,
    pub plan_id: String,
    pub service_offer_plan_source_id: String,
    #[serde(default)]
    pub policies_per_tenant: usize,
    /// Placeholders replaced by a fresh random token each time
    #[serde(default = "default_random_tokens")]
    pub random_tokens: Vec<String>,
    #[serde(default = "default_token_length")]
    pub token_length: usize,
}

/// Exported report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    /// One-line `{{field}}` template
    #[serde(default = "default_report_template")]
    pub template: String,
    /// Output path; `{timestamp}` becomes the export time in nanoseconds
    #[serde(default = "default_report_file")]
    pub file: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            template: default_report_template(),
            file: default_report_file(),
        }
    }
}

/// Validated provisioning parameters
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub domain: EmailDomain,
    pub tenants: usize,
    pub management_keys: usize,
    pub attestation_keys: usize,
    pub policies: usize,
    pub management_product_id: Uuid,
    pub attestation_product_id: Uuid,
    pub service: ServicePlan,
    pub tenant_source: Option<Uuid>,
    pub maintainer: String,
    pub propagation_wait: Duration,
    pub max_concurrency: usize,
}

impl Settings {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Cleanup predicate
    pub fn email_domain(&self) -> Result<EmailDomain, ConfigError> {
        EmailDomain::parse(&self.run.email_domain)
    }

    /// Check every field the provisioning run depends on
    pub fn provision_plan(&self) -> Result<ProvisionPlan, ConfigError> {
        let run = &self.run;
        if run.maintainer_email.trim().is_empty() {
            return Err(ConfigError::Missing("run.maintainer_email"));
        }
        if self.policies.url.trim().is_empty() {
            return Err(ConfigError::Missing("policies.url"));
        }

        let tenant_source = match run.tenant_source.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_id("run.tenant_source", raw)?),
        };

        Ok(ProvisionPlan {
            domain: self.email_domain()?,
            tenants: run.tenants_count,
            management_keys: run.management_keys_per_tenant,
            attestation_keys: run.attestation_keys_per_tenant,
            policies: self.policies.policies_per_tenant,
            management_product_id: parse_id("run.management_product_id", &run.management_product_id)?,
            attestation_product_id: parse_id("run.attestation_product_id", &run.attestation_product_id)?,
            service: ServicePlan {
                service_offer_id: parse_id("policies.service_offer_id", &self.policies.service_offer_id)?,
                plan_id: parse_id("policies.plan_id", &self.policies.plan_id)?,
                service_offer_plan_source_id: parse_id(
                    "policies.service_offer_plan_source_id",
                    &self.policies.service_offer_plan_source_id,
                )?,
            },
            tenant_source,
            maintainer: run.maintainer_email.trim().to_string(),
            propagation_wait: Duration::from_secs(run.propagation_wait_secs),
            max_concurrency: run.max_concurrency,
        })
    }
}

fn parse_id(field: &'static str, value: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(value.trim()).map_err(|_| ConfigError::InvalidId {
        field,
        value: value.to_string(),
    })
}

fn default_port() -> u16 { 5432 }
fn default_ssl_mode() -> String { "disable".into() }
fn default_propagation_wait() -> u64 { 120 }
fn default_max_concurrency() -> usize { 32 }
fn default_max_attempts() -> u32 { 10 }
fn default_token_length() -> usize { 64 }

fn default_random_tokens() -> Vec<String> {
    vec!["sgx_mrenclave".into(), "sgx_mrsigner".into()]
}

fn default_report_template() -> String {
    "{{tenant_id}},{{id}},{{key_type}},{{full_key}},{{policy_id}}".into()
}

fn default_report_file() -> String {
    "api_keys_{timestamp}.csv".into()
}
