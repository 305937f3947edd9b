//! External Credential Issuer
//!
//! API keys live in API Gateway and must be attached to a usage plan
//! before they authenticate anything.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_apigateway::config::retry::RetryConfig;
use aws_sdk_apigateway::config::{Credentials, Region};
use thiserror::Error;

use crate::config::AwsSettings;

/// Tag marking keys created for load testing
pub const OPERATION_TAG: (&str, &str) = ("operation", "perf_testing");
/// Tag key carrying the maintainer contact
pub const MAINTAINER_TAG: &str = "maintainer";

/// Key creation request
#[derive(Debug, Clone)]
pub struct KeyRequest {
    /// Human-readable description
    pub name: String,
    /// Key name; the subscription id it backs
    pub key_id: String,
    pub usage_plan_id: String,
    pub maintainer: String,
}

/// Key created and attached to its usage plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    pub external_id: String,
    pub value: String,
}

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("create key {key_id} failed: {detail}")]
    Create { key_id: String, detail: String },

    /// The key exists but is not on the plan. Not revoked here.
    #[error("attach key {orphan_id} to usage plan {usage_plan_id} failed: {detail}")]
    Attach {
        orphan_id: String,
        usage_plan_id: String,
        detail: String,
    },

    #[error("revoke key {external_id} failed: {detail}")]
    Revoke { external_id: String, detail: String },

    #[error("issuer response missing {0}")]
    MissingField(&'static str),
}

/// Creates and revokes API keys
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Create an enabled, tagged key and attach it to the usage plan.
    /// Both steps must succeed.
    async fn issue_key(&self, request: &KeyRequest) -> Result<IssuedKey, IssuerError>;

    /// Delete a key. Best effort: failures are logged and reported, never escalated.
    async fn revoke_key(&self, external_id: &str) -> Result<(), IssuerError>;
}

/// API Gateway backed issuer
#[derive(Debug, Clone)]
pub struct ApiGatewayIssuer {
    client: aws_sdk_apigateway::Client,
}

impl ApiGatewayIssuer {
    /// Build the client. Retries use the SDK's standard mode.
    pub async fn connect(settings: &AwsSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(settings.max_attempts));

        if let (Some(access_key), Some(secret_key)) = (&settings.access_key_id, &settings.secret_access_key) {
            let creds = Credentials::new(
                access_key,
                secret_key,
                settings.session_token.clone(),
                None,
                "keygen-explicit",
            );
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = loader.load().await;
        tracing::info!(
            region = %settings.region,
            explicit_creds = settings.access_key_id.is_some(),
            max_attempts = settings.max_attempts,
            "API Gateway issuer initialized"
        );

        Self {
            client: aws_sdk_apigateway::Client::new(&sdk_config),
        }
    }
}

#[async_trait]
impl CredentialIssuer for ApiGatewayIssuer {
    async fn issue_key(&self, request: &KeyRequest) -> Result<IssuedKey, IssuerError> {
        let created = self
            .client
            .create_api_key()
            .name(&request.key_id)
            .description(&request.name)
            .enabled(true)
            .tags(OPERATION_TAG.0, OPERATION_TAG.1)
            .tags(MAINTAINER_TAG, &request.maintainer)
            .send()
            .await
            .map_err(|e| IssuerError::Create {
                key_id: request.key_id.clone(),
                detail: e.to_string(),
            })?;

        let external_id = created.id().ok_or(IssuerError::MissingField("id"))?.to_string();
        let value = created.value().ok_or(IssuerError::MissingField("value"))?.to_string();

        self.client
            .create_usage_plan_key()
            .key_id(&external_id)
            .key_type("API_KEY")
            .usage_plan_id(&request.usage_plan_id)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    external_id = %external_id,
                    usage_plan_id = %request.usage_plan_id,
                    error = %e,
                    "Key created but not attached to usage plan"
                );
                IssuerError::Attach {
                    orphan_id: external_id.clone(),
                    usage_plan_id: request.usage_plan_id.clone(),
                    detail: e.to_string(),
                }
            })?;

        tracing::debug!(external_id = %external_id, key_id = %request.key_id, "API key issued");
        Ok(IssuedKey { external_id, value })
    }

    async fn revoke_key(&self, external_id: &str) -> Result<(), IssuerError> {
        match self.client.delete_api_key().api_key(external_id).send().await {
            Ok(_) => {
                tracing::info!(external_id, "Deleted API key");
                Ok(())
            }
            Err(e) if e.as_service_error().map(|se| se.is_not_found_exception()).unwrap_or(false) => {
                tracing::info!(external_id, "API key already deleted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(external_id, error = %e, "Error deleting API key");
                Err(IssuerError::Revoke {
                    external_id: external_id.to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }
}
