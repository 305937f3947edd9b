//! External Policy Registrar
//!
//! Registers authorization policy templates with the policy service,
//! authenticating with a tenant's management key.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PolicySettings;

/// Placeholder shared by the policy name and body
pub const SUFFIX_PLACEHOLDER: &str = "suffix";

const BODY_EXCERPT: usize = 512;

#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("policy request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("policy service answered {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed policy response: {0}")]
    MalformedBody(String),
}

/// Registers one policy per call
#[async_trait]
pub trait PolicyRegistrar: Send + Sync {
    /// Register a freshly rendered policy; returns the server-assigned id
    async fn register_policy(&self, management_key: &str) -> Result<Uuid, RegistrarError>;
}

/// Request body sent to the policy service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDocument {
    pub policy: String,
    pub policy_name: String,
    pub policy_type: String,
    pub attestation_type: String,
    pub service_offer_id: String,
}

#[derive(Debug, Deserialize)]
struct PolicyCreated {
    policy_id: Option<String>,
}

/// Policy template with `{placeholder}` fields
#[derive(Debug, Clone)]
pub struct PolicyTemplate {
    settings: PolicySettings,
}

impl PolicyTemplate {
    pub fn new(settings: PolicySettings) -> Self {
        Self { settings }
    }

    /// Fill every placeholder. Each random token is drawn once per
    /// render; the numeric suffix is the same in name and body.
    pub fn render<R: Rng + ?Sized>(&self, rng: &mut R) -> PolicyDocument {
        let suffix = rng.gen_range(0..1_000_000u32).to_string();
        let mut policy = self.settings.policy.clone();

        for token in &self.settings.random_tokens {
            let value: String = (0..self.settings.token_length)
                .map(|_| char::from(rng.sample(Alphanumeric)))
                .collect();
            policy = policy.replace(&placeholder(token), &value);
        }
        policy = policy.replace(&placeholder(SUFFIX_PLACEHOLDER), &suffix);

        PolicyDocument {
            policy,
            policy_name: self.settings.policy_name.replace(&placeholder(SUFFIX_PLACEHOLDER), &suffix),
            policy_type: self.settings.policy_type.clone(),
            attestation_type: self.settings.attestation_type.clone(),
            service_offer_id: self.settings.service_offer_id.clone(),
        }
    }
}

fn placeholder(name: &str) -> String {
    format!("{{{}}}", name)
}

/// HTTP policy registrar
pub struct HttpPolicyRegistrar {
    endpoint: String,
    template: PolicyTemplate,
    client: reqwest::Client,
}

impl HttpPolicyRegistrar {
    pub fn new(settings: PolicySettings) -> Self {
        Self::with_client(settings, reqwest::Client::new())
    }

    pub fn with_client(settings: PolicySettings, client: reqwest::Client) -> Self {
        Self {
            endpoint: settings.url.clone(),
            template: PolicyTemplate::new(settings),
            client,
        }
    }
}

#[async_trait]
impl PolicyRegistrar for HttpPolicyRegistrar {
    async fn register_policy(&self, management_key: &str) -> Result<Uuid, RegistrarError> {
        let document = self.template.render(&mut rand::thread_rng());

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", management_key)
            .header("Accept", "application/json")
            .json(&document)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if status != StatusCode::CREATED {
            tracing::error!(
                status = status.as_u16(),
                policy_name = %document.policy_name,
                body = %excerpt(&body),
                "Error creating policy"
            );
            return Err(RegistrarError::UnexpectedStatus {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        let created: PolicyCreated =
            serde_json::from_str(&body).map_err(|e| RegistrarError::MalformedBody(e.to_string()))?;
        let raw = created
            .policy_id
            .ok_or_else(|| RegistrarError::MalformedBody("missing policy_id".into()))?;
        let policy_id = Uuid::parse_str(&raw)
            .map_err(|_| RegistrarError::MalformedBody(format!("policy_id is not a UUID: {:?}", raw)))?;

        tracing::debug!(policy_id = %policy_id, policy_name = %document.policy_name, "Policy registered");
        Ok(policy_id)
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT).collect()
}
