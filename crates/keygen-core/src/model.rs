//! Fixture Data Model
//!
//! Rows persisted in the fixture store and the key records handed to the
//! exporter.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::ConfigError;

/// Version tag written on every subscription
pub const KEY_VERSION: &str = "v1";
/// Status written on services and subscriptions
pub const STATUS_ACTIVE: &str = "Active";
/// Creator/updater type written on services and subscriptions
pub const CREATOR_USER: &str = "User";
/// Service name shared by every fixture tenant
pub const SERVICE_NAME: &str = "TEE_Attestation";

/// Email domain used to tag, find and delete a batch of fixtures
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailDomain(String);

impl EmailDomain {
    /// Validate and wrap a domain
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let domain = raw.trim();
        if domain.is_empty() {
            return Err(ConfigError::EmptyDomain);
        }
        if domain.chars().any(|c| c.is_whitespace() || matches!(c, '@' | '%' | '\'')) {
            return Err(ConfigError::InvalidDomain(domain.to_string()));
        }
        Ok(Self(domain.to_string()))
    }

    /// Domain as configured
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `LIKE` pattern matching every address in the domain
    pub fn like_pattern(&self) -> String {
        format!("%@{}", self.0)
    }

    /// Fresh synthetic address in the domain
    pub fn synthetic_address(&self) -> String {
        format!("{}@{}", Uuid::new_v4(), self.0)
    }

    /// Whether `email` belongs to this domain
    pub fn matches(&self, email: &str) -> bool {
        email
            .rsplit_once('@')
            .map(|(_, domain)| domain == self.0)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for EmailDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant row
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub company: String,
    pub email: String,
    pub address: String,
    pub source_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Synthetic tenant with an address in `domain`
    pub fn synthetic(domain: &EmailDomain, source_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "TestName".into(),
            company: "TestCompany".into(),
            email: domain.synthetic_address(),
            address: "address".into(),
            source_id,
            created_at: Utc::now(),
        }
    }
}

/// Service row, one per tenant
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub service_offer_id: Uuid,
    pub plan_id: Uuid,
    pub service_offer_plan_source_id: Uuid,
    pub name: String,
    pub status: String,
    pub active: bool,
    pub creator_type: String,
    pub created_at: DateTime<Utc>,
}

/// Identifiers every fixture service is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePlan {
    pub service_offer_id: Uuid,
    pub plan_id: Uuid,
    pub service_offer_plan_source_id: Uuid,
}

impl Service {
    /// Service for `tenant_id` on `plan`
    pub fn for_tenant(tenant_id: Uuid, plan: &ServicePlan) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            service_offer_id: plan.service_offer_id,
            plan_id: plan.plan_id,
            service_offer_plan_source_id: plan.service_offer_plan_source_id,
            name: SERVICE_NAME.into(),
            status: STATUS_ACTIVE.into(),
            active: true,
            creator_type: CREATOR_USER.into(),
            created_at: Utc::now(),
        }
    }
}

/// Subscription row: the local record of one issued API key
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub service_id: Uuid,
    pub product_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: String,
    /// Issuer-assigned key id
    pub external_id: String,
    pub variable_key: String,
    pub version: String,
    pub creator_type: String,
    pub created_at: DateTime<Utc>,
}

/// Subscription ↔ policy association
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyLink {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub policy_id: Uuid,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl PolicyLink {
    /// Active link
    pub fn active(tenant_id: Uuid, subscription_id: Uuid, policy_id: Uuid) -> Self {
        Self {
            tenant_id,
            subscription_id,
            policy_id,
            deleted: false,
            created_at: Utc::now(),
        }
    }
}

/// Purpose of an issued key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Authenticates against the policy service
    Management,
    /// Bound to zero or more policies
    Attestation,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Management => write!(f, "management"),
            KeyType::Attestation => write!(f, "attestation"),
        }
    }
}

/// Externally distributed credential: `base64(version:variable_key:raw)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullKey {
    pub version: String,
    pub variable_key: String,
    pub raw: String,
}

impl FullKey {
    /// Encoded credential string
    pub fn encode(&self) -> String {
        STANDARD.encode(format!("{}:{}:{}", self.version, self.variable_key, self.raw))
    }

    /// Split an encoded credential back into its parts.
    ///
    /// Only the first two `:` are separators; the raw issuer value may
    /// contain more.
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let mut parts = text.splitn(3, ':');
        Some(Self {
            version: parts.next()?.to_string(),
            variable_key: parts.next()?.to_string(),
            raw: parts.next()?.to_string(),
        })
    }
}

/// One issued key, as exported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedKeyRecord {
    pub tenant_id: Uuid,
    /// Subscription id
    pub id: Uuid,
    pub variable_key: String,
    /// Raw issuer value
    pub api_key: String,
    pub version: String,
    pub full_key: String,
    pub key_type: KeyType,
    #[serde(rename = "policy_id", serialize_with = "join_ids")]
    pub policy_ids: Vec<Uuid>,
}

impl IssuedKeyRecord {
    /// Project a persisted subscription and its raw key value
    pub fn new(subscription: &Subscription, raw: &str, key_type: KeyType, policy_ids: Vec<Uuid>) -> Self {
        let full_key = FullKey {
            version: subscription.version.clone(),
            variable_key: subscription.variable_key.clone(),
            raw: raw.to_string(),
        };
        Self {
            tenant_id: subscription.tenant_id,
            id: subscription.id,
            variable_key: subscription.variable_key.clone(),
            api_key: raw.to_string(),
            version: subscription.version.clone(),
            full_key: full_key.encode(),
            key_type,
            policy_ids,
        }
    }
}

fn join_ids<S: Serializer>(ids: &[Uuid], serializer: S) -> Result<S::Ok, S::Error> {
    let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
    serializer.serialize_str(&joined)
}
