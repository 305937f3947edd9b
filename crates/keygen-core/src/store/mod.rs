//! Fixture Store Gateway
//!
//! Inserts, lookups and domain-scoped bulk deletes over the four fixture
//! tables. Statements run either inside a [`StoreTx`] or as standalone
//! autocommit statements on the [`FixtureStore`] itself.

mod memory;
mod postgres;

pub use memory::{MemoryStore, TableCounts};
pub use postgres::PgFixtureStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{EmailDomain, PolicyLink, Service, Subscription, Tenant};

/// Row ceiling applied to each bulk delete. The ceiling counts tenants;
/// child rows follow their tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteLimit {
    /// Every matching row
    All,
    /// Rows of the `k` matching tenants with the lowest id
    Oldest(u32),
}

impl DeleteLimit {
    /// Counts of zero or less mean "no ceiling"
    pub fn from_count(count: i64) -> Self {
        if count > 0 {
            Self::Oldest(u32::try_from(count).unwrap_or(u32::MAX))
        } else {
            Self::All
        }
    }

    /// `LIMIT` parameter; `NULL` is unlimited
    pub(crate) fn as_sql(&self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Oldest(k) => Some(i64::from(*k)),
        }
    }

    pub(crate) fn take(&self) -> usize {
        match self {
            Self::All => usize::MAX,
            Self::Oldest(k) => *k as usize,
        }
    }
}

impl std::fmt::Display for DeleteLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Oldest(k) => write!(f, "oldest {}", k),
        }
    }
}

/// Persistence failure; always aborts the enclosing transaction
#[derive(Error, Debug)]
pub enum StoreError {
    /// Uniqueness or other integrity constraint rejected the row
    #[error("constraint violated on {table}: {detail}")]
    Constraint { table: &'static str, detail: String },

    /// Statement failed
    #[error("query on {table} failed: {source}")]
    Query {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Connection or transaction control failed
    #[error("connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    /// Lookup returned no row
    #[error("not found: {0}")]
    NotFound(String),
}

/// Store handle shared by the orchestrator and every tenant task
#[async_trait]
pub trait FixtureStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Insert a subscription as its own atomic statement
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Insert a policy link as its own atomic statement
    async fn insert_policy_link(&self, link: &PolicyLink) -> Result<(), StoreError>;
}

/// Open transaction. Dropping it without [`StoreTx::commit`] discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError>;

    async fn insert_service(&mut self, service: &Service) -> Result<(), StoreError>;

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), StoreError>;

    async fn insert_policy_link(&mut self, link: &PolicyLink) -> Result<(), StoreError>;

    /// Usage plan id the issuer knows the product by
    async fn product_external_id(&mut self, product_id: Uuid) -> Result<String, StoreError>;

    /// External key ids of every subscription owned by a tenant in `domain`
    async fn subscription_external_ids(&mut self, domain: &EmailDomain) -> Result<Vec<String>, StoreError>;

    async fn delete_policy_links(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError>;

    async fn delete_subscriptions(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError>;

    async fn delete_services(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError>;

    async fn delete_tenants(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
