//! In-process fixture store
//!
//! Same constraint and delete semantics as the PostgreSQL store. A
//! transaction works on a snapshot that replaces the shared state on
//! commit, so autocommit writes must not race an open transaction (both
//! transactional phases are single-threaded).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{DeleteLimit, FixtureStore, StoreError, StoreTx};
use crate::model::{EmailDomain, PolicyLink, Service, Subscription, Tenant};

#[derive(Debug, Clone, Default)]
struct State {
    tenants: Vec<Tenant>,
    services: Vec<Service>,
    subscriptions: Vec<Subscription>,
    policy_links: Vec<PolicyLink>,
    products: HashMap<Uuid, String>,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub tenants: usize,
    pub services: usize,
    pub subscriptions: usize,
    pub policy_links: usize,
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product and the usage plan id it maps to
    pub fn with_product(self, product_id: Uuid, external_id: impl Into<String>) -> Self {
        self.state.lock().products.insert(product_id, external_id.into());
        self
    }

    /// Current row counts
    pub fn counts(&self) -> TableCounts {
        let state = self.state.lock();
        TableCounts {
            tenants: state.tenants.len(),
            services: state.services.len(),
            subscriptions: state.subscriptions.len(),
            policy_links: state.policy_links.len(),
        }
    }

    pub fn tenants(&self) -> Vec<Tenant> {
        self.state.lock().tenants.clone()
    }

    pub fn services(&self) -> Vec<Service> {
        self.state.lock().services.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.lock().subscriptions.clone()
    }

    pub fn policy_links(&self) -> Vec<PolicyLink> {
        self.state.lock().policy_links.clone()
    }
}

#[async_trait]
impl FixtureStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let working = self.state.lock().clone();
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            working,
        }))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.state.lock().insert_subscription(subscription)
    }

    async fn insert_policy_link(&self, link: &PolicyLink) -> Result<(), StoreError> {
        self.state.lock().insert_policy_link(link)
    }
}

struct MemoryTx {
    shared: Arc<Mutex<State>>,
    working: State,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        self.working.insert_tenant(tenant)
    }

    async fn insert_service(&mut self, service: &Service) -> Result<(), StoreError> {
        self.working.insert_service(service)
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), StoreError> {
        self.working.insert_subscription(subscription)
    }

    async fn insert_policy_link(&mut self, link: &PolicyLink) -> Result<(), StoreError> {
        self.working.insert_policy_link(link)
    }

    async fn product_external_id(&mut self, product_id: Uuid) -> Result<String, StoreError> {
        self.working
            .products
            .get(&product_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("external id of product {}", product_id)))
    }

    async fn subscription_external_ids(&mut self, domain: &EmailDomain) -> Result<Vec<String>, StoreError> {
        let tenants = self.working.tenant_ids_in(domain);
        let mut subscriptions: Vec<&Subscription> = self
            .working
            .subscriptions
            .iter()
            .filter(|s| tenants.contains(&s.tenant_id))
            .collect();
        subscriptions.sort_by_key(|s| s.id);
        Ok(subscriptions
            .into_iter()
            .map(|s| s.external_id.clone())
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn delete_policy_links(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let tenants = self.working.oldest_tenant_ids(domain, limit);
        Ok(drain(&mut self.working.policy_links, |l| tenants.contains(&l.tenant_id)))
    }

    async fn delete_subscriptions(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let tenants = self.working.oldest_tenant_ids(domain, limit);
        Ok(drain(&mut self.working.subscriptions, |s| tenants.contains(&s.tenant_id)))
    }

    async fn delete_services(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let tenants = self.working.oldest_tenant_ids(domain, limit);
        Ok(drain(&mut self.working.services, |s| tenants.contains(&s.tenant_id)))
    }

    async fn delete_tenants(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        let tenants = self.working.oldest_tenant_ids(domain, limit);
        Ok(drain(&mut self.working.tenants, |t| tenants.contains(&t.id)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { shared, working } = *self;
        *shared.lock() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

impl State {
    fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        if self.tenants.iter().any(|t| t.id == tenant.id) {
            return Err(duplicate("tenant", "tenant_pkey"));
        }
        self.tenants.push(tenant.clone());
        Ok(())
    }

    fn insert_service(&mut self, service: &Service) -> Result<(), StoreError> {
        if self.services.iter().any(|s| s.id == service.id) {
            return Err(duplicate("service", "service_pkey"));
        }
        if self.services.iter().any(|s| {
            s.tenant_id == service.tenant_id
                && s.service_offer_plan_source_id == service.service_offer_plan_source_id
                && s.name == service.name
        }) {
            return Err(duplicate("service", "idx_tenant_service_offer_plan_name"));
        }
        self.services.push(service.clone());
        Ok(())
    }

    fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), StoreError> {
        if self.subscriptions.iter().any(|s| s.id == subscription.id) {
            return Err(duplicate("subscription", "subscription_pkey"));
        }
        if self.subscriptions.iter().any(|s| {
            s.service_id == subscription.service_id
                && s.product_id == subscription.product_id
                && s.name == subscription.name
        }) {
            return Err(duplicate("subscription", "idx_product_service_name"));
        }
        self.subscriptions.push(subscription.clone());
        Ok(())
    }

    fn insert_policy_link(&mut self, link: &PolicyLink) -> Result<(), StoreError> {
        if !link.deleted
            && self.policy_links.iter().any(|l| {
                !l.deleted && l.subscription_id == link.subscription_id && l.policy_id == link.policy_id
            })
        {
            return Err(duplicate("subscription_policy", "idx_unique_sub_policy"));
        }
        self.policy_links.push(link.clone());
        Ok(())
    }

    fn tenant_ids_in(&self, domain: &EmailDomain) -> HashSet<Uuid> {
        self.tenants
            .iter()
            .filter(|t| domain.matches(&t.email))
            .map(|t| t.id)
            .collect()
    }

    /// The `limit` matching tenants with the lowest id. Every delete
    /// scopes to this set, so children never outlive their tenant.
    fn oldest_tenant_ids(&self, domain: &EmailDomain, limit: DeleteLimit) -> HashSet<Uuid> {
        let mut ids: Vec<Uuid> = self.tenant_ids_in(domain).into_iter().collect();
        ids.sort();
        ids.truncate(limit.take());
        ids.into_iter().collect()
    }
}

fn duplicate(table: &'static str, index: &str) -> StoreError {
    StoreError::Constraint {
        table,
        detail: format!("duplicate key value violates unique constraint \"{}\"", index),
    }
}

fn drain<T>(rows: &mut Vec<T>, doomed: impl Fn(&T) -> bool) -> u64 {
    let before = rows.len();
    rows.retain(|row| !doomed(row));
    (before - rows.len()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServicePlan, Tenant};

    fn domain() -> EmailDomain {
        EmailDomain::parse("test.example").unwrap()
    }

    fn plan() -> ServicePlan {
        ServicePlan {
            service_offer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            service_offer_plan_source_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_tenant(&Tenant::synthetic(&domain(), None)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.counts().tenants, 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_tenant(&Tenant::synthetic(&domain(), None)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.counts().tenants, 1);
    }

    #[tokio::test]
    async fn test_service_uniqueness() {
        let store = MemoryStore::new();
        let plan = plan();
        let tenant = Tenant::synthetic(&domain(), None);
        let mut tx = store.begin().await.unwrap();
        tx.insert_tenant(&tenant).await.unwrap();
        tx.insert_service(&Service::for_tenant(tenant.id, &plan)).await.unwrap();

        let err = tx.insert_service(&Service::for_tenant(tenant.id, &plan)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint { table: "service", .. }));

        // still usable for rollback
        tx.rollback().await.unwrap();
        assert_eq!(store.counts(), TableCounts::default());
    }

    #[tokio::test]
    async fn test_one_active_link_per_pair() {
        let store = MemoryStore::new();
        let (tenant, sub, policy) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.insert_policy_link(&PolicyLink::active(tenant, sub, policy)).await.unwrap();
        assert!(store.insert_policy_link(&PolicyLink::active(tenant, sub, policy)).await.is_err());

        let mut deleted = PolicyLink::active(tenant, sub, policy);
        deleted.deleted = true;
        store.insert_policy_link(&deleted).await.unwrap();
        assert_eq!(store.counts().policy_links, 2);
    }

    #[tokio::test]
    async fn test_delete_oldest_by_key() {
        let store = MemoryStore::new();
        let other = EmailDomain::parse("keep.example").unwrap();
        let mut tx = store.begin().await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let tenant = Tenant::synthetic(&domain(), None);
            ids.push(tenant.id);
            tx.insert_tenant(&tenant).await.unwrap();
        }
        tx.insert_tenant(&Tenant::synthetic(&other, None)).await.unwrap();
        ids.sort();

        assert_eq!(tx.delete_tenants(&domain(), DeleteLimit::Oldest(2)).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let remaining: Vec<Uuid> = store.tenants().iter().map(|t| t.id).collect();
        assert_eq!(remaining.len(), 4);
        assert!(!remaining.contains(&ids[0]));
        assert!(!remaining.contains(&ids[1]));
        assert!(remaining.contains(&ids[2]));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_tenants(&domain(), DeleteLimit::All).await.unwrap(), 3);
        assert_eq!(tx.delete_tenants(&domain(), DeleteLimit::All).await.unwrap(), 0);
        tx.commit().await.unwrap();
        assert_eq!(store.counts().tenants, 1);
    }

    #[tokio::test]
    async fn test_missing_product() {
        let product = Uuid::new_v4();
        let store = MemoryStore::new().with_product(product, "plan-1");
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.product_external_id(product).await.unwrap(), "plan-1");
        assert!(matches!(
            tx.product_external_id(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
