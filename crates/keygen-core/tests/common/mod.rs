//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use keygen_core::config::ProvisionPlan;
use keygen_core::confirm::ConfirmError;
use keygen_core::issuer::{IssuedKey, IssuerError, KeyRequest};
use keygen_core::model::{PolicyLink, Service, ServicePlan, Subscription, Tenant};
use keygen_core::registrar::RegistrarError;
use keygen_core::store::StoreError;
use keygen_core::{
    Confirm, CredentialIssuer, DeleteLimit, EmailDomain, FixtureStore, MemoryStore, PolicyRegistrar, Question, StoreTx,
};

pub const DOMAIN: &str = "test.example";
pub const MANAGEMENT_PLAN: &str = "usage-plan-management";
pub const ATTESTATION_PLAN: &str = "usage-plan-attestation";

pub fn domain() -> EmailDomain {
    EmailDomain::parse(DOMAIN).unwrap()
}

/// Plan with both products registered in the returned store
pub fn fixture(tenants: usize, management: usize, attestation: usize, policies: usize) -> (ProvisionPlan, MemoryStore) {
    let (management_product, attestation_product) = (Uuid::new_v4(), Uuid::new_v4());
    let store = MemoryStore::new()
        .with_product(management_product, MANAGEMENT_PLAN)
        .with_product(attestation_product, ATTESTATION_PLAN);

    let plan = ProvisionPlan {
        domain: domain(),
        tenants,
        management_keys: management,
        attestation_keys: attestation,
        policies,
        management_product_id: management_product,
        attestation_product_id: attestation_product,
        service: ServicePlan {
            service_offer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            service_offer_plan_source_id: Uuid::new_v4(),
        },
        tenant_source: None,
        maintainer: "perf@example.com".into(),
        propagation_wait: Duration::ZERO,
        max_concurrency: 2,
    };
    (plan, store)
}

/// Issuer that hands out sequential keys
#[derive(Default)]
pub struct FakeIssuer {
    issued: Mutex<Vec<KeyRequest>>,
    revoked: Mutex<Vec<String>>,
    counter: AtomicUsize,
    /// Zero-based create call that fails
    fail_call: Mutex<Option<usize>>,
    /// Fail every create against this usage plan
    fail_plan: Mutex<Option<String>>,
    fail_revoke: Mutex<bool>,
}

impl FakeIssuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_revocations() -> Arc<Self> {
        let issuer = Self::default();
        *issuer.fail_revoke.lock() = true;
        Arc::new(issuer)
    }

    pub fn fail_usage_plan(&self, usage_plan_id: &str) {
        *self.fail_plan.lock() = Some(usage_plan_id.to_string());
    }

    pub fn fail_nth_issue(&self, call: usize) {
        *self.fail_call.lock() = Some(call);
    }

    pub fn issued(&self) -> Vec<KeyRequest> {
        self.issued.lock().clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().clone()
    }
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn issue_key(&self, request: &KeyRequest) -> Result<IssuedKey, IssuerError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let failing_plan = self.fail_plan.lock().clone();
        if failing_plan.as_deref() == Some(request.usage_plan_id.as_str()) || *self.fail_call.lock() == Some(n) {
            return Err(IssuerError::Create {
                key_id: request.key_id.clone(),
                detail: "rejected".into(),
            });
        }

        self.issued.lock().push(request.clone());
        Ok(IssuedKey {
            external_id: format!("ext-{n}"),
            value: format!("raw-value-{n}"),
        })
    }

    async fn revoke_key(&self, external_id: &str) -> Result<(), IssuerError> {
        if *self.fail_revoke.lock() {
            return Err(IssuerError::Revoke {
                external_id: external_id.to_string(),
                detail: "throttled".into(),
            });
        }
        self.revoked.lock().push(external_id.to_string());
        Ok(())
    }
}

/// Registrar returning fresh ids and remembering the credential used
#[derive(Default)]
pub struct FakeRegistrar {
    credentials: Mutex<Vec<String>>,
    registered: Mutex<Vec<Uuid>>,
    fail: bool,
}

impl FakeRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn credentials(&self) -> Vec<String> {
        self.credentials.lock().clone()
    }

    pub fn registered(&self) -> Vec<Uuid> {
        self.registered.lock().clone()
    }
}

#[async_trait]
impl PolicyRegistrar for FakeRegistrar {
    async fn register_policy(&self, management_key: &str) -> Result<Uuid, RegistrarError> {
        self.credentials.lock().push(management_key.to_string());
        if self.fail {
            return Err(RegistrarError::UnexpectedStatus {
                status: 401,
                body: "unauthorized".into(),
            });
        }
        let id = Uuid::new_v4();
        self.registered.lock().push(id);
        Ok(id)
    }
}

/// Answers questions from a script; runs out with EOF
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<Question>>,
}

impl ScriptedConfirm {
    pub fn new(answers: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            asked: Mutex::new(Vec::new()),
        })
    }

    pub fn asked(&self) -> Vec<Question> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm(&self, question: &Question) -> Result<bool, ConfirmError> {
        self.asked.lock().push(question.clone());
        self.answers.lock().pop_front().ok_or(ConfirmError::Eof)
    }
}

/// Wraps a [`MemoryStore`] and rejects chosen transactional statements
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    /// Zero-based `insert_service` call that fails
    fail_service_insert: Option<usize>,
    fail_service_delete: bool,
    service_inserts: Arc<AtomicUsize>,
    tenants_deleted: Arc<AtomicBool>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_nth_service_insert(mut self, call: usize) -> Self {
        self.fail_service_insert = Some(call);
        self
    }

    pub fn fail_service_delete(mut self) -> Self {
        self.fail_service_delete = true;
        self
    }

    /// Whether any transaction reached `delete_tenants`
    pub fn tenants_deleted(&self) -> bool {
        self.tenants_deleted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixtureStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            fail_service_insert: self.fail_service_insert,
            fail_service_delete: self.fail_service_delete,
            service_inserts: self.service_inserts.clone(),
            tenants_deleted: self.tenants_deleted.clone(),
        }))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn insert_policy_link(&self, link: &PolicyLink) -> Result<(), StoreError> {
        self.inner.insert_policy_link(link).await
    }
}

struct FaultyTx {
    inner: Box<dyn StoreTx>,
    fail_service_insert: Option<usize>,
    fail_service_delete: bool,
    service_inserts: Arc<AtomicUsize>,
    tenants_deleted: Arc<AtomicBool>,
}

#[async_trait]
impl StoreTx for FaultyTx {
    async fn insert_tenant(&mut self, tenant: &Tenant) -> Result<(), StoreError> {
        self.inner.insert_tenant(tenant).await
    }

    async fn insert_service(&mut self, service: &Service) -> Result<(), StoreError> {
        let n = self.service_inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_service_insert == Some(n) {
            return Err(StoreError::Constraint {
                table: "service",
                detail: "duplicate key value violates unique constraint \"service_pkey\"".into(),
            });
        }
        self.inner.insert_service(service).await
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<(), StoreError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn insert_policy_link(&mut self, link: &PolicyLink) -> Result<(), StoreError> {
        self.inner.insert_policy_link(link).await
    }

    async fn product_external_id(&mut self, product_id: Uuid) -> Result<String, StoreError> {
        self.inner.product_external_id(product_id).await
    }

    async fn subscription_external_ids(&mut self, domain: &EmailDomain) -> Result<Vec<String>, StoreError> {
        self.inner.subscription_external_ids(domain).await
    }

    async fn delete_policy_links(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        self.inner.delete_policy_links(domain, limit).await
    }

    async fn delete_subscriptions(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        self.inner.delete_subscriptions(domain, limit).await
    }

    async fn delete_services(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        if self.fail_service_delete {
            return Err(StoreError::Constraint {
                table: "service",
                detail: "update or delete on table \"service\" violates foreign key constraint".into(),
            });
        }
        self.inner.delete_services(domain, limit).await
    }

    async fn delete_tenants(&mut self, domain: &EmailDomain, limit: DeleteLimit) -> Result<u64, StoreError> {
        self.tenants_deleted.store(true, Ordering::SeqCst);
        self.inner.delete_tenants(domain, limit).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}
