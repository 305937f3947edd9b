//! Per-Tenant Provisioning Task
//!
//! Management keys → propagation wait → policies → attestation keys

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::config::ProvisionPlan;
use crate::error::ProvisionError;
use crate::issuer::{CredentialIssuer, KeyRequest};
use crate::model::{IssuedKeyRecord, KeyType, PolicyLink, Subscription, CREATOR_USER, KEY_VERSION, STATUS_ACTIVE};
use crate::registrar::PolicyRegistrar;
use crate::store::FixtureStore;

/// Task stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    IssueManagementKeys,
    AwaitPropagation,
    RegisterPolicies,
    IssueAttestationKeys,
    Done,
}

impl TaskStage {
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::IssueManagementKeys => Some(Self::AwaitPropagation),
            Self::AwaitPropagation => Some(Self::RegisterPolicies),
            Self::RegisterPolicies => Some(Self::IssueAttestationKeys),
            Self::IssueAttestationKeys => Some(Self::Done),
            Self::Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueManagementKeys => "issue_management_keys",
            Self::AwaitPropagation => "await_propagation",
            Self::RegisterPolicies => "register_policies",
            Self::IssueAttestationKeys => "issue_attestation_keys",
            Self::Done => "done",
        }
    }
}

/// Tenant and service committed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantHandle {
    pub tenant_id: Uuid,
    pub service_id: Uuid,
}

/// Product and the usage plan its keys are attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRef {
    pub product_id: Uuid,
    pub usage_plan_id: String,
}

/// Runs the key chain for one tenant
pub struct TenantProvisioner {
    store: Arc<dyn FixtureStore>,
    issuer: Arc<dyn CredentialIssuer>,
    registrar: Arc<dyn PolicyRegistrar>,
    plan: Arc<ProvisionPlan>,
    management: ProductRef,
    attestation: ProductRef,
}

impl TenantProvisioner {
    pub fn new(
        store: Arc<dyn FixtureStore>,
        issuer: Arc<dyn CredentialIssuer>,
        registrar: Arc<dyn PolicyRegistrar>,
        plan: Arc<ProvisionPlan>,
        management: ProductRef,
        attestation: ProductRef,
    ) -> Self {
        Self {
            store,
            issuer,
            registrar,
            plan,
            management,
            attestation,
        }
    }

    /// Run every stage in order. The first error ends the task; rows
    /// already written for the tenant stay.
    pub async fn run(&self, tenant: TenantHandle) -> Result<Vec<IssuedKeyRecord>, ProvisionError> {
        let mut stage = TaskStage::IssueManagementKeys;
        let mut records = Vec::with_capacity(self.plan.management_keys + self.plan.attestation_keys);
        let mut policy_ids = Vec::new();

        while let Some(next) = stage.next() {
            tracing::debug!(tenant_id = %tenant.tenant_id, stage = stage.as_str(), "Tenant stage");
            let result = match stage {
                TaskStage::IssueManagementKeys => self.issue_management_keys(&tenant, &mut records).await,
                TaskStage::AwaitPropagation => {
                    self.await_propagation(&tenant).await;
                    Ok(())
                }
                TaskStage::RegisterPolicies => self
                    .register_policies(&tenant, records.first())
                    .await
                    .map(|ids| policy_ids = ids),
                TaskStage::IssueAttestationKeys => {
                    self.issue_attestation_keys(&tenant, &policy_ids, &mut records).await
                }
                TaskStage::Done => Ok(()),
            };

            if let Err(e) = result {
                tracing::error!(
                    tenant_id = %tenant.tenant_id,
                    stage = stage.as_str(),
                    issued = records.len(),
                    error = %e,
                    "Tenant provisioning failed"
                );
                return Err(e);
            }
            stage = next;
        }

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            keys = records.len(),
            policies = policy_ids.len(),
            "Tenant provisioned"
        );
        Ok(records)
    }

    async fn issue_management_keys(
        &self,
        tenant: &TenantHandle,
        records: &mut Vec<IssuedKeyRecord>,
    ) -> Result<(), ProvisionError> {
        for _ in 0..self.plan.management_keys {
            let record = self
                .issue(tenant, &self.management, KeyType::Management, Vec::new())
                .await?;
            records.push(record);
        }
        Ok(())
    }

    async fn await_propagation(&self, tenant: &TenantHandle) {
        if self.plan.propagation_wait.is_zero() {
            return;
        }
        tracing::info!(
            tenant_id = %tenant.tenant_id,
            wait_secs = self.plan.propagation_wait.as_secs(),
            "Waiting for management keys to propagate"
        );
        tokio::time::sleep(self.plan.propagation_wait).await;
    }

    async fn register_policies(
        &self,
        tenant: &TenantHandle,
        management_key: Option<&IssuedKeyRecord>,
    ) -> Result<Vec<Uuid>, ProvisionError> {
        if self.plan.policies == 0 {
            return Ok(Vec::new());
        }
        let credential = management_key
            .map(|record| record.full_key.clone())
            .ok_or(ProvisionError::NoManagementKey(tenant.tenant_id))?;

        let mut ids = Vec::with_capacity(self.plan.policies);
        for _ in 0..self.plan.policies {
            let policy_id = self.registrar.register_policy(&credential).await?;
            tracing::debug!(tenant_id = %tenant.tenant_id, policy_id = %policy_id, "Policy registered");
            ids.push(policy_id);
        }
        Ok(ids)
    }

    async fn issue_attestation_keys(
        &self,
        tenant: &TenantHandle,
        policy_ids: &[Uuid],
        records: &mut Vec<IssuedKeyRecord>,
    ) -> Result<(), ProvisionError> {
        for _ in 0..self.plan.attestation_keys {
            let linked = pick_policy_subset(&mut rand::thread_rng(), policy_ids);
            let record = self
                .issue(tenant, &self.attestation, KeyType::Attestation, linked)
                .await?;
            records.push(record);
        }
        Ok(())
    }

    /// Issuer call, then the subscription row, then its policy links
    async fn issue(
        &self,
        tenant: &TenantHandle,
        product: &ProductRef,
        key_type: KeyType,
        policy_ids: Vec<Uuid>,
    ) -> Result<IssuedKeyRecord, ProvisionError> {
        let subscription_id = Uuid::new_v4();
        let name = format!("ApiKey_Perf_{}", Uuid::new_v4());

        let issued = self
            .issuer
            .issue_key(&KeyRequest {
                name: name.clone(),
                key_id: subscription_id.to_string(),
                usage_plan_id: product.usage_plan_id.clone(),
                maintainer: self.plan.maintainer.clone(),
            })
            .await?;

        let subscription = Subscription {
            id: subscription_id,
            service_id: tenant.service_id,
            product_id: product.product_id,
            tenant_id: tenant.tenant_id,
            name,
            status: STATUS_ACTIVE.into(),
            external_id: issued.external_id,
            variable_key: Uuid::new_v4().to_string(),
            version: KEY_VERSION.into(),
            creator_type: CREATOR_USER.into(),
            created_at: chrono::Utc::now(),
        };
        self.store.insert_subscription(&subscription).await?;

        for policy_id in &policy_ids {
            self.store
                .insert_policy_link(&PolicyLink::active(tenant.tenant_id, subscription.id, *policy_id))
                .await?;
        }

        tracing::debug!(
            tenant_id = %tenant.tenant_id,
            subscription_id = %subscription.id,
            external_id = %subscription.external_id,
            key_type = %key_type,
            policies = policy_ids.len(),
            "Key issued"
        );
        Ok(IssuedKeyRecord::new(&subscription, &issued.value, key_type, policy_ids))
    }
}

/// Distinct policies for one attestation key. The subset size is drawn
/// from `[0, P)`, so a key is never linked to every registered policy.
pub fn pick_policy_subset<R: Rng + ?Sized>(rng: &mut R, policy_ids: &[Uuid]) -> Vec<Uuid> {
    if policy_ids.is_empty() {
        return Vec::new();
    }
    let count = rng.gen_range(0..policy_ids.len());
    policy_ids.choose_multiple(rng, count).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_stage_order() {
        let mut stage = TaskStage::IssueManagementKeys;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                TaskStage::IssueManagementKeys,
                TaskStage::AwaitPropagation,
                TaskStage::RegisterPolicies,
                TaskStage::IssueAttestationKeys,
                TaskStage::Done,
            ]
        );
    }

    #[test]
    fn test_no_policies_links_nothing() {
        assert!(pick_policy_subset(&mut rand::thread_rng(), &[]).is_empty());
    }

    #[test]
    fn test_single_policy_is_never_linked() {
        // [0, 1) only contains 0
        let ids = [Uuid::new_v4()];
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert!(pick_policy_subset(&mut rng, &ids).is_empty());
        }
    }

    proptest! {
        #[test]
        fn subset_is_strictly_smaller(count in 1usize..16, seed in any::<u64>()) {
            let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
            let picked = pick_policy_subset(&mut StdRng::seed_from_u64(seed), &ids);

            prop_assert!(picked.len() < count);
            let distinct: HashSet<_> = picked.iter().collect();
            prop_assert_eq!(distinct.len(), picked.len());
            prop_assert!(picked.iter().all(|id| ids.contains(id)));
        }
    }
}
