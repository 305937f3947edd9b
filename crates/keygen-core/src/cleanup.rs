//! Cleanup Engine
//!
//! Revokes issued keys and deletes every fixture row in an email domain.
//! Deletes share one transaction that commits only after the operator
//! confirms twice.

use std::sync::Arc;

use thiserror::Error;

use crate::confirm::{Confirm, ConfirmError, Question};
use crate::issuer::CredentialIssuer;
use crate::model::EmailDomain;
use crate::store::{DeleteLimit, FixtureStore, StoreError, StoreTx};

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("confirmation failed: {0}")]
    Confirm(#[from] ConfirmError),
}

/// Rows removed per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteCounts {
    pub policy_links: u64,
    pub subscriptions: u64,
    pub services: u64,
    pub tenants: u64,
}

impl DeleteCounts {
    pub fn total(&self) -> u64 {
        self.policy_links + self.subscriptions + self.services + self.tenants
    }
}

/// How a cleanup run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Deletes committed
    Committed(DeleteCounts),
    /// Operator declined the commit
    RolledBack,
    /// Operator stopped after every revocation failed
    Aborted,
}

/// Revocation tally
#[derive(Debug, Clone, Copy, Default)]
struct Revocations {
    attempted: usize,
    failed: usize,
}

impl Revocations {
    fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }
}

pub struct CleanupEngine {
    store: Arc<dyn FixtureStore>,
    issuer: Arc<dyn CredentialIssuer>,
    confirm: Arc<dyn Confirm>,
}

impl CleanupEngine {
    pub fn new(store: Arc<dyn FixtureStore>, issuer: Arc<dyn CredentialIssuer>, confirm: Arc<dyn Confirm>) -> Self {
        Self { store, issuer, confirm }
    }

    /// Revoke, delete, confirm. Any error rolls the transaction back.
    pub async fn run(&self, domain: &EmailDomain, limit: DeleteLimit) -> Result<CleanupOutcome, CleanupError> {
        tracing::info!(domain = %domain, limit = %limit, "Starting cleanup");
        let mut tx = self.store.begin().await?;

        match self.run_in_tx(tx.as_mut(), domain, limit).await {
            Ok(Some(counts)) => {
                tx.commit().await?;
                tracing::info!(
                    domain = %domain,
                    policy_links = counts.policy_links,
                    subscriptions = counts.subscriptions,
                    services = counts.services,
                    tenants = counts.tenants,
                    "Cleanup committed"
                );
                Ok(CleanupOutcome::Committed(counts))
            }
            Ok(None) => {
                self.rollback(tx, domain).await;
                Ok(CleanupOutcome::RolledBack)
            }
            Err(RunStop::Aborted) => {
                self.rollback(tx, domain).await;
                Ok(CleanupOutcome::Aborted)
            }
            Err(RunStop::Failed(e)) => {
                tracing::error!(domain = %domain, error = %e, "Cleanup failed");
                self.rollback(tx, domain).await;
                Err(e)
            }
        }
    }

    /// `Ok(None)` when a commit gate was declined
    async fn run_in_tx(
        &self,
        tx: &mut dyn StoreTx,
        domain: &EmailDomain,
        limit: DeleteLimit,
    ) -> Result<Option<DeleteCounts>, RunStop> {
        let external_ids = tx.subscription_external_ids(domain).await?;
        tracing::info!(domain = %domain, keys = external_ids.len(), "Revoking API keys");

        let revocations = self.revoke_all(&external_ids).await;
        if revocations.all_failed() {
            tracing::error!(attempted = revocations.attempted, "All delete api key calls failed");
            if self.confirm.confirm(&Question::abort_after_revocations()).await? {
                return Err(RunStop::Aborted);
            }
        }

        let counts = DeleteCounts {
            policy_links: tx.delete_policy_links(domain, limit).await?,
            subscriptions: tx.delete_subscriptions(domain, limit).await?,
            services: tx.delete_services(domain, limit).await?,
            tenants: tx.delete_tenants(domain, limit).await?,
        };
        tracing::info!(domain = %domain, rows = counts.total(), "Rows deleted, awaiting confirmation");

        if !self.confirm.confirm(&Question::commit()).await? {
            return Ok(None);
        }
        if !self.confirm.confirm(&Question::reconfirm()).await? {
            return Ok(None);
        }
        Ok(Some(counts))
    }

    async fn revoke_all(&self, external_ids: &[String]) -> Revocations {
        let mut tally = Revocations {
            attempted: external_ids.len(),
            failed: 0,
        };
        for external_id in external_ids {
            if self.issuer.revoke_key(external_id).await.is_err() {
                tally.failed += 1;
            }
        }
        if tally.failed > 0 {
            tracing::warn!(attempted = tally.attempted, failed = tally.failed, "Some API keys were not revoked");
        }
        tally
    }

    async fn rollback(&self, tx: Box<dyn StoreTx>, domain: &EmailDomain) {
        match tx.rollback().await {
            Ok(()) => tracing::warn!(
                domain = %domain,
                "Cleanup rolled back; revoked API keys are not restored"
            ),
            Err(e) => tracing::error!(domain = %domain, error = %e, "Rollback failed"),
        }
    }
}

/// Early exit from the transactional part of a run
enum RunStop {
    Aborted,
    Failed(CleanupError),
}

impl From<StoreError> for RunStop {
    fn from(e: StoreError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<ConfirmError> for RunStop {
    fn from(e: ConfirmError) -> Self {
        Self::Failed(e.into())
    }
}
