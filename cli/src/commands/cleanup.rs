//! `keygen cleanup`

use std::sync::Arc;

use keygen_core::{CleanupEngine, CleanupOutcome, DeleteCounts, DeleteLimit, Settings, TerminalConfirm};

use super::{connect_issuer, connect_store};
use crate::output::{CleanupSummary, OutputFormat};

pub async fn handle(settings: Settings, scope: DeleteLimit, format: OutputFormat) -> anyhow::Result<()> {
    let domain = settings.email_domain()?;

    // single transaction, no fan-out
    let store = connect_store(&settings, 0).await?;
    let issuer = connect_issuer(&settings).await;
    let confirm = Arc::new(TerminalConfirm::stdio());

    let outcome = CleanupEngine::new(store, issuer, confirm).run(&domain, scope).await?;

    let (label, counts) = match outcome {
        CleanupOutcome::Committed(counts) => ("committed", counts),
        CleanupOutcome::RolledBack => ("rolled back", DeleteCounts::default()),
        CleanupOutcome::Aborted => ("aborted", DeleteCounts::default()),
    };
    format.print(&CleanupSummary {
        outcome: label,
        policy_links: counts.policy_links,
        subscriptions: counts.subscriptions,
        services: counts.services,
        tenants: counts.tenants,
    });
    Ok(())
}
