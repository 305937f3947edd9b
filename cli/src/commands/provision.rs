//! `keygen provision`

use std::sync::Arc;

use keygen_core::{HttpPolicyRegistrar, Orchestrator, Settings};

use super::{connect_issuer, connect_store};
use crate::output::{OutputFormat, ProvisionSummary};

pub async fn handle(settings: Settings, format: OutputFormat) -> anyhow::Result<()> {
    // fail on bad settings before connecting anywhere
    let plan = settings.provision_plan()?;

    let fan_out = match plan.max_concurrency {
        0 => plan.tenants,
        n => n.min(plan.tenants),
    };
    let store = connect_store(&settings, fan_out).await?;
    let issuer = connect_issuer(&settings).await;
    let registrar = Arc::new(HttpPolicyRegistrar::new(settings.policies.clone()));

    tracing::info!(
        tenants = plan.tenants,
        management_keys = plan.management_keys,
        attestation_keys = plan.attestation_keys,
        policies = plan.policies,
        domain = %plan.domain,
        "Starting provisioning"
    );

    let report = Orchestrator::from_settings(store, issuer, registrar, &settings)?
        .run()
        .await?;

    format.print(&ProvisionSummary {
        tenants: report.tenants.len(),
        failed_tenants: report.failed_tenants.iter().map(ToString::to_string).collect(),
        keys: report.records.len(),
        report: report.export_path.map(|p| p.display().to_string()),
    });
    Ok(())
}
