//! Provisioning Orchestrator

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{ProvisionPlan, Settings};
use crate::error::ProvisionError;
use crate::export::ReportExporter;
use crate::issuer::CredentialIssuer;
use crate::model::{IssuedKeyRecord, Service, Tenant};
use crate::provision::{ProductRef, TenantHandle, TenantProvisioner};
use crate::registrar::PolicyRegistrar;
use crate::store::{FixtureStore, StoreTx};

/// Outcome of a provisioning run
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    /// Committed tenants, in creation order
    pub tenants: Vec<TenantHandle>,
    /// Keys from every successful tenant task, in tenant order
    pub records: Vec<IssuedKeyRecord>,
    /// Tenants whose task failed; their committed rows remain
    pub failed_tenants: Vec<Uuid>,
    pub export_path: Option<PathBuf>,
}

/// Creates the tenant batch and fans out one task per tenant
pub struct Orchestrator {
    store: Arc<dyn FixtureStore>,
    issuer: Arc<dyn CredentialIssuer>,
    registrar: Arc<dyn PolicyRegistrar>,
    plan: Arc<ProvisionPlan>,
    exporter: Option<ReportExporter>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn FixtureStore>,
        issuer: Arc<dyn CredentialIssuer>,
        registrar: Arc<dyn PolicyRegistrar>,
        plan: ProvisionPlan,
    ) -> Self {
        Self {
            store,
            issuer,
            registrar,
            plan: Arc::new(plan),
            exporter: None,
        }
    }

    /// Validate settings and build the exporter they describe. Fails
    /// before any I/O.
    pub fn from_settings(
        store: Arc<dyn FixtureStore>,
        issuer: Arc<dyn CredentialIssuer>,
        registrar: Arc<dyn PolicyRegistrar>,
        settings: &Settings,
    ) -> Result<Self, ProvisionError> {
        let plan = settings.provision_plan()?;
        let exporter = ReportExporter::from_settings(&settings.report)?;
        Ok(Self::new(store, issuer, registrar, plan).with_exporter(exporter))
    }

    /// Write the aggregate report when the run finishes
    pub fn with_exporter(mut self, exporter: ReportExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run the whole batch
    pub async fn run(&self) -> Result<ProvisionReport, ProvisionError> {
        let (tenants, management, attestation) = self.create_tenants().await?;

        let provisioner = Arc::new(TenantProvisioner::new(
            self.store.clone(),
            self.issuer.clone(),
            self.registrar.clone(),
            self.plan.clone(),
            management,
            attestation,
        ));
        let outcomes = self.fan_out(provisioner, &tenants).await;

        let mut report = ProvisionReport {
            tenants: tenants.clone(),
            ..Default::default()
        };
        for (tenant, outcome) in tenants.iter().zip(outcomes) {
            match outcome {
                Some(records) => report.records.extend(records),
                None => report.failed_tenants.push(tenant.tenant_id),
            }
        }

        tracing::info!(
            tenants = report.tenants.len(),
            failed = report.failed_tenants.len(),
            keys = report.records.len(),
            "Provisioning finished"
        );

        if let Some(exporter) = &self.exporter {
            report.export_path = exporter.export(&report.records).await.map_err(|e| {
                tracing::error!(keys = report.records.len(), error = %e, "Report export failed");
                e
            })?;
        }
        Ok(report)
    }

    /// Tenant/service pairs and product lookups in one transaction.
    /// Committed before any key is issued; nothing is kept on failure.
    async fn create_tenants(&self) -> Result<(Vec<TenantHandle>, ProductRef, ProductRef), ProvisionError> {
        let mut tx = self.store.begin().await?;
        match self.create_in_tx(tx.as_mut()).await {
            Ok(created) => {
                tx.commit().await?;
                tracing::info!(tenants = created.0.len(), domain = %self.plan.domain, "Tenants created successfully");
                Ok(created)
            }
            Err(e) => {
                tracing::error!(domain = %self.plan.domain, error = %e, "Tenant creation failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn create_in_tx(
        &self,
        tx: &mut dyn StoreTx,
    ) -> Result<(Vec<TenantHandle>, ProductRef, ProductRef), ProvisionError> {
        let mut handles = Vec::with_capacity(self.plan.tenants);
        for _ in 0..self.plan.tenants {
            let tenant = Tenant::synthetic(&self.plan.domain, self.plan.tenant_source);
            tx.insert_tenant(&tenant).await?;

            let service = Service::for_tenant(tenant.id, &self.plan.service);
            tx.insert_service(&service).await?;

            handles.push(TenantHandle {
                tenant_id: tenant.id,
                service_id: service.id,
            });
        }

        let attestation = ProductRef {
            product_id: self.plan.attestation_product_id,
            usage_plan_id: tx.product_external_id(self.plan.attestation_product_id).await?,
        };
        let management = ProductRef {
            product_id: self.plan.management_product_id,
            usage_plan_id: tx.product_external_id(self.plan.management_product_id).await?,
        };
        Ok((handles, management, attestation))
    }

    /// One task per tenant, gated by the concurrency limit. Waits for all
    /// of them; a failure never cancels siblings.
    async fn fan_out(
        &self,
        provisioner: Arc<TenantProvisioner>,
        tenants: &[TenantHandle],
    ) -> Vec<Option<Vec<IssuedKeyRecord>>> {
        let permits = match self.plan.max_concurrency {
            0 => tenants.len().max(1),
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut join_set = JoinSet::new();

        for (index, tenant) in tenants.iter().copied().enumerate() {
            let provisioner = provisioner.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                tracing::info!(tenant_id = %tenant.tenant_id, "Creating api keys for tenant");
                (index, tenant, provisioner.run(tenant).await)
            });
        }

        let mut outcomes = vec![None; tenants.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, _, Ok(records))) => outcomes[index] = Some(records),
                Ok((_, tenant, Err(e))) => {
                    tracing::error!(tenant_id = %tenant.tenant_id, error = %e, "Error creating api keys");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Tenant task panicked");
                }
            }
        }
        outcomes
    }
}
