//! Load-Test Fixture Generator
//!
//! Provisions synthetic tenants with chains of API keys and policies, and
//! reclaims them afterwards:
//! - Tenant/service creation in a single transaction
//! - Concurrent per-tenant key issuance (API Gateway + policy service)
//! - Domain-scoped, operator-confirmed bulk cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PROVISIONING ORCHESTRATOR                       │
//! │                                                                         │
//! │   tx: T × (Tenant, Service) ──commit──▶ fan-out (semaphore-gated)       │
//! │                                                                         │
//! │   ┌───────────────┐  ┌───────────────┐         ┌───────────────┐       │
//! │   │ TenantTask #1 │  │ TenantTask #2 │   ...   │ TenantTask #T │       │
//! │   │ mgmt keys     │  │               │         │               │       │
//! │   │ wait          │  │               │         │               │       │
//! │   │ policies      │  │               │         │               │       │
//! │   │ attest keys   │  │               │         │               │       │
//! │   └───────┬───────┘  └───────┬───────┘         └───────┬───────┘       │
//! │           └──────────────────┴────────────┬────────────┘               │
//! │                                           ▼                             │
//! │                                  ReportExporter                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!       │                    │                         │
//!       ▼                    ▼                         ▼
//!  FixtureStore       CredentialIssuer          PolicyRegistrar
//!  (PostgreSQL)       (API Gateway)             (HTTP)
//! ```

pub mod cleanup;
pub mod config;
pub mod confirm;
pub mod error;
pub mod export;
pub mod issuer;
pub mod model;
pub mod orchestrator;
pub mod provision;
pub mod registrar;
pub mod store;

pub use cleanup::{CleanupEngine, CleanupOutcome, DeleteCounts};
pub use config::Settings;
pub use confirm::{Confirm, Question, TerminalConfirm};
pub use error::{ConfigError, ProvisionError};
pub use export::ReportExporter;
pub use issuer::{ApiGatewayIssuer, CredentialIssuer};
pub use model::{EmailDomain, FullKey, IssuedKeyRecord, KeyType};
pub use orchestrator::{Orchestrator, ProvisionReport};
pub use provision::TenantProvisioner;
pub use registrar::{HttpPolicyRegistrar, PolicyRegistrar};
pub use store::{DeleteLimit, FixtureStore, MemoryStore, PgFixtureStore, StoreTx};
