//! Error types shared across the engine

use thiserror::Error;
use uuid::Uuid;

pub use crate::confirm::ConfirmError;
pub use crate::export::ExportError;
pub use crate::issuer::IssuerError;
pub use crate::registrar::RegistrarError;
pub use crate::store::StoreError;

/// Invalid or missing configuration, raised before any I/O
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::Settings`]
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Email domain predicate is empty
    #[error("email domain can not be empty")]
    EmptyDomain,

    /// Email domain contains characters that break the lookup predicate
    #[error("invalid email domain: {0}")]
    InvalidDomain(String),

    /// Identifier field is not a UUID
    #[error("invalid identifier {field}: {value:?}")]
    InvalidId { field: &'static str, value: String },

    /// Required field is empty
    #[error("missing required field: {0}")]
    Missing(&'static str),
}

/// Failure of a provisioning phase or of one tenant's task
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("issuer error: {0}")]
    Issuer(#[from] IssuerError),

    #[error("registrar error: {0}")]
    Registrar(#[from] RegistrarError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// Policies were requested but the tenant has no management key to register them with
    #[error("tenant {0} has no management key to register policies with")]
    NoManagementKey(Uuid),
}
