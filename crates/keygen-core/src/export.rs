//! Report Exporter
//!
//! One line per issued key, rendered through a `{{field}}` template. The
//! first line is the header.

use std::path::PathBuf;

use handlebars::Handlebars;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ReportSettings;
use crate::model::IssuedKeyRecord;

const TEMPLATE_NAME: &str = "record";
const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// Fields available to the template
pub const RECORD_FIELDS: [&str; 8] = [
    "tenant_id",
    "id",
    "variable_key",
    "api_key",
    "version",
    "full_key",
    "key_type",
    "policy_id",
];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("invalid report template: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("render failed: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders key records to a flat file
pub struct ReportExporter {
    registry: Handlebars<'static>,
    file_pattern: String,
}

impl ReportExporter {
    pub fn new(template: &str, file_pattern: impl Into<String>) -> Result<Self, ExportError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(Box::new)?;

        Ok(Self {
            registry,
            file_pattern: file_pattern.into(),
        })
    }

    pub fn from_settings(settings: &ReportSettings) -> Result<Self, ExportError> {
        Self::new(&settings.template, settings.file.clone())
    }

    /// Header line followed by one line per record
    pub fn render(&self, records: &[IssuedKeyRecord]) -> Result<String, ExportError> {
        let header: Map<String, Value> = RECORD_FIELDS
            .iter()
            .map(|field| (field.to_string(), Value::String(field.to_string())))
            .collect();

        let mut lines = Vec::with_capacity(records.len() + 1);
        lines.push(self.registry.render(TEMPLATE_NAME, &header)?);
        for record in records {
            let data = serde_json::to_value(record)?;
            lines.push(self.registry.render(TEMPLATE_NAME, &data)?);
        }
        Ok(lines.join("\n"))
    }

    /// Target path for an export happening now
    pub fn file_path(&self) -> PathBuf {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        PathBuf::from(self.file_pattern.replace(TIMESTAMP_PLACEHOLDER, &nanos.to_string()))
    }

    /// Write the report. Nothing is written for an empty batch.
    pub async fn export(&self, records: &[IssuedKeyRecord]) -> Result<Option<PathBuf>, ExportError> {
        if records.is_empty() {
            tracing::info!("No keys issued, skipping report");
            return Ok(None);
        }

        let content = self.render(records)?;
        let path = self.file_path();
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| ExportError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), keys = records.len(), "Report written");
        Ok(Some(path))
    }
}
