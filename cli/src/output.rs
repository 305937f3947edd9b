//! Output formatting

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn print<T: Serialize + Summary>(&self, data: &T) {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
            }
            OutputFormat::Text => {
                for (label, value) in data.lines() {
                    println!("{:<16} {}", label, value);
                }
            }
        }
    }
}

/// Label/value pairs for text output
pub trait Summary {
    fn lines(&self) -> Vec<(&'static str, String)>;
}

/// Provisioning run summary
#[derive(Debug, Serialize)]
pub struct ProvisionSummary {
    pub tenants: usize,
    pub failed_tenants: Vec<String>,
    pub keys: usize,
    pub report: Option<String>,
}

impl Summary for ProvisionSummary {
    fn lines(&self) -> Vec<(&'static str, String)> {
        let mut lines = vec![
            ("tenants", self.tenants.to_string()),
            ("keys", self.keys.to_string()),
            ("failed tenants", self.failed_tenants.len().to_string()),
            ("report", self.report.clone().unwrap_or_else(|| "-".into())),
        ];
        for id in &self.failed_tenants {
            lines.push(("  failed", id.clone()));
        }
        lines
    }
}

/// Cleanup run summary
#[derive(Debug, Serialize)]
pub struct CleanupSummary {
    pub outcome: &'static str,
    pub policy_links: u64,
    pub subscriptions: u64,
    pub services: u64,
    pub tenants: u64,
}

impl Summary for CleanupSummary {
    fn lines(&self) -> Vec<(&'static str, String)> {
        vec![
            ("outcome", self.outcome.to_string()),
            ("policy links", self.policy_links.to_string()),
            ("subscriptions", self.subscriptions.to_string()),
            ("services", self.services.to_string()),
            ("tenants", self.tenants.to_string()),
        ]
    }
}
