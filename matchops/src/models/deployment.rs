//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target environment of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Input of a `deploy()` call
///
/// `environment` stays a raw string here so that membership is checked by
/// the validation stage and recorded in the audit trail like any other
/// precondition failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOptions {
    pub environment: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// One invocation of `deploy()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub environment: String,
    pub version: String,
    pub rollback_version: Option<String>,
}

/// Status of a single log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Started,
    InProgress,
    RolledBack,
    Completed,
    Failed,
}

impl LogStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogStatus::Completed | LogStatus::Failed)
    }
}

/// Append-only audit row, one per stage transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub deployment_id: String,

    pub status: LogStatus,

    /// Stage the row belongs to, absent on the `started` row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub details: serde_json::Value,
}

/// Lifecycle status of a deployment, derived from its log rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    Started,
    Completed,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    /// Derive the status from rows ordered by timestamp
    pub fn derive(entries: &[DeploymentLogEntry]) -> Option<Self> {
        let last = entries.last()?;
        let rolled_back = entries.iter().any(|e| e.status == LogStatus::RolledBack);

        Some(match last.status {
            LogStatus::Completed => DeploymentStatus::Completed,
            LogStatus::Failed if rolled_back => DeploymentStatus::RolledBack,
            LogStatus::Failed => DeploymentStatus::Failed,
            LogStatus::RolledBack => DeploymentStatus::RolledBack,
            LogStatus::Started | LogStatus::InProgress => DeploymentStatus::Started,
        })
    }
}

/// Active configuration of an environment, upserted by the deployment stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfigRecord {
    pub environment: Environment,
    pub version: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time snapshot usable for rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub id: String,
    pub environment: Environment,
    pub timestamp: DateTime<Utc>,
    pub location: String,

    /// Configuration record active when the snapshot was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_config: Option<DeploymentConfigRecord>,
}

impl BackupDescriptor {
    /// Build a key-safe backup id from the environment and timestamp
    pub fn make_id(environment: Environment, timestamp: DateTime<Utc>) -> String {
        let stamp = timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}-{}", environment, stamp)
    }
}

/// Result of a single verification check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Combined result of the four verification checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub success: bool,
    pub checks: Vec<CheckReport>,
}

impl VerificationReport {
    pub fn from_checks(checks: Vec<CheckReport>) -> Self {
        Self {
            success: checks.iter().all(|c| c.success),
            checks,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckReport> {
        self.checks.iter().filter(|c| !c.success)
    }

    /// Describe every failed check, in check order
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|c| format!("{}: {}", c.name, c.error.as_deref().unwrap_or("failed")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Success payload of `deploy()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub success: bool,
    pub deployment_id: String,
    pub environment: Environment,
    pub version: String,
    pub verification: VerificationReport,
}
