//! Persisted collections
//!
//! Logs and alerts are append-only; deployment configs are upserted by
//! environment; rules are read by the security pipeline.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::errors::OpsError;
use crate::models::deployment::{DeploymentConfigRecord, DeploymentLogEntry, Environment};
use crate::models::security::{BusinessRule, SecurityAlert, SecurityLogEntry};

pub use file::FileStore;
pub use memory::MemoryStore;

/// `DeploymentLog` collection
#[async_trait]
pub trait DeploymentLogStore: Send + Sync {
    async fn append(&self, entry: DeploymentLogEntry) -> Result<(), OpsError>;

    /// Rows of one deployment, in insertion order
    async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, OpsError>;
}

/// `DeploymentConfig` collection, keyed by environment
#[async_trait]
pub trait DeploymentConfigStore: Send + Sync {
    async fn get(&self, environment: Environment) -> Result<Option<DeploymentConfigRecord>, OpsError>;

    async fn upsert(&self, record: DeploymentConfigRecord) -> Result<(), OpsError>;

    /// Drop the record of `environment`, used when rolling back a first release
    async fn remove(&self, environment: Environment) -> Result<(), OpsError>;
}

/// `SecurityLog` collection
#[async_trait]
pub trait SecurityLogStore: Send + Sync {
    async fn append(&self, entry: SecurityLogEntry) -> Result<(), OpsError>;

    /// Rows in append order, starting at position `offset`
    async fn entries_from(&self, offset: usize) -> Result<Vec<SecurityLogEntry>, OpsError>;
}

/// `SecurityAlert` collection
#[async_trait]
pub trait SecurityAlertStore: Send + Sync {
    async fn append(&self, alert: SecurityAlert) -> Result<(), OpsError>;

    async fn list(&self) -> Result<Vec<SecurityAlert>, OpsError>;
}

/// External business-rule store
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Rules applying to `resource` and `action`
    async fn business_rules(&self, resource: &str, action: &str)
        -> Result<Vec<BusinessRule>, OpsError>;
}
