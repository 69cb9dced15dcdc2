//! Pluggable collaborators of the release pipeline
//!
//! Every method resolves `Ok` or rejects with a human-readable reason.
//! The pipeline never assumes a call succeeded.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::deployment::{BackupDescriptor, DeploymentConfigRecord, Environment};

/// Health of an environment before anything is touched
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_environment(&self, environment: Environment) -> Result<(), String>;
}

/// Known-vulnerability scan of the dependency tree
#[async_trait]
pub trait DependencyAuditor: Send + Sync {
    async fn audit(&self) -> Result<(), String>;
}

/// Snapshot and restore of database, configuration and files
#[async_trait]
pub trait BackupBackend: Send + Sync {
    /// Take a snapshot; `previous_config` is carried in the descriptor
    async fn create(
        &self,
        environment: Environment,
        previous_config: Option<DeploymentConfigRecord>,
    ) -> Result<BackupDescriptor, String>;

    /// Restore database and files from a snapshot
    async fn restore(&self, backup: &BackupDescriptor) -> Result<(), String>;
}

/// A single migration unit
#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    async fn up(&self, environment: Environment) -> Result<(), String>;
}

/// Source of migration units for a release
#[async_trait]
pub trait MigrationLoader: Send + Sync {
    /// Units for `version`, in execution order
    async fn load(&self, version: &str) -> Result<Vec<Box<dyn Migration>>, String>;
}

/// Where releases land
///
/// Every step must be idempotent: rollback re-runs `deploy_code`.
#[async_trait]
pub trait ReleaseTarget: Send + Sync {
    async fn apply_config(
        &self,
        environment: Environment,
        config: &serde_json::Value,
    ) -> Result<(), String>;

    async fn deploy_code(&self, environment: Environment, version: &str) -> Result<(), String>;

    async fn update_services(&self, environment: Environment) -> Result<(), String>;

    async fn clear_caches(&self, environment: Environment) -> Result<(), String>;
}

/// The four post-deploy checks; each returns details on success
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify_services(&self, environment: Environment) -> Result<serde_json::Value, String>;

    async fn verify_database(&self, environment: Environment) -> Result<serde_json::Value, String>;

    async fn verify_api(&self, environment: Environment) -> Result<serde_json::Value, String>;

    async fn verify_performance(
        &self,
        environment: Environment,
    ) -> Result<serde_json::Value, String>;
}

/// Collaborators handed to the deployment service
#[derive(Clone)]
pub struct Backends {
    pub health: Arc<dyn HealthChecker>,
    pub auditor: Arc<dyn DependencyAuditor>,
    pub backup: Arc<dyn BackupBackend>,
    pub migrations: Arc<dyn MigrationLoader>,
    pub release: Arc<dyn ReleaseTarget>,
    pub verifier: Arc<dyn Verifier>,
}
