//! JSON-lines store with an in-memory index

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{DeploymentConfigRecord, DeploymentLogEntry, Environment};
use crate::models::security::{BusinessRule, SecurityAlert, SecurityLogEntry};
use crate::store::memory::MemoryStore;
use crate::store::{
    DeploymentConfigStore, DeploymentLogStore, RuleStore, SecurityAlertStore, SecurityLogStore,
};

/// Write-through store: every write hits disk before memory
///
/// Append-only collections are JSON-lines files, deployment configs and
/// business rules are whole-file JSON documents.
pub struct FileStore {
    memory: MemoryStore,
    deployment_log: File,
    configs: File,
    security_log: File,
    alerts: File,
    rules: File,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store under `dir`, loading existing collections
    ///
    /// A torn last line left by a crash mid-append is cut off.
    pub async fn open(dir: &Dir) -> Result<Self, OpsError> {
        dir.create().await?;

        let store = Self {
            memory: MemoryStore::new(),
            deployment_log: dir.file("deployment_log.jsonl"),
            configs: dir.file("deployment_configs.json"),
            security_log: dir.file("security_log.jsonl"),
            alerts: dir.file("security_alerts.jsonl"),
            rules: dir.file("business_rules.json"),
            write_lock: Mutex::new(()),
        };

        store
            .memory
            .load_deployment_log(store.deployment_log.recover_json_lines().await?);
        store
            .memory
            .load_security_log(store.security_log.recover_json_lines().await?);
        store.memory.load_alerts(store.alerts.recover_json_lines().await?);
        if store.configs.exists().await {
            store.memory.load_configs(store.configs.read_json().await?);
        }
        if store.rules.exists().await {
            store.memory.set_rules(store.rules.read_json().await?);
        }

        info!("Store opened at {}", dir.path().display());
        Ok(store)
    }

    /// Replace the business-rule set
    pub async fn set_rules(&self, rules: Vec<BusinessRule>) -> Result<(), OpsError> {
        let _guard = self.write_lock.lock().await;
        self.rules.write_json_atomic(&rules).await?;
        self.memory.set_rules(rules);
        Ok(())
    }

    async fn persist_configs(&self, mut configs: Vec<DeploymentConfigRecord>) -> Result<(), OpsError> {
        configs.sort_by_key(|c| c.environment.as_str());
        self.configs.write_json_atomic(&configs).await
    }

    /// Current configs minus the one for `environment`
    fn configs_without(&self, environment: Environment) -> Vec<DeploymentConfigRecord> {
        self.memory
            .configs()
            .into_iter()
            .filter(|c| c.environment != environment)
            .collect()
    }
}

#[async_trait]
impl DeploymentLogStore for FileStore {
    async fn append(&self, entry: DeploymentLogEntry) -> Result<(), OpsError> {
        let _guard = self.write_lock.lock().await;
        self.deployment_log.append_json_line(&entry).await?;
        DeploymentLogStore::append(&self.memory, entry).await
    }

    async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, OpsError> {
        self.memory.entries(deployment_id).await
    }
}

#[async_trait]
impl DeploymentConfigStore for FileStore {
    async fn get(&self, environment: Environment) -> Result<Option<DeploymentConfigRecord>, OpsError> {
        self.memory.get(environment).await
    }

    async fn upsert(&self, record: DeploymentConfigRecord) -> Result<(), OpsError> {
        let _guard = self.write_lock.lock().await;
        let mut configs = self.configs_without(record.environment);
        configs.push(record.clone());
        self.persist_configs(configs).await?;
        self.memory.upsert(record).await
    }

    async fn remove(&self, environment: Environment) -> Result<(), OpsError> {
        let _guard = self.write_lock.lock().await;
        self.persist_configs(self.configs_without(environment)).await?;
        self.memory.remove(environment).await
    }
}

#[async_trait]
impl SecurityLogStore for FileStore {
    async fn append(&self, entry: SecurityLogEntry) -> Result<(), OpsError> {
        let _guard = self.write_lock.lock().await;
        self.security_log.append_json_line(&entry).await?;
        SecurityLogStore::append(&self.memory, entry).await
    }

    async fn entries_from(&self, offset: usize) -> Result<Vec<SecurityLogEntry>, OpsError> {
        self.memory.entries_from(offset).await
    }
}

#[async_trait]
impl SecurityAlertStore for FileStore {
    async fn append(&self, alert: SecurityAlert) -> Result<(), OpsError> {
        let _guard = self.write_lock.lock().await;
        self.alerts.append_json_line(&alert).await?;
        SecurityAlertStore::append(&self.memory, alert).await
    }

    async fn list(&self) -> Result<Vec<SecurityAlert>, OpsError> {
        self.memory.list().await
    }
}

#[async_trait]
impl RuleStore for FileStore {
    async fn business_rules(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Vec<BusinessRule>, OpsError> {
        self.memory.business_rules(resource, action).await
    }
}
