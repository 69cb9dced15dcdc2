//! In-memory store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::OpsError;
use crate::models::deployment::{DeploymentConfigRecord, DeploymentLogEntry, Environment};
use crate::models::security::{BusinessRule, SecurityAlert, SecurityLogEntry};
use crate::store::{
    DeploymentConfigStore, DeploymentLogStore, RuleStore, SecurityAlertStore, SecurityLogStore,
};

#[derive(Default)]
struct Collections {
    deployment_log: Vec<DeploymentLogEntry>,
    configs: HashMap<Environment, DeploymentConfigRecord>,
    security_log: Vec<SecurityLogEntry>,
    alerts: Vec<SecurityAlert>,
    rules: Vec<BusinessRule>,
}

/// Every collection held in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the business-rule set
    pub fn with_rules(rules: Vec<BusinessRule>) -> Self {
        let store = Self::new();
        store.set_rules(rules);
        store
    }

    pub fn set_rules(&self, rules: Vec<BusinessRule>) {
        self.write().rules = rules;
    }

    pub fn rules(&self) -> Vec<BusinessRule> {
        self.read().rules.clone()
    }

    pub fn configs(&self) -> Vec<DeploymentConfigRecord> {
        self.read().configs.values().cloned().collect()
    }

    pub(crate) fn load_deployment_log(&self, rows: Vec<DeploymentLogEntry>) {
        self.write().deployment_log = rows;
    }

    pub(crate) fn load_configs(&self, configs: Vec<DeploymentConfigRecord>) {
        self.write().configs = configs.into_iter().map(|c| (c.environment, c)).collect();
    }

    pub(crate) fn load_security_log(&self, rows: Vec<SecurityLogEntry>) {
        self.write().security_log = rows;
    }

    pub(crate) fn load_alerts(&self, rows: Vec<SecurityAlert>) {
        self.write().alerts = rows;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeploymentLogStore for MemoryStore {
    async fn append(&self, entry: DeploymentLogEntry) -> Result<(), OpsError> {
        self.write().deployment_log.push(entry);
        Ok(())
    }

    async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, OpsError> {
        Ok(self
            .read()
            .deployment_log
            .iter()
            .filter(|e| e.deployment_id == deployment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeploymentConfigStore for MemoryStore {
    async fn get(&self, environment: Environment) -> Result<Option<DeploymentConfigRecord>, OpsError> {
        Ok(self.read().configs.get(&environment).cloned())
    }

    async fn upsert(&self, record: DeploymentConfigRecord) -> Result<(), OpsError> {
        self.write().configs.insert(record.environment, record);
        Ok(())
    }

    async fn remove(&self, environment: Environment) -> Result<(), OpsError> {
        self.write().configs.remove(&environment);
        Ok(())
    }
}

#[async_trait]
impl SecurityLogStore for MemoryStore {
    async fn append(&self, entry: SecurityLogEntry) -> Result<(), OpsError> {
        self.write().security_log.push(entry);
        Ok(())
    }

    async fn entries_from(&self, offset: usize) -> Result<Vec<SecurityLogEntry>, OpsError> {
        Ok(self
            .read()
            .security_log
            .iter()
            .skip(offset)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SecurityAlertStore for MemoryStore {
    async fn append(&self, alert: SecurityAlert) -> Result<(), OpsError> {
        self.write().alerts.push(alert);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SecurityAlert>, OpsError> {
        Ok(self.read().alerts.clone())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn business_rules(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Vec<BusinessRule>, OpsError> {
        Ok(self
            .read()
            .rules
            .iter()
            .filter(|r| r.applies_to(resource, action))
            .cloned()
            .collect())
    }
}
