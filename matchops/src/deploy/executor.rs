//! Release pipeline executor

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::deploy::backends::Backends;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStage, FsmSettings};
use crate::deploy::version::is_valid_version;
use crate::errors::DeployError;
use crate::models::deployment::{
    BackupDescriptor, CheckReport, DeploymentConfigRecord, DeploymentLogEntry, DeploymentOptions,
    DeploymentOutcome, DeploymentRecord, DeploymentStatus, Environment, LogStatus,
    VerificationReport,
};
use crate::store::{DeploymentConfigStore, DeploymentLogStore};
use crate::utils::generate_uuid;

/// Audit view of one deployment
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatusView {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub entries: Vec<DeploymentLogEntry>,
}

/// Drives the validate -> backup -> migrate -> deploy -> verify pipeline
pub struct DeploymentService {
    backends: Backends,
    log_store: Arc<dyn DeploymentLogStore>,
    config_store: Arc<dyn DeploymentConfigStore>,
    settings: FsmSettings,
    active: Mutex<HashSet<Environment>>,
}

impl DeploymentService {
    /// Create a new deployment service
    pub fn new(
        backends: Backends,
        log_store: Arc<dyn DeploymentLogStore>,
        config_store: Arc<dyn DeploymentConfigStore>,
        settings: FsmSettings,
    ) -> Self {
        Self {
            backends,
            log_store,
            config_store,
            settings,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Run a release end to end
    ///
    /// The log for the returned (or failed) deployment always starts with a
    /// `started` row and ends with exactly one `completed` or `failed` row.
    pub async fn deploy(&self, options: DeploymentOptions) -> Result<DeploymentOutcome, DeployError> {
        let record = DeploymentRecord {
            id: generate_uuid(),
            environment: options.environment.clone(),
            version: options.version.clone(),
            rollback_version: options.rollback_version.clone(),
        };
        info!(
            "Deployment {} started: {} to {}",
            record.id, record.version, record.environment
        );

        let mut run = DeploymentRun::new(record, self.log_store.clone());
        run.log(
            LogStatus::Started,
            None,
            json!({
                "environment": options.environment,
                "version": options.version,
                "rollback_version": options.rollback_version,
            }),
        )
        .await?;

        let result = self.execute(&mut run, &options).await;

        match &result {
            Ok(outcome) => {
                let details = json!({ "verification": outcome.verification });
                if let Err(log_err) = run
                    .log(LogStatus::Completed, Some(DeploymentStage::Completed), details)
                    .await
                {
                    // The release is live; report it even if the audit row is missing
                    error!(
                        "Deployment {} completed but its completion could not be logged: {}",
                        run.record.id, log_err
                    );
                }
                info!("Deployment {} completed", run.record.id);
            }
            Err(e) => {
                let details = json!({
                    "error": e.to_string(),
                    "rollback_failed": matches!(e, DeployError::RollbackFailed { .. }),
                });
                let stage = run.failed_stage;
                if let Err(log_err) = run.log(LogStatus::Failed, stage, details).await {
                    // Keep the pipeline error; the audit failure is secondary
                    error!(
                        "Deployment {} failed and its failure could not be logged: {}",
                        run.record.id, log_err
                    );
                }
                error!("Deployment {} failed: {}", run.record.id, e);
            }
        }

        result
    }

    /// Derived status and log rows of a deployment
    pub async fn status(&self, deployment_id: &str) -> Result<Option<DeploymentStatusView>, DeployError> {
        let entries = self
            .log_store
            .entries(deployment_id)
            .await
            .map_err(|e| DeployError::LogStore(e.to_string()))?;

        Ok(DeploymentStatus::derive(&entries).map(|status| DeploymentStatusView {
            deployment_id: deployment_id.to_string(),
            status,
            entries,
        }))
    }

    async fn execute(
        &self,
        run: &mut DeploymentRun,
        options: &DeploymentOptions,
    ) -> Result<DeploymentOutcome, DeployError> {
        // Step 1: validation
        let environment = match check_preconditions(options) {
            Ok(environment) => environment,
            Err(reason) => return Err(run.fail_validation(reason)),
        };
        let _lock = match EnvironmentLock::acquire(&self.active, environment) {
            Some(lock) => lock,
            None => {
                run.fail(DeploymentStage::Validation, "environment locked".to_string());
                return Err(DeployError::InProgress(environment));
            }
        };
        if let Err(reason) = self.validate_environment(environment).await {
            return Err(run.fail_validation(reason));
        }
        run.advance(json!({ "environment": environment })).await?;

        // Step 2: backup
        let previous_config = match self.config_store.get(environment).await {
            Ok(config) => config,
            Err(e) => return Err(run.fail(DeploymentStage::Backup, e.to_string())),
        };
        let backup = match self
            .bounded(self.backends.backup.create(environment, previous_config))
            .await
        {
            Ok(backup) => backup,
            Err(reason) => return Err(run.fail(DeploymentStage::Backup, reason)),
        };
        run.advance(json!({ "backup_id": backup.id, "location": backup.location }))
            .await?;

        // Step 3: migrations
        let applied = match self.run_migrations(run, environment, &options.version).await {
            Ok(applied) => applied,
            Err(reason) => return Err(run.fail(DeploymentStage::Migration, reason)),
        };
        run.advance(json!({ "migrations": applied })).await?;

        // Step 4: release
        if let Err(reason) = self.bounded(self.release(environment, options)).await {
            return Err(run.fail(DeploymentStage::Deployment, reason));
        }
        run.advance(json!({ "version": options.version })).await?;

        // Step 5: verification
        let verification = self.verify(environment).await;
        if verification.success {
            run.advance(json!({ "verification": verification })).await?;
            return Ok(DeploymentOutcome {
                success: true,
                deployment_id: run.record.id.clone(),
                environment,
                version: options.version.clone(),
                verification,
            });
        }

        let cause = format!(
            "Deployment verification failed: {}",
            verification.failure_summary()
        );
        warn!("Deployment {}: {}, rolling back", run.record.id, cause);
        run.fsm
            .process(DeploymentEvent::VerificationFailed(cause.clone()))
            .map_err(|e| DeployError::StageFailed {
                stage: DeploymentStage::Verification,
                detail: e,
            })?;
        run.log(
            LogStatus::InProgress,
            Some(DeploymentStage::Verification),
            json!({ "verification": verification, "rollback": "started", "backup_id": backup.id }),
        )
        .await?;

        match self.bounded(self.rollback(environment, &backup, options)).await {
            Ok(report) => {
                run.settle(DeploymentEvent::RollbackSucceeded);
                run.log(
                    LogStatus::RolledBack,
                    Some(DeploymentStage::RolledBack),
                    json!({ "backup_id": backup.id, "verification": report }),
                )
                .await?;
                run.failed_stage = Some(DeploymentStage::Verification);
                Err(DeployError::StageFailed {
                    stage: DeploymentStage::Verification,
                    detail: cause,
                })
            }
            Err(detail) => {
                error!("Rollback of deployment {} failed: {}", run.record.id, detail);
                run.settle(DeploymentEvent::RollbackFailed(detail.clone()));
                run.failed_stage = Some(DeploymentStage::RollingBack);
                Err(DeployError::RollbackFailed { cause, detail })
            }
        }
    }

    async fn validate_environment(&self, environment: Environment) -> Result<(), String> {
        self.bounded(self.backends.health.check_environment(environment))
            .await?;
        self.bounded(self.backends.auditor.audit()).await
    }

    async fn run_migrations(
        &self,
        run: &mut DeploymentRun,
        environment: Environment,
        version: &str,
    ) -> Result<Vec<String>, String> {
        let migrations = self.bounded(self.backends.migrations.load(version)).await?;
        let mut applied = Vec::with_capacity(migrations.len());

        for migration in migrations {
            let name = migration.name().to_string();
            match self.bounded(migration.up(environment)).await {
                Ok(()) => {
                    info!("Migration {} completed", name);
                    run.log(
                        LogStatus::InProgress,
                        Some(DeploymentStage::Migration),
                        json!({ "migration": name, "status": "completed" }),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                    applied.push(name);
                }
                Err(e) => {
                    error!("Migration {} failed: {}", name, e);
                    return Err(format!("Migration {} failed: {}", name, e));
                }
            }
        }

        Ok(applied)
    }

    async fn release(&self, environment: Environment, options: &DeploymentOptions) -> Result<(), String> {
        let config = options.config.clone().unwrap_or_else(|| json!({}));

        self.config_store
            .upsert(DeploymentConfigRecord {
                environment,
                version: options.version.clone(),
                config: config.clone(),
                updated_at: Utc::now(),
            })
            .await
            .map_err(|e| format!("Failed to store deployment config: {}", e))?;

        let release = &self.backends.release;
        release.apply_config(environment, &config).await?;
        release.deploy_code(environment, &options.version).await?;
        release.update_services(environment).await?;
        release.clear_caches(environment).await
    }

    /// Run the four checks concurrently; all must pass
    pub async fn verify(&self, environment: Environment) -> VerificationReport {
        let verifier = &self.backends.verifier;
        let checks = self
            .bounded(async {
                let (services, database, api, performance) = tokio::join!(
                    verifier.verify_services(environment),
                    verifier.verify_database(environment),
                    verifier.verify_api(environment),
                    verifier.verify_performance(environment),
                );
                Ok(vec![
                    check_report("services", services),
                    check_report("database", database),
                    check_report("api", api),
                    check_report("performance", performance),
                ])
            })
            .await;

        match checks {
            Ok(checks) => VerificationReport::from_checks(checks),
            Err(reason) => VerificationReport::from_checks(vec![CheckReport {
                name: "verification".to_string(),
                success: false,
                details: None,
                error: Some(reason),
            }]),
        }
    }

    async fn rollback(
        &self,
        environment: Environment,
        backup: &BackupDescriptor,
        options: &DeploymentOptions,
    ) -> Result<VerificationReport, String> {
        info!("Rolling back {} using backup {}", environment, backup.id);

        self.backends.backup.restore(backup).await?;

        let version = options
            .rollback_version
            .clone()
            .or_else(|| backup.previous_config.as_ref().map(|c| c.version.clone()))
            .ok_or_else(|| "No rollback version available".to_string())?;

        match &backup.previous_config {
            Some(previous) => {
                self.config_store
                    .upsert(previous.clone())
                    .await
                    .map_err(|e| format!("Failed to restore deployment config: {}", e))?;
                self.backends
                    .release
                    .apply_config(environment, &previous.config)
                    .await?;
            }
            None => {
                self.config_store
                    .remove(environment)
                    .await
                    .map_err(|e| format!("Failed to restore deployment config: {}", e))?;
            }
        }

        let release = &self.backends.release;
        release.deploy_code(environment, &version).await?;
        release.update_services(environment).await?;
        release.clear_caches(environment).await?;

        let report = self.verify(environment).await;
        if !report.success {
            return Err(format!(
                "Rolled-back version {} failed verification: {}",
                version,
                report.failure_summary()
            ));
        }

        info!("Rollback of {} to {} verified", environment, version);
        Ok(report)
    }

    /// Bound a stage call by the stage timeout
    async fn bounded<T, F>(&self, fut: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, String>>,
    {
        match tokio::time::timeout(self.settings.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {:?}", self.settings.stage_timeout)),
        }
    }
}

fn check_preconditions(options: &DeploymentOptions) -> Result<Environment, String> {
    let environment: Environment = options.environment.parse()?;
    if !is_valid_version(&options.version) {
        return Err(format!("Invalid version format: {}", options.version));
    }
    if let Some(rollback) = &options.rollback_version {
        if !is_valid_version(rollback) {
            return Err(format!("Invalid rollback version format: {}", rollback));
        }
    }
    Ok(environment)
}

fn check_report(name: &str, result: Result<serde_json::Value, String>) -> CheckReport {
    match result {
        Ok(details) => CheckReport {
            name: name.to_string(),
            success: true,
            details: Some(details),
            error: None,
        },
        Err(error) => CheckReport {
            name: name.to_string(),
            success: false,
            details: None,
            error: Some(error),
        },
    }
}

/// Per-call pipeline state and its audit trail
struct DeploymentRun {
    record: DeploymentRecord,
    fsm: DeploymentFsm,
    log_store: Arc<dyn DeploymentLogStore>,
    last_timestamp: Option<DateTime<Utc>>,
    failed_stage: Option<DeploymentStage>,
}

impl DeploymentRun {
    fn new(record: DeploymentRecord, log_store: Arc<dyn DeploymentLogStore>) -> Self {
        Self {
            record,
            fsm: DeploymentFsm::new(),
            log_store,
            last_timestamp: None,
            failed_stage: None,
        }
    }

    /// Strictly increasing per deployment, even within one clock tick
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    async fn log(
        &mut self,
        status: LogStatus,
        stage: Option<DeploymentStage>,
        details: serde_json::Value,
    ) -> Result<(), DeployError> {
        let entry = DeploymentLogEntry {
            deployment_id: self.record.id.clone(),
            status,
            stage: stage.map(|s| s.as_str().to_string()),
            timestamp: self.next_timestamp(),
            details,
        };
        debug!("Deployment {} log: {:?} {:?}", self.record.id, status, stage);
        self.log_store
            .append(entry)
            .await
            .map_err(|e| DeployError::LogStore(e.to_string()))
    }

    /// Record the finished stage and move to the next one
    async fn advance(&mut self, details: serde_json::Value) -> Result<(), DeployError> {
        let stage = self.fsm.stage();
        self.log(LogStatus::InProgress, Some(stage), details).await?;
        self.fsm
            .process(DeploymentEvent::Advance)
            .map_err(|e| DeployError::StageFailed { stage, detail: e })?;
        Ok(())
    }

    /// Apply a terminal event; the error being reported takes precedence
    fn settle(&mut self, event: DeploymentEvent) {
        if let Err(e) = self.fsm.process(event) {
            debug!("Deployment {}: {}", self.record.id, e);
        }
    }

    fn fail(&mut self, stage: DeploymentStage, reason: String) -> DeployError {
        self.settle(DeploymentEvent::StageFailed(reason.clone()));
        self.failed_stage = Some(stage);
        DeployError::StageFailed {
            stage,
            detail: reason,
        }
    }

    fn fail_validation(&mut self, reason: String) -> DeployError {
        self.settle(DeploymentEvent::StageFailed(reason.clone()));
        self.failed_stage = Some(DeploymentStage::Validation);
        DeployError::ValidationFailed(reason)
    }
}

/// Advisory per-environment lock, released on drop
struct EnvironmentLock<'a> {
    active: &'a Mutex<HashSet<Environment>>,
    environment: Environment,
}

impl<'a> EnvironmentLock<'a> {
    fn acquire(active: &'a Mutex<HashSet<Environment>>, environment: Environment) -> Option<Self> {
        let mut guard = active.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.insert(environment) {
            return None;
        }
        Some(Self {
            active,
            environment,
        })
    }
}

impl Drop for EnvironmentLock<'_> {
    fn drop(&mut self) {
        let mut guard = self.active.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.environment);
    }
}
