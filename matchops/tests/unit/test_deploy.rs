//! Release pipeline tests against scripted collaborators

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use matchops::deploy::backends::{
    Backends, BackupBackend, DependencyAuditor, HealthChecker, Migration, MigrationLoader,
    ReleaseTarget, Verifier,
};
use matchops::deploy::executor::DeploymentService;
use matchops::deploy::fsm::{DeploymentStage, FsmSettings};
use matchops::errors::{DeployError, OpsError};
use matchops::models::deployment::{
    BackupDescriptor, DeploymentConfigRecord, DeploymentLogEntry, DeploymentOptions,
    DeploymentStatus, Environment, LogStatus,
};
use matchops::store::{DeploymentConfigStore, DeploymentLogStore, MemoryStore};

// ================================= FAKES ===================================== //

/// What the fake collaborators do
#[derive(Default)]
struct Script {
    unhealthy: Option<String>,
    backup_failure: Option<String>,
    restore_failure: Option<String>,

    /// Migration names and whether each succeeds
    migrations: Vec<(&'static str, bool)>,

    /// Verification checks that fail
    failing_checks: Vec<&'static str>,

    /// Failing checks pass again once a backup was restored
    recover_after_restore: bool,

    deploy_delay: Option<Duration>,
}

struct Fake {
    script: Script,
    calls: Arc<Mutex<Vec<String>>>,
    created: Mutex<Vec<BackupDescriptor>>,
    restored: Mutex<Vec<BackupDescriptor>>,
}

impl Fake {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Arc::new(Mutex::new(Vec::new())),
            created: Mutex::new(Vec::new()),
            restored: Mutex::new(Vec::new()),
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    fn check(&self, name: &str) -> Result<Value, String> {
        let restored = !self.restored.lock().unwrap().is_empty();
        if self.script.failing_checks.iter().any(|c| *c == name)
            && !(self.script.recover_after_restore && restored)
        {
            Err(format!("{} unhealthy", name))
        } else {
            Ok(json!({ "check": name }))
        }
    }
}

#[async_trait]
impl HealthChecker for Fake {
    async fn check_environment(&self, environment: Environment) -> Result<(), String> {
        self.record(format!("health:{}", environment));
        match &self.script.unhealthy {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DependencyAuditor for Fake {
    async fn audit(&self) -> Result<(), String> {
        self.record("audit");
        Ok(())
    }
}

#[async_trait]
impl BackupBackend for Fake {
    async fn create(
        &self,
        environment: Environment,
        previous_config: Option<DeploymentConfigRecord>,
    ) -> Result<BackupDescriptor, String> {
        self.record("backup");
        if let Some(reason) = &self.script.backup_failure {
            return Err(reason.clone());
        }
        let timestamp = Utc::now();
        let backup = BackupDescriptor {
            id: BackupDescriptor::make_id(environment, timestamp),
            environment,
            timestamp,
            location: "/tmp/backups/fake".to_string(),
            previous_config,
        };
        self.created.lock().unwrap().push(backup.clone());
        Ok(backup)
    }

    async fn restore(&self, backup: &BackupDescriptor) -> Result<(), String> {
        self.record("restore");
        if let Some(reason) = &self.script.restore_failure {
            return Err(reason.clone());
        }
        self.restored.lock().unwrap().push(backup.clone());
        Ok(())
    }
}

struct FakeMigration {
    name: String,
    succeeds: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Migration for FakeMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self, _environment: Environment) -> Result<(), String> {
        self.calls.lock().unwrap().push(format!("migrate:{}", self.name));
        if self.succeeds {
            Ok(())
        } else {
            Err("relation already exists".to_string())
        }
    }
}

#[async_trait]
impl MigrationLoader for Fake {
    async fn load(&self, _version: &str) -> Result<Vec<Box<dyn Migration>>, String> {
        Ok(self
            .script
            .migrations
            .iter()
            .map(|(name, succeeds)| {
                Box::new(FakeMigration {
                    name: name.to_string(),
                    succeeds: *succeeds,
                    calls: self.calls.clone(),
                }) as Box<dyn Migration>
            })
            .collect())
    }
}

#[async_trait]
impl ReleaseTarget for Fake {
    async fn apply_config(&self, _environment: Environment, config: &Value) -> Result<(), String> {
        self.record(format!("apply_config:{}", config));
        Ok(())
    }

    async fn deploy_code(&self, _environment: Environment, version: &str) -> Result<(), String> {
        self.record(format!("deploy_code:{}", version));
        if let Some(delay) = self.script.deploy_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn update_services(&self, _environment: Environment) -> Result<(), String> {
        self.record("update_services");
        Ok(())
    }

    async fn clear_caches(&self, _environment: Environment) -> Result<(), String> {
        self.record("clear_caches");
        Ok(())
    }
}

#[async_trait]
impl Verifier for Fake {
    async fn verify_services(&self, _environment: Environment) -> Result<Value, String> {
        self.check("services")
    }

    async fn verify_database(&self, _environment: Environment) -> Result<Value, String> {
        self.check("database")
    }

    async fn verify_api(&self, _environment: Environment) -> Result<Value, String> {
        self.check("api")
    }

    async fn verify_performance(&self, _environment: Environment) -> Result<Value, String> {
        self.check("performance")
    }
}

/// Keeps every log row so failed deployments can be inspected
#[derive(Default)]
struct RecordingLog {
    rows: Mutex<Vec<DeploymentLogEntry>>,

    /// Rows with this status fail to append
    refused: Option<LogStatus>,
}

impl RecordingLog {
    fn rows(&self) -> Vec<DeploymentLogEntry> {
        self.rows.lock().unwrap().clone()
    }

    /// Rows of the only deployment logged so far
    fn single_deployment(&self) -> Vec<DeploymentLogEntry> {
        let rows = self.rows();
        let id = rows[0].deployment_id.clone();
        assert!(rows.iter().all(|r| r.deployment_id == id));
        rows
    }
}

#[async_trait]
impl DeploymentLogStore for RecordingLog {
    async fn append(&self, entry: DeploymentLogEntry) -> Result<(), OpsError> {
        if self.refused == Some(entry.status) {
            return Err(OpsError::StorageError("log volume is read-only".to_string()));
        }
        self.rows.lock().unwrap().push(entry);
        Ok(())
    }

    async fn entries(&self, deployment_id: &str) -> Result<Vec<DeploymentLogEntry>, OpsError> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| r.deployment_id == deployment_id)
            .collect())
    }
}

struct Harness {
    fake: Arc<Fake>,
    log: Arc<RecordingLog>,
    configs: Arc<MemoryStore>,
    service: Arc<DeploymentService>,
}

fn harness_with(script: Script, settings: FsmSettings) -> Harness {
    harness_logging_to(script, settings, RecordingLog::default())
}

fn harness_logging_to(script: Script, settings: FsmSettings, log: RecordingLog) -> Harness {
    let fake = Fake::new(script);
    let log = Arc::new(log);
    let configs = Arc::new(MemoryStore::new());
    let backends = Backends {
        health: fake.clone(),
        auditor: fake.clone(),
        backup: fake.clone(),
        migrations: fake.clone(),
        release: fake.clone(),
        verifier: fake.clone(),
    };
    let service = Arc::new(DeploymentService::new(
        backends,
        log.clone(),
        configs.clone(),
        settings,
    ));
    Harness {
        fake,
        log,
        configs,
        service,
    }
}

fn harness(script: Script) -> Harness {
    harness_with(script, FsmSettings::default())
}

fn options(environment: &str, version: &str) -> DeploymentOptions {
    DeploymentOptions {
        environment: environment.to_string(),
        version: version.to_string(),
        rollback_version: None,
        config: Some(json!({ "feature_flags": { "bidding_v2": true } })),
    }
}

fn assert_started_and_single_terminal(rows: &[DeploymentLogEntry], terminal: LogStatus) {
    assert_eq!(rows.first().map(|r| r.status), Some(LogStatus::Started));
    assert_eq!(rows.last().map(|r| r.status), Some(terminal));
    let terminals = rows
        .iter()
        .filter(|r| matches!(r.status, LogStatus::Completed | LogStatus::Failed))
        .count();
    assert_eq!(terminals, 1);
    assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

// ================================= TESTS ===================================== //

#[tokio::test]
async fn test_successful_deploy() {
    let h = harness(Script {
        migrations: vec![("001_add_bids", true), ("002_index_bids", true)],
        ..Default::default()
    });

    let outcome = assert_ok!(h.service.deploy(options("staging", "1.4.0")).await);
    assert!(outcome.success);
    assert_eq!(outcome.environment, Environment::Staging);
    assert!(outcome.verification.success);
    assert_eq!(outcome.verification.checks.len(), 4);

    let rows = h.log.single_deployment();
    assert_started_and_single_terminal(&rows, LogStatus::Completed);
    assert!(rows
        .iter()
        .any(|r| r.details.get("migration") == Some(&json!("002_index_bids"))));

    let calls = h.fake.calls();
    let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
    assert!(position("backup") < position("migrate:001_add_bids"));
    assert!(position("migrate:002_index_bids") < position("deploy_code:1.4.0"));
    assert!(position("deploy_code:1.4.0") < position("update_services"));
    assert!(!h.fake.called("restore"));

    let config = h.configs.get(Environment::Staging).await.unwrap().unwrap();
    assert_eq!(config.version, "1.4.0");

    let view = h
        .service
        .status(&outcome.deployment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, DeploymentStatus::Completed);
    assert_eq!(view.entries, rows);
}

#[tokio::test]
async fn test_invalid_input_fails_validation_without_side_effects() {
    for (environment, version) in [("staging", "1.2"), ("qa", "1.2.3"), ("production", "v1.2.3")] {
        let h = harness(Script::default());

        let err = assert_err!(h.service.deploy(options(environment, version)).await);
        assert!(matches!(err, DeployError::ValidationFailed(_)), "{:?}", err);

        assert!(!h.fake.called("backup"));
        assert!(h.fake.calls().is_empty());
        assert_started_and_single_terminal(&h.log.single_deployment(), LogStatus::Failed);
    }
}

#[tokio::test]
async fn test_unhealthy_environment_fails_validation() {
    let h = harness(Script {
        unhealthy: Some("health endpoint returned 503".to_string()),
        ..Default::default()
    });

    let err = assert_err!(h.service.deploy(options("production", "2.0.0")).await);
    assert_eq!(
        err,
        DeployError::ValidationFailed("health endpoint returned 503".to_string())
    );
    assert!(!h.fake.called("backup"));
}

#[tokio::test]
async fn test_backup_failure_stops_before_migrations() {
    let h = harness(Script {
        backup_failure: Some("disk full".to_string()),
        migrations: vec![("001_add_bids", true)],
        ..Default::default()
    });

    let err = assert_err!(h.service.deploy(options("staging", "1.4.0")).await);
    assert!(matches!(
        err,
        DeployError::StageFailed {
            stage: DeploymentStage::Backup,
            ..
        }
    ));
    assert!(!h.fake.called("migrate:001_add_bids"));
}

#[tokio::test]
async fn test_verification_failure_rolls_back_with_created_backup() {
    let h = harness(Script {
        failing_checks: vec!["api", "database"],
        recover_after_restore: true,
        ..Default::default()
    });
    h.configs
        .upsert(DeploymentConfigRecord {
            environment: Environment::Staging,
            version: "1.3.9".to_string(),
            config: json!({ "feature_flags": {} }),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let err = assert_err!(h.service.deploy(options("staging", "1.4.0")).await);
    let DeployError::StageFailed { stage, detail } = &err else {
        panic!("unexpected error: {:?}", err);
    };
    assert_eq!(*stage, DeploymentStage::Verification);
    assert!(detail.contains("api: api unhealthy"), "{}", detail);
    assert!(detail.contains("database: database unhealthy"), "{}", detail);
    assert!(!detail.contains("services:"));

    // The descriptor restored is the one created in the backup step
    let created = h.fake.created.lock().unwrap().clone();
    let restored = h.fake.restored.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(restored, created);

    // Previous version and configuration are back
    assert!(h.fake.called("deploy_code:1.3.9"));
    let config = h.configs.get(Environment::Staging).await.unwrap().unwrap();
    assert_eq!(config.version, "1.3.9");

    let rows = h.log.single_deployment();
    assert_started_and_single_terminal(&rows, LogStatus::Failed);
    assert!(rows.iter().any(|r| r.status == LogStatus::RolledBack));

    let view = h
        .service
        .status(&rows[0].deployment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, DeploymentStatus::RolledBack);
}

#[tokio::test]
async fn test_explicit_rollback_version_wins() {
    let h = harness(Script {
        failing_checks: vec!["performance"],
        recover_after_restore: true,
        ..Default::default()
    });

    let mut opts = options("development", "0.9.0");
    opts.rollback_version = Some("0.8.7".to_string());
    assert_err!(h.service.deploy(opts).await);

    assert!(h.fake.called("deploy_code:0.8.7"));
    // A first release leaves no stored configuration behind
    assert!(h
        .configs
        .get(Environment::Development)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let h = harness(Script {
        failing_checks: vec!["services"],
        restore_failure: Some("dump file missing".to_string()),
        ..Default::default()
    });

    let err = assert_err!(h.service.deploy(options("production", "3.1.0")).await);
    let DeployError::RollbackFailed { cause, detail } = &err else {
        panic!("unexpected error: {:?}", err);
    };
    assert!(cause.contains("services: services unhealthy"));
    assert!(detail.contains("dump file missing"));

    let rows = h.log.single_deployment();
    assert_started_and_single_terminal(&rows, LogStatus::Failed);
    assert_eq!(rows.last().unwrap().details["rollback_failed"], json!(true));
    assert!(!rows.iter().any(|r| r.status == LogStatus::RolledBack));

    let view = h
        .service
        .status(&rows[0].deployment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_rollback_that_fails_verification_is_a_rollback_failure() {
    let h = harness(Script {
        failing_checks: vec!["api"],
        recover_after_restore: false,
        ..Default::default()
    });

    let mut opts = options("staging", "1.4.0");
    opts.rollback_version = Some("1.3.9".to_string());
    let err = assert_err!(h.service.deploy(opts).await);
    assert!(matches!(err, DeployError::RollbackFailed { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_failed_migration_stops_and_is_not_reverted() {
    let h = harness(Script {
        migrations: vec![
            ("001_add_bids", true),
            ("002_broken", false),
            ("003_never_runs", true),
        ],
        ..Default::default()
    });

    let err = assert_err!(h.service.deploy(options("staging", "1.4.0")).await);
    let DeployError::StageFailed { stage, detail } = &err else {
        panic!("unexpected error: {:?}", err);
    };
    assert_eq!(*stage, DeploymentStage::Migration);
    assert!(detail.contains("002_broken"));

    assert!(h.fake.called("migrate:001_add_bids"));
    assert!(!h.fake.called("migrate:003_never_runs"));
    assert!(!h.fake.called("deploy_code:1.4.0"));

    // Migrations already applied stay applied; nothing is restored
    assert!(!h.fake.called("restore"));

    let rows = h.log.single_deployment();
    assert_started_and_single_terminal(&rows, LogStatus::Failed);
    assert!(rows
        .iter()
        .any(|r| r.details.get("migration") == Some(&json!("001_add_bids"))));
}

#[tokio::test]
async fn test_concurrent_deploys_to_one_environment() {
    let h = harness(Script {
        deploy_delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });

    let (first, second) = tokio::join!(
        h.service.deploy(options("staging", "1.4.0")),
        h.service.deploy(options("staging", "1.4.1")),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(DeployError::InProgress(Environment::Staging)))));

    // The lock is released once the winner finishes
    assert_ok!(h.service.deploy(options("staging", "1.4.2")).await);
}

#[tokio::test]
async fn test_stage_timeout() {
    let h = harness_with(
        Script {
            deploy_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        },
        FsmSettings {
            stage_timeout: Duration::from_millis(50),
        },
    );

    let err = assert_err!(h.service.deploy(options("staging", "1.4.0")).await);
    let DeployError::StageFailed { stage, detail } = &err else {
        panic!("unexpected error: {:?}", err);
    };
    assert_eq!(*stage, DeploymentStage::Deployment);
    assert!(detail.contains("timed out"));
}

#[tokio::test]
async fn test_unknown_deployment_has_no_status() {
    let h = harness(Script::default());
    assert!(h.service.status("no-such-id").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unlogged_completion_still_reports_success() {
    let h = harness_logging_to(
        Script::default(),
        FsmSettings::default(),
        RecordingLog {
            refused: Some(LogStatus::Completed),
            ..Default::default()
        },
    );

    let outcome = assert_ok!(h.service.deploy(options("staging", "1.5.0")).await);
    assert!(outcome.success);

    let rows = h.log.single_deployment();
    assert_eq!(rows.first().map(|r| r.status), Some(LogStatus::Started));
    assert!(!rows
        .iter()
        .any(|r| matches!(r.status, LogStatus::Completed | LogStatus::Failed)));

    let config = h.configs.get(Environment::Staging).await.unwrap().unwrap();
    assert_eq!(config.version, "1.5.0");
}
