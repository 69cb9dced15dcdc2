//! Finite State Machine for the release pipeline

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// FSM settings
#[derive(Debug, Clone)]
pub struct FsmSettings {
    /// Upper bound for every stage, including rollback
    pub stage_timeout: Duration,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(600),
        }
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStage {
    /// Preconditions, environment health and dependency audit
    Validation,

    /// Snapshot of database, configuration and files
    Backup,

    /// Ordered migration units for the target version
    Migration,

    /// Configuration, code, services, caches
    Deployment,

    /// Concurrent post-deploy checks
    Verification,

    /// Restoring the Step-2 backup after failed verification
    RollingBack,

    /// Verified and live
    Completed,

    /// Aborted
    Failed,

    /// Verification failed and the backup was restored
    RolledBack,
}

impl DeploymentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStage::Validation => "validation",
            DeploymentStage::Backup => "backup",
            DeploymentStage::Migration => "migration",
            DeploymentStage::Deployment => "deployment",
            DeploymentStage::Verification => "verification",
            DeploymentStage::RollingBack => "rolling_back",
            DeploymentStage::Completed => "completed",
            DeploymentStage::Failed => "failed",
            DeploymentStage::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStage::Completed | DeploymentStage::Failed | DeploymentStage::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Current stage finished successfully
    Advance,

    /// Current stage failed; the pipeline aborts
    StageFailed(String),

    /// Verification found failing checks; rollback begins
    VerificationFailed(String),

    /// Rollback restored a verified state
    RollbackSucceeded,

    /// Rollback itself failed
    RollbackFailed(String),
}

/// Release pipeline FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    stage: DeploymentStage,
    error: Option<String>,
    history: Vec<DeploymentStage>,
}

impl DeploymentFsm {
    /// Create a new FSM at the validation stage
    pub fn new() -> Self {
        Self {
            stage: DeploymentStage::Validation,
            error: None,
            history: vec![DeploymentStage::Validation],
        }
    }

    /// Get current stage
    pub fn stage(&self) -> DeploymentStage {
        self.stage
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every stage entered so far, in order
    pub fn history(&self) -> &[DeploymentStage] {
        &self.history
    }

    /// Process an event and transition stage
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStage, String> {
        use DeploymentStage as S;

        let next = match (self.stage, &event) {
            (S::Validation, DeploymentEvent::Advance) => S::Backup,
            (S::Backup, DeploymentEvent::Advance) => S::Migration,
            (S::Migration, DeploymentEvent::Advance) => S::Deployment,
            (S::Deployment, DeploymentEvent::Advance) => S::Verification,
            (S::Verification, DeploymentEvent::Advance) => S::Completed,

            (S::Validation | S::Backup | S::Migration | S::Deployment | S::Verification,
                DeploymentEvent::StageFailed(err)) => {
                self.error = Some(err.clone());
                S::Failed
            }

            (S::Verification, DeploymentEvent::VerificationFailed(err)) => {
                self.error = Some(err.clone());
                S::RollingBack
            }

            (S::RollingBack, DeploymentEvent::RollbackSucceeded) => S::RolledBack,
            (S::RollingBack, DeploymentEvent::RollbackFailed(err)) => {
                self.error = Some(err.clone());
                S::Failed
            }

            // Invalid transitions
            (stage, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
        };

        self.stage = next;
        self.history.push(next);
        Ok(next)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
