//! Dependency audit backed by an external scanner

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::deploy::backends::DependencyAuditor;
use crate::deploy::process::{run_command, CommandSpec};
use crate::errors::CommandError;

/// Runs the configured audit command; any failure blocks the release
pub struct CommandAuditor {
    command: Option<CommandSpec>,
    timeout: Duration,
}

impl CommandAuditor {
    /// `None` disables the audit
    pub fn new(command: Option<CommandSpec>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl DependencyAuditor for CommandAuditor {
    async fn audit(&self) -> Result<(), String> {
        let Some(command) = &self.command else {
            warn!("Dependency audit disabled, skipping");
            return Ok(());
        };

        match run_command(command, self.timeout).await {
            Ok(_) => {
                info!("Dependency audit passed");
                Ok(())
            }
            Err(CommandError::NonZeroExit { stderr, .. }) => {
                Err(format!("Security vulnerabilities found in dependencies: {}", stderr))
            }
            Err(e @ CommandError::Timeout { .. }) => Err(format!("Dependency audit timed out: {}", e)),
            Err(e) => Err(format!("Dependency audit could not run: {}", e)),
        }
    }
}
