//! Release steps driven by configured commands

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deploy::backends::ReleaseTarget;
use crate::deploy::process::{run_command, CommandSpec};
use crate::models::deployment::Environment;

/// Commands for each release step; an unset step is a no-op
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseCommands {
    pub apply_config: Option<CommandSpec>,
    pub deploy_code: Option<CommandSpec>,
    pub update_services: Option<CommandSpec>,
    pub clear_caches: Option<CommandSpec>,
}

/// Runs one configured command per release step
///
/// Every command receives `DEPLOY_ENVIRONMENT`; `deploy_code` also gets
/// `DEPLOY_VERSION`, `apply_config` gets `DEPLOY_CONFIG` as JSON.
pub struct CommandReleaseTarget {
    commands: ReleaseCommands,
    timeout: Duration,
}

impl CommandReleaseTarget {
    pub fn new(commands: ReleaseCommands, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    async fn run_step(
        &self,
        step: &str,
        command: Option<&CommandSpec>,
        environment: Environment,
        extra_env: &[(&str, String)],
    ) -> Result<(), String> {
        let Some(command) = command else {
            debug!("No command configured for {}, skipping", step);
            return Ok(());
        };

        let mut command = command.clone().with_env("DEPLOY_ENVIRONMENT", environment.as_str());
        for (key, value) in extra_env {
            command = command.with_env(*key, value.clone());
        }

        run_command(&command, self.timeout)
            .await
            .map_err(|e| format!("{} failed: {}", step, e))?;
        info!("{} finished for {}", step, environment);
        Ok(())
    }
}

#[async_trait]
impl ReleaseTarget for CommandReleaseTarget {
    async fn apply_config(
        &self,
        environment: Environment,
        config: &serde_json::Value,
    ) -> Result<(), String> {
        self.run_step(
            "apply_config",
            self.commands.apply_config.as_ref(),
            environment,
            &[("DEPLOY_CONFIG", config.to_string())],
        )
        .await
    }

    async fn deploy_code(&self, environment: Environment, version: &str) -> Result<(), String> {
        self.run_step(
            "deploy_code",
            self.commands.deploy_code.as_ref(),
            environment,
            &[("DEPLOY_VERSION", version.to_string())],
        )
        .await
    }

    async fn update_services(&self, environment: Environment) -> Result<(), String> {
        self.run_step(
            "update_services",
            self.commands.update_services.as_ref(),
            environment,
            &[],
        )
        .await
    }

    async fn clear_caches(&self, environment: Environment) -> Result<(), String> {
        self.run_step("clear_caches", self.commands.clear_caches.as_ref(), environment, &[])
            .await
    }
}
