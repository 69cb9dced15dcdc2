//! Timeout-bound child processes

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::errors::CommandError;

/// A command to run, as configured in the settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_dir: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `spec` to completion, killing the child if `timeout` elapses
pub async fn run_command(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, CommandError> {
    debug!("Running command: {} {:?}", spec.program, spec.args);

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|e| CommandError::Spawn {
        program: spec.program.clone(),
        reason: e.to_string(),
    })?;

    // Dropping the future on timeout drops the child, which kills it
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| CommandError::Spawn {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            return Err(CommandError::Timeout {
                program: spec.program.clone(),
                timeout,
            })
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(CommandError::NonZeroExit {
            program: spec.program.clone(),
            code: output.status.code(),
            stderr,
        });
    }

    Ok(CommandOutput {
        stdout: output.stdout,
        stderr,
    })
}
