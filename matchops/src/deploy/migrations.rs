//! Version-tagged migration scripts

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::deploy::backends::{Migration, MigrationLoader};
use crate::deploy::process::{run_command, CommandSpec};
use crate::filesys::dir::Dir;
use crate::models::deployment::Environment;

/// Loads `<root>/<version>/*` as migration units, in file name order
///
/// A release without a directory has no migrations.
pub struct DirMigrationLoader {
    root: Dir,
    interpreter: String,
    timeout: Duration,
}

impl DirMigrationLoader {
    pub fn new(root: Dir, interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root,
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MigrationLoader for DirMigrationLoader {
    async fn load(&self, version: &str) -> Result<Vec<Box<dyn Migration>>, String> {
        let dir = self.root.subdir(version);
        if !dir.exists().await {
            debug!("No migrations directory for {}", version);
            return Ok(Vec::new());
        }

        let files = dir.list_files().await.map_err(|e| e.to_string())?;
        Ok(files
            .into_iter()
            .map(|path| {
                Box::new(ScriptMigration {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    path,
                    interpreter: self.interpreter.clone(),
                    timeout: self.timeout,
                }) as Box<dyn Migration>
            })
            .collect())
    }
}

/// A migration script; receives the target in `DEPLOY_ENVIRONMENT`
pub struct ScriptMigration {
    name: String,
    path: PathBuf,
    interpreter: String,
    timeout: Duration,
}

#[async_trait]
impl Migration for ScriptMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn up(&self, environment: Environment) -> Result<(), String> {
        let command = CommandSpec::new(&self.interpreter, [self.path.display().to_string()])
            .with_env("DEPLOY_ENVIRONMENT", environment.as_str());
        run_command(&command, self.timeout)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
