//! Filesystem-backed snapshots used for rollback

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deploy::backends::BackupBackend;
use crate::deploy::process::{run_command, CommandSpec};
use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{BackupDescriptor, DeploymentConfigRecord, Environment};
use crate::utils::sha256_hash;

const MANIFEST_FILE: &str = "manifest.json";
const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "database.dump";
const FILES_DIR: &str = "files";

/// Contents of a snapshot directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub id: String,
    pub environment: Environment,
    pub timestamp: DateTime<Utc>,

    /// Name of the database dump, if one was taken
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub files: Vec<ManifestEntry>,
}

/// One application file captured in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the application directory
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// Snapshot settings
#[derive(Debug, Clone)]
pub struct FsBackupOptions {
    /// Where snapshots are written, one subdirectory per backup
    pub backups_dir: Dir,

    /// Application files to capture
    pub app_dir: Option<Dir>,

    /// Writes a database dump to stdout
    pub dump_command: Option<CommandSpec>,

    /// Receives the dump path as its last argument
    pub restore_command: Option<CommandSpec>,

    pub command_timeout: Duration,
}

/// Snapshots database, configuration and files into a backup directory
pub struct FsBackupBackend {
    options: FsBackupOptions,
}

impl FsBackupBackend {
    pub fn new(options: FsBackupOptions) -> Self {
        Self { options }
    }

    async fn snapshot(
        &self,
        environment: Environment,
        previous_config: Option<DeploymentConfigRecord>,
    ) -> Result<BackupDescriptor, OpsError> {
        let timestamp = Utc::now();
        let id = BackupDescriptor::make_id(environment, timestamp);
        let dir = self.options.backups_dir.subdir(&id);
        dir.create().await?;

        // Database
        let database = match &self.options.dump_command {
            Some(command) => {
                let command = command.clone().with_env("BACKUP_ENVIRONMENT", environment.as_str());
                let output = run_command(&command, self.options.command_timeout)
                    .await
                    .map_err(|e| OpsError::StorageError(format!("Database dump failed: {}", e)))?;
                dir.file(DATABASE_FILE).write_bytes(&output.stdout).await?;
                debug!("Database dump written ({} bytes)", output.stdout.len());
                Some(DATABASE_FILE.to_string())
            }
            None => None,
        };

        // Configuration
        dir.file(CONFIG_FILE).write_json(&previous_config).await?;

        // File system
        let files = match &self.options.app_dir {
            Some(app_dir) if app_dir.exists().await => {
                copy_tree(app_dir, &dir.subdir(FILES_DIR)).await?
            }
            _ => Vec::new(),
        };

        let manifest = BackupManifest {
            id: id.clone(),
            environment,
            timestamp,
            database,
            files,
        };
        dir.file(MANIFEST_FILE).write_json(&manifest).await?;

        info!(
            "Backup {} created ({} files, database: {})",
            id,
            manifest.files.len(),
            manifest.database.is_some()
        );

        Ok(BackupDescriptor {
            id,
            environment,
            timestamp,
            location: dir.path().display().to_string(),
            previous_config,
        })
    }

    async fn restore_snapshot(&self, backup: &BackupDescriptor) -> Result<(), OpsError> {
        let dir = Dir::new(&backup.location);
        let manifest: BackupManifest = dir.file(MANIFEST_FILE).read_json().await?;
        if manifest.id != backup.id {
            return Err(OpsError::StorageError(format!(
                "Backup manifest {} does not match descriptor {}",
                manifest.id, backup.id
            )));
        }

        // Verify every captured file before touching anything
        let files = match &self.options.app_dir {
            Some(_) => read_verified(&dir.subdir(FILES_DIR), &manifest.files).await?,
            None => Vec::new(),
        };

        if let Some(dump) = &manifest.database {
            let command = self.options.restore_command.as_ref().ok_or_else(|| {
                OpsError::ConfigError(
                    "Backup holds a database dump but no restore command is configured".to_string(),
                )
            })?;
            let command = command
                .clone()
                .with_env("BACKUP_ENVIRONMENT", backup.environment.as_str())
                .with_arg(dir.file(dump).path().display().to_string());
            run_command(&command, self.options.command_timeout)
                .await
                .map_err(|e| OpsError::StorageError(format!("Database restore failed: {}", e)))?;
        }

        if let Some(app_dir) = &self.options.app_dir {
            for (entry, contents) in &files {
                app_dir.file_at(&entry.path).write_bytes(contents).await?;
            }

            // Files the failed release added
            if app_dir.exists().await {
                for path in app_dir.list_tree().await? {
                    if !manifest.files.iter().any(|e| e.path == path) {
                        debug!("Removing {} not present in backup", path.display());
                        app_dir.file_at(&path).remove().await?;
                    }
                }
            }
        }

        info!("Backup {} restored", backup.id);
        Ok(())
    }
}

#[async_trait]
impl BackupBackend for FsBackupBackend {
    async fn create(
        &self,
        environment: Environment,
        previous_config: Option<DeploymentConfigRecord>,
    ) -> Result<BackupDescriptor, String> {
        self.snapshot(environment, previous_config)
            .await
            .map_err(|e| e.to_string())
    }

    async fn restore(&self, backup: &BackupDescriptor) -> Result<(), String> {
        self.restore_snapshot(backup).await.map_err(|e| e.to_string())
    }
}

/// Copy every file below `source` into `target`, returning the manifest
async fn copy_tree(source: &Dir, target: &Dir) -> Result<Vec<ManifestEntry>, OpsError> {
    let mut entries = Vec::new();
    for path in source.list_tree().await? {
        let contents = source.file_at(&path).read_bytes().await?;
        target.file_at(&path).write_bytes(&contents).await?;
        entries.push(ManifestEntry {
            sha256: sha256_hash(&contents),
            size: contents.len() as u64,
            path,
        });
    }
    Ok(entries)
}

/// Read every manifest entry from `files_dir`, failing on the first digest mismatch
async fn read_verified(
    files_dir: &Dir,
    manifest: &[ManifestEntry],
) -> Result<Vec<(ManifestEntry, Vec<u8>)>, OpsError> {
    let mut files = Vec::with_capacity(manifest.len());
    for entry in manifest {
        let contents = files_dir.file_at(&entry.path).read_bytes().await?;
        if sha256_hash(&contents) != entry.sha256 {
            return Err(OpsError::StorageError(format!(
                "Backup file {} is corrupted",
                entry.path.display()
            )));
        }
        files.push((entry.clone(), contents));
    }
    Ok(files)
}
