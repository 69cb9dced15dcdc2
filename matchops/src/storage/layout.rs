//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::OpsError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the service
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the directory of the persisted collections
    pub fn db_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("db"))
    }

    /// Get the backups directory
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backups"))
    }

    /// Get the migrations root, one subdirectory per release version
    pub fn migrations_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("migrations"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OpsError> {
        self.db_dir().create().await?;
        self.backups_dir().create().await?;
        self.migrations_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/matchops");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".matchops");

        Self::new(base_dir)
    }
}
