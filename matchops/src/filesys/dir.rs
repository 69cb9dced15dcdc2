//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::OpsError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), OpsError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// List files in the directory, sorted by name
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, OpsError> {
        self.list(|t| t.is_file()).await
    }

    /// List subdirectories, sorted by name
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, OpsError> {
        self.list(|t| t.is_dir()).await
    }

    /// Every file below this directory as a relative path, sorted
    pub async fn list_tree(&self) -> Result<Vec<PathBuf>, OpsError> {
        let mut files = Vec::new();
        let mut pending = vec![PathBuf::new()];

        while let Some(relative) = pending.pop() {
            let current = Dir::new(self.path.join(&relative));
            for path in current.list_files().await? {
                if let Some(name) = path.file_name() {
                    files.push(relative.join(name));
                }
            }
            for path in current.list_dirs().await? {
                if let Some(name) = path.file_name() {
                    pending.push(relative.join(name));
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn list(&self, keep: impl Fn(&std::fs::FileType) -> bool) -> Result<Vec<PathBuf>, OpsError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if keep(&entry.file_type().await?) {
                paths.push(entry.path());
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a file at a relative path below this directory
    pub fn file_at(&self, relative: impl AsRef<Path>) -> File {
        File::new(self.path.join(relative))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
