//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::errors::OpsError;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, OpsError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file contents as bytes
    pub async fn read_bytes(&self) -> Result<Vec<u8>, OpsError> {
        Ok(fs::read(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, OpsError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Read a JSON-lines file, skipping blank lines; a missing file is empty
    ///
    /// An unparseable final line is treated as a torn append and skipped.
    /// Any other unparseable line is an error.
    pub async fn read_json_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>, OpsError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }
        let contents = self.read_string().await?;
        let (rows, torn_at) = parse_json_lines(&contents)?;
        if let Some(offset) = torn_at {
            warn!(
                "Skipping torn last line of {} at byte {}",
                self.path.display(),
                offset
            );
        }
        Ok(rows)
    }

    /// Like [`read_json_lines`](Self::read_json_lines), but also cuts a torn
    /// last line off the file so later appends start on a clean line
    pub async fn recover_json_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>, OpsError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }
        let contents = self.read_string().await?;
        let (rows, torn_at) = parse_json_lines(&contents)?;
        if let Some(offset) = torn_at {
            warn!(
                "Truncating torn last line of {} at byte {}",
                self.path.display(),
                offset
            );
            let file = fs::OpenOptions::new().write(true).open(&self.path).await?;
            file.set_len(offset as u64).await?;
            file.sync_all().await?;
        }
        Ok(rows)
    }

    /// Write string to file
    pub async fn write_string(&self, contents: &str) -> Result<(), OpsError> {
        self.write_bytes(contents.as_bytes()).await
    }

    /// Write bytes to file
    pub async fn write_bytes(&self, contents: &[u8]) -> Result<(), OpsError> {
        self.ensure_parent().await?;

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write JSON to file
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), OpsError> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_string(&contents).await
    }

    /// Append one JSON value as a line and flush it to disk
    pub async fn append_json_line<T: Serialize>(&self, value: &T) -> Result<(), OpsError> {
        self.ensure_parent().await?;

        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Delete the file
    pub async fn remove(&self) -> Result<(), OpsError> {
        fs::remove_file(&self.path).await?;
        Ok(())
    }

    /// Atomic JSON write using a temporary file
    pub async fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), OpsError> {
        self.ensure_parent().await?;

        let temp_path = self.path.with_extension("tmp");
        let contents = serde_json::to_vec_pretty(value)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), OpsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Parsed rows, plus the byte offset of a torn last line if there is one
fn parse_json_lines<T: DeserializeOwned>(contents: &str) -> Result<(Vec<T>, Option<usize>), OpsError> {
    let mut rows = Vec::new();
    let mut offset = 0;
    let mut lines = contents.split_inclusive('\n').peekable();

    while let Some(line) = lines.next() {
        let start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(row) => rows.push(row),
            Err(_) if lines.peek().is_none() => return Ok((rows, Some(start))),
            Err(e) => return Err(e.into()),
        }
    }

    Ok((rows, None))
}
