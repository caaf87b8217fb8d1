//! Temporary file management for transcoded output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use super::StoreError;

/// Owns the sandbox directory holding transcoded temporary files.
///
/// Output paths are allocated up front so the transcode service writes
/// directly into the sandbox; orphan cleanup removes anything no durable
/// record references.
#[derive(Debug, Clone)]
pub struct TempFileStore {
    temp_dir: PathBuf,
}

impl TempFileStore {
    /// Creates a temp file store rooted at the given directory.
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Allocates a fresh output path inside the sandbox.
    ///
    /// # Errors
    /// - `StoreError::Io` - Sandbox directory could not be created
    pub async fn allocate(&self, extension: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.temp_dir).await?;
        Ok(self.temp_dir.join(format!("{}.{extension}", Uuid::new_v4())))
    }

    /// Deletes a temporary file, tolerating files already gone.
    ///
    /// # Errors
    /// - `StoreError::Io` - Delete failed for a reason other than absence
    pub async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Lists sandbox files not present in the referenced set.
    ///
    /// # Errors
    /// - `StoreError::Io` - Sandbox directory scan failure
    pub async fn list_orphaned(
        &self,
        referenced: &HashSet<PathBuf>,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let mut orphaned = Vec::new();

        let mut entries = match fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(orphaned),
            Err(error) => return Err(error.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && !referenced.contains(&path) {
                orphaned.push(path);
            }
        }

        Ok(orphaned)
    }

    /// Deletes every orphaned sandbox file, returning the removed count.
    ///
    /// # Errors
    /// - `StoreError::Io` - Scan or delete failure
    pub async fn clear_orphaned(
        &self,
        referenced: &HashSet<PathBuf>,
    ) -> Result<usize, StoreError> {
        let orphaned = self.list_orphaned(referenced).await?;
        let count = orphaned.len();
        for path in &orphaned {
            self.delete(path).await?;
        }
        Ok(count)
    }
}
