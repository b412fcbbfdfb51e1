//! Filesystem storage for job input and output artifacts.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors that can occur while interacting with the artifact storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of persisting an artifact.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub stored_path: String,
    pub size_bytes: u64,
}

/// Filesystem-backed artifact storage.
///
/// Input payloads land under `uploads/`, rendered documents under
/// `generated/`, both partitioned by calendar date. Writes go through a
/// temporary sibling and an atomic rename so a redelivered queue unit
/// overwrites the previous artifact instead of corrupting it.
#[derive(Debug)]
pub struct ArtifactStorage {
    root: PathBuf,
}

const UPLOAD_AREA: &str = "uploads";
const GENERATED_AREA: &str = "generated";

impl ArtifactStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(root.join(UPLOAD_AREA))?;
        std::fs::create_dir_all(root.join(GENERATED_AREA))?;
        Ok(Self { root })
    }

    /// Persist the raw input payload submitted with a job.
    pub async fn store_input(
        &self,
        job_id: Uuid,
        data: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let stored_path = format!(
            "{UPLOAD_AREA}/{}/{job_id}_input.json",
            date_partition()
        );
        self.write_atomic(&stored_path, data).await
    }

    /// Persist a rendered document for a job.
    ///
    /// Keyed by job id, so a second delivery of the same unit replaces the
    /// artifact rather than accumulating copies.
    pub async fn store_output(
        &self,
        job_id: Uuid,
        extension: &str,
        data: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let stored_path = format!(
            "{GENERATED_AREA}/{}/{job_id}.{extension}",
            date_partition()
        );
        self.write_atomic(&stored_path, data).await
    }

    /// Read a stored artifact into memory.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Remove a stored artifact. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn write_atomic(
        &self,
        stored_path: &str,
        data: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let absolute = self.resolve(stored_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = absolute.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&staging, data).await?;
        if let Err(err) = fs::rename(&staging, &absolute).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io(err));
        }

        Ok(StoredArtifact {
            stored_path: stored_path.to_string(),
            size_bytes: data.len() as u64,
        })
    }

    /// Resolve the absolute filesystem path for a stored artifact.
    fn resolve(&self, stored_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn date_partition() -> String {
    let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
    format!("{year}/{:02}/{:02}", month as u8, day)
}
