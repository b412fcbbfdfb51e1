//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::DocumentJob;
use crate::domain::types::{JobStatus, JobType};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewDocumentJob {
    pub template_id: String,
    pub input_data: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct JobQueryFilter {
    pub status: Option<JobStatus>,
    pub template_id: Option<String>,
}

/// A unit of work handed to the queue broker.
#[derive(Debug, Clone, Serialize)]
pub struct NewQueueUnit {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub run_at: OffsetDateTime,
    pub max_attempts: i32,
}

/// Persistence contract for document jobs and their queue units.
///
/// Every mutation is a single atomic row update that also bumps
/// `updated_at`; no operation spans more than one job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new_job: NewDocumentJob) -> Result<DocumentJob, RepoError>;

    async fn find_job(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError>;

    /// Newest-first listing, filter fields are conjunctive.
    async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError>;

    async fn delete_job(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError>;

    /// PENDING/FAILED -> RUNNING. Sets `started_at` on the first attempt
    /// only and clears `error_text`.
    async fn mark_running(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError>;

    /// RUNNING -> COMPLETED. Binds the output reference, flips the status,
    /// and stamps `completed_at` in one update so readers never observe
    /// COMPLETED without an output reference.
    async fn mark_completed(
        &self,
        id: Uuid,
        output_path: &str,
    ) -> Result<Option<DocumentJob>, RepoError>;

    /// RUNNING -> FAILED with the failure message and `completed_at`.
    async fn mark_failed(
        &self,
        id: Uuid,
        error_text: &str,
    ) -> Result<Option<DocumentJob>, RepoError>;

    /// FAILED -> PENDING, clearing `error_text`, `started_at`, and
    /// `completed_at`. Returns `None` when the job is absent or not FAILED.
    async fn reset_for_retry(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError>;

    async fn record_input_artifact(&self, id: Uuid, path: &str) -> Result<(), RepoError>;

    async fn record_work_identifier(&self, id: Uuid, work_id: &str) -> Result<(), RepoError>;

    /// FAILED jobs whose `updated_at` is at or after `cutoff`, newest-first,
    /// bounded. Feeds the retry sweep.
    async fn list_failed_since(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError>;

    /// Push one unit of work onto the broker; returns its work-identifier.
    async fn enqueue_work(&self, unit: NewQueueUnit) -> Result<String, RepoError>;

    /// Backend liveness probe.
    async fn ping(&self) -> Result<(), RepoError>;
}
