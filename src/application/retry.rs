//! Re-enqueueing of failed jobs, one at a time or swept in bulk.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::dispatch::Dispatcher;
use crate::application::repos::{JobStore, RepoError};
use crate::domain::entities::DocumentJob;
use crate::domain::types::JobStatus;

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("job not found")]
    NotFound,
    #[error("only failed jobs can be retried (status: {status})")]
    NotRetryable { status: JobStatus },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone)]
pub struct RetriedJob {
    pub job: DocumentJob,
    pub work_id: String,
}

/// Summary of one sweep over recently failed jobs.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub scanned: u32,
    pub retried: u32,
}

#[derive(Clone)]
pub struct RetryService {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
}

impl RetryService {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Move one FAILED job back to PENDING and enqueue a fresh unit for it.
    ///
    /// The reset clears `error_text`, `started_at`, and `completed_at` and
    /// restarts the automatic retry budget; the previous output reference is
    /// left in place until the next completion overwrites it.
    pub async fn retry_job(&self, id: Uuid) -> Result<RetriedJob, RetryError> {
        let current = self
            .store
            .find_job(id)
            .await?
            .ok_or(RetryError::NotFound)?;
        if current.status != JobStatus::Failed {
            return Err(RetryError::NotRetryable {
                status: current.status,
            });
        }

        // The row may have changed between the check and the reset; a None
        // here means it was deleted or already picked up.
        let mut job = self
            .store
            .reset_for_retry(id)
            .await?
            .ok_or(RetryError::NotFound)?;

        let work = self.dispatcher.dispatch(&job).await?;
        job.work_identifier = Some(work.work_id.clone());

        info!(
            target = "stampa::retry",
            job_id = %id,
            work_id = %work.work_id,
            "failed job re-enqueued"
        );

        Ok(RetriedJob {
            job,
            work_id: work.work_id,
        })
    }

    /// Retry every job that failed within the given window, newest first,
    /// up to `limit` jobs. Individual failures are logged and skipped so one
    /// bad row cannot stall the sweep.
    pub async fn sweep(&self, window: Duration, limit: u32) -> Result<SweepReport, RepoError> {
        let cutoff = OffsetDateTime::now_utc() - window;
        let failed = self.store.list_failed_since(cutoff, limit).await?;

        let mut report = SweepReport::default();
        for job in failed {
            report.scanned += 1;
            match self.retry_job(job.id).await {
                Ok(_) => report.retried += 1,
                Err(RetryError::NotFound | RetryError::NotRetryable { .. }) => {}
                Err(RetryError::Repo(err)) => {
                    warn!(
                        target = "stampa::retry",
                        job_id = %job.id,
                        error = %err,
                        "could not re-enqueue failed job"
                    );
                }
            }
        }

        if report.retried > 0 {
            info!(
                target = "stampa::retry",
                scanned = report.scanned,
                retried = report.retried,
                "failed-job sweep finished"
            );
        }

        Ok(report)
    }
}
