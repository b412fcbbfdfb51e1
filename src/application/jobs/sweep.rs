//! Cron job that re-enqueues recently failed jobs.

use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::*;

use crate::application::retry::RetryService;

/// Marker struct for the cron-triggered sweep.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct RetrySweepJob;

impl From<chrono::DateTime<chrono::Utc>> for RetrySweepJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the sweep worker.
#[derive(Clone)]
pub struct RetrySweepContext {
    pub retry: Arc<RetryService>,
    pub window: Duration,
    pub limit: u32,
}

/// Process one sweep tick: retry jobs that failed within the window.
/// Sweep errors are logged, never propagated; the next tick runs regardless.
pub async fn process_retry_sweep_job(
    _job: RetrySweepJob,
    ctx: Data<RetrySweepContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.retry.sweep(ctx.window, ctx.limit).await {
        Ok(report) if report.retried > 0 => {
            tracing::info!(retried = report.retried, "Re-enqueued failed jobs");
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed-job sweep errored");
        }
        _ => {}
    }
    Ok(())
}
