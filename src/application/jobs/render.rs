use apalis::prelude::{Data, Error as ApalisError};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::dispatch::RenderJobPayload;
use crate::application::engine::ProcessOutcome;
use crate::application::repos::RepoError;

use super::context::{JobWorkerContext, job_failed};

const METRIC_JOB_RETRIES: &str = "stampa_job_retries_total";

#[derive(Debug, Error)]
pub enum RenderJobError {
    #[error("render failed after {attempts} attempt(s): {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("could not schedule retry attempt {attempt}")]
    RetryUnschedulable {
        attempt: u32,
        #[source]
        source: RepoError,
    },
}

/// Consume one delivery of a render unit.
///
/// Completion and a missing job row both consume the unit. A retryable
/// failure below the retry budget enqueues a fresh delayed unit and also
/// consumes this one; the broker never re-runs a unit on its own. Only an
/// exhausted budget surfaces an error, which leaves the queue row failed
/// alongside the already-FAILED job row.
pub async fn process_render_document_job(
    payload: RenderJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;

    let outcome = ctx.engine.process_unit(payload.job_id, &payload.source).await;
    let (message, retry) = match outcome {
        ProcessOutcome::Completed | ProcessOutcome::Missing => return Ok(()),
        ProcessOutcome::Failed { message, retry } => (message, retry),
    };

    let attempts = payload.attempt + 1;
    if !(retry && payload.attempt < ctx.max_retries) {
        warn!(
            target = "stampa::jobs::render",
            job_id = %payload.job_id,
            attempts,
            "render retries exhausted"
        );
        return Err(job_failed(RenderJobError::Exhausted { attempts, message }));
    }

    let next_attempt = payload.attempt + 1;
    match ctx
        .dispatcher
        .redispatch_delayed(payload.job_id, payload.source, next_attempt)
        .await
    {
        Ok(work) => {
            counter!(METRIC_JOB_RETRIES).increment(1);
            info!(
                target = "stampa::jobs::render",
                job_id = %payload.job_id,
                attempt = next_attempt,
                work_id = %work.work_id,
                "render retry scheduled"
            );
            Ok(())
        }
        Err(err) => Err(job_failed(RenderJobError::RetryUnschedulable {
            attempt: next_attempt,
            source: err,
        })),
    }
}
