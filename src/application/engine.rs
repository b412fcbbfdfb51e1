//! Job lifecycle engine: drives one dispatched unit of work through the
//! state machine (RUNNING, then COMPLETED or FAILED).

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::dispatch::TemplateCatalog;
use crate::application::render;
use crate::application::repos::JobStore;
use crate::domain::types::TemplateSource;
use crate::infra::storage::ArtifactStorage;

pub(crate) const METRIC_JOBS_COMPLETED: &str = "stampa_jobs_completed_total";
pub(crate) const METRIC_JOBS_FAILED: &str = "stampa_jobs_failed_total";
pub(crate) const METRIC_RENDER_MS: &str = "stampa_render_ms";

/// Outcome of processing one unit of work. Whether to retry is the caller's
/// decision; the engine only reports whether the failure class is worth one.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed,
    /// The job row disappeared between dispatch and pickup. Nothing to
    /// mutate, nothing to retry.
    Missing,
    Failed { message: String, retry: bool },
}

pub struct LifecycleEngine {
    store: Arc<dyn JobStore>,
    storage: Arc<ArtifactStorage>,
    catalog: Arc<TemplateCatalog>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<ArtifactStorage>,
        catalog: Arc<TemplateCatalog>,
    ) -> Self {
        Self {
            store,
            storage,
            catalog,
        }
    }

    /// Process one dispatched unit: transition to RUNNING, render, persist
    /// the artifact, bind the output reference. Safe to re-enter for a job
    /// that already completed; the artifact write is an idempotent replace
    /// keyed by job id. Every failure lands in the returned outcome, never
    /// in a panic.
    pub async fn process_unit(&self, job_id: Uuid, source: &TemplateSource) -> ProcessOutcome {
        let job = match self.store.find_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(
                    target = "stampa::engine",
                    job_id = %job_id,
                    "job deleted before pickup"
                );
                return ProcessOutcome::Missing;
            }
            Err(err) => {
                return ProcessOutcome::Failed {
                    message: format!("job lookup failed: {err}"),
                    retry: true,
                };
            }
        };

        match self.store.mark_running(job_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return ProcessOutcome::Missing,
            Err(err) => {
                return ProcessOutcome::Failed {
                    message: format!("could not mark job running: {err}"),
                    retry: true,
                };
            }
        }

        let render_started = Instant::now();
        let rendered = render::render(source, &job.input_data, self.catalog.dir());
        histogram!(METRIC_RENDER_MS).record(render_started.elapsed().as_secs_f64() * 1000.0);

        let document = match rendered {
            Ok(document) => document,
            Err(err) => return self.fail(job_id, err.to_string()).await,
        };

        let stored = match self
            .storage
            .store_output(job_id, document.extension, &document.bytes)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                return self
                    .fail(job_id, format!("artifact write failed: {err}"))
                    .await;
            }
        };

        match self.store.mark_completed(job_id, &stored.stored_path).await {
            Ok(Some(_)) => {
                counter!(METRIC_JOBS_COMPLETED).increment(1);
                info!(
                    target = "stampa::engine",
                    job_id = %job_id,
                    template = %source.template_id,
                    output = %stored.stored_path,
                    size_bytes = stored.size_bytes,
                    "document rendered"
                );
                ProcessOutcome::Completed
            }
            Ok(None) => ProcessOutcome::Missing,
            Err(err) => {
                self.fail(job_id, format!("output binding failed: {err}"))
                    .await
            }
        }
    }

    /// RUNNING -> FAILED. The message is preserved verbatim on the job so
    /// status readers see the last error.
    async fn fail(&self, job_id: Uuid, message: String) -> ProcessOutcome {
        counter!(METRIC_JOBS_FAILED).increment(1);
        warn!(
            target = "stampa::engine",
            job_id = %job_id,
            error = %message,
            "render attempt failed"
        );

        if let Err(err) = self.store.mark_failed(job_id, &message).await {
            warn!(
                target = "stampa::engine",
                job_id = %job_id,
                error = %err,
                "could not record failure"
            );
        }

        ProcessOutcome::Failed {
            message,
            retry: true,
        }
    }
}
