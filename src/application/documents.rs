//! Submission, status, download, listing, and deletion of document jobs.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::dispatch::Dispatcher;
use crate::application::repos::{JobQueryFilter, JobStore, NewDocumentJob, RepoError};
use crate::domain::entities::DocumentJob;
use crate::domain::types::JobStatus;
use crate::infra::storage::{ArtifactStorage, StorageError};

const METRIC_JOBS_SUBMITTED: &str = "stampa_jobs_submitted_total";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("unsupported template `{template_id}`")]
    UnsupportedTemplate {
        template_id: String,
        supported: Vec<String>,
    },
    #[error("invalid input data: {message}")]
    InvalidPayload { message: String },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("job not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("job not found")]
    NotFound,
    #[error("job is not completed yet (status: {status})")]
    NotReady { status: JobStatus },
    #[error("generated document is no longer available")]
    MissingArtifact,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("job not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Raw input payload accompanying a submission. An uploaded file wins over
/// an inline form value; neither means an empty data object.
#[derive(Debug, Clone)]
pub enum SubmittedInput {
    File(Bytes),
    Inline(String),
    Empty,
}

#[derive(Debug, Clone)]
pub struct SubmitCommand {
    pub template_id: String,
    pub input: SubmittedInput,
}

#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub job: DocumentJob,
    pub work_id: String,
}

/// A completed document ready to send back to the client.
#[derive(Debug, Clone)]
pub struct DownloadedDocument {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn JobStore>,
    storage: Arc<ArtifactStorage>,
    dispatcher: Arc<Dispatcher>,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<ArtifactStorage>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            storage,
            dispatcher,
        }
    }

    /// Validate a submission, persist the job, and enqueue its render unit.
    ///
    /// The job row exists before the unit is enqueued; if enqueueing fails
    /// the row stays PENDING and the error propagates to the caller.
    pub async fn submit(&self, cmd: SubmitCommand) -> Result<SubmitReceipt, SubmitError> {
        if !self.dispatcher.catalog().is_supported(&cmd.template_id) {
            return Err(SubmitError::UnsupportedTemplate {
                template_id: cmd.template_id,
                supported: self.dispatcher.catalog().supported_ids(),
            });
        }

        let input_data = parse_input_data(&cmd.input)?;
        let mut job = self
            .store
            .create_job(NewDocumentJob {
                template_id: cmd.template_id,
                input_data,
            })
            .await?;

        if let SubmittedInput::File(bytes) = &cmd.input {
            let stored = self.storage.store_input(job.id, bytes).await?;
            self.store
                .record_input_artifact(job.id, &stored.stored_path)
                .await?;
            job.input_path = Some(stored.stored_path);
        }

        let work = self.dispatcher.dispatch(&job).await?;
        job.work_identifier = Some(work.work_id.clone());

        counter!(METRIC_JOBS_SUBMITTED).increment(1);
        info!(
            target = "stampa::documents",
            job_id = %job.id,
            template = %job.template_id,
            work_id = %work.work_id,
            "document job submitted"
        );

        Ok(SubmitReceipt {
            job,
            work_id: work.work_id,
        })
    }

    /// Fetch a job for status reporting.
    pub async fn find(&self, id: Uuid) -> Result<DocumentJob, StatusError> {
        self.store
            .find_job(id)
            .await?
            .ok_or(StatusError::NotFound)
    }

    /// Fetch the rendered artifact of a completed job.
    pub async fn download(&self, id: Uuid) -> Result<DownloadedDocument, DownloadError> {
        let job = self
            .store
            .find_job(id)
            .await?
            .ok_or(DownloadError::NotFound)?;

        if job.status != JobStatus::Completed {
            return Err(DownloadError::NotReady { status: job.status });
        }
        let output_path = job.output_path.ok_or(DownloadError::MissingArtifact)?;

        let bytes = match self.storage.read(&output_path).await {
            Ok(bytes) => bytes,
            Err(StorageError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DownloadError::MissingArtifact);
            }
            Err(err) => return Err(DownloadError::Storage(err)),
        };

        let content_type = mime_guess::from_path(&output_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let filename = output_path
            .rsplit('/')
            .next()
            .unwrap_or(&output_path)
            .to_string();

        Ok(DownloadedDocument {
            filename,
            content_type,
            bytes,
        })
    }

    /// List jobs, newest first.
    pub async fn list(
        &self,
        filter: &JobQueryFilter,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError> {
        self.store.list_jobs(filter, limit).await
    }

    /// Delete a job row and best-effort remove its stored artifacts.
    pub async fn delete(&self, id: Uuid) -> Result<DocumentJob, DeleteError> {
        let job = self
            .store
            .delete_job(id)
            .await?
            .ok_or(DeleteError::NotFound)?;

        for stored_path in [job.input_path.as_deref(), job.output_path.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = self.storage.delete(stored_path).await {
                warn!(
                    target = "stampa::documents",
                    job_id = %id,
                    path = stored_path,
                    error = %err,
                    "could not remove artifact for deleted job"
                );
            }
        }

        info!(target = "stampa::documents", job_id = %id, "document job deleted");
        Ok(job)
    }
}

fn parse_input_data(input: &SubmittedInput) -> Result<serde_json::Value, SubmitError> {
    let value = match input {
        SubmittedInput::File(bytes) => {
            serde_json::from_slice::<serde_json::Value>(bytes).map_err(|err| {
                SubmitError::InvalidPayload {
                    message: format!("uploaded file is not valid JSON: {err}"),
                }
            })?
        }
        SubmittedInput::Inline(text) => {
            serde_json::from_str::<serde_json::Value>(text).map_err(|err| {
                SubmitError::InvalidPayload {
                    message: format!("data field is not valid JSON: {err}"),
                }
            })?
        }
        SubmittedInput::Empty => serde_json::Value::Object(serde_json::Map::new()),
    };

    if !value.is_object() {
        return Err(SubmitError::InvalidPayload {
            message: "input data must be a JSON object".to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_becomes_empty_object() {
        let value = parse_input_data(&SubmittedInput::Empty).expect("parse");
        assert_eq!(value, serde_json::json!({}));
    }

    #[test]
    fn inline_json_must_be_an_object() {
        let err = parse_input_data(&SubmittedInput::Inline("[1, 2]".to_string()))
            .expect_err("arrays are rejected");
        assert!(matches!(err, SubmitError::InvalidPayload { .. }));

        let value = parse_input_data(&SubmittedInput::Inline("{\"a\": 1}".to_string()))
            .expect("objects are accepted");
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn malformed_file_payload_is_rejected() {
        let err = parse_input_data(&SubmittedInput::File(Bytes::from_static(b"{not json")))
            .expect_err("malformed JSON is rejected");
        assert!(matches!(err, SubmitError::InvalidPayload { .. }));
    }
}
