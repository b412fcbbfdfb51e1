#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use stampa::application::dispatch::{Dispatcher, RenderJobPayload, TemplateCatalog};
use stampa::application::documents::{
    DocumentService, SubmitCommand, SubmitReceipt, SubmittedInput,
};
use stampa::application::engine::LifecycleEngine;
use stampa::application::jobs::{JobWorkerContext, process_render_document_job};
use stampa::application::repos::{
    JobQueryFilter, JobStore, NewDocumentJob, NewQueueUnit, RepoError,
};
use stampa::application::retry::RetryService;
use stampa::domain::entities::DocumentJob;
use stampa::domain::types::JobStatus;
use stampa::infra::storage::ArtifactStorage;

pub const RETRY_DELAY: Duration = Duration::from_secs(60);
pub const MAX_RETRIES: u32 = 3;

/// One unit handed to the queue, kept for inspection instead of executed.
#[derive(Debug, Clone)]
pub struct RecordedUnit {
    pub work_id: String,
    pub unit: NewQueueUnit,
}

/// In-memory [`JobStore`] mirroring the row semantics of the Postgres
/// implementation, with the queue replaced by a recorder.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, DocumentJob>>,
    queue: Mutex<Vec<RecordedUnit>>,
}

impl InMemoryJobStore {
    pub async fn queued_units(&self) -> Vec<RecordedUnit> {
        self.queue.lock().await.clone()
    }

    /// Insert a pre-built row, for states the public surface cannot reach
    /// (old timestamps, terminal states without a queue history).
    pub async fn seed(&self, job: DocumentJob) {
        self.jobs.lock().await.insert(job.id, job);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new_job: NewDocumentJob) -> Result<DocumentJob, RepoError> {
        let now = OffsetDateTime::now_utc();
        let job = DocumentJob {
            id: Uuid::new_v4(),
            template_id: new_job.template_id,
            status: JobStatus::Pending,
            input_data: new_job.input_data,
            input_path: None,
            output_path: None,
            work_identifier: None,
            error_text: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError> {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<DocumentJob> = jobs
            .values()
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .filter(|job| {
                filter
                    .template_id
                    .as_deref()
                    .is_none_or(|template| job.template_id == template)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matched.truncate(limit.clamp(1, 200) as usize);
        Ok(matched)
    }

    async fn delete_job(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        Ok(self.jobs.lock().await.remove(&id))
    }

    async fn mark_running(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        let now = OffsetDateTime::now_utc();
        job.status = JobStatus::Running;
        job.started_at.get_or_insert(now);
        job.error_text = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        output_path: &str,
    ) -> Result<Option<DocumentJob>, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        let now = OffsetDateTime::now_utc();
        job.status = JobStatus::Completed;
        job.output_path = Some(output_path.to_string());
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_text: &str,
    ) -> Result<Option<DocumentJob>, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        let now = OffsetDateTime::now_utc();
        job.status = JobStatus::Failed;
        job.error_text = Some(error_text.to_string());
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Failed {
            return Ok(None);
        }
        job.status = JobStatus::Pending;
        job.error_text = None;
        job.started_at = None;
        job.completed_at = None;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(Some(job.clone()))
    }

    async fn record_input_artifact(&self, id: Uuid, path: &str) -> Result<(), RepoError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        job.input_path = Some(path.to_string());
        job.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn record_work_identifier(&self, id: Uuid, work_id: &str) -> Result<(), RepoError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        job.work_identifier = Some(work_id.to_string());
        job.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn list_failed_since(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError> {
        let jobs = self.jobs.lock().await;
        let mut failed: Vec<DocumentJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed && job.updated_at >= cutoff)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn enqueue_work(&self, unit: NewQueueUnit) -> Result<String, RepoError> {
        let mut queue = self.queue.lock().await;
        let work_id = format!("work-{}", queue.len() + 1);
        queue.push(RecordedUnit {
            work_id: work_id.clone(),
            unit,
        });
        Ok(work_id)
    }

    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Fully wired service stack over the in-memory store, with the template
/// and artifact directories on disposable tempdirs.
pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub storage: Arc<ArtifactStorage>,
    pub catalog: Arc<TemplateCatalog>,
    pub dispatcher: Arc<Dispatcher>,
    pub documents: Arc<DocumentService>,
    pub engine: Arc<LifecycleEngine>,
    pub retry: RetryService,
    pub worker: JobWorkerContext,
    pub templates_dir: TempDir,
    pub artifacts_dir: TempDir,
}

pub fn harness() -> Harness {
    let templates_dir = tempfile::tempdir().expect("template dir");
    let artifacts_dir = tempfile::tempdir().expect("artifact dir");

    std::fs::write(
        templates_dir.path().join("contract.html"),
        "<html><body><h1>Contract</h1>\
         <p>Client: {{ client_name }}</p><p>Total: {{ total }}</p></body></html>",
    )
    .expect("write html template");
    write_minimal_docx(&templates_dir.path().join("contract.docx"));

    let map = BTreeMap::from([
        ("contract".to_string(), "contract.html".to_string()),
        ("docx_contract".to_string(), "contract.docx".to_string()),
        ("report".to_string(), "report.json".to_string()),
        // Mapped but never written, so renders of it always fail.
        ("broken".to_string(), "absent.html".to_string()),
    ]);

    let store = Arc::new(InMemoryJobStore::default());
    let catalog = Arc::new(TemplateCatalog::new(
        templates_dir.path().to_path_buf(),
        map,
    ));
    let storage = Arc::new(
        ArtifactStorage::new(artifacts_dir.path().to_path_buf()).expect("artifact storage"),
    );
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), catalog.clone(), RETRY_DELAY));
    let documents = Arc::new(DocumentService::new(
        store.clone(),
        storage.clone(),
        dispatcher.clone(),
    ));
    let engine = Arc::new(LifecycleEngine::new(
        store.clone(),
        storage.clone(),
        catalog.clone(),
    ));
    let retry = RetryService::new(store.clone(), dispatcher.clone());
    let worker = JobWorkerContext {
        engine: engine.clone(),
        dispatcher: dispatcher.clone(),
        max_retries: MAX_RETRIES,
    };

    Harness {
        store,
        storage,
        catalog,
        dispatcher,
        documents,
        engine,
        retry,
        worker,
        templates_dir,
        artifacts_dir,
    }
}

impl Harness {
    pub async fn submit(&self, template_id: &str, input: SubmittedInput) -> SubmitReceipt {
        self.documents
            .submit(SubmitCommand {
                template_id: template_id.to_string(),
                input,
            })
            .await
            .expect("submission accepted")
    }

    /// Deliver one unit to the render worker exactly as the monitor would.
    pub async fn deliver(
        &self,
        payload: RenderJobPayload,
    ) -> Result<(), apalis::prelude::Error> {
        process_render_document_job(payload, apalis::prelude::Data::new(self.worker.clone()))
            .await
    }

    pub async fn payload_at(&self, index: usize) -> RenderJobPayload {
        let units = self.store.queued_units().await;
        let unit = units.get(index).expect("queued unit at index");
        serde_json::from_value(unit.unit.payload.clone()).expect("render payload")
    }

    pub async fn job(&self, id: Uuid) -> DocumentJob {
        self.store
            .find_job(id)
            .await
            .expect("store")
            .expect("job exists")
    }
}

/// The smallest archive the office converter accepts: a content-types stub
/// plus the main document part.
pub fn write_minimal_docx(path: &Path) {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer
        .start_file("[Content_Types].xml", options)
        .expect("start entry");
    writer
        .write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
        .expect("write entry");

    writer
        .start_file("word/document.xml", options)
        .expect("start entry");
    writer
        .write_all(
            br#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Client: {{ client_name }}</w:t></w:r></w:p></w:body></w:document>"#,
        )
        .expect("write entry");

    let bytes = writer.finish().expect("finish archive").into_inner();
    std::fs::write(path, bytes).expect("write docx template");
}
