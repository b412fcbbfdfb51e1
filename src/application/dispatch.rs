//! Work dispatch: resolve a template identifier to a converter variant and
//! hand one unit of work to the queue.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{JobStore, NewQueueUnit, RepoError};
use crate::domain::entities::DocumentJob;
use crate::domain::types::{JobType, TemplateKind, TemplateSource};

/// Immutable view of the configured template mapping, built once at startup
/// and shared by reference.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    dir: PathBuf,
    map: BTreeMap<String, String>,
}

impl TemplateCatalog {
    pub fn new(dir: PathBuf, map: BTreeMap<String, String>) -> Self {
        Self { dir, map }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_supported(&self, template_id: &str) -> bool {
        self.map.contains_key(template_id)
    }

    /// Supported identifiers in stable order, for validation messages.
    pub fn supported_ids(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// Map the identifier to its backing filename and pick the converter
    /// variant from the extension, exactly once. Identifiers outside the
    /// mapping fall back to the identifier itself as the filename.
    pub fn resolve(&self, template_id: &str) -> TemplateSource {
        let filename = self
            .map
            .get(template_id)
            .cloned()
            .unwrap_or_else(|| template_id.to_string());
        let kind = TemplateKind::from_filename(&filename);
        TemplateSource {
            template_id: template_id.to_string(),
            filename,
            kind,
        }
    }
}

/// Queue payload for one render unit. `attempt` is 0 on first dispatch and
/// counts automatic retries; the resolved source travels with the unit so
/// workers never re-derive the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJobPayload {
    pub job_id: Uuid,
    pub attempt: u32,
    pub source: TemplateSource,
}

#[derive(Debug, Clone)]
pub struct DispatchedWork {
    pub work_id: String,
    pub source: TemplateSource,
}

/// Enqueues exactly one unit of work per call and records the broker's
/// work-identifier on the job. Units carry `max_attempts = 1`: retry control
/// is explicit in the worker, never delegated to the broker.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    catalog: Arc<TemplateCatalog>,
    retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<TemplateCatalog>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            retry_delay,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Initial dispatch and manual-retry dispatch: immediate, attempt 0.
    pub async fn dispatch(&self, job: &DocumentJob) -> Result<DispatchedWork, RepoError> {
        let source = self.catalog.resolve(&job.template_id);
        self.enqueue(job.id, source, 0, OffsetDateTime::now_utc())
            .await
    }

    /// Automatic-retry dispatch: a fresh unit for the same job, delayed by
    /// the configured retry interval.
    pub async fn redispatch_delayed(
        &self,
        job_id: Uuid,
        source: TemplateSource,
        attempt: u32,
    ) -> Result<DispatchedWork, RepoError> {
        let run_at = OffsetDateTime::now_utc() + self.retry_delay;
        self.enqueue(job_id, source, attempt, run_at).await
    }

    async fn enqueue(
        &self,
        job_id: Uuid,
        source: TemplateSource,
        attempt: u32,
        run_at: OffsetDateTime,
    ) -> Result<DispatchedWork, RepoError> {
        let payload = RenderJobPayload {
            job_id,
            attempt,
            source,
        };
        let payload_value = serde_json::to_value(&payload).map_err(|err| {
            RepoError::InvalidInput {
                message: format!("unserializable job payload: {err}"),
            }
        })?;

        let work_id = self
            .store
            .enqueue_work(NewQueueUnit {
                job_type: JobType::RenderDocument,
                payload: payload_value,
                run_at,
                max_attempts: 1,
            })
            .await?;
        self.store.record_work_identifier(job_id, &work_id).await?;

        Ok(DispatchedWork {
            work_id,
            source: payload.source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TemplateCatalog {
        let map = BTreeMap::from([
            ("contract".to_string(), "contract.html".to_string()),
            ("docx_contract".to_string(), "contract.docx".to_string()),
            ("report".to_string(), "report.json".to_string()),
        ]);
        TemplateCatalog::new(PathBuf::from("/templates"), map)
    }

    #[test]
    fn resolves_mapped_identifiers_by_extension() {
        let catalog = catalog();

        let pdf = catalog.resolve("contract");
        assert_eq!(pdf.filename, "contract.html");
        assert_eq!(pdf.kind, TemplateKind::Pdf);

        let docx = catalog.resolve("docx_contract");
        assert_eq!(docx.filename, "contract.docx");
        assert_eq!(docx.kind, TemplateKind::Docx);

        let json = catalog.resolve("report");
        assert_eq!(json.kind, TemplateKind::Json);
    }

    #[test]
    fn unmapped_identifier_falls_back_to_itself() {
        let source = catalog().resolve("letterhead");
        assert_eq!(source.filename, "letterhead");
        assert_eq!(source.kind, TemplateKind::Pdf);

        let json = catalog().resolve("custom.json");
        assert_eq!(json.filename, "custom.json");
        assert_eq!(json.kind, TemplateKind::Json);
    }

    #[test]
    fn support_check_consults_only_the_mapping() {
        let catalog = catalog();
        assert!(catalog.is_supported("contract"));
        assert!(!catalog.is_supported("letterhead"));
        assert_eq!(
            catalog.supported_ids(),
            vec!["contract", "docx_contract", "report"]
        );
    }
}
