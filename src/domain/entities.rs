//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::JobStatus;

/// One document-generation request and its tracked lifecycle state.
///
/// The id doubles as the namespace for derived artifact names
/// (`<id>_input.json`, `<id>.<ext>`), so it is never reused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentJob {
    pub id: Uuid,
    pub template_id: String,
    pub status: JobStatus,
    pub input_data: serde_json::Value,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub work_identifier: Option<String>,
    pub error_text: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
}

impl DocumentJob {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
