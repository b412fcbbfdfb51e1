//! Shared domain enumerations for job lifecycle and converter selection.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a document job. Persisted as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Queue job types. One queue carries all render work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    RenderDocument,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::RenderDocument => "render_document",
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "render_document" => Ok(JobType::RenderDocument),
            _ => Err(()),
        }
    }
}

/// Converter variant, decided once from the template filename's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Pdf,
    Docx,
    Json,
}

impl TemplateKind {
    /// `.docx` fills an office document, `.json` passes data through; every
    /// other extension, including none, renders markup to PDF.
    pub fn from_filename(filename: &str) -> Self {
        match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
            Some("docx") => TemplateKind::Docx,
            Some("json") => TemplateKind::Json,
            _ => TemplateKind::Pdf,
        }
    }

    /// Extension of the generated artifact.
    pub fn output_extension(self) -> &'static str {
        match self {
            TemplateKind::Pdf => "pdf",
            TemplateKind::Docx => "docx",
            TemplateKind::Json => "json",
        }
    }
}

/// A template identifier resolved to a concrete resource and converter
/// variant. Built by the dispatcher and carried inside the unit-of-work
/// payload so nothing downstream re-derives the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSource {
    pub template_id: String,
    pub filename: String,
    pub kind: TemplateKind,
}
