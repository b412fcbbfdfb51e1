//! Request handlers for the document job API.

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;
use uuid::Uuid;

use crate::application::documents::{SubmitCommand, SubmittedInput};
use crate::application::repos::JobQueryFilter;
use crate::domain::entities::DocumentJob;
use crate::domain::types::JobStatus;

use super::error::ApiError;
use super::state::ApiState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub status: String,
    pub template_name: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub output_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub template_name: String,
    pub status: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub count: usize,
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub template: Option<String>,
    pub limit: Option<u32>,
}

pub async fn submit_job(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut template_name: Option<String> = None;
    let mut file_bytes: Option<bytes::Bytes> = None;
    let mut data_text: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request("invalid multipart payload", Some(err.to_string())))?
    {
        match field.name() {
            Some("template_name") => {
                template_name = Some(field.text().await.map_err(|err| {
                    ApiError::bad_request("failed to read template_name", Some(err.to_string()))
                })?);
            }
            Some("file") => {
                file_bytes = Some(field.bytes().await.map_err(|err| {
                    ApiError::bad_request("failed to read uploaded file", Some(err.to_string()))
                })?);
            }
            Some("data") => {
                data_text = Some(field.text().await.map_err(|err| {
                    ApiError::bad_request("failed to read data field", Some(err.to_string()))
                })?);
            }
            _ => {}
        }
    }

    let template_id = template_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("template_name field is required", None))?;

    let input = match (file_bytes, data_text) {
        (Some(bytes), _) => SubmittedInput::File(bytes),
        (None, Some(text)) if !text.trim().is_empty() => SubmittedInput::Inline(text),
        _ => SubmittedInput::Empty,
    };

    let receipt = state
        .documents
        .submit(SubmitCommand { template_id, input })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            success: true,
            job_id: receipt.job.id,
            status: receipt.job.status.to_string(),
            message: "Document job accepted".to_string(),
        }),
    ))
}

pub async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = state.documents.find(id).await?;
    Ok(Json(status_response(&job)))
}

pub async fn download_document(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_job_id(&job_id)?;
    let document = state.documents.download(id).await?;

    let content_type = HeaderValue::from_str(&document.content_type)
        .map_err(|err| ApiError::internal(format!("invalid content type header: {err}")))?;
    let disposition = format!("attachment; filename=\"{}\"", document.filename);
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|err| ApiError::internal(format!("invalid disposition header: {err}")))?;

    let mut response = document.bytes.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut filter = JobQueryFilter::default();
    if let Some(raw) = query.status.as_deref().filter(|raw| !raw.is_empty()) {
        match JobStatus::try_from(raw) {
            Ok(status) => filter.status = Some(status),
            // An unknown status can match nothing; mirror a filter that
            // found no rows instead of rejecting the request.
            Err(_) => {
                return Ok(Json(ListResponse {
                    count: 0,
                    jobs: Vec::new(),
                }));
            }
        }
    }
    filter.template_id = query.template.filter(|template| !template.is_empty());

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let jobs = state.documents.list(&filter, limit).await?;

    let jobs: Vec<JobSummary> = jobs
        .iter()
        .map(|job| JobSummary {
            id: job.id,
            template_name: job.template_id.clone(),
            status: job.status.to_string(),
            created_at: rfc3339(job.created_at),
            completed_at: job.completed_at.map(rfc3339),
        })
        .collect();

    Ok(Json(ListResponse {
        count: jobs.len(),
        jobs,
    }))
}

pub async fn delete_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&job_id)?;
    state.documents.delete(id).await?;

    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Job {id} deleted"),
    }))
}

pub async fn healthz(State(state): State<ApiState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response(),
        Err(err) => {
            warn!(target = "stampa::http::healthz", error = %err, "health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
                .into_response()
        }
    }
}

fn status_response(job: &DocumentJob) -> StatusResponse {
    let output_url = job
        .is_completed()
        .then(|| format!("/download/{}", job.id));

    StatusResponse {
        id: job.id,
        status: job.status.to_string(),
        template_name: job.template_id.clone(),
        created_at: rfc3339(job.created_at),
        started_at: job.started_at.map(rfc3339),
        completed_at: job.completed_at.map(rfc3339),
        error_message: job.error_text.clone(),
        output_url,
    }
}

/// Identifiers that do not parse as UUIDs match no job.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found("Job not found"))
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}
