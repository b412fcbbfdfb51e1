use std::convert::TryFrom;

use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{JobQueryFilter, JobStore, NewDocumentJob, NewQueueUnit, RepoError},
    domain::{entities::DocumentJob, types::JobStatus},
};

use super::{PostgresJobStore, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    template_id: String,
    status: String,
    input_data: serde_json::Value,
    input_path: Option<String>,
    output_path: Option<String>,
    work_identifier: Option<String>,
    error_text: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<JobRow> for DocumentJob {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::try_from(row.status.as_str()).map_err(|_| {
            RepoError::from_persistence(format!("unknown job status `{}`", row.status))
        })?;

        Ok(Self {
            id: row.id,
            template_id: row.template_id,
            status,
            input_data: row.input_data,
            input_path: row.input_path,
            output_path: row.output_path,
            work_identifier: row.work_identifier,
            error_text: row.error_text,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WorkIdRow {
    id: String,
}

fn into_job(row: Option<JobRow>) -> Result<Option<DocumentJob>, RepoError> {
    match row {
        Some(row) => DocumentJob::try_from(row).map(Some),
        None => Ok(None),
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(&self, new_job: NewDocumentJob) -> Result<DocumentJob, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO document_jobs (template_id, input_data)
            VALUES ($1, $2)
            RETURNING id, template_id, status, input_data, input_path, output_path,
                      work_identifier, error_text, created_at, updated_at,
                      started_at, completed_at
            "#,
        )
        .bind(&new_job.template_id)
        .bind(&new_job.input_data)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        DocumentJob::try_from(row)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, template_id, status, input_data, input_path, output_path,
                   work_identifier, error_text, created_at, updated_at,
                   started_at, completed_at
              FROM document_jobs
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_job(row)
    }

    async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError> {
        let limit = limit.clamp(1, 200);
        let mut qb = QueryBuilder::new(
            "SELECT id, template_id, status, input_data, input_path, output_path,
                    work_identifier, error_text, created_at, updated_at,
                    started_at, completed_at
               FROM document_jobs
              WHERE 1=1 ",
        );

        if let Some(status) = filter.status {
            qb.push("AND status = ");
            qb.push_bind(status.as_str());
        }

        if let Some(template_id) = filter.template_id.as_ref() {
            qb.push(" AND template_id = ");
            qb.push_bind(template_id);
        }

        qb.push(" ORDER BY created_at DESC, id DESC ");
        qb.push("LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb
            .build_query_as::<JobRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(DocumentJob::try_from(row)?);
        }
        Ok(jobs)
    }

    async fn delete_job(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            DELETE FROM document_jobs
             WHERE id = $1
            RETURNING id, template_id, status, input_data, input_path, output_path,
                      work_identifier, error_text, created_at, updated_at,
                      started_at, completed_at
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_job(row)
    }

    async fn mark_running(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE document_jobs
               SET status = 'running',
                   started_at = COALESCE(started_at, now()),
                   error_text = NULL,
                   updated_at = now()
             WHERE id = $1
            RETURNING id, template_id, status, input_data, input_path, output_path,
                      work_identifier, error_text, created_at, updated_at,
                      started_at, completed_at
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_job(row)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        output_path: &str,
    ) -> Result<Option<DocumentJob>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE document_jobs
               SET status = 'completed',
                   output_path = $2,
                   error_text = NULL,
                   completed_at = now(),
                   updated_at = now()
             WHERE id = $1
            RETURNING id, template_id, status, input_data, input_path, output_path,
                      work_identifier, error_text, created_at, updated_at,
                      started_at, completed_at
            "#,
        )
        .bind(id)
        .bind(output_path)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_job(row)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_text: &str,
    ) -> Result<Option<DocumentJob>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE document_jobs
               SET status = 'failed',
                   error_text = $2,
                   completed_at = now(),
                   updated_at = now()
             WHERE id = $1
            RETURNING id, template_id, status, input_data, input_path, output_path,
                      work_identifier, error_text, created_at, updated_at,
                      started_at, completed_at
            "#,
        )
        .bind(id)
        .bind(error_text)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_job(row)
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<Option<DocumentJob>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE document_jobs
               SET status = 'pending',
                   error_text = NULL,
                   started_at = NULL,
                   completed_at = NULL,
                   updated_at = now()
             WHERE id = $1
               AND status = 'failed'
            RETURNING id, template_id, status, input_data, input_path, output_path,
                      work_identifier, error_text, created_at, updated_at,
                      started_at, completed_at
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_job(row)
    }

    async fn record_input_artifact(&self, id: Uuid, path: &str) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
               SET input_path = $2,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(path)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn record_work_identifier(&self, id: Uuid, work_id: &str) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
               SET work_identifier = $2,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(work_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn list_failed_since(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<DocumentJob>, RepoError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, template_id, status, input_data, input_path, output_path,
                   work_identifier, error_text, created_at, updated_at,
                   started_at, completed_at
              FROM document_jobs
             WHERE status = 'failed'
               AND updated_at >= $1
             ORDER BY updated_at DESC
             LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit.clamp(1, 200) as i64)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(DocumentJob::try_from(row)?);
        }
        Ok(jobs)
    }

    async fn enqueue_work(&self, unit: NewQueueUnit) -> Result<String, RepoError> {
        let row = sqlx::query_as::<_, WorkIdRow>(
            r#"
            SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id AS id
            "#,
        )
        .bind(unit.job_type.as_str())
        .bind(&unit.payload)
        .bind("Pending")
        .bind(unit.run_at)
        .bind(unit.max_attempts)
        .bind(0_i32)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.id)
    }

    async fn ping(&self) -> Result<(), RepoError> {
        self.health_check().await.map_err(map_sqlx_error)
    }
}
