mod support;

use std::io::Read;
use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;
use zip::ZipArchive;

use stampa::application::dispatch::RenderJobPayload;
use stampa::application::documents::{SubmitCommand, SubmitError, SubmittedInput};
use stampa::application::repos::JobQueryFilter;
use stampa::application::retry::RetryError;
use stampa::domain::entities::DocumentJob;
use stampa::domain::types::JobStatus;

use support::MAX_RETRIES;

// ============ Happy path ============

#[tokio::test]
async fn submitted_job_renders_to_completion() {
    let harness = support::harness();
    let receipt = harness
        .submit(
            "contract",
            SubmittedInput::Inline(r#"{"client_name":"Ada Lovelace","total":1250}"#.to_string()),
        )
        .await;

    assert_eq!(receipt.job.status, JobStatus::Pending);
    assert_eq!(receipt.work_id, "work-1");

    let payload = harness.payload_at(0).await;
    assert_eq!(payload.job_id, receipt.job.id);
    assert_eq!(payload.attempt, 0);

    harness.deliver(payload).await.expect("delivery succeeds");

    let job = harness.job(receipt.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(job.error_text, None);

    let output_path = job.output_path.expect("output reference bound");
    assert!(output_path.starts_with("generated/"));
    assert!(output_path.ends_with(&format!("{}.pdf", receipt.job.id)));

    let bytes = harness
        .storage
        .read(&output_path)
        .await
        .expect("artifact exists");
    assert!(bytes.starts_with(b"%PDF-1.5"));
}

#[tokio::test]
async fn office_render_fills_and_escapes_placeholders() {
    let harness = support::harness();
    let receipt = harness
        .submit(
            "docx_contract",
            SubmittedInput::Inline(r#"{"client_name":"Ada & Co"}"#.to_string()),
        )
        .await;

    harness
        .deliver(harness.payload_at(0).await)
        .await
        .expect("delivery succeeds");

    let job = harness.job(receipt.job.id).await;
    let output_path = job.output_path.expect("output reference bound");
    assert!(output_path.ends_with(".docx"));

    let bytes = harness.storage.read(&output_path).await.expect("artifact");
    let mut archive =
        ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).expect("output is an archive");
    let mut entry = archive
        .by_name("word/document.xml")
        .expect("document part present");
    let mut xml = String::new();
    entry.read_to_string(&mut xml).expect("document part reads");

    assert!(xml.contains("Client: Ada &amp; Co"));
    assert!(!xml.contains("{{"));
}

#[tokio::test]
async fn passthrough_report_round_trips_the_input() {
    let harness = support::harness();
    let input = json!({"client_name": "Ada", "total": 12.5, "signed": true});
    let receipt = harness
        .submit("report", SubmittedInput::Inline(input.to_string()))
        .await;

    harness
        .deliver(harness.payload_at(0).await)
        .await
        .expect("delivery succeeds");

    let document = harness
        .documents
        .download(receipt.job.id)
        .await
        .expect("completed job downloads");
    assert_eq!(document.content_type, "application/json");
    assert_eq!(document.filename, format!("{}.json", receipt.job.id));

    let parsed: Value = serde_json::from_slice(&document.bytes).expect("output is json");
    assert_eq!(parsed["template"], "report");
    assert_eq!(parsed["input_data"], input);
    assert_eq!(parsed["summary"]["fields_count"], 3);
    assert_eq!(parsed["summary"]["has_numbers"], true);
    assert_eq!(parsed["summary"]["has_strings"], true);
    assert!(parsed["generated_at"].as_str().is_some());

    let mut keys: Vec<&str> = parsed["summary"]["keys"]
        .as_array()
        .expect("keys listed")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    keys.sort_unstable();
    assert_eq!(keys, ["client_name", "signed", "total"]);
}

#[tokio::test]
async fn submission_without_payload_renders_an_empty_object() {
    let harness = support::harness();
    let receipt = harness.submit("report", SubmittedInput::Empty).await;
    assert_eq!(receipt.job.input_data, json!({}));

    harness
        .deliver(harness.payload_at(0).await)
        .await
        .expect("delivery succeeds");

    let document = harness
        .documents
        .download(receipt.job.id)
        .await
        .expect("download");
    let parsed: Value = serde_json::from_slice(&document.bytes).expect("json");
    assert_eq!(parsed["input_data"], json!({}));
    assert_eq!(parsed["summary"]["fields_count"], 0);
}

#[tokio::test]
async fn unsupported_template_is_rejected_before_any_row_exists() {
    let harness = support::harness();
    let err = harness
        .documents
        .submit(SubmitCommand {
            template_id: "letterhead".to_string(),
            input: SubmittedInput::Empty,
        })
        .await
        .expect_err("unknown template is rejected");

    match err {
        SubmitError::UnsupportedTemplate {
            template_id,
            supported,
        } => {
            assert_eq!(template_id, "letterhead");
            assert_eq!(supported, ["broken", "contract", "docx_contract", "report"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(harness.store.queued_units().await.is_empty());
    let jobs = harness
        .documents
        .list(&JobQueryFilter::default(), 10)
        .await
        .expect("list");
    assert!(jobs.is_empty());
}

// ============ Automatic retries ============

#[tokio::test]
async fn failing_render_retries_until_the_budget_is_exhausted() {
    let harness = support::harness();
    let receipt = harness.submit("broken", SubmittedInput::Empty).await;

    let mut first_started_at = None;
    for attempt in 0..MAX_RETRIES {
        let payload = harness.payload_at(attempt as usize).await;
        assert_eq!(payload.attempt, attempt);

        harness
            .deliver(payload)
            .await
            .expect("unit is consumed and a retry scheduled");

        let job = harness.job(receipt.job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(
            job.error_text
                .as_deref()
                .unwrap_or_default()
                .contains("absent.html")
        );
        if attempt == 0 {
            first_started_at = job.started_at;
            assert!(first_started_at.is_some());
        } else {
            assert_eq!(job.started_at, first_started_at);
        }

        let units = harness.store.queued_units().await;
        assert_eq!(units.len(), attempt as usize + 2);
    }

    // The fourth execution exhausts the budget and surfaces the failure.
    let last = harness.payload_at(MAX_RETRIES as usize).await;
    assert_eq!(last.attempt, MAX_RETRIES);
    assert!(harness.deliver(last).await.is_err());

    let units = harness.store.queued_units().await;
    assert_eq!(units.len(), MAX_RETRIES as usize + 1, "no further unit");

    // Every retry unit is deferred by at least the configured delay.
    let delay = time::Duration::seconds(support::RETRY_DELAY.as_secs() as i64);
    let first_run = units[0].unit.run_at;
    for unit in &units[1..] {
        assert!(unit.unit.run_at - first_run >= delay);
    }

    let job = harness.job(receipt.job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_text.expect("last error kept").contains("absent.html"));
}

#[tokio::test]
async fn unit_for_a_deleted_job_is_consumed_quietly() {
    let harness = support::harness();
    let payload = RenderJobPayload {
        job_id: Uuid::new_v4(),
        attempt: 0,
        source: harness.catalog.resolve("contract"),
    };

    harness
        .deliver(payload)
        .await
        .expect("missing row consumes the unit");
    assert!(harness.store.queued_units().await.is_empty());
}

#[tokio::test]
async fn redelivered_unit_replaces_the_artifact_in_place() {
    let harness = support::harness();
    let receipt = harness
        .submit(
            "report",
            SubmittedInput::Inline(r#"{"client_name":"Ada"}"#.to_string()),
        )
        .await;

    let payload = harness.payload_at(0).await;
    harness
        .deliver(payload.clone())
        .await
        .expect("first delivery");
    let first = harness.job(receipt.job.id).await;
    let first_path = first.output_path.clone().expect("output bound");
    let first_doc: Value = serde_json::from_slice(
        &harness.storage.read(&first_path).await.expect("artifact"),
    )
    .expect("json");

    harness.deliver(payload).await.expect("second delivery");
    let second = harness.job(receipt.job.id).await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.output_path.as_deref(), Some(first_path.as_str()));

    let second_doc: Value = serde_json::from_slice(
        &harness.storage.read(&first_path).await.expect("artifact"),
    )
    .expect("json");
    assert_eq!(second_doc["input_data"], first_doc["input_data"]);
    assert_eq!(second_doc["summary"], first_doc["summary"]);

    // The redelivery itself enqueued nothing new.
    assert_eq!(harness.store.queued_units().await.len(), 1);
}

// ============ Manual retry ============

#[tokio::test]
async fn manual_retry_resets_lifecycle_fields_and_redispatches() {
    let harness = support::harness();
    let receipt = harness.submit("broken", SubmittedInput::Empty).await;
    harness
        .deliver(harness.payload_at(0).await)
        .await
        .expect("failure schedules an automatic retry");

    let failed = harness.job(receipt.job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let old_work = failed.work_identifier.clone().expect("work recorded");

    let retried = harness
        .retry
        .retry_job(receipt.job.id)
        .await
        .expect("failed job is retryable");
    assert_eq!(retried.job.status, JobStatus::Pending);
    assert_eq!(retried.job.error_text, None);
    assert_eq!(retried.job.started_at, None);
    assert_eq!(retried.job.completed_at, None);
    assert_ne!(retried.work_id, old_work);

    let job = harness.job(receipt.job.id).await;
    assert_eq!(job.work_identifier.as_deref(), Some(retried.work_id.as_str()));

    // A fresh dispatch restarts the attempt counter.
    let payload = harness.payload_at(2).await;
    assert_eq!(payload.job_id, receipt.job.id);
    assert_eq!(payload.attempt, 0);
}

#[tokio::test]
async fn retry_after_restoring_the_template_completes() {
    let harness = support::harness();
    let receipt = harness
        .submit(
            "broken",
            SubmittedInput::Inline(r#"{"client_name":"Ada"}"#.to_string()),
        )
        .await;
    harness
        .deliver(harness.payload_at(0).await)
        .await
        .expect("first attempt fails");
    assert_eq!(harness.job(receipt.job.id).await.status, JobStatus::Failed);

    std::fs::write(
        harness.templates_dir.path().join("absent.html"),
        "<p>Recovered for {{ client_name }}</p>",
    )
    .expect("restore template");

    harness
        .retry
        .retry_job(receipt.job.id)
        .await
        .expect("retry accepted");
    harness
        .deliver(harness.payload_at(2).await)
        .await
        .expect("render now succeeds");

    let job = harness.job(receipt.job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error_text, None);
    assert!(job.started_at.is_some());
    assert!(job.output_path.expect("output bound").ends_with(".pdf"));
}

#[tokio::test]
async fn retry_requires_a_failed_job() {
    let harness = support::harness();
    let receipt = harness.submit("contract", SubmittedInput::Empty).await;

    match harness.retry.retry_job(receipt.job.id).await {
        Err(RetryError::NotRetryable { status }) => assert_eq!(status, JobStatus::Pending),
        other => panic!("expected NotRetryable, got {other:?}"),
    }

    match harness.retry.retry_job(Uuid::new_v4()).await {
        Err(RetryError::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

// ============ Failed-job sweep ============

fn failed_job(template_id: &str, updated_at: OffsetDateTime) -> DocumentJob {
    DocumentJob {
        id: Uuid::new_v4(),
        template_id: template_id.to_string(),
        status: JobStatus::Failed,
        input_data: json!({}),
        input_path: None,
        output_path: None,
        work_identifier: None,
        error_text: Some("template resource `absent.html` not found".to_string()),
        created_at: updated_at - time::Duration::minutes(10),
        updated_at,
        started_at: Some(updated_at - time::Duration::minutes(9)),
        completed_at: Some(updated_at),
    }
}

#[tokio::test]
async fn sweep_retries_recent_failures_newest_first_within_limit() {
    let harness = support::harness();
    let now = OffsetDateTime::now_utc();
    let fresh = failed_job("contract", now - time::Duration::hours(1));
    let mid = failed_job("contract", now - time::Duration::hours(2));
    let older = failed_job("contract", now - time::Duration::hours(3));
    let stale = failed_job("contract", now - time::Duration::hours(48));
    for job in [&fresh, &mid, &older, &stale] {
        harness.store.seed(job.clone()).await;
    }

    let window = Duration::from_secs(24 * 3600);
    let report = harness.retry.sweep(window, 2).await.expect("sweep");
    assert_eq!(report.scanned, 2);
    assert_eq!(report.retried, 2);

    assert_eq!(harness.job(fresh.id).await.status, JobStatus::Pending);
    assert_eq!(harness.job(mid.id).await.status, JobStatus::Pending);
    assert_eq!(harness.job(older.id).await.status, JobStatus::Failed);
    assert_eq!(harness.job(stale.id).await.status, JobStatus::Failed);

    // A second pass picks up what the limit left behind; the job outside
    // the window stays untouched.
    let report = harness.retry.sweep(window, 10).await.expect("sweep");
    assert_eq!(report.retried, 1);
    assert_eq!(harness.job(older.id).await.status, JobStatus::Pending);
    assert_eq!(harness.job(stale.id).await.status, JobStatus::Failed);
}
