//! HTTP surface for the document job API.

mod error;
mod handlers;
mod middleware;
mod state;

pub use error::ApiError;
pub use state::ApiState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post},
};

use middleware::{log_responses, set_request_context};

pub fn build_router(state: ApiState, upload_body_limit: usize) -> Router {
    Router::new()
        .route(
            "/upload",
            post(handlers::submit_job).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/status/{job_id}", get(handlers::job_status))
        .route("/download/{job_id}", get(handlers::download_document))
        .route("/jobs", get(handlers::list_jobs))
        .route("/delete/{job_id}", delete(handlers::delete_job))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
