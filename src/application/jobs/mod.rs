mod context;
mod render;
mod sweep;

pub use context::{JobWorkerContext, job_failed};
pub use render::{RenderJobError, process_render_document_job};
pub use sweep::{RetrySweepContext, RetrySweepJob, process_retry_sweep_job};
