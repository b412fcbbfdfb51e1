use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::application::dispatch::Dispatcher;
use crate::application::engine::LifecycleEngine;

/// Shared context passed to render workers so they can drive the lifecycle
/// engine and schedule explicit retries.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub engine: Arc<LifecycleEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub max_retries: u32,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
