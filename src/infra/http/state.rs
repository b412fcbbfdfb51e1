use std::sync::Arc;

use crate::application::documents::DocumentService;
use crate::application::repos::JobStore;

#[derive(Clone)]
pub struct ApiState {
    pub documents: Arc<DocumentService>,
    pub store: Arc<dyn JobStore>,
}
