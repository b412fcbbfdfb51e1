use thiserror::Error;

use crate::application::repos::RepoError;
use crate::infra::error::InfraError;

/// Process-level failures surfaced by the binary entry points. Request-level
/// failures are mapped to API responses in the HTTP layer instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
