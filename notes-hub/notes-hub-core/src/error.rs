use thiserror::Error;
use uuid::Uuid;

/// Failures reported by document operations.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("document {0} not found")]
    NotFound(Uuid),

    #[error("unauthorized")]
    Unauthorized,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type DocResult<T> = std::result::Result<T, DocError>;
