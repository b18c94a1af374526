use sea_orm::DbErr;
use thiserror::Error;

use crate::translator::DockerfileError;

/// Failure of a call to the job runner or the registry.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("kubernetes: {0}")]
    Kube(#[from] kube::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("call timed out after {0}s")]
    Timeout(u64),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Error kinds surfaced by the build lifecycle.
///
/// Store and gateway errors are logged where they happen and folded into
/// one of these; callers never see raw database or cluster errors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DbErr> for BuildError {
    fn from(err: DbErr) -> Self {
        tracing::error!(error = %err, "Store operation failed");
        BuildError::Internal(err.to_string())
    }
}

impl From<DockerfileError> for BuildError {
    fn from(err: DockerfileError) -> Self {
        BuildError::Validation(err.to_string())
    }
}

impl From<common::ReferenceError> for BuildError {
    fn from(err: common::ReferenceError) -> Self {
        BuildError::Validation(err.to_string())
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
