//! Boundary error types.
//!
//! Internal plumbing returns `anyhow::Result`; these typed errors mark the
//! points where the workflow decides between rejecting an operation
//! (malformed input) and failing it (an upstream service is unavailable).

use thiserror::Error;

/// Input that is rejected before it enters the pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid user id {0:?}: use 1-64 ASCII letters, digits, '_', '-' or '.'")]
    InvalidUserId(String),

    #[error("unsupported file type: {0:?}")]
    UnsupportedFileType(String),

    #[error("no text could be extracted from {0}")]
    EmptyText(String),

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("could not read {filename}: {reason}")]
    Unreadable { filename: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    /// The language model, embedding provider or database failed.
    #[error("{service} unavailable: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
}

impl PipelineError {
    pub fn database(err: anyhow::Error) -> Self {
        PipelineError::Upstream {
            service: "database",
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
