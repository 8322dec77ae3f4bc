use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum UnifyError {
    #[error("missing config file kira-unify.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown transform {name:?} for field {field:?}")]
    UnknownTransform { field: String, name: String },

    #[error("invalid mapping for field {field:?}: {reason}")]
    InvalidMapping { field: String, reason: String },

    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("invalid patient id: {0}")]
    InvalidPatientId(String),

    #[error("invalid gene id: {0}")]
    InvalidGeneId(String),

    #[error("malformed table {path}: {reason}")]
    MalformedTable { path: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("gene resolver request failed: {0}")]
    ResolverHttp(String),

    #[error("gene resolver timed out: {0}")]
    ResolverTimeout(String),

    #[error("gene resolver returned status {status}: {message}")]
    ResolverStatus { status: u16, message: String },

    #[error("unexpected gene resolver response: {0}")]
    ResolverResponse(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl UnifyError {
    pub fn is_resolver(&self) -> bool {
        matches!(
            self,
            UnifyError::ResolverHttp(_)
                | UnifyError::ResolverTimeout(_)
                | UnifyError::ResolverStatus { .. }
                | UnifyError::ResolverResponse(_)
        )
    }
}
