//! Error types for sources, transformation and pipeline orchestration.

use meridian_common::{ErrorKind, MeridianError, RecordError};
use thiserror::Error;

// ── Source errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SourceError {
    /// Retryable: transport failure, 5xx, 429.
    #[error("Transient source error: {0}")]
    Transient(String),

    #[error("Source rejected request ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("Source gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Could not decode source response: {0}")]
    Decode(String),

    #[error("Source configuration error: {0}")]
    Config(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Transient(_) | SourceError::Exhausted { .. } => ErrorKind::TransientIo,
            SourceError::Decode(_)                                    => ErrorKind::Malformed,
            SourceError::Permanent { .. } | SourceError::Config(_)    => ErrorKind::Fatal,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return SourceError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                SourceError::Transient(err.to_string())
            }
            Some(status) => SourceError::Permanent {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => SourceError::Transient(err.to_string()),
        }
    }
}

// ── Transform errors ──────────────────────────────────────────────────────────

/// Why a source record could not become a canonical entity. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("missing key field `{field}`")]
    MissingKey { field: String },

    #[error("natural key {key} does not match the {entity_type} identifier format")]
    InvalidKey { key: String, entity_type: String },

    #[error("required field `{field}` is missing for {key}")]
    MissingRequired { key: String, field: String },
}

impl TransformError {
    pub fn natural_key(&self) -> Option<&str> {
        match self {
            TransformError::MissingKey { .. } => None,
            TransformError::InvalidKey { key, .. } | TransformError::MissingRequired { key, .. } => {
                Some(key)
            }
        }
    }

    pub fn to_record_error(&self) -> RecordError {
        RecordError::new(self.natural_key(), ErrorKind::Validation, self.to_string())
    }
}

impl From<TransformError> for MeridianError {
    fn from(err: TransformError) -> Self {
        MeridianError::validation(err.natural_key(), err.to_string())
    }
}

// ── Pipeline errors ───────────────────────────────────────────────────────────

/// Errors that make a run return no report at all.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid run configuration: {0}")]
    Config(#[from] MeridianError),

    #[error("Both stores are unavailable")]
    AllStoresUnavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
