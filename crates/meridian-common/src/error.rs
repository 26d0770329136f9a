use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeridianError {
    /// Retryable I/O failure at the source boundary.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Validation error for {natural_key:?}: {reason}")]
    Validation {
        natural_key: Option<String>,
        reason: String,
    },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    FatalConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MeridianError {
    pub fn validation(natural_key: Option<&str>, reason: impl Into<String>) -> Self {
        MeridianError::Validation {
            natural_key: natural_key.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MeridianError::TransientIo(_) => ErrorKind::TransientIo,
            MeridianError::Validation { .. } => ErrorKind::Validation,
            MeridianError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            MeridianError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            MeridianError::Serialization(_) => ErrorKind::Malformed,
            MeridianError::FatalConfig(_) | MeridianError::Other(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, MeridianError>;

/// Error classes carried into write results and the run report.
///
/// A natural-key conflict is never one of these: it is reported as an
/// update by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientIo,
    Validation,
    ConstraintViolation,
    Malformed,
    StoreUnavailable,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo         => "transient_io",
            ErrorKind::Validation          => "validation",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Malformed           => "malformed",
            ErrorKind::StoreUnavailable    => "store_unavailable",
            ErrorKind::Fatal               => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single record that failed to load or transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub natural_key: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl RecordError {
    pub fn new(natural_key: Option<&str>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            natural_key: natural_key.map(str::to_string),
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_kind() {
        let err = MeridianError::validation(Some("OMIM:1"), "missing name");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("missing name"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::StoreUnavailable).unwrap();
        assert_eq!(json, "\"store_unavailable\"");
    }
}
