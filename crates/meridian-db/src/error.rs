//! Store error types.

use meridian_common::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// Connection lost, pool exhausted or closed, server down.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store rejected the write for a reason other than a natural-key conflict.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Value could not be represented in the store.
    #[error("Malformed value: {0}")]
    Malformed(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("LanceDB error: {0}")]
    LanceDb(String),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DbError {
    /// Classify the failure for write results and the run report.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Unavailable(_)                       => ErrorKind::StoreUnavailable,
            DbError::Constraint(_)                        => ErrorKind::ConstraintViolation,
            DbError::Malformed(_) | DbError::Serialization(_) | DbError::Arrow(_) => ErrorKind::Malformed,
            DbError::Io(_)                                => ErrorKind::StoreUnavailable,
            DbError::Config(_)                            => ErrorKind::Fatal,
            DbError::Query(_) | DbError::LanceDb(_)       => ErrorKind::ConstraintViolation,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return DbError::Unavailable(err.to_string());
        }
        match err.code().map(|c| c.code()) {
            // Class 23: integrity constraint violation
            Some(code) if code.starts_with("23") => DbError::Constraint(err.to_string()),
            // Class 22: data exception
            Some(code) if code.starts_with("22") => DbError::Malformed(err.to_string()),
            // Class 08: connection exception, 57P: operator intervention
            Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                DbError::Unavailable(err.to_string())
            }
            Some(_) => DbError::Query(err.to_string()),
            // No SQLSTATE means the failure happened below the protocol layer.
            None => DbError::Unavailable(err.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => e.into(),
            other => DbError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<deadpool_postgres::CreatePoolError> for DbError {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        DbError::Config(err.to_string())
    }
}

/// True when an I/O error sits anywhere in the source chain.
#[cfg(any(feature = "lance", test))]
pub(crate) fn has_io_source(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<std::io::Error>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(feature = "lance")]
impl From<lancedb::Error> for DbError {
    fn from(err: lancedb::Error) -> Self {
        match &err {
            lancedb::Error::Runtime { .. }
            | lancedb::Error::CreateDir { .. }
            | lancedb::Error::ObjectStore { .. } => DbError::Unavailable(err.to_string()),
            lancedb::Error::Schema { .. }
            | lancedb::Error::InvalidInput { .. }
            | lancedb::Error::Arrow { .. } => DbError::Malformed(err.to_string()),
            _ if has_io_source(&err) => DbError::Unavailable(err.to_string()),
            _ => DbError::LanceDb(err.to_string()),
        }
    }
}

#[cfg(feature = "lance")]
impl From<arrow_schema::ArrowError> for DbError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        DbError::Arrow(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(DbError::Unavailable("down".into()).kind(), ErrorKind::StoreUnavailable);
        assert_eq!(DbError::Constraint("fk".into()).kind(), ErrorKind::ConstraintViolation);
        assert_eq!(DbError::Malformed("nan".into()).kind(), ErrorKind::Malformed);
        assert!(DbError::Unavailable("x".into()).is_unavailable());
        assert!(!DbError::Query("x".into()).is_unavailable());
        assert_eq!(DbError::Arrow("bad column".into()).kind(), ErrorKind::Malformed);
        assert_eq!(DbError::LanceDb("commit conflict".into()).kind(), ErrorKind::ConstraintViolation);
    }

    #[derive(Debug, Error)]
    #[error("table write failed")]
    struct Wrapped(#[source] std::io::Error);

    #[test]
    fn test_io_source_found_through_wrapping() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(has_io_source(&Wrapped(io)));
        assert!(!has_io_source(&DbError::Query("x".into())));
    }

    #[cfg(feature = "lance")]
    #[test]
    fn test_lance_errors_classified() {
        let lost: DbError = lancedb::Error::Runtime { message: "connection lost".into() }.into();
        assert!(lost.is_unavailable());

        let schema: DbError = lancedb::Error::Schema { message: "no such field".into() }.into();
        assert_eq!(schema.kind(), ErrorKind::Malformed);
    }
}
