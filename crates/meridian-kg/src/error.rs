use meridian_db::DbError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KgError>;

#[derive(Debug, Error)]
pub enum KgError {
    #[error("Store error: {0}")]
    Db(#[from] DbError),

    #[error("Mapping file error at line {line}: {message}")]
    Mapping { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No store is available to resolve association endpoints")]
    NoStores,
}
