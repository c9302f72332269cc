use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("key not present in blob")]
    KeyNotFound,
    #[error("failed to encode blob: {0}")]
    EncodeFailed(String),
    #[error("failed to decode blob: {0}")]
    DecodeFailed(String),
}
