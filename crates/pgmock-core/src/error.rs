use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgMockError {
    #[error("no response registered for fingerprint {0}")]
    Lookup(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}
