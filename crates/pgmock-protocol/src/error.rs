use std::io::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl ProtocolError {
    /// True when the peer closed the stream before a read could complete.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(err) if err.kind() == ErrorKind::UnexpectedEof)
    }
}
