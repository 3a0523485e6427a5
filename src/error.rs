use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid password (volume key checksum mismatch)")]
    InvalidPassword,

    #[error("Invalid volume configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported volume option: {0}")]
    Unsupported(String),

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Checksum mismatch: {0}")]
    Checksum(String),
}

impl EncfsError {
    /// Shorthand for malformed-structure failures during decode.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        EncfsError::CorruptData(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        EncfsError::InvalidConfig(msg.into())
    }
}

/// Streams implement `std::io` traits, so decode failures have to travel
/// through `io::Error`. Provider errors pass through untouched.
impl From<EncfsError> for std::io::Error {
    fn from(err: EncfsError) -> Self {
        match err {
            EncfsError::Io(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
