use thiserror::Error;

pub type CvfsResult<T> = Result<T, CvfsError>;

#[derive(Debug, Error)]
pub enum CvfsError {
    /// Authentication tag mismatch, bad padding, or malformed ciphertext.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Timeout, connection reset, or a non-success response from the remote.
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("transfer failed after {attempts} attempt(s): {last_error}")]
    TransferFailed { attempts: u32, last_error: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The remote answered with data that contradicts earlier answers.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CvfsError {
    /// Only transient network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CvfsError::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CvfsError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CvfsError::NotFound(_))
    }
}
