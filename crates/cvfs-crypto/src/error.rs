use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Tag mismatch, bad padding, or input too short to be a ciphertext.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("metadata encoding: {0}")]
    Encoding(String),
}

impl From<CryptoError> for cvfs_core::CvfsError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Integrity(msg) => cvfs_core::CvfsError::Integrity(msg),
            CryptoError::Encoding(msg) => cvfs_core::CvfsError::Integrity(msg),
            CryptoError::Unsupported(msg) => cvfs_core::CvfsError::Protocol(msg),
            CryptoError::InvalidKey(msg) => cvfs_core::CvfsError::Config(msg),
        }
    }
}
