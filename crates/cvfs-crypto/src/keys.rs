//! File keys and the metadata key

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::KEY_SIZE;

/// A per-file 256-bit encryption key. Zeroized on drop.
///
/// Keys are plain bytes; generated keys happen to be ASCII alphanumeric so the
/// legacy formats, which treat the key as a UTF-8 string, see the same bytes.
#[derive(Clone)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "file key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encoding used inside sealed file metadata.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let mut decoded = STANDARD
            .decode(s)
            .map_err(|e| CryptoError::InvalidKey(format!("file key base64: {e}")))?;
        let key = Self::from_slice(&decoded);
        decoded.zeroize();
        key
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random file key of 32 alphanumeric characters.
pub fn generate_file_key() -> FileKey {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; KEY_SIZE];
    for b in bytes.iter_mut() {
        *b = rng.sample(Alphanumeric);
    }
    FileKey::from_bytes(bytes)
}

/// Key that seals item metadata before it leaves the client. Zeroized on drop.
#[derive(Clone)]
pub struct MetadataKey {
    bytes: [u8; KEY_SIZE],
}

impl MetadataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Parse 64 hex characters (surrounding whitespace ignored).
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut decoded = hex::decode(s.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("metadata key hex: {e}")))?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKey(format!(
                "metadata key must be {KEY_SIZE} bytes, got {len}"
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for MetadataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
