//! Sealed item metadata
//!
//! Item metadata (name, size, mime, file key, timestamps, hash) never leaves
//! the client in the clear. It is serialized to JSON, encrypted with the
//! metadata key using the V2 chunk format, and base64-encoded behind a
//! version tag:
//!
//! ```text
//! "002" ‖ base64( IV(12) ‖ ciphertext ‖ tag(16) )
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::chunk::{decrypt_v2, encrypt_v2};
use crate::error::CryptoError;
use crate::keys::MetadataKey;

const SEALED_PREFIX: &str = "002";

/// Serialize and encrypt `value` with the metadata key.
pub fn seal_metadata<T: Serialize>(key: &MetadataKey, value: &T) -> Result<String, CryptoError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| CryptoError::Encoding(format!("metadata serialization: {e}")))?;
    let sealed = encrypt_v2(&json, key.as_bytes())?;
    Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(sealed)))
}

/// Decrypt and deserialize metadata produced by [`seal_metadata`].
pub fn open_metadata<T: DeserializeOwned>(key: &MetadataKey, sealed: &str) -> Result<T, CryptoError> {
    let body = sealed.strip_prefix(SEALED_PREFIX).ok_or_else(|| {
        CryptoError::Unsupported(format!(
            "sealed metadata has unknown version tag {:?}",
            sealed.get(..3).unwrap_or(sealed)
        ))
    })?;
    let raw = STANDARD
        .decode(body)
        .map_err(|e| CryptoError::Encoding(format!("metadata base64: {e}")))?;
    let json = decrypt_v2(&raw, key.as_bytes())?;
    serde_json::from_slice(&json)
        .map_err(|e| CryptoError::Encoding(format!("metadata deserialization: {e}")))
}
