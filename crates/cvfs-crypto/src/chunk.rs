//! Per-chunk encryption/decryption
//!
//! Encrypted chunk format (V2, binary):
//! ```text
//! [12 bytes: random IV][N bytes: AES-256-GCM ciphertext][16 bytes: GCM tag]
//! ```
//!
//! No associated data: chunk position is not bound into the tag, matching the
//! remote store's existing objects.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use cvfs_core::EncryptionVersion;
use rand::RngCore;

use crate::error::CryptoError;
use crate::keys::FileKey;
use crate::{legacy, IV_SIZE, TAG_SIZE, V2_OVERHEAD};

/// Encrypt a single chunk. Always produces V2.
///
/// Returns: `[12-byte IV][ciphertext][16-byte tag]`
pub fn encrypt_chunk(plaintext: &[u8], key: &FileKey) -> Result<Vec<u8>, CryptoError> {
    encrypt_v2(plaintext, key.as_bytes())
}

/// Decrypt a single chunk written in `version` format.
///
/// Fails with [`CryptoError::Integrity`] on any authentication failure; never
/// returns partial plaintext.
pub fn decrypt_chunk(
    encrypted: &[u8],
    key: &FileKey,
    version: EncryptionVersion,
) -> Result<Vec<u8>, CryptoError> {
    match version {
        EncryptionVersion::V2 => decrypt_v2(encrypted, key.as_bytes()),
        EncryptionVersion::V1 => legacy::decrypt_v1(encrypted, key.as_bytes()),
    }
}

/// Whole-buffer variant for data smaller than one chunk. Same wire format.
pub fn encrypt_data(plaintext: &[u8], key: &FileKey) -> Result<Vec<u8>, CryptoError> {
    encrypt_chunk(plaintext, key)
}

/// Whole-buffer variant of [`decrypt_chunk`].
pub fn decrypt_data(
    encrypted: &[u8],
    key: &FileKey,
    version: EncryptionVersion,
) -> Result<Vec<u8>, CryptoError> {
    decrypt_chunk(encrypted, key, version)
}

pub(crate) fn encrypt_v2(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    // aes-gcm appends the tag to the ciphertext
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Integrity(format!("chunk encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(IV_SIZE + sealed.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub(crate) fn decrypt_v2(encrypted: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if encrypted.len() < V2_OVERHEAD {
        return Err(CryptoError::Integrity(format!(
            "encrypted chunk too short: {} bytes (minimum {})",
            encrypted.len(),
            IV_SIZE + TAG_SIZE
        )));
    }

    let (iv, sealed) = encrypted.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| {
            CryptoError::Integrity(
                "chunk authentication failed: invalid key or corrupted data".into(),
            )
        })
}
