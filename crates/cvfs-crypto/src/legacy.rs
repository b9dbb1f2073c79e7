//! Legacy V1 chunk decoding (AES-256-CBC, PKCS#7)
//!
//! Three sub-formats exist in old data, told apart by the first 16 bytes:
//! - binary OpenSSL salted: `"Salted__" ‖ salt(8) ‖ ciphertext`
//! - the same, base64-encoded (starts with `"U2FsdGVk"`)
//! - raw ciphertext, key = file key bytes, IV = first 16 key bytes
//!
//! Salted formats derive key and IV with OpenSSL's `EVP_BytesToKey` (MD5, one
//! round) using the file key bytes as the password. Writing V1 is not
//! supported.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use zeroize::Zeroize;

use crate::error::CryptoError;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SALTED_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const CBC_IV_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V1Format {
    Salted,
    SaltedBase64,
    Raw,
}

/// Inspect the leading bytes to pick a V1 sub-format.
pub fn classify(data: &[u8]) -> V1Format {
    let head = String::from_utf8_lossy(&data[..data.len().min(16)]);
    if head.contains("Salted") {
        V1Format::Salted
    } else if head.contains("U2FsdGVk") {
        V1Format::SaltedBase64
    } else {
        V1Format::Raw
    }
}

pub fn decrypt_v1(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let format = classify(data);
    tracing::trace!(?format, len = data.len(), "decoding legacy chunk");
    match format {
        V1Format::Salted => decrypt_salted(data, key),
        V1Format::SaltedBase64 => {
            let text = std::str::from_utf8(data)
                .map_err(|_| CryptoError::Integrity("legacy base64 chunk is not UTF-8".into()))?;
            let decoded = STANDARD
                .decode(text.trim())
                .map_err(|e| CryptoError::Integrity(format!("legacy base64 chunk: {e}")))?;
            decrypt_salted(&decoded, key)
        }
        V1Format::Raw => {
            let iv: [u8; CBC_IV_LEN] = key[..CBC_IV_LEN]
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("key shorter than IV".into()))?;
            cbc_decrypt(data, key, &iv)
        }
    }
}

fn decrypt_salted(data: &[u8], password: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let header = SALTED_MAGIC.len() + SALT_LEN;
    if data.len() < header || &data[..SALTED_MAGIC.len()] != SALTED_MAGIC {
        return Err(CryptoError::Integrity(
            "legacy salted chunk has a malformed header".into(),
        ));
    }
    let salt = &data[SALTED_MAGIC.len()..header];

    let mut derived = evp_bytes_to_key(password, salt);
    let mut key = [0u8; 32];
    let mut iv = [0u8; CBC_IV_LEN];
    key.copy_from_slice(&derived[..32]);
    iv.copy_from_slice(&derived[32..48]);
    derived.zeroize();

    let result = cbc_decrypt(&data[header..], &key, &iv);
    key.zeroize();
    result
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration, producing
/// 48 bytes (32 key + 16 IV).
pub(crate) fn evp_bytes_to_key(password: &[u8], salt: &[u8]) -> [u8; 48] {
    let mut out = [0u8; 48];
    let mut filled = 0;
    let mut prev: Option<[u8; 16]> = None;

    while filled < out.len() {
        let mut ctx = md5::Context::new();
        if let Some(p) = prev {
            ctx.consume(p);
        }
        ctx.consume(password);
        ctx.consume(salt);
        let digest: [u8; 16] = ctx.compute().0;

        let take = (out.len() - filled).min(digest.len());
        out[filled..filled + take].copy_from_slice(&digest[..take]);
        filled += take;
        prev = Some(digest);
    }
    out
}

fn cbc_decrypt(
    ciphertext: &[u8],
    key: &[u8; 32],
    iv: &[u8; CBC_IV_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % CBC_IV_LEN != 0 {
        return Err(CryptoError::Integrity(format!(
            "legacy ciphertext length {} is not a positive multiple of the block size",
            ciphertext.len()
        )));
    }
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| CryptoError::InvalidKey(format!("legacy key/IV: {e}")))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Integrity("legacy chunk padding check failed".into()))
}
