//! cvfs-crypto: client-side chunk codec
//!
//! Chunk formats:
//! ```text
//! V2 (current):  [12 bytes: random IV][N bytes: AES-256-GCM ciphertext][16 bytes: tag]
//! V1 (legacy):   AES-256-CBC, one of three sub-formats detected from the first bytes
//!                  "Salted__" ‖ salt(8) ‖ ct      key/IV from EVP_BytesToKey(MD5)
//!                  base64 of the above            ("U2FsdGVk" prefix)
//!                  raw ct                         key = file key, IV = key[0..16]
//! ```
//!
//! Key hierarchy (only the leaves live here; obtaining the metadata key is
//! the caller's business):
//! ```text
//! Metadata Key (256-bit, caller supplied)
//!   └── sealed item metadata: "002" ‖ base64(V2(json))
//! File Key (256-bit, per file, random alphanumeric)
//!   └── every chunk of the file, V2
//! ```

pub mod chunk;
pub mod error;
pub mod keys;
pub mod legacy;
pub mod metadata;

pub use chunk::{decrypt_chunk, decrypt_data, encrypt_chunk, encrypt_data};
pub use error::CryptoError;
pub use keys::{generate_file_key, FileKey, MetadataKey};
pub use metadata::{open_metadata, seal_metadata};

/// Size of a file or metadata key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Bytes a V2 chunk adds on top of its plaintext
pub const V2_OVERHEAD: usize = IV_SIZE + TAG_SIZE;
