//! cvfs-core: shared types, config schema, error taxonomy, and the traits the
//! transfer engine and namespace layer use to talk to the remote store.

pub mod config;
pub mod error;
pub mod remote;
pub mod types;

pub use error::{CvfsError, CvfsResult};
pub use remote::{ChunkStore, DirectoryService, FinalizeRequest};
pub use types::{
    DirectoryEntry, DirectoryMetadata, EncryptionVersion, FileEntry, FileMetadata, ItemId,
    NamespaceItem, SealedEntry, SealedKind, StorageLocator,
};

/// Plaintext bytes per chunk. Encryption and network transfer share this unit.
pub const CHUNK_SIZE: u64 = 1_048_576;

/// Number of chunks needed to hold `size` plaintext bytes.
pub fn chunk_count_for(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE)
}
