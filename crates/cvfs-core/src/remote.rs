//! Remote collaborators consumed by the transfer engine and namespace layer.
//!
//! Implementations map their own failures onto [`CvfsError`]: anything worth
//! another attempt (timeouts, resets, 5xx) must surface as
//! [`CvfsError::Transient`], missing items as [`CvfsError::NotFound`].

use bytes::Bytes;

use crate::error::CvfsResult;
use crate::types::{EncryptionVersion, ItemId, SealedEntry, StorageLocator};

/// Everything the store needs to make an uploaded file visible.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub file_id: ItemId,
    pub parent: ItemId,
    /// Sealed [`crate::types::FileMetadata`].
    pub metadata: String,
    pub size: u64,
    pub chunk_count: u64,
    pub version: EncryptionVersion,
    pub locator: StorageLocator,
}

impl FinalizeRequest {
    /// The entry listings will report once the file is finalized.
    pub fn to_sealed_entry(&self) -> SealedEntry {
        SealedEntry {
            id: self.file_id,
            parent: self.parent,
            kind: crate::types::SealedKind::File {
                chunk_count: self.chunk_count,
                version: self.version,
                locator: self.locator.clone(),
                size: self.size,
            },
            metadata: self.metadata.clone(),
        }
    }
}

#[async_trait::async_trait]
/// Chunk-addressed object storage.
pub trait ChunkStore: Send + Sync {
    /// Store one encrypted chunk. Returns the file's storage locator, which
    /// is identical for every chunk of the same file.
    async fn store_chunk(&self, file_id: ItemId, index: u64, data: Bytes)
        -> CvfsResult<StorageLocator>;

    /// Fetch one encrypted chunk.
    async fn fetch_chunk(
        &self,
        locator: &StorageLocator,
        file_id: ItemId,
        index: u64,
    ) -> CvfsResult<Bytes>;

    /// Record the file under its parent. Until this succeeds the chunks are
    /// unreachable.
    async fn finalize_file(&self, request: FinalizeRequest) -> CvfsResult<()>;

    /// Mirror a newly finalized item into every share or public link rooted
    /// at an ancestor of `parent`.
    async fn propagate_to_shares(&self, parent: ItemId, entry: &SealedEntry) -> CvfsResult<()>;

    /// Drop every stored chunk of a file that was never finalized.
    async fn discard_chunks(&self, file_id: ItemId) -> CvfsResult<()>;

    /// Locator for a file that stored no chunk (empty files).
    fn default_locator(&self, file_id: ItemId) -> StorageLocator;
}

#[async_trait::async_trait]
/// Directory tree operations over the flat id-addressed item space.
pub trait DirectoryService: Send + Sync {
    /// Immediate children of a directory.
    async fn list_directory(&self, id: ItemId) -> CvfsResult<Vec<SealedEntry>>;

    /// Create a directory, returning its new id.
    async fn create_directory(&self, parent: ItemId, metadata: String) -> CvfsResult<ItemId>;

    /// Replace an item's sealed metadata (rename).
    async fn rename_item(&self, id: ItemId, metadata: String) -> CvfsResult<()>;

    /// Reparent an item.
    async fn move_item(&self, id: ItemId, new_parent: ItemId) -> CvfsResult<()>;

    /// Move an item (and, for directories, its subtree) to the trash.
    async fn trash_item(&self, id: ItemId) -> CvfsResult<()>;
}
