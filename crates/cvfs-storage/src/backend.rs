//! Reference remote backed by an OpenDAL operator
//!
//! Object layout:
//!
//! ```text
//! root                              id of the root directory (plain text)
//! chunks/{file_id}/{index}          encrypted chunk bytes
//! items/{id}.json                   ItemRecord (sealed entry + trash flag)
//! children/{parent}/{id}            empty marker, one per child
//! shares/{dir}.json                 ShareRecord for a shared directory
//! shares/{dir}/items/{id}.json      sealed entries mirrored into the share
//! ```
//!
//! The backend only ever sees sealed metadata. Storage facts (chunk count,
//! version, locator, size) are kept in the clear so listings can be served
//! without the metadata key.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use cvfs_core::remote::{ChunkStore, DirectoryService, FinalizeRequest};
use cvfs_core::{CvfsError, CvfsResult, ItemId, SealedEntry, SealedKind, StorageLocator};

/// Guard against corrupt parent chains.
const MAX_DEPTH: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemRecord {
    entry: SealedEntry,
    #[serde(default)]
    trashed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ShareRecord {
    receivers: Vec<String>,
}

/// [`ChunkStore`] + [`DirectoryService`] over any OpenDAL operator.
#[derive(Clone)]
pub struct OpendalRemote {
    op: opendal::Operator,
    bucket: String,
    region: String,
}

impl OpendalRemote {
    pub fn new(op: opendal::Operator, bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            op,
            bucket: bucket.into(),
            region: region.into(),
        }
    }

    /// In-memory remote for tests and dry runs.
    pub fn memory() -> anyhow::Result<Self> {
        Ok(Self::new(crate::operator::memory_operator()?, "cvfs", "local"))
    }

    pub fn operator(&self) -> &opendal::Operator {
        &self.op
    }

    /// Return the root directory id, creating it on first use.
    pub async fn ensure_root(&self) -> CvfsResult<ItemId> {
        if let Some(root) = self.root_id().await? {
            return Ok(root);
        }
        let root = Uuid::new_v4();
        self.op
            .write("root", root.to_string().into_bytes())
            .await
            .map_err(|e| map_opendal(e, "writing root record"))?;
        info!(%root, "created root directory");
        Ok(root)
    }

    async fn root_id(&self) -> CvfsResult<Option<ItemId>> {
        match self.op.read("root").await {
            Ok(buf) => {
                let text = String::from_utf8(buf.to_bytes().to_vec())
                    .map_err(|_| CvfsError::Protocol("root record is not UTF-8".into()))?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|e| CvfsError::Protocol(format!("root record: {e}")))?;
                Ok(Some(id))
            }
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_opendal(e, "reading root record")),
        }
    }

    /// Share a directory with `receiver`. Items finalized anywhere below it
    /// from now on are mirrored into the share.
    pub async fn share_directory(&self, dir: ItemId, receiver: &str) -> CvfsResult<()> {
        self.require_directory(dir).await?;
        let key = share_key(dir);
        let mut record: ShareRecord = self.read_json(&key).await?.unwrap_or_default();
        if !record.receivers.iter().any(|r| r == receiver) {
            record.receivers.push(receiver.to_string());
        }
        self.write_json(&key, &record).await?;
        info!(%dir, receiver, "directory shared");
        Ok(())
    }

    /// Entries mirrored into the share rooted at `dir`.
    pub async fn shared_items(&self, dir: ItemId) -> CvfsResult<Vec<SealedEntry>> {
        let prefix = format!("shares/{dir}/items/");
        let mut out = Vec::new();
        for path in self.list_files(&prefix).await? {
            if let Some(entry) = self.read_json::<SealedEntry>(&path).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    async fn get_record(&self, id: ItemId) -> CvfsResult<ItemRecord> {
        self.read_json(&item_key(id))
            .await?
            .ok_or_else(|| CvfsError::NotFound(format!("item {id}")))
    }

    async fn put_record(&self, record: &ItemRecord) -> CvfsResult<()> {
        self.write_json(&item_key(record.entry.id), record).await
    }

    /// Succeeds if `id` is the root or a live directory.
    async fn require_directory(&self, id: ItemId) -> CvfsResult<()> {
        if self.root_id().await? == Some(id) {
            return Ok(());
        }
        let record = self.get_record(id).await?;
        match (&record.entry.kind, record.trashed) {
            (SealedKind::Directory, false) => Ok(()),
            (_, true) => Err(CvfsError::NotFound(format!("directory {id} is trashed"))),
            (SealedKind::File { .. }, _) => Err(CvfsError::InvalidPath(format!(
                "item {id} is not a directory"
            ))),
        }
    }

    /// `id` followed by each of its ancestors, ending below the root.
    async fn ancestry(&self, id: ItemId) -> CvfsResult<Vec<ItemId>> {
        let mut chain = vec![id];
        let mut cur = id;
        while chain.len() < MAX_DEPTH {
            match self.get_record(cur).await {
                Ok(record) => {
                    cur = record.entry.parent;
                    chain.push(cur);
                }
                Err(CvfsError::NotFound(_)) => return Ok(chain),
                Err(e) => return Err(e),
            }
        }
        Err(CvfsError::Protocol(format!(
            "parent chain of {id} exceeds {MAX_DEPTH} levels"
        )))
    }

    async fn link_child(&self, parent: ItemId, child: ItemId) -> CvfsResult<()> {
        self.op
            .write(&child_key(parent, child), Vec::<u8>::new())
            .await
            .map(|_| ())
            .map_err(|e| map_opendal(e, "writing child marker"))
    }

    async fn unlink_child(&self, parent: ItemId, child: ItemId) -> CvfsResult<()> {
        self.op
            .delete(&child_key(parent, child))
            .await
            .map_err(|e| map_opendal(e, "removing child marker"))
    }

    /// Paths of the non-directory objects under `prefix`.
    async fn list_files(&self, prefix: &str) -> CvfsResult<Vec<String>> {
        match self.op.list(prefix).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|e| e.path().to_string())
                .filter(|p| !p.ends_with('/'))
                .collect()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(map_opendal(e, &format!("listing {prefix}"))),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CvfsResult<Option<T>> {
        match self.op.read(key).await {
            Ok(buf) => serde_json::from_slice(&buf.to_bytes())
                .map(Some)
                .map_err(|e| CvfsError::Protocol(format!("decoding {key}: {e}"))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_opendal(e, &format!("reading {key}"))),
        }
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> CvfsResult<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| CvfsError::Protocol(format!("encoding {key}: {e}")))?;
        self.op
            .write(key, json)
            .await
            .map(|_| ())
            .map_err(|e| map_opendal(e, &format!("writing {key}")))
    }
}

#[async_trait::async_trait]
impl ChunkStore for OpendalRemote {
    async fn store_chunk(
        &self,
        file_id: ItemId,
        index: u64,
        data: Bytes,
    ) -> CvfsResult<StorageLocator> {
        let len = data.len();
        self.op
            .write(&chunk_key(file_id, index), data)
            .await
            .map_err(|e| map_opendal(e, "storing chunk"))?;
        debug!(%file_id, index, bytes = len, "chunk stored");
        Ok(self.default_locator(file_id))
    }

    async fn fetch_chunk(
        &self,
        locator: &StorageLocator,
        file_id: ItemId,
        index: u64,
    ) -> CvfsResult<Bytes> {
        if locator.bucket != self.bucket {
            return Err(CvfsError::NotFound(format!(
                "bucket {} is not served by this store",
                locator.bucket
            )));
        }
        let buf = self
            .op
            .read(&chunk_key(file_id, index))
            .await
            .map_err(|e| map_opendal(e, &format!("fetching chunk {index} of {file_id}")))?;
        Ok(buf.to_bytes())
    }

    async fn finalize_file(&self, request: FinalizeRequest) -> CvfsResult<()> {
        self.require_directory(request.parent).await?;

        let stored = self.list_files(&format!("chunks/{}/", request.file_id)).await?;
        if stored.len() as u64 != request.chunk_count {
            return Err(CvfsError::Protocol(format!(
                "file {} declares {} chunks but {} are stored",
                request.file_id,
                request.chunk_count,
                stored.len()
            )));
        }

        let record = ItemRecord {
            entry: request.to_sealed_entry(),
            trashed: false,
        };
        self.put_record(&record).await?;
        self.link_child(request.parent, request.file_id).await?;
        info!(
            file_id = %request.file_id,
            parent = %request.parent,
            chunks = request.chunk_count,
            bytes = request.size,
            "file finalized"
        );
        Ok(())
    }

    async fn propagate_to_shares(&self, parent: ItemId, entry: &SealedEntry) -> CvfsResult<()> {
        for dir in self.ancestry(parent).await? {
            if self.read_json::<ShareRecord>(&share_key(dir)).await?.is_some() {
                let key = format!("shares/{dir}/items/{}.json", entry.id);
                self.write_json(&key, entry).await?;
                debug!(share = %dir, item = %entry.id, "item mirrored into share");
            }
        }
        Ok(())
    }

    async fn discard_chunks(&self, file_id: ItemId) -> CvfsResult<()> {
        let paths = self.list_files(&format!("chunks/{file_id}/")).await?;
        for path in &paths {
            self.op
                .delete(path)
                .await
                .map_err(|e| map_opendal(e, "discarding chunk"))?;
        }
        info!(%file_id, chunks = paths.len(), "discarded unfinalized chunks");
        Ok(())
    }

    fn default_locator(&self, file_id: ItemId) -> StorageLocator {
        StorageLocator {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            file_id,
        }
    }
}

#[async_trait::async_trait]
impl DirectoryService for OpendalRemote {
    async fn list_directory(&self, id: ItemId) -> CvfsResult<Vec<SealedEntry>> {
        self.require_directory(id).await?;
        let mut out = Vec::new();
        for path in self.list_files(&format!("children/{id}/")).await? {
            let Some(child) = path.rsplit('/').next().and_then(|s| Uuid::parse_str(s).ok()) else {
                continue;
            };
            match self.get_record(child).await {
                Ok(record) if !record.trashed => out.push(record.entry),
                Ok(_) => {}
                // marker outlived its record
                Err(CvfsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!(%id, entries = out.len(), "directory listed");
        Ok(out)
    }

    async fn create_directory(&self, parent: ItemId, metadata: String) -> CvfsResult<ItemId> {
        self.require_directory(parent).await?;
        let id = Uuid::new_v4();
        let record = ItemRecord {
            entry: SealedEntry {
                id,
                parent,
                kind: SealedKind::Directory,
                metadata,
            },
            trashed: false,
        };
        self.put_record(&record).await?;
        self.link_child(parent, id).await?;
        debug!(%id, %parent, "directory created");
        Ok(id)
    }

    async fn rename_item(&self, id: ItemId, metadata: String) -> CvfsResult<()> {
        let mut record = self.get_record(id).await?;
        record.entry.metadata = metadata;
        self.put_record(&record).await
    }

    async fn move_item(&self, id: ItemId, new_parent: ItemId) -> CvfsResult<()> {
        self.require_directory(new_parent).await?;
        if self.ancestry(new_parent).await?.contains(&id) {
            return Err(CvfsError::InvalidPath(format!(
                "cannot move {id} into its own subtree"
            )));
        }
        let mut record = self.get_record(id).await?;
        let old_parent = record.entry.parent;
        record.entry.parent = new_parent;
        self.put_record(&record).await?;
        self.link_child(new_parent, id).await?;
        self.unlink_child(old_parent, id).await?;
        debug!(%id, from = %old_parent, to = %new_parent, "item moved");
        Ok(())
    }

    async fn trash_item(&self, id: ItemId) -> CvfsResult<()> {
        let mut record = self.get_record(id).await?;
        if record.trashed {
            return Err(CvfsError::NotFound(format!("item {id} is already trashed")));
        }
        // descendants become unreachable with their ancestor
        record.trashed = true;
        self.put_record(&record).await?;
        debug!(%id, "item trashed");
        Ok(())
    }
}

fn chunk_key(file_id: ItemId, index: u64) -> String {
    format!("chunks/{file_id}/{index}")
}

fn item_key(id: ItemId) -> String {
    format!("items/{id}.json")
}

fn child_key(parent: ItemId, child: ItemId) -> String {
    format!("children/{parent}/{child}")
}

fn share_key(dir: ItemId) -> String {
    format!("shares/{dir}.json")
}

/// Map an OpenDAL error onto the cvfs taxonomy. Temporary errors are the only
/// ones the transfer engine will retry.
pub fn map_opendal(err: opendal::Error, context: &str) -> CvfsError {
    if err.kind() == opendal::ErrorKind::NotFound {
        CvfsError::NotFound(format!("{context}: {err}"))
    } else if err.is_temporary() {
        CvfsError::Transient(format!("{context}: {err}"))
    } else {
        CvfsError::Storage(format!("{context}: {err}"))
    }
}
