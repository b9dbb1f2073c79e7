//! Chunked encrypted upload
//!
//! An [`UploadTask`] accumulates writes, cuts them into `CHUNK_SIZE` slices in
//! order, and uploads each slice as its own task bounded by the shared upload
//! slots. [`UploadTask::finish`] flushes the tail, waits for every chunk, and
//! finalizes the file with sealed metadata before mirroring it into shares.
//!
//! ```text
//! Accumulating ──finish──▶ Flushing ──▶ Finalizing ──▶ Done
//!      │                       │             │
//!      └───────────────────────┴─────────────┴──▶ Failed
//! ```
//!
//! Chunks already stored when a task fails are left in place. Call
//! [`UploadTask::abandon`] to discard them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cvfs_core::remote::{ChunkStore, FinalizeRequest};
use cvfs_core::{
    chunk_count_for, CvfsError, CvfsResult, EncryptionVersion, FileEntry, FileMetadata, ItemId,
    SealedEntry, StorageLocator, CHUNK_SIZE,
};
use cvfs_crypto::{encrypt_chunk, generate_file_key, seal_metadata, FileKey, MetadataKey};

use crate::limits::TransferLimits;
use crate::retry::{with_retry, RetryPolicy};
use crate::ProgressFn;

/// Where an upload lands and the metadata it is sealed with.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub parent: ItemId,
    pub name: String,
    pub mime: String,
    /// Unix milliseconds.
    pub last_modified: u64,
    pub creation: Option<u64>,
}

impl UploadTarget {
    pub fn new(parent: ItemId, name: impl Into<String>) -> Self {
        Self {
            parent,
            name: name.into(),
            mime: "application/octet-stream".into(),
            last_modified: now_millis(),
            creation: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }
}

/// A file the store has accepted.
#[derive(Debug, Clone)]
pub struct FinalizedFile {
    pub entry: FileEntry,
    pub sealed: SealedEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Accumulating,
    Flushing,
    Finalizing,
    Done,
    Failed,
}

struct UploadState {
    phase: UploadPhase,
    buffer: BytesMut,
    next_index: u64,
    size: u64,
    hasher: Sha512,
    inflight: JoinSet<CvfsResult<()>>,
}

/// State the per-chunk tasks report back into.
#[derive(Default)]
struct ChunkLedger {
    locator: StdMutex<Option<StorageLocator>>,
    uploaded: AtomicU64,
}

impl ChunkLedger {
    /// Record the locator the store returned. Every chunk of a file must come
    /// back with the same one.
    fn record_locator(&self, file_id: ItemId, index: u64, locator: StorageLocator) -> CvfsResult<()> {
        let mut slot = self.locator.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            None => {
                *slot = Some(locator);
                Ok(())
            }
            Some(existing) if *existing == locator => Ok(()),
            Some(existing) => Err(CvfsError::TransferFailed {
                attempts: 1,
                last_error: format!(
                    "store returned locator {}/{} for chunk {index} of {file_id}, expected {}/{}",
                    locator.bucket, locator.region, existing.bucket, existing.region
                ),
            }),
        }
    }

    fn locator(&self) -> Option<StorageLocator> {
        self.locator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One in-progress encrypted upload.
///
/// All methods take `&self`; a task may be shared behind an `Arc` and written
/// from several callers. Writes are ordered by the internal accumulator lock.
pub struct UploadTask {
    store: Arc<dyn ChunkStore>,
    limits: TransferLimits,
    retry: RetryPolicy,
    metadata_key: MetadataKey,
    target: UploadTarget,
    file_id: ItemId,
    key: Arc<FileKey>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
    ledger: Arc<ChunkLedger>,
    state: Mutex<UploadState>,
}

impl UploadTask {
    /// New upload with a fresh file id and a generated file key.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        limits: TransferLimits,
        metadata_key: MetadataKey,
        target: UploadTarget,
    ) -> Self {
        Self {
            store,
            limits,
            retry: RetryPolicy::default(),
            metadata_key,
            target,
            file_id: Uuid::new_v4(),
            key: Arc::new(generate_file_key()),
            cancel: CancellationToken::new(),
            progress: None,
            ledger: Arc::new(ChunkLedger::default()),
            state: Mutex::new(UploadState {
                phase: UploadPhase::Accumulating,
                buffer: BytesMut::new(),
                next_index: 0,
                size: 0,
                hasher: Sha512::new(),
                inflight: JoinSet::new(),
            }),
        }
    }

    /// Use a caller-supplied file key instead of a generated one.
    pub fn with_key(mut self, key: FileKey) -> Self {
        self.key = Arc::new(key);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Called with the plaintext length of every stored chunk.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Tie this upload to `parent`: cancelling it cancels the upload.
    pub fn with_cancel(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn file_id(&self) -> ItemId {
        self.file_id
    }

    /// Token that aborts this upload when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn phase(&self) -> UploadPhase {
        self.state.lock().await.phase
    }

    /// Plaintext bytes accepted so far.
    pub async fn bytes_written(&self) -> u64 {
        self.state.lock().await.size
    }

    pub fn chunks_uploaded(&self) -> u64 {
        self.ledger.uploaded.load(Ordering::SeqCst)
    }

    /// Append plaintext. Every full chunk is dispatched before this returns;
    /// it waits for an upload slot when all are taken.
    pub async fn write(&self, data: &[u8]) -> CvfsResult<()> {
        let mut state = self.state.lock().await;
        ensure_phase(state.phase, UploadPhase::Accumulating)?;

        let result = self.write_locked(&mut state, data).await;
        if result.is_err() {
            fail(&mut state);
        }
        result
    }

    async fn write_locked(&self, state: &mut UploadState, data: &[u8]) -> CvfsResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CvfsError::Cancelled);
        }
        // surface failures of chunks that already finished
        while let Some(joined) = state.inflight.try_join_next() {
            flatten_join(joined, &self.cancel)?;
        }

        state.buffer.extend_from_slice(data);
        state.size += data.len() as u64;
        while state.buffer.len() as u64 >= CHUNK_SIZE {
            let chunk = state.buffer.split_to(CHUNK_SIZE as usize).freeze();
            self.dispatch(state, chunk).await?;
        }
        Ok(())
    }

    /// Hash, index and spawn one chunk upload.
    async fn dispatch(&self, state: &mut UploadState, chunk: Bytes) -> CvfsResult<()> {
        let permit = self.limits.acquire_upload(&self.cancel).await?;

        state.hasher.update(&chunk);
        let index = state.next_index;
        state.next_index += 1;

        let store = self.store.clone();
        let key = self.key.clone();
        let ledger = self.ledger.clone();
        let retry = self.retry.clone();
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        let file_id = self.file_id;

        state.inflight.spawn(async move {
            let _permit = permit;
            let plain_len = chunk.len() as u64;
            let sealed = Bytes::from(encrypt_chunk(&chunk, &key)?);

            let locator = with_retry(&retry, &cancel, "store chunk", || {
                store.store_chunk(file_id, index, sealed.clone())
            })
            .await?;
            ledger.record_locator(file_id, index, locator)?;
            ledger.uploaded.fetch_add(1, Ordering::SeqCst);

            debug!(%file_id, index, bytes = plain_len, "chunk uploaded");
            if let Some(progress) = &progress {
                progress(plain_len);
            }
            Ok(())
        });
        Ok(())
    }

    /// Flush the tail, wait for every chunk, and finalize.
    pub async fn finish(&self) -> CvfsResult<FinalizedFile> {
        let mut state = self.state.lock().await;
        ensure_phase(state.phase, UploadPhase::Accumulating)?;

        let result = self.finish_locked(&mut state).await;
        match &result {
            Ok(_) => state.phase = UploadPhase::Done,
            Err(e) => {
                warn!(file_id = %self.file_id, error = %e, "upload failed");
                fail(&mut state);
            }
        }
        result
    }

    async fn finish_locked(&self, state: &mut UploadState) -> CvfsResult<FinalizedFile> {
        if self.cancel.is_cancelled() {
            return Err(CvfsError::Cancelled);
        }

        state.phase = UploadPhase::Flushing;
        while state.buffer.len() as u64 >= CHUNK_SIZE {
            let chunk = state.buffer.split_to(CHUNK_SIZE as usize).freeze();
            self.dispatch(state, chunk).await?;
        }
        if !state.buffer.is_empty() {
            let tail = state.buffer.split().freeze();
            self.dispatch(state, tail).await?;
        }

        state.phase = UploadPhase::Finalizing;
        while let Some(joined) = state.inflight.join_next().await {
            flatten_join(joined, &self.cancel)?;
        }

        let chunk_count = chunk_count_for(state.size);
        let uploaded = self.chunks_uploaded();
        if uploaded != chunk_count {
            return Err(CvfsError::Protocol(format!(
                "file {} has {chunk_count} chunks but {uploaded} were uploaded",
                self.file_id
            )));
        }

        let locator = match self.ledger.locator() {
            Some(locator) => locator,
            None if chunk_count == 0 => self.store.default_locator(self.file_id),
            None => {
                return Err(CvfsError::Protocol(format!(
                    "no storage locator recorded for {}",
                    self.file_id
                )))
            }
        };

        let hash = hex::encode(std::mem::take(&mut state.hasher).finalize());
        let metadata = FileMetadata {
            name: self.target.name.clone(),
            size: state.size,
            mime: self.target.mime.clone(),
            key: self.key.to_base64(),
            last_modified: self.target.last_modified,
            creation: self.target.creation,
            hash: Some(hash),
        };

        let request = FinalizeRequest {
            file_id: self.file_id,
            parent: self.target.parent,
            metadata: seal_metadata(&self.metadata_key, &metadata)?,
            size: state.size,
            chunk_count,
            version: EncryptionVersion::CURRENT,
            locator: locator.clone(),
        };
        let sealed = request.to_sealed_entry();

        with_retry(&self.retry, &self.cancel, "finalize file", || {
            self.store.finalize_file(request.clone())
        })
        .await?;
        with_retry(&self.retry, &self.cancel, "propagate to shares", || {
            self.store.propagate_to_shares(self.target.parent, &sealed)
        })
        .await?;

        info!(
            file_id = %self.file_id,
            parent = %self.target.parent,
            chunks = chunk_count,
            bytes = state.size,
            "upload finalized"
        );

        Ok(FinalizedFile {
            entry: FileEntry {
                id: self.file_id,
                parent: self.target.parent,
                metadata,
                chunk_count,
                version: EncryptionVersion::CURRENT,
                locator,
            },
            sealed,
        })
    }

    /// Stop the upload and discard every chunk stored so far.
    ///
    /// Never called implicitly; a failed upload keeps its chunks until this
    /// runs.
    pub async fn abandon(&self) -> CvfsResult<()> {
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        if state.phase == UploadPhase::Done {
            return Err(CvfsError::Protocol(format!(
                "upload {} is already finalized",
                self.file_id
            )));
        }
        fail(&mut state);
        // let aborted tasks wind down so nothing lands after the discard
        while state.inflight.join_next().await.is_some() {}

        self.store.discard_chunks(self.file_id).await?;
        info!(file_id = %self.file_id, "upload abandoned");
        Ok(())
    }
}

/// Stream `reader` into `task` in chunk-sized reads, then finish it.
pub async fn upload_reader<R>(task: &UploadTask, reader: &mut R) -> CvfsResult<FinalizedFile>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE as usize];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        task.write(&buf[..n]).await?;
    }
    task.finish().await
}

fn ensure_phase(actual: UploadPhase, expected: UploadPhase) -> CvfsResult<()> {
    if actual == expected {
        return Ok(());
    }
    Err(CvfsError::Protocol(format!(
        "upload is {actual:?}, expected {expected:?}"
    )))
}

fn fail(state: &mut UploadState) {
    state.phase = UploadPhase::Failed;
    state.inflight.abort_all();
}

fn flatten_join(
    joined: Result<CvfsResult<()>, tokio::task::JoinError>,
    cancel: &CancellationToken,
) -> CvfsResult<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() || cancel.is_cancelled() => Err(CvfsError::Cancelled),
        Err(e) => Err(CvfsError::Other(anyhow::anyhow!(
            "chunk upload task panicked: {e}"
        ))),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
