//! Chunked encrypted download
//!
//! Chunks are fetched with bounded read-ahead and decrypted as they arrive;
//! the ordered buffered stream hands them downstream in index order whatever
//! order the fetches complete in.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cvfs_core::remote::ChunkStore;
use cvfs_core::{
    CvfsError, CvfsResult, EncryptionVersion, FileEntry, ItemId, StorageLocator, CHUNK_SIZE,
};
use cvfs_crypto::{decrypt_chunk, FileKey};

use crate::limits::TransferLimits;
use crate::range::{plan, slice_bounds, ChunkRange};
use crate::retry::{with_retry, RetryPolicy};
use crate::ProgressFn;

/// Everything needed to read a stored file back.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub file_id: ItemId,
    pub locator: StorageLocator,
    pub key: FileKey,
    pub version: EncryptionVersion,
    pub chunk_count: u64,
}

impl DownloadRequest {
    pub fn from_entry(entry: &FileEntry) -> CvfsResult<Self> {
        Ok(Self {
            file_id: entry.id,
            locator: entry.locator.clone(),
            key: FileKey::from_base64(&entry.metadata.key)?,
            version: entry.version,
            chunk_count: entry.chunk_count,
        })
    }
}

#[derive(Clone, Default)]
pub struct DownloadOptions {
    /// First byte, inclusive. Defaults to 0.
    pub start: Option<u64>,
    /// Last byte, exclusive. Defaults to end of file.
    pub end: Option<u64>,
    /// Read-ahead window. Never exceeds the shared download slots.
    pub concurrency: Option<usize>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    /// Called with the plaintext length of each chunk emitted, in order.
    pub progress: Option<ProgressFn>,
}

impl DownloadOptions {
    pub fn range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Download `[start, end)` of a file into memory.
///
/// Returns an empty buffer for ranges outside the file. On any failure no
/// partial data is returned.
pub async fn download(
    store: &dyn ChunkStore,
    limits: &TransferLimits,
    request: &DownloadRequest,
    options: &DownloadOptions,
) -> CvfsResult<Bytes> {
    let range = plan(options.start, options.end, request.chunk_count, CHUNK_SIZE);
    if range.is_empty() {
        debug!(file_id = %request.file_id, "requested range holds no chunks");
        return Ok(Bytes::new());
    }

    let mut buffer = BytesMut::with_capacity((range.len() * CHUNK_SIZE).min(64 << 20) as usize);
    let mut chunks = chunk_stream(store, limits, request, options, range);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        report(options, chunk.len());
        buffer.extend_from_slice(&chunk);
    }
    if options.cancel.is_cancelled() {
        return Err(CvfsError::Cancelled);
    }

    let bounds = slice_bounds(buffer.len(), range, CHUNK_SIZE, options.start, options.end);
    info!(
        file_id = %request.file_id,
        chunks = range.len(),
        bytes = bounds.len(),
        "download complete"
    );
    Ok(buffer.freeze().slice(bounds))
}

/// Stream `[start, end)` of a file into `writer`, one chunk at a time.
///
/// Returns the number of bytes written. Bytes already written when a failure
/// occurs stay written.
pub async fn download_to_writer<W>(
    store: &dyn ChunkStore,
    limits: &TransferLimits,
    request: &DownloadRequest,
    options: &DownloadOptions,
    writer: &mut W,
) -> CvfsResult<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let range = plan(options.start, options.end, request.chunk_count, CHUNK_SIZE);
    let start = options.start.unwrap_or(0);
    let end = options.end.unwrap_or(u64::MAX);
    let mut offset = range.first * CHUNK_SIZE;
    let mut written = 0u64;

    let mut chunks = chunk_stream(store, limits, request, options, range);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        report(options, chunk.len());

        let chunk_end = offset + chunk.len() as u64;
        let lo = start.clamp(offset, chunk_end);
        let hi = end.clamp(lo, chunk_end);
        if lo < hi {
            let piece = &chunk[(lo - offset) as usize..(hi - offset) as usize];
            writer.write_all(piece).await?;
            written += piece.len() as u64;
        }
        offset = chunk_end;
    }
    writer.flush().await?;
    if options.cancel.is_cancelled() {
        return Err(CvfsError::Cancelled);
    }

    info!(file_id = %request.file_id, bytes = written, "download streamed");
    Ok(written)
}

fn chunk_stream<'a>(
    store: &'a dyn ChunkStore,
    limits: &'a TransferLimits,
    request: &'a DownloadRequest,
    options: &'a DownloadOptions,
    range: ChunkRange,
) -> impl Stream<Item = CvfsResult<Vec<u8>>> + 'a {
    let window = options
        .concurrency
        .unwrap_or(limits.download_slots())
        .clamp(1, limits.download_slots());
    stream::iter(range.indices())
        .map(move |index| fetch_chunk(store, limits, request, options, index))
        .buffered(window)
}

async fn fetch_chunk(
    store: &dyn ChunkStore,
    limits: &TransferLimits,
    request: &DownloadRequest,
    options: &DownloadOptions,
    index: u64,
) -> CvfsResult<Vec<u8>> {
    let cancel = &options.cancel;
    let _permit = limits.acquire_download(cancel).await?;

    let encrypted = with_retry(&options.retry, cancel, "fetch chunk", || {
        store.fetch_chunk(&request.locator, request.file_id, index)
    })
    .await?;
    let plain = decrypt_chunk(&encrypted, &request.key, request.version)?;

    debug!(file_id = %request.file_id, index, bytes = plain.len(), "chunk fetched");
    Ok(plain)
}

fn report(options: &DownloadOptions, len: usize) {
    if let Some(progress) = &options.progress {
        progress(len as u64);
    }
}
