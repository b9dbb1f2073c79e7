//! Shared test harness: an instrumented chunk store over the in-memory remote.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cvfs_core::remote::{ChunkStore, FinalizeRequest};
use cvfs_core::{CvfsError, CvfsResult, ItemId, SealedEntry, StorageLocator};
use cvfs_storage::OpendalRemote;
use cvfs_transfer::{RetryPolicy, TransferLimits, UploadTarget, UploadTask};

pub type IndexDelay = Arc<dyn Fn(u64) -> Duration + Send + Sync>;

/// Wraps [`OpendalRemote`], counting calls and injecting failures.
pub struct InstrumentedStore {
    pub inner: OpendalRemote,
    pub store_calls: AtomicU64,
    pub fetch_calls: AtomicU64,
    /// Transient failures left to inject on fetch.
    pub failing_fetches: AtomicU32,
    /// Transient failures left to inject on store.
    pub failing_stores: AtomicU32,
    /// Flip a ciphertext bit on every fetch.
    pub corrupt_fetches: AtomicBool,
    pub fail_propagation: AtomicBool,
    pub fetch_delay: Mutex<Option<Duration>>,
    /// Per-index fetch delay, applied on top of `fetch_delay`.
    pub index_delay: Mutex<Option<IndexDelay>>,
    /// Chunk indices in the order their fetches returned.
    pub fetch_order: Mutex<Vec<u64>>,
    /// "finalize" / "propagate" in call order.
    pub log: Mutex<Vec<&'static str>>,
}

impl InstrumentedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: OpendalRemote::memory().unwrap(),
            store_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
            failing_fetches: AtomicU32::new(0),
            failing_stores: AtomicU32::new(0),
            corrupt_fetches: AtomicBool::new(false),
            fail_propagation: AtomicBool::new(false),
            fetch_delay: Mutex::new(None),
            index_delay: Mutex::new(None),
            fetch_order: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn stores(&self) -> u64 {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.store_calls.store(0, Ordering::SeqCst);
        self.fetch_calls.store(0, Ordering::SeqCst);
    }

    /// Delay chunk `i` of `count` by `step * (count - i)`, so later chunks
    /// return first.
    pub fn reverse_fetch_order(&self, step: Duration, count: u64) {
        let delay: IndexDelay =
            Arc::new(move |index| step * count.saturating_sub(index) as u32);
        *self.index_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_order(&self) -> Vec<u64> {
        self.fetch_order.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait::async_trait]
impl ChunkStore for InstrumentedStore {
    async fn store_chunk(
        &self,
        file_id: ItemId,
        index: u64,
        data: Bytes,
    ) -> CvfsResult<StorageLocator> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_stores) {
            return Err(CvfsError::Transient("injected store failure".into()));
        }
        self.inner.store_chunk(file_id, index, data).await
    }

    async fn fetch_chunk(
        &self,
        locator: &StorageLocator,
        file_id: ItemId,
        index: u64,
    ) -> CvfsResult<Bytes> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let per_index = self.index_delay.lock().unwrap().clone();
        if let Some(per_index) = per_index {
            tokio::time::sleep(per_index(index)).await;
        }
        if take_failure(&self.failing_fetches) {
            return Err(CvfsError::Transient("injected fetch failure".into()));
        }
        let data = self.inner.fetch_chunk(locator, file_id, index).await?;
        self.fetch_order.lock().unwrap().push(index);
        if self.corrupt_fetches.load(Ordering::SeqCst) {
            let mut tampered = data.to_vec();
            let last = tampered.len() - 1;
            tampered[last] ^= 0x01;
            return Ok(Bytes::from(tampered));
        }
        Ok(data)
    }

    async fn finalize_file(&self, request: FinalizeRequest) -> CvfsResult<()> {
        self.log.lock().unwrap().push("finalize");
        self.inner.finalize_file(request).await
    }

    async fn propagate_to_shares(&self, parent: ItemId, entry: &SealedEntry) -> CvfsResult<()> {
        self.log.lock().unwrap().push("propagate");
        if self.fail_propagation.load(Ordering::SeqCst) {
            return Err(CvfsError::Storage("share service unavailable".into()));
        }
        self.inner.propagate_to_shares(parent, entry).await
    }

    async fn discard_chunks(&self, file_id: ItemId) -> CvfsResult<()> {
        self.inner.discard_chunks(file_id).await
    }

    fn default_locator(&self, file_id: ItemId) -> StorageLocator {
        self.inner.default_locator(file_id)
    }
}

pub fn metadata_key() -> cvfs_crypto::MetadataKey {
    cvfs_crypto::MetadataKey::from_bytes([7u8; 32])
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Upload task into the remote root with instant retries.
pub async fn new_task(store: &Arc<InstrumentedStore>, name: &str) -> UploadTask {
    new_task_with_limits(store, name, TransferLimits::default()).await
}

pub async fn new_task_with_limits(
    store: &Arc<InstrumentedStore>,
    name: &str,
    limits: TransferLimits,
) -> UploadTask {
    let root = store.inner.ensure_root().await.expect("root");
    UploadTask::new(
        store.clone(),
        limits,
        metadata_key(),
        UploadTarget::new(root, name),
    )
    .with_retry(RetryPolicy::immediate(3))
}
