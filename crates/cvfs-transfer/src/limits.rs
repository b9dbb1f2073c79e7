//! Per-process transfer slots

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use cvfs_core::config::TransferConfig;
use cvfs_core::{CvfsError, CvfsResult};

/// Semaphores bounding in-flight chunk uploads and fetches.
///
/// Create one per process (or session) and clone it into every task; clones
/// share the same slots.
#[derive(Debug, Clone)]
pub struct TransferLimits {
    upload: Arc<Semaphore>,
    download: Arc<Semaphore>,
    download_slots: usize,
}

impl TransferLimits {
    pub const DEFAULT_UPLOAD_SLOTS: usize = 16;
    pub const DEFAULT_DOWNLOAD_SLOTS: usize = 32;

    pub fn new(upload_slots: usize, download_slots: usize) -> Self {
        let download_slots = download_slots.max(1);
        Self {
            upload: Arc::new(Semaphore::new(upload_slots.max(1))),
            download: Arc::new(Semaphore::new(download_slots)),
            download_slots,
        }
    }

    pub fn from_config(cfg: &TransferConfig) -> Self {
        Self::new(cfg.upload_concurrency, cfg.download_concurrency)
    }

    /// Configured download window, used as the default fetch read-ahead.
    pub fn download_slots(&self) -> usize {
        self.download_slots
    }

    pub fn available_upload_slots(&self) -> usize {
        self.upload.available_permits()
    }

    pub fn available_download_slots(&self) -> usize {
        self.download.available_permits()
    }

    pub async fn acquire_upload(
        &self,
        cancel: &CancellationToken,
    ) -> CvfsResult<OwnedSemaphorePermit> {
        acquire(&self.upload, cancel).await
    }

    pub async fn acquire_download(
        &self,
        cancel: &CancellationToken,
    ) -> CvfsResult<OwnedSemaphorePermit> {
        acquire(&self.download, cancel).await
    }
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_UPLOAD_SLOTS, Self::DEFAULT_DOWNLOAD_SLOTS)
    }
}

async fn acquire(
    sem: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> CvfsResult<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CvfsError::Cancelled),
        permit = sem.clone().acquire_owned() => permit.map_err(|_| CvfsError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_slots() {
        let limits = TransferLimits::new(2, 1);
        let other = limits.clone();
        let token = CancellationToken::new();

        let _a = limits.acquire_upload(&token).await.unwrap();
        let _b = other.acquire_upload(&token).await.unwrap();
        assert_eq!(limits.available_upload_slots(), 0);
        assert_eq!(limits.available_download_slots(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_returns_cancelled() {
        let limits = TransferLimits::new(1, 1);
        let token = CancellationToken::new();
        let _held = limits.acquire_download(&token).await.unwrap();

        let waiter_token = CancellationToken::new();
        let waiter = {
            let limits = limits.clone();
            let token = waiter_token.clone();
            tokio::spawn(async move { limits.acquire_download(&token).await })
        };
        waiter_token.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(CvfsError::Cancelled)));
    }

    #[test]
    fn zero_slots_clamped_to_one() {
        let limits = TransferLimits::new(0, 0);
        assert_eq!(limits.available_upload_slots(), 1);
        assert_eq!(limits.download_slots(), 1);
    }
}
