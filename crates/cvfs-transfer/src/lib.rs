//! cvfs-transfer: the encrypted chunked transfer engine
//!
//! - [`upload`]: write-side pipeline, accumulate → chunk → encrypt → store → finalize
//! - [`download`]: read-side pipeline, plan → fetch → decrypt → reorder → slice
//! - [`range`]: byte range to chunk index planning
//! - [`limits`]: process-wide upload/download slots
//! - [`retry`]: fixed-delay retry with per-attempt timeout and cancellation

pub mod download;
pub mod limits;
pub mod range;
pub mod retry;
pub mod upload;

use std::sync::Arc;

pub use download::{download, download_to_writer, DownloadOptions, DownloadRequest};
pub use limits::TransferLimits;
pub use range::{plan, ChunkRange};
pub use retry::{with_retry, RetryPolicy};
pub use upload::{upload_reader, FinalizedFile, UploadPhase, UploadTarget, UploadTask};

/// Progress callback, invoked with the plaintext byte count of each chunk
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;
