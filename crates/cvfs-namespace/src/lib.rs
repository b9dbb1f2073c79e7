//! cvfs-namespace: hierarchical paths over a flat, id-addressed remote
//!
//! - [`cache`]: bidirectional path ↔ id map with subtree invalidation and rewrite
//! - [`fs`]: path API (resolve, stat, read_dir, mkdir, rename, remove, read/write)
//! - [`events`]: remote push events and the watcher that applies them
//! - [`path`]: normalization helpers

pub mod cache;
pub mod events;
pub mod fs;
pub mod path;

pub use cache::NamespaceCache;
pub use events::{apply_event, watch_events, PushEvent};
pub use fs::{Accept, Filesystem};
