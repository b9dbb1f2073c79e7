//! Remote mutation notifications
//!
//! The remote pushes an event whenever an item is renamed, moved, trashed,
//! restored or deleted by another client. Each one invalidates the cached
//! subtree of the item it names; the next resolve re-lists from the remote.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cvfs_core::{CvfsError, CvfsResult, ItemId};

use crate::cache::NamespaceCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    FileRenamed { id: ItemId },
    FileMoved { id: ItemId },
    FileTrashed { id: ItemId },
    FileRestored { id: ItemId },
    FileDeletedPermanent { id: ItemId },
    FolderRenamed { id: ItemId },
    FolderMoved { id: ItemId },
    FolderTrashed { id: ItemId },
    FolderRestored { id: ItemId },
    FolderDeletedPermanent { id: ItemId },
}

impl PushEvent {
    /// The item the event is about.
    pub fn item(&self) -> ItemId {
        match self {
            PushEvent::FileRenamed { id }
            | PushEvent::FileMoved { id }
            | PushEvent::FileTrashed { id }
            | PushEvent::FileRestored { id }
            | PushEvent::FileDeletedPermanent { id }
            | PushEvent::FolderRenamed { id }
            | PushEvent::FolderMoved { id }
            | PushEvent::FolderTrashed { id }
            | PushEvent::FolderRestored { id }
            | PushEvent::FolderDeletedPermanent { id } => *id,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(
            self,
            PushEvent::FolderRenamed { .. }
                | PushEvent::FolderMoved { .. }
                | PushEvent::FolderTrashed { .. }
                | PushEvent::FolderRestored { .. }
                | PushEvent::FolderDeletedPermanent { .. }
        )
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            PushEvent::FileRenamed { .. } => "file_renamed",
            PushEvent::FileMoved { .. } => "file_moved",
            PushEvent::FileTrashed { .. } => "file_trashed",
            PushEvent::FileRestored { .. } => "file_restored",
            PushEvent::FileDeletedPermanent { .. } => "file_deleted_permanent",
            PushEvent::FolderRenamed { .. } => "folder_renamed",
            PushEvent::FolderMoved { .. } => "folder_moved",
            PushEvent::FolderTrashed { .. } => "folder_trashed",
            PushEvent::FolderRestored { .. } => "folder_restored",
            PushEvent::FolderDeletedPermanent { .. } => "folder_deleted_permanent",
        }
    }

    pub fn from_bytes(data: &[u8]) -> CvfsResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| CvfsError::Protocol(format!("deserializing PushEvent: {e}")))
    }

    pub fn to_bytes(&self) -> CvfsResult<bytes::Bytes> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CvfsError::Protocol(format!("serializing PushEvent: {e}")))?;
        Ok(bytes::Bytes::from(json))
    }
}

/// Invalidate whatever `event` touches. Returns the invalidated path, or
/// `None` when the item was not cached.
pub fn apply_event(cache: &NamespaceCache, event: &PushEvent) -> Option<String> {
    let path = cache.invalidate_id(event.item());
    match &path {
        Some(path) => debug!(
            event = event.event_type(),
            id = %event.item(),
            %path,
            "invalidated cached subtree"
        ),
        None => debug!(event = event.event_type(), id = %event.item(), "event for uncached item"),
    }
    path
}

/// Apply events from `events` until the stream ends or `cancel` fires.
/// Returns the number of events consumed.
pub async fn watch_events<S>(cache: &NamespaceCache, events: S, cancel: CancellationToken) -> u64
where
    S: Stream<Item = PushEvent>,
{
    futures::pin_mut!(events);
    let mut consumed = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(consumed, "push event watcher cancelled");
                break;
            }
            next = events.next() => match next {
                Some(event) => {
                    apply_event(cache, &event);
                    consumed += 1;
                }
                None => {
                    info!(consumed, "push event stream ended");
                    break;
                }
            },
        }
    }
    consumed
}
