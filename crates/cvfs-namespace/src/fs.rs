//! Filesystem-style API over the remote's flat item space
//!
//! [`Filesystem`] resolves paths through its [`NamespaceCache`], listing a
//! directory from the remote the first time one of its children is missed,
//! and drives the transfer engine for file contents.
//!
//! Directory creation is serialized by one async mutex and rename/move/remove
//! by another. Reads take neither.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cvfs_core::remote::{ChunkStore, DirectoryService};
use cvfs_core::{
    CvfsError, CvfsResult, DirectoryEntry, DirectoryMetadata, FileEntry, FileMetadata, ItemId,
    NamespaceItem, SealedEntry, SealedKind,
};
use cvfs_crypto::{open_metadata, seal_metadata, MetadataKey};
use cvfs_transfer::{
    download, download_to_writer, upload_reader, with_retry, DownloadOptions, DownloadRequest,
    FinalizedFile, ProgressFn, RetryPolicy, TransferLimits, UploadTarget, UploadTask,
};

use crate::cache::NamespaceCache;
use crate::events::{apply_event, watch_events, PushEvent};
use crate::path::{self, ROOT};

/// Which item kinds a lookup accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Any,
    File,
    Directory,
}

impl Accept {
    fn admits(self, item: &NamespaceItem) -> bool {
        match (self, item) {
            (Accept::Any, _) => true,
            (Accept::File, NamespaceItem::File(_)) => true,
            (Accept::Directory, NamespaceItem::Directory(_)) => true,
            (Accept::File, NamespaceItem::Directory(_)) => false,
            (Accept::Directory, NamespaceItem::File(_)) => false,
        }
    }
}

pub struct Filesystem {
    store: Arc<dyn ChunkStore>,
    dirs: Arc<dyn DirectoryService>,
    metadata_key: MetadataKey,
    root: ItemId,
    cache: NamespaceCache,
    limits: TransferLimits,
    retry: RetryPolicy,
    cancel: CancellationToken,
    create_lock: Mutex<()>,
    mutation_lock: Mutex<()>,
}

impl Filesystem {
    /// Filesystem over a remote implementing both collaborator traits.
    pub fn new<R>(remote: Arc<R>, metadata_key: MetadataKey, root: ItemId) -> Self
    where
        R: ChunkStore + DirectoryService + 'static,
    {
        Self::from_parts(remote.clone(), remote, metadata_key, root)
    }

    pub fn from_parts(
        store: Arc<dyn ChunkStore>,
        dirs: Arc<dyn DirectoryService>,
        metadata_key: MetadataKey,
        root: ItemId,
    ) -> Self {
        Self {
            store,
            dirs,
            metadata_key,
            root,
            cache: NamespaceCache::new(),
            limits: TransferLimits::default(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            create_lock: Mutex::new(()),
            mutation_lock: Mutex::new(()),
        }
    }

    /// Share transfer slots with other filesystems or tasks.
    pub fn with_limits(mut self, limits: TransferLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn root_id(&self) -> ItemId {
        self.root
    }

    pub fn cache(&self) -> &NamespaceCache {
        &self.cache
    }

    /// Cancel every transfer started through this filesystem.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn root_item(&self) -> NamespaceItem {
        NamespaceItem::Directory(DirectoryEntry {
            id: self.root,
            parent: self.root,
            metadata: DirectoryMetadata {
                name: String::new(),
            },
        })
    }

    // ── Resolution ──────────────────────────────────────────────────────────

    /// Resolve `path` to an item id.
    pub async fn resolve(&self, path: &str) -> CvfsResult<ItemId> {
        self.resolve_kind(path, Accept::Any).await.map(|item| item.id())
    }

    /// Resolve `path` and require the item to be of an accepted kind.
    pub async fn resolve_kind(&self, path: &str, accept: Accept) -> CvfsResult<NamespaceItem> {
        let path = path::normalize(path)?;
        let item = self.lookup(&path).await?;
        if !accept.admits(&item) {
            let kind = if item.is_directory() {
                "a directory"
            } else {
                "a file"
            };
            return Err(CvfsError::NotFound(format!("{path} is {kind}")));
        }
        Ok(item)
    }

    pub async fn stat(&self, path: &str) -> CvfsResult<NamespaceItem> {
        self.resolve_kind(path, Accept::Any).await
    }

    /// Walk a normalized path, listing each parent at most once on a miss.
    async fn lookup(&self, path: &str) -> CvfsResult<NamespaceItem> {
        let mut current = self.root_item();
        let mut current_path = ROOT.to_string();

        for name in path::components(path) {
            if !current.is_directory() {
                return Err(CvfsError::NotFound(format!(
                    "{current_path} is not a directory"
                )));
            }
            let child_path = path::join(&current_path, name);
            let child = match self.cache.get(&child_path) {
                Some(item) => item,
                None => {
                    self.populate(current.id(), &current_path).await?;
                    self.cache
                        .get(&child_path)
                        .ok_or_else(|| CvfsError::NotFound(child_path.clone()))?
                }
            };
            current = child;
            current_path = child_path;
        }
        Ok(current)
    }

    /// List `dir_id` from the remote and cache every child it returns.
    async fn populate(&self, dir_id: ItemId, dir_path: &str) -> CvfsResult<Vec<NamespaceItem>> {
        let items = self.list_remote(dir_id, dir_path).await?;
        for item in &items {
            self.cache.insert(&path::join(dir_path, item.name()), item.clone());
        }
        debug!(dir = dir_path, entries = items.len(), "directory populated");
        Ok(items)
    }

    /// Open every readable entry of `dir_id`. Nothing is cached.
    async fn list_remote(&self, dir_id: ItemId, dir_path: &str) -> CvfsResult<Vec<NamespaceItem>> {
        let sealed = with_retry(&self.retry, &self.cancel, "list directory", || {
            self.dirs.list_directory(dir_id)
        })
        .await?;

        let mut items = Vec::with_capacity(sealed.len());
        for entry in &sealed {
            match self.open_entry(entry) {
                Ok(item) => items.push(item),
                Err(e) => warn!(dir = dir_path, id = %entry.id, error = %e, "skipping unreadable entry"),
            }
        }
        Ok(items)
    }

    fn open_entry(&self, entry: &SealedEntry) -> CvfsResult<NamespaceItem> {
        let item = match &entry.kind {
            SealedKind::File {
                chunk_count,
                version,
                locator,
                ..
            } => NamespaceItem::File(FileEntry {
                id: entry.id,
                parent: entry.parent,
                metadata: open_metadata::<FileMetadata>(&self.metadata_key, &entry.metadata)?,
                chunk_count: *chunk_count,
                version: *version,
                locator: locator.clone(),
            }),
            SealedKind::Directory => NamespaceItem::Directory(DirectoryEntry {
                id: entry.id,
                parent: entry.parent,
                metadata: open_metadata::<DirectoryMetadata>(&self.metadata_key, &entry.metadata)?,
            }),
        };
        path::validate_name(item.name())?;
        Ok(item)
    }

    fn seal_item(&self, item: &NamespaceItem) -> CvfsResult<String> {
        let sealed = match item {
            NamespaceItem::File(f) => seal_metadata(&self.metadata_key, &f.metadata)?,
            NamespaceItem::Directory(d) => seal_metadata(&self.metadata_key, &d.metadata)?,
        };
        Ok(sealed)
    }

    // ── Directories ─────────────────────────────────────────────────────────

    /// Children of a directory, always fresh from the remote.
    pub async fn read_dir(&self, path: &str) -> CvfsResult<Vec<NamespaceItem>> {
        let path = path::normalize(path)?;
        let dir = self.lookup(&path).await?;
        if !dir.is_directory() {
            return Err(CvfsError::NotFound(format!("{path} is not a directory")));
        }
        let items = self.list_remote(dir.id(), &path).await?;

        // children that vanished or changed id take their cached subtree
        // with them; the rest keep their descendants
        for (child_path, id) in self.cache.children_of(&path) {
            let still_there = items
                .iter()
                .any(|item| item.id() == id && path::join(&path, item.name()) == child_path);
            if !still_there {
                self.cache.invalidate(&child_path);
            }
        }
        for item in &items {
            self.cache.insert(&path::join(&path, item.name()), item.clone());
        }
        debug!(dir = %path, entries = items.len(), "directory refreshed");
        Ok(items)
    }

    /// Create a directory and any missing ancestors. Returns the id of the
    /// (possibly pre-existing) directory.
    pub async fn mkdir(&self, path: &str) -> CvfsResult<ItemId> {
        let path = path::normalize(path)?;
        let _guard = self.create_lock.lock().await;

        let mut parent_id = self.root;
        let mut parent_path = ROOT.to_string();
        for name in path::components(&path) {
            path::validate_name(name)?;
            let child_path = path::join(&parent_path, name);

            let existing = match self.cache.get(&child_path) {
                Some(item) => Some(item),
                None => {
                    // another client may have created it since we last listed
                    self.populate(parent_id, &parent_path).await?;
                    self.cache.get(&child_path)
                }
            };

            parent_id = match existing {
                Some(NamespaceItem::Directory(d)) => d.id,
                Some(NamespaceItem::File(_)) => {
                    return Err(CvfsError::AlreadyExists(format!(
                        "{child_path} exists and is a file"
                    )))
                }
                None => {
                    let metadata = DirectoryMetadata {
                        name: name.to_string(),
                    };
                    let sealed = seal_metadata(&self.metadata_key, &metadata)?;
                    let id = self.dirs.create_directory(parent_id, sealed).await?;
                    self.cache.insert(
                        &child_path,
                        NamespaceItem::Directory(DirectoryEntry {
                            id,
                            parent: parent_id,
                            metadata,
                        }),
                    );
                    info!(path = %child_path, %id, "directory created");
                    id
                }
            };
            parent_path = child_path;
        }
        Ok(parent_id)
    }

    // ── Mutations ───────────────────────────────────────────────────────────

    /// Rename and/or move `from` to `to`. The destination must not exist.
    pub async fn rename(&self, from: &str, to: &str) -> CvfsResult<()> {
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        if from == ROOT || to == ROOT {
            return Err(CvfsError::InvalidPath("the root cannot be renamed".into()));
        }
        if from == to {
            return Ok(());
        }
        if path::is_within(&to, &from) {
            return Err(CvfsError::InvalidPath(format!(
                "cannot move {from} into itself"
            )));
        }
        let Some((dest_parent_path, dest_name)) = path::split_parent(&to) else {
            return Err(CvfsError::InvalidPath(to));
        };
        path::validate_name(dest_name)?;

        let _guard = self.mutation_lock.lock().await;
        let item = self.lookup(&from).await?;
        let dest_parent = self.lookup(dest_parent_path).await?;
        if !dest_parent.is_directory() {
            return Err(CvfsError::NotFound(format!(
                "{dest_parent_path} is not a directory"
            )));
        }
        match self.lookup(&to).await {
            Ok(_) => return Err(CvfsError::AlreadyExists(to)),
            Err(CvfsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let relocated = item.relocated(dest_parent.id(), dest_name);
        if let Err(e) = self.relocate(&item, &relocated).await {
            // the remote may hold either name now; relist both on next use
            let dropped = self.cache.invalidate(&from) + self.cache.invalidate(&to);
            warn!(%from, %to, id = %item.id(), dropped, error = %e, "rename failed");
            return Err(e);
        }

        self.cache.rewrite(&from, &to);
        self.cache.insert(&to, relocated);
        info!(%from, %to, id = %item.id(), "item renamed");
        Ok(())
    }

    /// Apply a move and/or rename of `item` on the remote.
    async fn relocate(&self, item: &NamespaceItem, relocated: &NamespaceItem) -> CvfsResult<()> {
        if relocated.parent() != item.parent() {
            self.dirs.move_item(item.id(), relocated.parent()).await?;
        }
        if relocated.name() != item.name() {
            let sealed = self.seal_item(relocated)?;
            self.dirs.rename_item(item.id(), sealed).await?;
        }
        Ok(())
    }

    /// Move an item to the trash.
    pub async fn remove(&self, path: &str) -> CvfsResult<()> {
        let path = path::normalize(path)?;
        if path == ROOT {
            return Err(CvfsError::InvalidPath("the root cannot be removed".into()));
        }
        let _guard = self.mutation_lock.lock().await;
        let item = self.lookup(&path).await?;
        self.dirs.trash_item(item.id()).await?;
        let dropped = self.cache.invalidate(&path);
        info!(%path, id = %item.id(), dropped, "item trashed");
        Ok(())
    }

    // ── File contents ───────────────────────────────────────────────────────

    /// Upload `data` to `path`.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> CvfsResult<FileEntry> {
        let mut reader = data;
        self.write_reader(path, &mut reader, None).await
    }

    /// Upload everything `reader` yields to `path`.
    ///
    /// An existing file at `path` is replaced once the new one is finalized.
    /// If the old one then cannot be trashed, the cache already points at the
    /// new file and the error names both ids.
    /// Nothing is cached for `path` unless the upload completes.
    pub async fn write_reader<R>(
        &self,
        path: &str,
        reader: &mut R,
        progress: Option<ProgressFn>,
    ) -> CvfsResult<FileEntry>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = path::normalize(path)?;
        let Some((parent_path, name)) = path::split_parent(&path) else {
            return Err(CvfsError::InvalidPath("cannot write to the root".into()));
        };
        path::validate_name(name)?;

        let parent = self.resolve_kind(parent_path, Accept::Directory).await?;
        let replaced = match self.lookup(&path).await {
            Ok(NamespaceItem::File(f)) => Some(f.id),
            Ok(NamespaceItem::Directory(_)) => {
                return Err(CvfsError::AlreadyExists(format!("{path} is a directory")))
            }
            Err(CvfsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let mut task = UploadTask::new(
            self.store.clone(),
            self.limits.clone(),
            self.metadata_key.clone(),
            UploadTarget::new(parent.id(), name),
        )
        .with_retry(self.retry.clone())
        .with_cancel(&self.cancel);
        if let Some(progress) = progress {
            task = task.with_progress(progress);
        }

        let FinalizedFile { entry, .. } = upload_reader(&task, reader).await?;

        self.cache.insert(&path, NamespaceItem::File(entry.clone()));

        if let Some(old) = replaced {
            let _guard = self.mutation_lock.lock().await;
            let trashed = with_retry(&self.retry, &self.cancel, "trash replaced file", || {
                self.dirs.trash_item(old)
            })
            .await;
            if let Err(e) = trashed {
                warn!(%path, new = %entry.id, %old, error = %e, "replaced file left in place");
                return Err(CvfsError::Storage(format!(
                    "{path} now holds {} but the replaced file {old} could not be trashed: {e}",
                    entry.id
                )));
            }
        }
        Ok(entry)
    }

    /// Read a file, or the `[start, end)` range set in `options`.
    pub async fn read_file(&self, path: &str, options: &DownloadOptions) -> CvfsResult<Bytes> {
        let request = self.download_request(path).await?;
        download(self.store.as_ref(), &self.limits, &request, options).await
    }

    /// Stream a file (or range) into `writer`. Returns bytes written.
    pub async fn read_file_to<W>(
        &self,
        path: &str,
        writer: &mut W,
        options: &DownloadOptions,
    ) -> CvfsResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let request = self.download_request(path).await?;
        download_to_writer(self.store.as_ref(), &self.limits, &request, options, writer).await
    }

    async fn download_request(&self, path: &str) -> CvfsResult<DownloadRequest> {
        match self.resolve_kind(path, Accept::File).await? {
            NamespaceItem::File(entry) => DownloadRequest::from_entry(&entry),
            NamespaceItem::Directory(_) => Err(CvfsError::NotFound(format!(
                "{path} is a directory"
            ))),
        }
    }

    /// Defaults for downloads driven by this filesystem.
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions::default()
            .with_retry(self.retry.clone())
            .with_cancel(self.cancel.child_token())
    }

    // ── Push events ─────────────────────────────────────────────────────────

    pub fn apply_event(&self, event: &PushEvent) -> Option<String> {
        apply_event(&self.cache, event)
    }

    pub async fn watch_events<S>(&self, events: S) -> u64
    where
        S: futures::Stream<Item = PushEvent>,
    {
        watch_events(&self.cache, events, self.cancel.child_token()).await
    }
}
