//! Bidirectional path ↔ item id cache
//!
//! Two maps kept in mirror: `path → item` and `id → (path, item)`. Entries are
//! only ever added from authoritative listings or completed mutations, so
//! concurrent population can at worst overwrite an entry with an equally
//! fresh one. The lock is synchronous and never held across an await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cvfs_core::{ItemId, NamespaceItem};

use crate::path::{is_within, replace_prefix, split_parent, ROOT};

#[derive(Default)]
struct Maps {
    by_path: HashMap<String, NamespaceItem>,
    by_id: HashMap<ItemId, (String, NamespaceItem)>,
}

impl Maps {
    fn remove_path(&mut self, path: &str) -> Option<NamespaceItem> {
        let item = self.by_path.remove(path)?;
        if matches!(self.by_id.get(&item.id()), Some((p, _)) if p == path) {
            self.by_id.remove(&item.id());
        }
        Some(item)
    }

    fn insert(&mut self, path: String, item: NamespaceItem) {
        // keep the mirror: one path per id, one id per path
        if let Some((old_path, _)) = self.by_id.remove(&item.id()) {
            self.by_path.remove(&old_path);
        }
        self.remove_path(&path);
        self.by_id.insert(item.id(), (path.clone(), item.clone()));
        self.by_path.insert(path, item);
    }

    fn paths_within(&self, prefix: &str) -> Vec<String> {
        self.by_path
            .keys()
            .filter(|p| is_within(p, prefix))
            .cloned()
            .collect()
    }
}

/// Path ↔ id cache for one namespace. Paths are expected normalized.
#[derive(Default)]
pub struct NamespaceCache {
    maps: Mutex<Maps>,
}

impl NamespaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `item` at `path`, replacing whatever either key mapped to.
    pub fn insert(&self, path: &str, item: NamespaceItem) {
        self.lock().insert(path.to_string(), item);
    }

    pub fn get(&self, path: &str) -> Option<NamespaceItem> {
        self.lock().by_path.get(path).cloned()
    }

    pub fn get_by_id(&self, id: ItemId) -> Option<(String, NamespaceItem)> {
        self.lock().by_id.get(&id).cloned()
    }

    pub fn path_of(&self, id: ItemId) -> Option<String> {
        self.lock().by_id.get(&id).map(|(p, _)| p.clone())
    }

    /// Drop `path` and everything below it. Returns the number of entries
    /// removed.
    pub fn invalidate(&self, path: &str) -> usize {
        let mut maps = self.lock();
        let doomed = maps.paths_within(path);
        for p in &doomed {
            maps.remove_path(p);
        }
        doomed.len()
    }

    /// Drop everything strictly below `path`, keeping `path` itself.
    pub fn invalidate_children(&self, path: &str) -> usize {
        let mut maps = self.lock();
        let doomed: Vec<String> = maps
            .paths_within(path)
            .into_iter()
            .filter(|p| p != path)
            .collect();
        for p in &doomed {
            maps.remove_path(p);
        }
        doomed.len()
    }

    /// Cached entries exactly one level below `path`, with their ids.
    pub fn children_of(&self, path: &str) -> Vec<(String, ItemId)> {
        self.lock()
            .by_path
            .iter()
            .filter(|(p, _)| matches!(split_parent(p), Some((parent, _)) if parent == path))
            .map(|(p, item)| (p.clone(), item.id()))
            .collect()
    }

    /// Invalidate the subtree rooted at the item with `id`, if cached.
    pub fn invalidate_id(&self, id: ItemId) -> Option<String> {
        let path = self.path_of(id)?;
        self.invalidate(&path);
        Some(path)
    }

    /// Move `old` and its descendants under `new`, keeping ids and items.
    /// Entries already cached under `new` are dropped first.
    pub fn rewrite(&self, old: &str, new: &str) {
        if old == new || old == ROOT {
            return;
        }
        let mut maps = self.lock();
        for stale in maps.paths_within(new) {
            if !is_within(&stale, old) {
                maps.remove_path(&stale);
            }
        }

        let moved: Vec<(String, NamespaceItem)> = maps
            .paths_within(old)
            .into_iter()
            .filter_map(|p| maps.remove_path(&p).map(|item| (p, item)))
            .collect();
        for (path, item) in moved {
            if let Some(target) = replace_prefix(&path, old, new) {
                maps.insert(target, item);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut maps = self.lock();
        maps.by_path.clear();
        maps.by_id.clear();
    }
}
