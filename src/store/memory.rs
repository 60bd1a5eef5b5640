//! In-memory store for tests and demos.

use super::{EntryKind, ListFilter, Page, RemoteEntry, RemoteStore};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const ROOT_ID: &str = "root";

const DEFAULT_PAGE_SIZE: usize = 100;

struct Node {
    entry: RemoteEntry,
    trashed: bool,
    data: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    next_id: u64,
}

impl Inner {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("id-{:05}", self.next_id)
    }

    fn folder(&self, id: &str) -> StoreResult<&Node> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !node.entry.is_folder {
            return Err(StoreError::NotAFolder(id.to_string()));
        }
        Ok(node)
    }

    fn children<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |node| node.entry.parent_ids.iter().any(|p| p == parent_id))
    }

    fn insert(
        &mut self,
        parent_id: &str,
        name: &str,
        is_folder: bool,
        data: Vec<u8>,
        modified_time: Option<DateTime<Utc>>,
    ) -> StoreResult<String> {
        self.folder(parent_id)?;
        let id = self.allocate_id();
        let size_bytes = (!is_folder).then_some(data.len() as u64);
        let entry = RemoteEntry {
            id: id.clone(),
            name: name.to_string(),
            is_folder,
            modified_time,
            size_bytes,
            parent_ids: vec![parent_id.to_string()],
        };
        self.nodes.insert(
            id.clone(),
            Node {
                entry,
                trashed: false,
                data,
            },
        );
        Ok(id)
    }
}

/// Thread-safe in-memory [`RemoteStore`].
///
/// Starts with a single root folder ([`ROOT_ID`]). Entries may have several
/// parents, listings are paginated and sorted by name, and the number of
/// `create_folder` calls is tracked so tests can assert on it.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    page_size: usize,
    folders_created: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.nodes.insert(
            ROOT_ID.to_string(),
            Node {
                entry: RemoteEntry {
                    id: ROOT_ID.to_string(),
                    name: String::new(),
                    is_folder: true,
                    modified_time: None,
                    size_bytes: None,
                    parent_ids: Vec::new(),
                },
                trashed: false,
                data: Vec::new(),
            },
        );
        Self {
            inner: RwLock::new(inner),
            page_size: DEFAULT_PAGE_SIZE,
            folders_created: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root_id(&self) -> &'static str {
        ROOT_ID
    }

    /// Creates a folder without counting it as a `create_folder` call.
    pub fn add_folder(&self, parent_id: &str, name: &str) -> StoreResult<String> {
        self.write().insert(parent_id, name, true, Vec::new(), None)
    }

    pub fn add_file(
        &self,
        parent_id: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
        modified_time: Option<DateTime<Utc>>,
    ) -> StoreResult<String> {
        self.write()
            .insert(parent_id, name, false, data.into(), modified_time)
    }

    /// Adds an extra parent to an existing entry.
    pub fn add_parent(&self, id: &str, parent_id: &str) -> StoreResult<()> {
        let mut inner = self.write();
        inner.folder(parent_id)?;
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        node.entry.parent_ids.push(parent_id.to_string());
        Ok(())
    }

    pub fn trash(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.write();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        node.trashed = true;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().nodes.contains_key(id)
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.read().nodes.get(id).map(|node| node.data.clone())
    }

    /// Walks `path` (slash separated names) from `start_id`.
    pub fn lookup(&self, start_id: &str, path: &str) -> Option<RemoteEntry> {
        let inner = self.read();
        let mut current = inner.nodes.get(start_id)?.entry.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let parent_id = current.id.clone();
            let mut matches: Vec<&Node> = inner
                .children(&parent_id)
                .filter(|node| !node.trashed && node.entry.name == segment)
                .collect();
            matches.sort_by(|a, b| a.entry.id.cmp(&b.entry.id));
            current = matches.first()?.entry.clone();
        }
        Some(current)
    }

    /// Names of the live children of `parent_id`, sorted.
    pub fn child_names(&self, parent_id: &str) -> Vec<String> {
        let inner = self.read();
        let mut names: Vec<String> = inner
            .children(parent_id)
            .filter(|node| !node.trashed)
            .map(|node| node.entry.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn folders_created(&self) -> usize {
        self.folders_created.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn list_page(&self, parent_id: &str, filter: ListFilter, page_token: Option<String>) -> StoreResult<Page> {
        let inner = self.read();
        inner.folder(parent_id)?;

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Remote(format!("invalid page token: {}", token)))?,
            None => 0,
        };

        let mut matching: Vec<&RemoteEntry> = inner
            .children(parent_id)
            .filter(|node| !(filter.exclude_trashed && node.trashed))
            .map(|node| &node.entry)
            .filter(|entry| filter.matches(entry))
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let entries: Vec<RemoteEntry> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|entry| (*entry).clone())
            .collect();
        let next = offset + entries.len();
        let next_page_token = (next < matching.len()).then(|| next.to_string());

        Ok(Page {
            entries,
            next_page_token,
        })
    }

    fn find_child(&self, parent_id: &str, name: &str, kind: Option<EntryKind>) -> StoreResult<Option<RemoteEntry>> {
        let inner = self.read();
        inner.folder(parent_id)?;
        let mut matches: Vec<&RemoteEntry> = inner
            .children(parent_id)
            .filter(|node| !node.trashed)
            .map(|node| &node.entry)
            .filter(|entry| entry.name == name && kind.map_or(true, |k| entry.kind() == k))
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.first().map(|entry| (*entry).clone()))
    }

    fn find_file_by_name(&self, name: &str) -> StoreResult<Option<RemoteEntry>> {
        let inner = self.read();
        let mut matches: Vec<&RemoteEntry> = inner
            .nodes
            .values()
            .filter(|node| !node.trashed && !node.entry.is_folder && node.entry.name == name)
            .map(|node| &node.entry)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.first().map(|entry| (*entry).clone()))
    }

    fn get(&self, id: &str) -> StoreResult<RemoteEntry> {
        self.read()
            .nodes
            .get(id)
            .map(|node| node.entry.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> StoreResult<String> {
        let id = self.write().insert(parent_id, name, true, Vec::new(), None)?;
        self.folders_created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn move_entry(
        &self,
        id: &str,
        new_parent_id: &str,
        removed_parent_ids: &[String],
        new_name: &str,
    ) -> StoreResult<()> {
        let mut inner = self.write();
        inner.folder(new_parent_id)?;
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        node.entry
            .parent_ids
            .retain(|parent| !removed_parent_ids.contains(parent));
        if !node.entry.parent_ids.iter().any(|p| p == new_parent_id) {
            node.entry.parent_ids.push(new_parent_id.to_string());
        }
        node.entry.name = new_name.to_string();
        node.entry.modified_time = Some(Utc::now());
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let mut inner = self.write();
        if inner.nodes.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        // Orphaned descendants go with their folder.
        let mut doomed = vec![id.to_string()];
        while let Some(parent) = doomed.pop() {
            let orphans: Vec<String> = inner
                .nodes
                .values()
                .filter(|node| node.entry.parent_ids == [parent.clone()])
                .map(|node| node.entry.id.clone())
                .collect();
            for orphan in orphans {
                inner.nodes.remove(&orphan);
                doomed.push(orphan);
            }
        }
        for node in inner.nodes.values_mut() {
            node.entry.parent_ids.retain(|p| p != id);
        }
        Ok(())
    }

    fn upload(&self, parent_id: &str, name: &str, data: &[u8]) -> StoreResult<String> {
        self.write()
            .insert(parent_id, name, false, data.to_vec(), Some(Utc::now()))
    }

    fn download(&self, id: &str) -> StoreResult<Vec<u8>> {
        let inner = self.read();
        let node = inner
            .nodes
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if node.entry.is_folder {
            return Err(StoreError::Remote(format!("cannot download folder {}", id)));
        }
        Ok(node.data.clone())
    }
}
