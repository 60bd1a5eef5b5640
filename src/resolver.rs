//! Destination folder resolution and name-conflict avoidance.

use crate::error::Result;
use crate::store::{EntryKind, RemoteStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hasher;
use tracing::{debug, info};
use twox_hash::XxHash64;

/// Prefix of the folder ids fabricated in dry-run mode.
pub const DRY_RUN_PREFIX: &str = "dryrun-";

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(DRY_RUN_PREFIX)
}

/// Cache key for folder resolution: a child name under a parent folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub parent_id: String,
    pub name: String,
}

impl PathKey {
    pub fn new(parent_id: &str, name: &str) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            name: name.to_string(),
        }
    }

    /// Stable placeholder id for dry runs, derived from the key alone.
    fn placeholder_id(&self) -> String {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(self.parent_id.as_bytes());
        hasher.write(b"/");
        hasher.write(self.name.as_bytes());
        format!("{}{:016x}", DRY_RUN_PREFIX, hasher.finish())
    }
}

/// Append-only map of resolved folder ids, shared by every task of a run.
#[derive(Debug, Default)]
pub struct FolderCache {
    folders: DashMap<PathKey, String>,
}

impl FolderCache {
    pub fn get(&self, key: &PathKey) -> Option<String> {
        self.folders.get(key).map(|id| id.value().clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.folders.len()
    }
}

/// Makes sure a chain of folders exists, creating what is missing.
pub struct FolderResolver<'a> {
    store: &'a dyn RemoteStore,
    cache: &'a FolderCache,
    dry_run: bool,
}

impl<'a> FolderResolver<'a> {
    pub fn new(store: &'a dyn RemoteStore, cache: &'a FolderCache, dry_run: bool) -> Self {
        Self {
            store,
            cache,
            dry_run,
        }
    }

    /// Resolves `segments` below `root_id` and returns the id of the last one.
    /// Blank, `.` and `..` segments are skipped.
    pub fn ensure_path<S: AsRef<str>>(&self, root_id: &str, segments: &[S]) -> Result<String> {
        let mut current = root_id.to_string();
        for segment in segments.iter().map(AsRef::as_ref) {
            if segment.trim().is_empty() || segment == "." || segment == ".." {
                continue;
            }
            current = self.resolve_segment(&current, segment)?;
        }
        Ok(current)
    }

    fn resolve_segment(&self, parent_id: &str, name: &str) -> Result<String> {
        // The vacant entry holds its shard's write lock until the id is
        // inserted, so concurrent callers for one key wait and reuse it.
        match self.cache.folders.entry(PathKey::new(parent_id, name)) {
            Entry::Occupied(cached) => Ok(cached.get().clone()),
            Entry::Vacant(slot) => {
                let id = self.find_or_create(slot.key())?;
                slot.insert(id.clone());
                Ok(id)
            }
        }
    }

    fn find_or_create(&self, key: &PathKey) -> Result<String> {
        if self.dry_run && is_placeholder(&key.parent_id) {
            return Ok(self.simulate_create(key));
        }

        if let Some(existing) = self
            .store
            .find_child(&key.parent_id, &key.name, Some(EntryKind::Folder))?
        {
            return Ok(existing.id);
        }

        if self.dry_run {
            return Ok(self.simulate_create(key));
        }

        let id = self.store.create_folder(&key.parent_id, &key.name)?;
        debug!("Folder \"{}\" created with id {}", key.name, id);
        Ok(id)
    }

    fn simulate_create(&self, key: &PathKey) -> String {
        info!("[DRY RUN] Create folder \"{}\" in {}", key.name, key.parent_id);
        key.placeholder_id()
    }
}

/// Splits a name into base and extension at the last dot. A leading dot is
/// part of the base.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

/// `base_N.ext`, the name tried after `N` collisions.
pub fn numbered_name(name: &str, counter: usize) -> String {
    if counter == 0 {
        return name.to_string();
    }
    let (base, extension) = split_extension(name);
    format!("{}_{}{}", base, counter, extension)
}

/// Picks a name that does not collide with anything already in a folder.
pub struct ConflictResolver<'a> {
    store: &'a dyn RemoteStore,
    dry_run: bool,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(store: &'a dyn RemoteStore, dry_run: bool) -> Self {
        Self { store, dry_run }
    }

    /// First free name among `name`, `base_1.ext`, `base_2.ext`, ...
    pub fn resolve(&self, folder_id: &str, desired_name: &str) -> Result<String> {
        self.resolve_for(folder_id, desired_name, None)
    }

    /// Like [`ConflictResolver::resolve`], but an entry that is `own_id` does
    /// not count as a collision.
    pub fn resolve_for(&self, folder_id: &str, desired_name: &str, own_id: Option<&str>) -> Result<String> {
        let mut counter = 0;
        let mut candidate = desired_name.to_string();
        while self.is_taken(folder_id, &candidate, own_id)? {
            counter += 1;
            candidate = numbered_name(desired_name, counter);
            debug!("Name conflict, trying \"{}\"", candidate);
        }
        if counter > 0 {
            info!("\"{}\" renamed to \"{}\" to avoid a conflict", desired_name, candidate);
        }
        Ok(candidate)
    }

    fn is_taken(&self, folder_id: &str, name: &str, own_id: Option<&str>) -> Result<bool> {
        if self.dry_run && is_placeholder(folder_id) {
            return Ok(false);
        }
        let existing = self.store.find_child(folder_id, name, None)?;
        Ok(existing.map_or(false, |entry| Some(entry.id.as_str()) != own_id))
    }
}
