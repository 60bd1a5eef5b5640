//! Store backed by a locally mounted directory tree.

use super::{EntryKind, ListFilter, Page, RemoteEntry, RemoteStore};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const ROOT_ID: &str = "/";

/// [`RemoteStore`] over a directory, e.g. the local mount of a synced cloud drive.
///
/// Ids are `/`-rooted paths relative to the configured root, so `/` is the
/// root itself and `/inbox/2023` a folder below it. Entries have exactly one
/// parent, and trashed entries never appear on disk.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StoreError::NotAFolder(root.display().to_string()));
        }
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        let relative = id
            .strip_prefix('/')
            .ok_or_else(|| StoreError::InvalidId(id.to_string()))?;
        let mut path = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            validate_name(segment).map_err(|_| StoreError::InvalidId(id.to_string()))?;
            path.push(segment);
        }
        Ok(path)
    }

    fn id_for_path(&self, path: &Path) -> StoreResult<String> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::InvalidId(path.display().to_string()))?;
        let segments: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Ok(format!("/{}", segments.join("/")))
    }

    fn entry_for(&self, id: &str, path: &Path) -> StoreResult<RemoteEntry> {
        let metadata = fs::metadata(path).map_err(|err| not_found_or(err, id))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_ids = match id.rsplit_once('/') {
            _ if id == ROOT_ID => Vec::new(),
            Some(("", _)) => vec![ROOT_ID.to_string()],
            Some((parent, _)) => vec![parent.to_string()],
            None => Vec::new(),
        };
        Ok(RemoteEntry {
            id: id.to_string(),
            name,
            is_folder: metadata.is_dir(),
            modified_time: metadata.modified().ok().map(DateTime::<Utc>::from),
            size_bytes: metadata.is_file().then(|| metadata.len()),
            parent_ids,
        })
    }

    fn folder_path(&self, id: &str) -> StoreResult<PathBuf> {
        let path = self.path_for(id)?;
        if !path.is_dir() {
            return Err(if path.exists() {
                StoreError::NotAFolder(id.to_string())
            } else {
                StoreError::NotFound(id.to_string())
            });
        }
        Ok(path)
    }
}

fn child_id(parent_id: &str, name: &str) -> String {
    if parent_id == ROOT_ID {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent_id, name)
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(StoreError::InvalidId(name.to_string()));
    }
    Ok(())
}

fn not_found_or(err: std::io::Error, id: &str) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::NotFound(id.to_string()),
        ErrorKind::AlreadyExists => StoreError::AlreadyExists(id.to_string()),
        _ => StoreError::Io(err),
    }
}

impl RemoteStore for FsStore {
    fn list_page(&self, parent_id: &str, filter: ListFilter, _page_token: Option<String>) -> StoreResult<Page> {
        let dir = self.folder_path(parent_id)?;
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let id = child_id(parent_id, &name);
            let entry = self.entry_for(&id, &dir_entry.path())?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Page {
            entries,
            next_page_token: None,
        })
    }

    fn find_child(&self, parent_id: &str, name: &str, kind: Option<EntryKind>) -> StoreResult<Option<RemoteEntry>> {
        self.folder_path(parent_id)?;
        if validate_name(name).is_err() {
            return Ok(None);
        }
        let id = child_id(parent_id, name);
        match self.entry_for(&id, &self.path_for(&id)?) {
            Ok(entry) if kind.map_or(true, |k| entry.kind() == k) => Ok(Some(entry)),
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn find_file_by_name(&self, name: &str) -> StoreResult<Option<RemoteEntry>> {
        for dir_entry in WalkDir::new(&self.root).sort_by_file_name() {
            let dir_entry = dir_entry.map_err(|err| StoreError::Remote(err.to_string()))?;
            if dir_entry.file_type().is_file() && dir_entry.file_name().to_string_lossy() == name {
                let id = self.id_for_path(dir_entry.path())?;
                return self.entry_for(&id, dir_entry.path()).map(Some);
            }
        }
        Ok(None)
    }

    fn get(&self, id: &str) -> StoreResult<RemoteEntry> {
        self.entry_for(id, &self.path_for(id)?)
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> StoreResult<String> {
        validate_name(name)?;
        let dir = self.folder_path(parent_id)?;
        let id = child_id(parent_id, name);
        fs::create_dir(dir.join(name)).map_err(|err| not_found_or(err, &id))?;
        Ok(id)
    }

    fn move_entry(
        &self,
        id: &str,
        new_parent_id: &str,
        _removed_parent_ids: &[String],
        new_name: &str,
    ) -> StoreResult<()> {
        validate_name(new_name)?;
        let source = self.path_for(id)?;
        let target_dir = self.folder_path(new_parent_id)?;
        let target = target_dir.join(new_name);
        if source == target {
            return Ok(());
        }
        if target.exists() {
            return Err(StoreError::AlreadyExists(child_id(new_parent_id, new_name)));
        }
        fs::rename(&source, &target).map_err(|err| not_found_or(err, id))
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        if id == ROOT_ID {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        let path = self.path_for(id)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|err| not_found_or(err, id))
    }

    fn upload(&self, parent_id: &str, name: &str, data: &[u8]) -> StoreResult<String> {
        validate_name(name)?;
        let dir = self.folder_path(parent_id)?;
        let id = child_id(parent_id, name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(name))
            .map_err(|err| not_found_or(err, &id))?;
        file.write_all(data)?;
        Ok(id)
    }

    fn download(&self, id: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(id)?;
        if path.is_dir() {
            return Err(StoreError::Remote(format!("cannot download folder {}", id)));
        }
        fs::read(&path).map_err(|err| not_found_or(err, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().unwrap();
        for (path, data) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, data).unwrap();
        }
        let store = FsStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_list_uses_rooted_path_ids() {
        // Arrange
        let (_dir, store) = store_with(&[("inbox/a.pdf", b"a"), ("inbox/sub/b.pdf", b"bb")]);

        // Act
        let files = store.list("/inbox", ListFilter::files()).unwrap();
        let folders = store.list("/inbox", ListFilter::folders()).unwrap();

        // Assert
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "/inbox/a.pdf");
        assert_eq!(files[0].size_bytes, Some(1));
        assert_eq!(files[0].parent_ids, vec!["/inbox".to_string()]);
        assert_eq!(folders[0].id, "/inbox/sub");
        assert!(folders[0].is_folder);
    }

    #[test]
    fn test_create_move_and_delete() {
        // Arrange
        let (dir, store) = store_with(&[("inbox/a.pdf", b"a")]);

        // Act
        let year = store.create_folder(ROOT_ID, "2023").unwrap();
        store
            .move_entry("/inbox/a.pdf", &year, &["/inbox".to_string()], "renamed.pdf")
            .unwrap();
        store.delete("/inbox").unwrap();

        // Assert
        assert_eq!(year, "/2023");
        assert!(dir.path().join("2023/renamed.pdf").exists());
        assert!(!dir.path().join("inbox").exists());
    }

    #[test]
    fn test_move_refuses_to_overwrite() {
        // Arrange
        let (_dir, store) = store_with(&[("a/x.txt", b"1"), ("b/x.txt", b"2")]);

        // Act
        let result = store.move_entry("/a/x.txt", "/b", &[], "x.txt");

        // Assert
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_find_file_by_name_searches_whole_tree() {
        // Arrange
        let (_dir, store) = store_with(&[("deep/er/target.txt", b"t")]);

        // Act
        let found = store.find_file_by_name("target.txt").unwrap();
        let missing = store.find_file_by_name("nope.txt").unwrap();

        // Assert
        assert_eq!(found.map(|e| e.id), Some("/deep/er/target.txt".to_string()));
        assert!(missing.is_none());
    }

    #[test]
    fn test_rejects_traversal_ids() {
        // Arrange
        let (_dir, store) = store_with(&[]);

        // Act
        let result = store.get("/../etc");

        // Assert
        assert!(matches!(result, Err(StoreError::InvalidId(_))));
    }
}
