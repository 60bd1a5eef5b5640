use crate::error::Result;
use crate::store::{ListFilter, RemoteStore};
use std::cell::RefCell;
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Deletes folders left empty below a root, deepest first.
///
/// The root itself is never deleted. In dry-run mode deletions are only
/// logged, but tracked so that a parent whose children would all be deleted
/// is reported as empty too.
pub struct EmptyFolderPruner<'a> {
    store: &'a dyn RemoteStore,
    dry_run: bool,
    simulated: RefCell<HashSet<String>>,
}

impl<'a> EmptyFolderPruner<'a> {
    pub fn new(store: &'a dyn RemoteStore, dry_run: bool) -> Self {
        Self {
            store,
            dry_run,
            simulated: RefCell::new(HashSet::new()),
        }
    }

    /// Returns the number of folders deleted (or that would be, in dry-run).
    pub fn prune(&self, root_id: &str) -> Result<usize> {
        self.prune_children(root_id)
    }

    fn prune_children(&self, folder_id: &str) -> Result<usize> {
        let mut deleted = 0;
        for child in self.store.list(folder_id, ListFilter::folders())? {
            match self.prune_children(&child.id) {
                Ok(count) => deleted += count,
                Err(err) => {
                    error!("Failed to prune below \"{}\" ({}): {}", child.name, child.id, err);
                    continue;
                }
            }

            match self.is_empty(&child.id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    error!("Failed to check \"{}\" ({}) for children: {}", child.name, child.id, err);
                    continue;
                }
            }

            if self.dry_run {
                info!("[DRY RUN] Delete empty folder \"{}\" ({})", child.name, child.id);
                self.simulated.borrow_mut().insert(child.id.clone());
                deleted += 1;
                continue;
            }

            match self.store.delete(&child.id) {
                Ok(()) => {
                    info!("Deleted empty folder \"{}\" ({})", child.name, child.id);
                    deleted += 1;
                }
                Err(err) => error!("Failed to delete empty folder \"{}\": {}", child.name, err),
            }
        }
        Ok(deleted)
    }

    fn is_empty(&self, folder_id: &str) -> Result<bool> {
        let children = self.store.list(folder_id, ListFilter::any())?;
        let simulated = self.simulated.borrow();
        let remaining = children
            .iter()
            .filter(|child| !simulated.contains(&child.id))
            .count();
        debug!("Folder {} has {} remaining children", folder_id, remaining);
        Ok(remaining == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, MockRemoteStore, RemoteEntry};

    fn folder(id: &str) -> RemoteEntry {
        RemoteEntry {
            id: id.to_string(),
            name: id.to_string(),
            is_folder: true,
            modified_time: None,
            size_bytes: None,
            parent_ids: Vec::new(),
        }
    }

    #[test]
    fn test_prune_deletes_nested_empty_folders_but_not_root() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.add_folder(store.root_id(), "root").unwrap();
        let a = store.add_folder(&root, "A").unwrap();
        let b = store.add_folder(&a, "B").unwrap();

        // Act
        let deleted = EmptyFolderPruner::new(&store, false).prune(&root).unwrap();

        // Assert
        assert_eq!(deleted, 2);
        assert!(!store.contains(&a));
        assert!(!store.contains(&b));
        assert!(store.contains(&root));
    }

    #[test]
    fn test_prune_keeps_folders_with_files() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.add_folder(store.root_id(), "root").unwrap();
        let kept = store.add_folder(&root, "kept").unwrap();
        let empty = store.add_folder(&kept, "empty").unwrap();
        store.add_file(&kept, "a.txt", b"a".to_vec(), None).unwrap();

        // Act
        let deleted = EmptyFolderPruner::new(&store, false).prune(&root).unwrap();

        // Assert
        assert_eq!(deleted, 1);
        assert!(store.contains(&kept));
        assert!(!store.contains(&empty));
    }

    #[test]
    fn test_dry_run_counts_parents_of_simulated_deletions() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.add_folder(store.root_id(), "root").unwrap();
        let a = store.add_folder(&root, "A").unwrap();
        let b = store.add_folder(&a, "B").unwrap();

        // Act
        let deleted = EmptyFolderPruner::new(&store, true).prune(&root).unwrap();

        // Assert
        assert_eq!(deleted, 2);
        assert!(store.contains(&a));
        assert!(store.contains(&b));
    }

    #[test]
    fn test_prune_continues_after_delete_failure() {
        // Arrange
        let mut store = MockRemoteStore::new();
        store.expect_list().returning(|parent, _| {
            Ok(if parent == "root" {
                vec![folder("x"), folder("y")]
            } else {
                Vec::new()
            })
        });
        store
            .expect_delete()
            .withf(|id| id == "x")
            .returning(|id| Err(StoreError::Remote(format!("{} is locked", id))));
        store.expect_delete().withf(|id| id == "y").returning(|_| Ok(()));

        // Act
        let deleted = EmptyFolderPruner::new(&store, false).prune("root").unwrap();

        // Assert
        assert_eq!(deleted, 1);
    }

    #[test]
    fn test_prune_skips_folder_whose_contents_cannot_be_listed() {
        // Arrange
        let mut store = MockRemoteStore::new();
        store.expect_list().returning(|parent, filter| {
            if parent == "root" {
                Ok(vec![folder("a"), folder("b"), folder("c")])
            } else if parent == "b" && filter == ListFilter::any() {
                Err(StoreError::Remote("flaky".to_string()))
            } else {
                Ok(Vec::new())
            }
        });
        store.expect_delete().withf(|id| id == "a").times(1).returning(|_| Ok(()));
        store.expect_delete().withf(|id| id == "c").times(1).returning(|_| Ok(()));

        // Act
        let deleted = EmptyFolderPruner::new(&store, false).prune("root").unwrap();

        // Assert
        assert_eq!(deleted, 2);
    }
}
