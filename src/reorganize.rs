use crate::classifier::classify;
use crate::context::RunContext;
use crate::error::Result;
use crate::path_generator::{is_month_folder, is_year_folder, join_relative, PathGenerator};
use crate::pool::{Submitter, WorkerPool};
use crate::resolver::{ConflictResolver, FolderResolver};
use crate::retry::RetryPolicy;
use crate::store::{ListFilter, RemoteEntry, RemoteStore};
use tracing::{debug, error, info, warn};

/// Main orchestrator that moves every file of a source tree into
/// `destination/YYYY/MM/<relative path>`.
pub struct Reorganizer<'a> {
    store: &'a dyn RemoteStore,
    ctx: &'a RunContext,
    pool: &'a WorkerPool,
    path_generator: PathGenerator,
    destination_id: String,
    recursive: bool,
}

impl<'a> Reorganizer<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        ctx: &'a RunContext,
        pool: &'a WorkerPool,
        destination_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ctx,
            pool,
            path_generator: PathGenerator::new(),
            destination_id: destination_id.into(),
            recursive: true,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Walks `source_id`, dispatching one move task per file, and returns once
    /// every task has finished. Per-file failures are counted in the run
    /// counters; only a failure to list the source itself is returned.
    pub fn reorganize(&self, source_id: &str) -> Result<()> {
        info!("Reorganizing {} with {} workers", source_id, self.pool.workers());
        let outcome = self
            .pool
            .scope(|submitter| self.walk(submitter, source_id, ""));
        debug!("{} destination folders resolved", self.ctx.folders.len());
        outcome
    }

    fn walk<'s>(&'s self, submitter: &Submitter<'_, 's>, folder_id: &str, relative_path: &str) -> Result<()> {
        for file in self.store.list(folder_id, ListFilter::files())? {
            let relative_path = relative_path.to_string();
            submitter.submit(move || {
                if self.ctx.is_cancelled() {
                    debug!("Run cancelled, skipping \"{}\"", file.name);
                    return;
                }
                self.process_file(&file, &relative_path);
            });
        }

        if !self.recursive {
            return Ok(());
        }

        for folder in self.store.list(folder_id, ListFilter::folders())? {
            if self.ctx.is_cancelled() {
                warn!("Run cancelled, not descending into \"{}\"", folder.name);
                break;
            }
            let child_path = if is_year_folder(&folder.name) || is_month_folder(&folder.name) {
                debug!("Entering date folder \"{}\" without extending the relative path", folder.name);
                relative_path.to_string()
            } else {
                join_relative(relative_path, &folder.name)
            };
            if let Err(err) = self.walk(submitter, &folder.id, &child_path) {
                error!("Failed to reorganize folder \"{}\" ({}): {}", folder.name, folder.id, err);
            }
        }
        Ok(())
    }

    fn process_file(&self, file: &RemoteEntry, relative_path: &str) {
        self.ctx.counters.record_processed();
        match self.relocate(file, relative_path) {
            Ok(()) => self.ctx.counters.record_moved(),
            Err(err) => {
                error!("Failed to process file \"{}\": {}", file.name, err);
                self.ctx.counters.record_errored(1);
            }
        }
    }

    fn relocate(&self, file: &RemoteEntry, relative_path: &str) -> Result<()> {
        let bucket = classify(&file.name, file.modified_time);
        let segments = self.path_generator.generate_segments(&bucket, relative_path);
        let destination_path = segments.join("/");
        info!("Processing \"{}\" -> {}/{}", file.name, destination_path, file.name);

        let folders = FolderResolver::new(self.store, &self.ctx.folders, self.ctx.dry_run);
        let target_id = folders.ensure_path(&self.destination_id, &segments)?;

        let conflicts = ConflictResolver::new(self.store, self.ctx.dry_run);
        let final_name = conflicts.resolve_for(&target_id, &file.name, Some(&file.id))?;

        if final_name == file.name && file.parent_ids.iter().any(|parent| parent == &target_id) {
            debug!("\"{}\" is already in {}", file.name, destination_path);
            return Ok(());
        }

        if self.ctx.dry_run {
            info!("[DRY RUN] Move \"{}\" to {} as \"{}\"", file.name, destination_path, final_name);
            return Ok(());
        }

        move_file(self.store, &self.ctx.retry, &file.id, &target_id, &final_name)?;
        info!("\"{}\" moved to {} as \"{}\"", file.name, destination_path, final_name);
        Ok(())
    }
}

/// Re-parents a file under `target_id` with `new_name` in a single update,
/// dropping every other parent it had. Retried as a whole.
pub fn move_file(
    store: &dyn RemoteStore,
    retry: &RetryPolicy,
    file_id: &str,
    target_id: &str,
    new_name: &str,
) -> Result<()> {
    retry.run("move", || {
        let current = store.get(file_id)?;
        let previous_parents: Vec<String> = current
            .parent_ids
            .into_iter()
            .filter(|parent| parent != target_id)
            .collect();
        store.move_entry(file_id, target_id, &previous_parents, new_name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StoreError};
    use crate::store::{MemoryStore, MockRemoteStore};
    use chrono::{TimeZone, Utc};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::time::Duration;

    fn context(dry_run: bool) -> RunContext {
        RunContext::new(dry_run, RetryPolicy::new(3, Duration::ZERO))
    }

    fn march_2024() -> Option<chrono::DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_reorganize_moves_files_into_year_month() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = store.add_folder(root, "inbox").unwrap();
        let destination = store.add_folder(root, "archive").unwrap();
        let pdf = store.add_file(&source, "CAMS20230110.pdf", b"pdf".to_vec(), None).unwrap();
        let note = store.add_file(&source, "notes.txt", b"txt".to_vec(), march_2024()).unwrap();
        let ctx = context(false);
        let pool = WorkerPool::new(2).unwrap();

        // Act
        Reorganizer::new(&store, &ctx, &pool, destination.clone())
            .reorganize(&source)
            .unwrap();

        // Assert
        assert_eq!(store.lookup(&destination, "2023/01/CAMS20230110.pdf").unwrap().id, pdf);
        assert_eq!(store.lookup(&destination, "2024/03/notes.txt").unwrap().id, note);
        let counters = ctx.counters.snapshot();
        assert_eq!(counters.files_processed, 2);
        assert_eq!(counters.files_moved, 2);
        assert_eq!(counters.files_errored, 0);
    }

    #[test]
    fn test_reorganize_keeps_relative_path_but_not_date_folders() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = store.add_folder(root, "inbox").unwrap();
        let destination = store.add_folder(root, "archive").unwrap();
        let clients = store.add_folder(&source, "clients").unwrap();
        let old_year = store.add_folder(&clients, "2019").unwrap();
        let old_month = store.add_folder(&old_year, "05").unwrap();
        store.add_file(&old_month, "acme_2022-08-09.pdf", b"a".to_vec(), None).unwrap();
        let ctx = context(false);
        let pool = WorkerPool::new(2).unwrap();

        // Act
        Reorganizer::new(&store, &ctx, &pool, destination.clone())
            .reorganize(&source)
            .unwrap();

        // Assert
        assert!(store.lookup(&destination, "2022/08/clients/acme_2022-08-09.pdf").is_some());
    }

    #[test]
    fn test_reorganize_non_recursive_ignores_subfolders() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = store.add_folder(root, "inbox").unwrap();
        let destination = store.add_folder(root, "archive").unwrap();
        let nested = store.add_folder(&source, "nested").unwrap();
        store.add_file(&nested, "x_2020-01-01.txt", b"x".to_vec(), None).unwrap();
        let ctx = context(false);
        let pool = WorkerPool::new(1).unwrap();

        // Act
        Reorganizer::new(&store, &ctx, &pool, destination.clone())
            .recursive(false)
            .reorganize(&source)
            .unwrap();

        // Assert
        assert_eq!(ctx.counters.snapshot().files_processed, 0);
        assert_eq!(store.child_names(&nested), vec!["x_2020-01-01.txt"]);
    }

    #[test]
    fn test_reorganize_renames_on_conflict() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = store.add_folder(root, "inbox").unwrap();
        let destination = store.add_folder(root, "archive").unwrap();
        let year = store.add_folder(&destination, "2023").unwrap();
        let month = store.add_folder(&year, "05").unwrap();
        store.add_file(&month, "r_2023-05-01.pdf", b"old".to_vec(), None).unwrap();
        let incoming = store.add_file(&source, "r_2023-05-01.pdf", b"new".to_vec(), None).unwrap();
        let ctx = context(false);
        let pool = WorkerPool::new(2).unwrap();

        // Act
        Reorganizer::new(&store, &ctx, &pool, destination.clone())
            .reorganize(&source)
            .unwrap();

        // Assert
        let moved = store.get(&incoming).unwrap();
        assert_eq!(moved.name, "r_2023-05-01_1.pdf");
        assert_eq!(moved.parent_ids, vec![month]);
    }

    #[test]
    fn test_reorganize_twice_is_idempotent() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let tree = store.add_folder(root, "tree").unwrap();
        store.add_file(&tree, "a_2021-02-03.txt", b"a".to_vec(), None).unwrap();
        let pool = WorkerPool::new(2).unwrap();

        // Act
        for _ in 0..2 {
            let ctx = context(false);
            Reorganizer::new(&store, &ctx, &pool, tree.clone())
                .reorganize(&tree)
                .unwrap();
        }

        // Assert
        let month = store.lookup(&tree, "2021/02").unwrap();
        assert_eq!(store.child_names(&month.id), vec!["a_2021-02-03.txt"]);
    }

    #[test]
    fn test_dry_run_moves_nothing() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = store.add_folder(root, "inbox").unwrap();
        let destination = store.add_folder(root, "archive").unwrap();
        store.add_file(&source, "a_2021-02-03.txt", b"a".to_vec(), None).unwrap();
        let ctx = context(true);
        let pool = WorkerPool::new(2).unwrap();

        // Act
        Reorganizer::new(&store, &ctx, &pool, destination.clone())
            .reorganize(&source)
            .unwrap();

        // Assert
        assert_eq!(store.child_names(&source), vec!["a_2021-02-03.txt"]);
        assert!(store.child_names(&destination).is_empty());
        assert_eq!(store.folders_created(), 0);
        assert_eq!(ctx.counters.snapshot().files_moved, 1);
    }

    #[test]
    fn test_cancelled_run_skips_queued_files() {
        // Arrange
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = store.add_folder(root, "inbox").unwrap();
        let destination = store.add_folder(root, "archive").unwrap();
        store.add_file(&source, "a_2021-02-03.txt", b"a".to_vec(), None).unwrap();
        let ctx = context(false);
        ctx.cancel();
        let pool = WorkerPool::new(1).unwrap();

        // Act
        Reorganizer::new(&store, &ctx, &pool, destination)
            .reorganize(&source)
            .unwrap();

        // Assert
        assert_eq!(ctx.counters.snapshot().files_processed, 0);
        assert_eq!(store.child_names(&source), vec!["a_2021-02-03.txt"]);
    }

    #[test]
    fn test_move_file_retries_then_succeeds() {
        // Arrange
        let mut store = MockRemoteStore::new();
        let mut seq = Sequence::new();
        store.expect_get().returning(|id| {
            Ok(RemoteEntry {
                id: id.to_string(),
                name: "a.pdf".to_string(),
                is_folder: false,
                modified_time: None,
                size_bytes: Some(3),
                parent_ids: vec!["old-a".to_string(), "old-b".to_string()],
            })
        });
        store
            .expect_move_entry()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(StoreError::Remote("503".to_string())));
        store
            .expect_move_entry()
            .with(
                eq("file-1"),
                eq("target"),
                eq(vec!["old-a".to_string(), "old-b".to_string()]),
                eq("b.pdf"),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        let retry = RetryPolicy::new(3, Duration::ZERO);

        // Act
        let result = move_file(&store, &retry, "file-1", "target", "b.pdf");

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_move_file_gives_up_after_retry_count() {
        // Arrange
        let mut store = MockRemoteStore::new();
        store.expect_get().returning(|_| Err(StoreError::Remote("timeout".to_string())));
        store.expect_move_entry().never();
        let retry = RetryPolicy::new(2, Duration::ZERO);

        // Act
        let result = move_file(&store, &retry, "file-1", "target", "b.pdf");

        // Assert
        assert!(matches!(result, Err(Error::RetriesExhausted { attempts: 2, .. })));
    }
}
