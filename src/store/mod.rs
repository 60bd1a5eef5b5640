//! The remote file store the engines operate on.
//!
//! Folders and files share one [`RemoteEntry`] shape. Every call is an
//! independent, independently failing operation; callers decide whether to
//! retry (see [`crate::retry::RetryPolicy`]).

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::StoreResult;
use chrono::{DateTime, Utc};

/// A file or folder held by the store. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub modified_time: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    pub parent_ids: Vec<String>,
}

impl RemoteEntry {
    pub fn kind(&self) -> EntryKind {
        if self.is_folder {
            EntryKind::Folder
        } else {
            EntryKind::File
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// Which children a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListFilter {
    pub kind: Option<EntryKind>,
    pub exclude_trashed: bool,
}

impl ListFilter {
    pub fn files() -> Self {
        Self {
            kind: Some(EntryKind::File),
            exclude_trashed: true,
        }
    }

    pub fn folders() -> Self {
        Self {
            kind: Some(EntryKind::Folder),
            exclude_trashed: true,
        }
    }

    pub fn any() -> Self {
        Self {
            kind: None,
            exclude_trashed: true,
        }
    }

    pub fn matches(&self, entry: &RemoteEntry) -> bool {
        self.kind.map_or(true, |kind| entry.kind() == kind)
    }
}

/// One page of a listing. `next_page_token` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub entries: Vec<RemoteEntry>,
    pub next_page_token: Option<String>,
}

/// Operations the engines need from a hierarchical file store.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteStore: Send + Sync {
    fn list_page(&self, parent_id: &str, filter: ListFilter, page_token: Option<String>) -> StoreResult<Page>;

    /// Lists every child of `parent_id`, following continuation tokens until exhausted.
    fn list(&self, parent_id: &str, filter: ListFilter) -> StoreResult<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page_token = None;
        loop {
            let page = self.list_page(parent_id, filter, page_token)?;
            entries.extend(page.entries);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(entries),
            }
        }
    }

    /// Looks up a direct child by exact name. `kind` of `None` matches files and folders.
    fn find_child(&self, parent_id: &str, name: &str, kind: Option<EntryKind>) -> StoreResult<Option<RemoteEntry>>;

    /// Store-wide lookup of a file by exact name, regardless of parent.
    fn find_file_by_name(&self, name: &str) -> StoreResult<Option<RemoteEntry>>;

    fn get(&self, id: &str) -> StoreResult<RemoteEntry>;

    fn create_folder(&self, parent_id: &str, name: &str) -> StoreResult<String>;

    /// Adds `new_parent_id`, drops `removed_parent_ids` and renames, in one call.
    fn move_entry(
        &self,
        id: &str,
        new_parent_id: &str,
        removed_parent_ids: &[String],
        new_name: &str,
    ) -> StoreResult<()>;

    fn delete(&self, id: &str) -> StoreResult<()>;

    fn upload(&self, parent_id: &str, name: &str, data: &[u8]) -> StoreResult<String>;

    fn download(&self, id: &str) -> StoreResult<Vec<u8>>;
}
