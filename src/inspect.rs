use crate::classifier::{classify, normalize_for_report};
use crate::error::Result;
use crate::store::{ListFilter, RemoteStore};
use std::collections::HashMap;
use tracing::info;

/// Totals of a tree listing
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ListSummary {
    pub files: usize,
    pub folders: usize,
}

/// Logs the tree below `folder_id`, files first, one indentation step per level.
pub fn list_contents(store: &dyn RemoteStore, folder_id: &str, recursive: bool) -> Result<ListSummary> {
    let mut summary = ListSummary::default();
    list_level(store, folder_id, recursive, 0, &mut summary)?;
    info!("Listed {} files in {} folders", summary.files, summary.folders);
    Ok(summary)
}

fn list_level(
    store: &dyn RemoteStore,
    folder_id: &str,
    recursive: bool,
    depth: usize,
    summary: &mut ListSummary,
) -> Result<()> {
    let indent = "  ".repeat(depth);
    let files = store.list(folder_id, ListFilter::files())?;
    let folders = store.list(folder_id, ListFilter::folders())?;

    if files.is_empty() && folders.is_empty() {
        info!("{}(empty)", indent);
        return Ok(());
    }

    for file in &files {
        let bucket = classify(&file.name, file.modified_time);
        let size = file
            .size_bytes
            .map_or_else(|| "unknown size".to_string(), |bytes| format!("{} bytes", bytes));
        info!(
            "{}[FILE] {} (ID: {}, bucket {}/{}, {})",
            indent, file.name, file.id, bucket.year, bucket.month, size
        );
        summary.files += 1;
    }

    for folder in &folders {
        info!("{}[DIR] {} (ID: {})", indent, folder.name, folder.id);
        summary.folders += 1;
        if recursive {
            list_level(store, &folder.id, recursive, depth + 1, summary)?;
        }
    }
    Ok(())
}

/// File counts per name pattern, most frequent first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatternReport {
    pub patterns: Vec<(String, usize)>,
    pub total_files: usize,
}

/// Counts the files below `folder_id` by [`normalize_for_report`] pattern and logs the result.
pub fn analyze(store: &dyn RemoteStore, folder_id: &str, recursive: bool) -> Result<PatternReport> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total_files = 0;
    count_patterns(store, folder_id, recursive, &mut counts, &mut total_files)?;

    let mut patterns: Vec<(String, usize)> = counts.into_iter().collect();
    patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    info!("=== NAME PATTERNS ===");
    for (pattern, count) in &patterns {
        info!("{:>6}  {}", count, pattern);
    }
    info!("Distinct patterns: {}", patterns.len());
    info!("Files analyzed:    {}", total_files);

    Ok(PatternReport { patterns, total_files })
}

fn count_patterns(
    store: &dyn RemoteStore,
    folder_id: &str,
    recursive: bool,
    counts: &mut HashMap<String, usize>,
    total_files: &mut usize,
) -> Result<()> {
    for file in store.list(folder_id, ListFilter::files())? {
        *counts.entry(normalize_for_report(&file.name)).or_insert(0) += 1;
        *total_files += 1;
    }
    if recursive {
        for folder in store.list(folder_id, ListFilter::folders())? {
            count_patterns(store, &folder.id, recursive, counts, total_files)?;
        }
    }
    Ok(())
}
