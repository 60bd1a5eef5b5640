//! Cold archiving of old month folders into size-bounded ZIP parts.
//!
//! Files of a qualifying month folder are grouped by [`archive_group_key`],
//! sorted by the date in their names and packed greedily into parts. A group's
//! originals are deleted only after every one of its parts has been uploaded.

use crate::archive::{entry_names, ZipBuilder};
use crate::classifier::{archive_group_key, compact_date};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::path_generator::{is_month_folder, is_year_folder, join_relative, sanitize_segments};
use crate::resolver::{ConflictResolver, FolderResolver};
use crate::store::{ListFilter, RemoteEntry, RemoteStore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// Range used for groups in which no file carries a date.
pub const UNDATED: &str = "00000000";

const BYTES_PER_MB: u64 = 1024 * 1024;

static YEAR_MONTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("valid year-month pattern"));

/// Last `YYYY-MM` (inclusive) whose month folders get archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cutoff(String);

impl Cutoff {
    pub fn includes(&self, year: &str, month: &str) -> bool {
        // Zero padded YYYY-MM sorts the same as the date it names.
        format!("{}-{}", year, month) <= self.0
    }
}

impl FromStr for Cutoff {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        if !YEAR_MONTH.is_match(value) {
            return Err(Error::Config(format!("invalid YYYY-MM value: {}", value)));
        }
        Ok(Self(value.to_string()))
    }
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Files archived together, sorted by the date in their names.
#[derive(Debug, Clone)]
pub struct ArchiveGroup {
    pub group_key: String,
    pub files: Vec<RemoteEntry>,
    pub date_min: String,
    pub date_max: String,
}

impl ArchiveGroup {
    pub fn new(group_key: impl Into<String>, mut files: Vec<RemoteEntry>) -> Self {
        // Stable: undated files come first and keep their listing order.
        files.sort_by_cached_key(|file| compact_date(&file.name).unwrap_or_default());

        let dates: Vec<String> = files.iter().filter_map(|file| compact_date(&file.name)).collect();
        let date_min = dates.iter().min().cloned().unwrap_or_else(|| UNDATED.to_string());
        let date_max = dates.iter().max().cloned().unwrap_or_else(|| UNDATED.to_string());

        Self {
            group_key: group_key.into(),
            files,
            date_min,
            date_max,
        }
    }

    /// `key_min-max.zip` for a lone part, `key_min-max_partN.zip` otherwise.
    pub fn archive_name(&self, part_index: usize, total_parts: usize) -> String {
        if total_parts <= 1 {
            format!("{}_{}-{}.zip", self.group_key, self.date_min, self.date_max)
        } else {
            format!(
                "{}_{}-{}_part{}.zip",
                self.group_key, self.date_min, self.date_max, part_index
            )
        }
    }
}

/// Groups files by archive key, in key order.
pub fn group_files(files: Vec<RemoteEntry>) -> Vec<ArchiveGroup> {
    let mut groups: BTreeMap<String, Vec<RemoteEntry>> = BTreeMap::new();
    for file in files {
        groups.entry(archive_group_key(&file.name)).or_default().push(file);
    }
    groups
        .into_iter()
        .map(|(key, files)| ArchiveGroup::new(key, files))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ZipPart {
    /// 1-based
    pub index: usize,
    pub files: Vec<RemoteEntry>,
    pub byte_total: u64,
}

/// Greedy, order preserving packing. A part always takes at least one file,
/// so it only exceeds `max_bytes` when a single file does. `max_bytes == 0`
/// puts everything in one part.
pub fn pack_parts(files: &[RemoteEntry], max_bytes: u64) -> Vec<ZipPart> {
    let mut parts: Vec<ZipPart> = Vec::new();
    for file in files {
        let size = file.size_bytes.unwrap_or(0);
        match parts.last_mut() {
            Some(current) if max_bytes == 0 || current.byte_total.saturating_add(size) <= max_bytes => {
                current.files.push(file.clone());
                current.byte_total += size;
            }
            _ => parts.push(ZipPart {
                index: parts.len() + 1,
                files: vec![file.clone()],
                byte_total: size,
            }),
        }
    }
    parts
}

pub fn megabytes(mb: u64) -> u64 {
    mb.saturating_mul(BYTES_PER_MB)
}

/// Walks a `YYYY/MM` tree and archives every month folder up to a cutoff
/// into `glacier_root/YYYY/MM/<relative path>`.
pub struct GlacierArchiver<'a> {
    store: &'a dyn RemoteStore,
    ctx: &'a RunContext,
    glacier_root: String,
    max_zip_bytes: u64,
}

impl<'a> GlacierArchiver<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        ctx: &'a RunContext,
        glacier_root: impl Into<String>,
        max_zip_bytes: u64,
    ) -> Self {
        Self {
            store,
            ctx,
            glacier_root: glacier_root.into(),
            max_zip_bytes,
        }
    }

    pub fn archive(&self, source_id: &str, cutoff: &Cutoff) -> Result<()> {
        self.walk(source_id, None, "", cutoff)
    }

    fn walk(&self, folder_id: &str, year: Option<&str>, relative_path: &str, cutoff: &Cutoff) -> Result<()> {
        for folder in self.store.list(folder_id, ListFilter::folders())? {
            if self.ctx.is_cancelled() {
                warn!("Run cancelled, glacier stops before \"{}\"", folder.name);
                break;
            }

            let outcome = if is_year_folder(&folder.name) {
                self.walk(&folder.id, Some(folder.name.as_str()), relative_path, cutoff)
            } else if let Some(year) = year.filter(|_| is_month_folder(&folder.name)) {
                if cutoff.includes(year, &folder.name) {
                    info!("Glacier: processing {}/{} (relative path \"{}\")", year, folder.name, relative_path);
                    self.archive_month(&folder.id, year, &folder.name, relative_path)
                } else {
                    debug!("Glacier: skipping {}/{}, after {}", year, folder.name, cutoff);
                    Ok(())
                }
            } else {
                self.walk(&folder.id, year, &join_relative(relative_path, &folder.name), cutoff)
            };

            if let Err(err) = outcome {
                error!("Glacier failed in folder \"{}\" ({}): {}", folder.name, folder.id, err);
            }
        }
        Ok(())
    }

    fn archive_month(&self, month_id: &str, year: &str, month: &str, relative_path: &str) -> Result<()> {
        let mut files = Vec::new();
        self.collect_files(month_id, &mut files)?;
        if files.is_empty() {
            debug!("No files in {}/{}", year, month);
            return Ok(());
        }
        info!("Found {} files in {}/{}", files.len(), year, month);

        let mut segments = vec![year.to_string(), month.to_string()];
        segments.extend(sanitize_segments(relative_path));

        for group in group_files(files) {
            if self.ctx.is_cancelled() {
                warn!("Run cancelled, glacier stops before group \"{}\"", group.group_key);
                break;
            }
            info!("Glacier group \"{}\": {} files", group.group_key, group.files.len());
            if let Err(err) = self.archive_group(&group, &segments) {
                error!(
                    "Group \"{}\" in {}/{} not archived, originals kept: {}",
                    group.group_key, year, month, err
                );
                self.ctx.counters.record_errored(group.files.len());
            }
        }
        Ok(())
    }

    fn collect_files(&self, folder_id: &str, files: &mut Vec<RemoteEntry>) -> Result<()> {
        files.extend(self.store.list(folder_id, ListFilter::files())?);
        for folder in self.store.list(folder_id, ListFilter::folders())? {
            self.collect_files(&folder.id, files)?;
        }
        Ok(())
    }

    fn archive_group(&self, group: &ArchiveGroup, segments: &[String]) -> Result<()> {
        let parts = pack_parts(&group.files, self.max_zip_bytes);

        if self.ctx.dry_run {
            for part in &parts {
                info!(
                    "[DRY RUN] Would create \"{}\" with {} files ({} bytes) in {}",
                    group.archive_name(part.index, parts.len()),
                    part.files.len(),
                    part.byte_total,
                    segments.join("/")
                );
                self.ctx.counters.record_zip();
            }
            for file in &group.files {
                info!("[DRY RUN] Would delete original \"{}\" ({})", file.name, file.id);
                self.ctx.counters.record_archived();
            }
            return Ok(());
        }

        // Removed on drop, whatever the outcome.
        let scratch = tempfile::Builder::new().prefix("glacier_").tempdir()?;
        let builder = ZipBuilder::new(self.store, scratch.path());

        let folders = FolderResolver::new(self.store, &self.ctx.folders, false);
        let target_id = folders.ensure_path(&self.glacier_root, segments)?;
        let conflicts = ConflictResolver::new(self.store, false);

        for part in &parts {
            let archive_name = group.archive_name(part.index, parts.len());
            let zip_path = builder.build(&format!("part-{}.zip", part.index), &part.files)?;

            let stored = entry_names(File::open(&zip_path)?)?.len();
            if stored != part.files.len() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} holds {} entries, expected {}", archive_name, stored, part.files.len()),
                )));
            }

            let data = fs::read(&zip_path)?;
            let upload_name = conflicts.resolve(&target_id, &archive_name)?;
            let uploaded_id = self
                .ctx
                .retry
                .run("upload", || self.store.upload(&target_id, &upload_name, &data))?;
            if let Err(err) = fs::remove_file(&zip_path) {
                warn!("Could not remove scratch copy {}: {}", zip_path.display(), err);
            }

            info!(
                "Uploaded \"{}\" ({} files, {} bytes) as {}",
                upload_name,
                part.files.len(),
                data.len(),
                uploaded_id
            );
            self.ctx.counters.record_zip();
        }

        for file in &group.files {
            match self.store.delete(&file.id) {
                Ok(()) => {
                    debug!("Deleted original \"{}\" ({})", file.name, file.id);
                    self.ctx.counters.record_archived();
                }
                Err(err) => {
                    error!("Archived \"{}\" but could not delete the original: {}", file.name, err);
                    self.ctx.counters.record_errored(1);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use rstest::rstest;
    use std::time::Duration;

    fn entry(name: &str, size_mb: u64) -> RemoteEntry {
        RemoteEntry {
            id: format!("id-{}", name),
            name: name.to_string(),
            is_folder: false,
            modified_time: None,
            size_bytes: Some(megabytes(size_mb)),
            parent_ids: Vec::new(),
        }
    }

    fn part_sizes(parts: &[ZipPart]) -> Vec<u64> {
        parts.iter().map(|part| part.byte_total / BYTES_PER_MB).collect()
    }

    #[rstest]
    #[case("2023-05")]
    #[case("1999-12")]
    fn test_cutoff_accepts_well_formed_values(#[case] value: &str) {
        assert!(value.parse::<Cutoff>().is_ok());
    }

    #[rstest]
    #[case("2023-5")]
    #[case("202305")]
    #[case("2023-05-01")]
    #[case("")]
    fn test_cutoff_rejects_malformed_values(#[case] value: &str) {
        assert!(matches!(value.parse::<Cutoff>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        let cutoff: Cutoff = "2023-06".parse().unwrap();
        assert!(cutoff.includes("2023", "06"));
        assert!(cutoff.includes("2022", "12"));
        assert!(!cutoff.includes("2023", "07"));
        assert!(!cutoff.includes("2024", "01"));
    }

    #[test]
    fn test_pack_never_exceeds_max_with_multiple_files() {
        // Act
        let parts = pack_parts(&[entry("a", 5), entry("b", 5), entry("c", 5)], megabytes(8));

        // Assert
        assert_eq!(parts.len(), 3);
        assert_eq!(part_sizes(&parts), vec![5, 5, 5]);
        assert_eq!(parts.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_pack_oversized_file_gets_its_own_part() {
        // Act
        let parts = pack_parts(&[entry("huge", 12)], megabytes(8));

        // Assert
        assert_eq!(parts.len(), 1);
        assert_eq!(part_sizes(&parts), vec![12]);
    }

    #[test]
    fn test_pack_fills_parts_in_order() {
        // Act
        let parts = pack_parts(
            &[entry("a", 3), entry("b", 4), entry("c", 5), entry("d", 12), entry("e", 1)],
            megabytes(8),
        );

        // Assert
        assert_eq!(part_sizes(&parts), vec![7, 5, 12, 1]);
        assert_eq!(parts[0].files[1].name, "b");
    }

    #[test]
    fn test_pack_without_limit_is_one_part() {
        // Act
        let parts = pack_parts(&[entry("a", 300), entry("b", 300)], 0);

        // Assert
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_pack_treats_missing_size_as_empty() {
        // Arrange
        let mut unsized_file = entry("a", 0);
        unsized_file.size_bytes = None;

        // Act
        let parts = pack_parts(&[entry("b", 8), unsized_file], megabytes(8));

        // Assert
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].files.len(), 2);
    }

    #[test]
    fn test_group_sorts_by_name_date_with_undated_first() {
        // Act
        let group = ArchiveGroup::new(
            "invoice",
            vec![
                entry("invoice_2023-05-20.pdf", 1),
                entry("invoice.pdf", 1),
                entry("invoice_20230502.pdf", 1),
            ],
        );

        // Assert
        let names: Vec<&str> = group.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["invoice.pdf", "invoice_20230502.pdf", "invoice_2023-05-20.pdf"]);
        assert_eq!(group.date_min, "20230502");
        assert_eq!(group.date_max, "20230520");
    }

    #[test]
    fn test_undated_group_uses_sentinel_range() {
        // Act
        let group = ArchiveGroup::new("notes", vec![entry("notes.txt", 1)]);

        // Assert
        assert_eq!(group.archive_name(1, 1), "notes_00000000-00000000.zip");
    }

    #[test]
    fn test_archive_names_for_single_and_multi_part() {
        // Arrange
        let group = ArchiveGroup::new("log", vec![entry("log_2023-01-01.txt", 1), entry("log_2023-01-31.txt", 1)]);

        // Act & Assert
        assert_eq!(group.archive_name(1, 1), "log_20230101-20230131.zip");
        assert_eq!(group.archive_name(2, 3), "log_20230101-20230131_part2.zip");
    }

    #[test]
    fn test_group_files_by_key() {
        // Act
        let groups = group_files(vec![
            entry("invoice_2023-05-01.pdf", 1),
            entry("backup_20230501.log.gz", 1),
            entry("invoice_2023-05-02.pdf", 1),
        ]);

        // Assert
        let keys: Vec<&str> = groups.iter().map(|g| g.group_key.as_str()).collect();
        assert_eq!(keys, vec!["backup", "invoice"]);
        assert_eq!(groups[1].files.len(), 2);
    }

    fn month_tree(store: &MemoryStore, year: &str, month: &str) -> (String, String) {
        let source = store.add_folder(store.root_id(), "source").unwrap();
        let year_id = store.add_folder(&source, year).unwrap();
        let month_id = store.add_folder(&year_id, month).unwrap();
        (source, month_id)
    }

    #[test]
    fn test_archive_skips_months_after_cutoff() {
        // Arrange
        let store = MemoryStore::new();
        let (source, month) = month_tree(&store, "2024", "02");
        store.add_file(&month, "a_2024-02-01.txt", b"a".to_vec(), None).unwrap();
        let glacier = store.add_folder(store.root_id(), "glacier").unwrap();
        let ctx = RunContext::new(false, RetryPolicy::new(1, Duration::ZERO));
        let cutoff: Cutoff = "2024-01".parse().unwrap();

        // Act
        GlacierArchiver::new(&store, &ctx, glacier.clone(), 0)
            .archive(&source, &cutoff)
            .unwrap();

        // Assert
        assert_eq!(store.child_names(&month), vec!["a_2024-02-01.txt"]);
        assert!(store.child_names(&glacier).is_empty());
    }

    #[test]
    fn test_dry_run_plans_without_touching_the_store() {
        // Arrange
        let store = MemoryStore::new();
        let (source, month) = month_tree(&store, "2023", "03");
        store.add_file(&month, "a_2023-03-01.txt", vec![0u8; 10], None).unwrap();
        store.add_file(&month, "a_2023-03-02.txt", vec![0u8; 10], None).unwrap();
        let glacier = store.add_folder(store.root_id(), "glacier").unwrap();
        let ctx = RunContext::new(true, RetryPolicy::new(1, Duration::ZERO));
        let cutoff: Cutoff = "2023-12".parse().unwrap();

        // Act
        GlacierArchiver::new(&store, &ctx, glacier.clone(), 15)
            .archive(&source, &cutoff)
            .unwrap();

        // Assert
        assert_eq!(store.child_names(&month).len(), 2);
        assert!(store.child_names(&glacier).is_empty());
        let counters = ctx.counters.snapshot();
        assert_eq!(counters.zips_created, 2);
        assert_eq!(counters.files_archived, 2);
    }
}
