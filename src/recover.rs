use crate::store::RemoteStore;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Outcome of a recover run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoverSummary {
    pub searched: usize,
    pub downloaded: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Reads the names to recover: one per line, trimmed, blank lines and lines
/// starting with `#` skipped. A missing list yields `Ok(None)`.
pub fn read_recover_list(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read recover list: {}", path.display()))?;
    Ok(Some(parse_recover_list(&content)))
}

fn parse_recover_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Looks up every name store-wide and downloads each match into `output_dir`.
/// In dry-run mode matches are only reported.
pub fn recover_files(
    store: &dyn RemoteStore,
    names: &[String],
    output_dir: &Path,
    dry_run: bool,
) -> Result<RecoverSummary> {
    let mut summary = RecoverSummary {
        searched: names.len(),
        ..RecoverSummary::default()
    };
    if names.is_empty() {
        warn!("No files to recover");
        return Ok(summary);
    }
    info!("Files to recover: {}", names.len());

    if !dry_run {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;
    }

    for name in names {
        info!("Searching for \"{}\"", name);
        let found = match store.find_file_by_name(name) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!("\"{}\" not found", name);
                summary.not_found += 1;
                continue;
            }
            Err(err) => {
                error!("Lookup of \"{}\" failed: {}", name, err);
                summary.failed += 1;
                continue;
            }
        };

        // Keep only the base name so list entries cannot escape the output directory.
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| found.name.clone());
        let output_path = output_dir.join(&file_name);

        if dry_run {
            info!("[DRY RUN] Download \"{}\" ({}) to {}", name, found.id, output_path.display());
            summary.downloaded += 1;
            continue;
        }

        let saved = store
            .download(&found.id)
            .map_err(anyhow::Error::from)
            .and_then(|data| {
                fs::write(&output_path, data)
                    .with_context(|| format!("Failed to write file: {}", output_path.display()))
            });
        match saved {
            Ok(()) => {
                info!("\"{}\" ({}) saved to {}", name, found.id, output_path.display());
                summary.downloaded += 1;
            }
            Err(err) => {
                error!("Failed to recover \"{}\": {:#}", name, err);
                summary.failed += 1;
            }
        }
    }

    info!("=== RECOVER SUMMARY ===");
    info!("Files searched:   {}", summary.searched);
    info!("Files downloaded: {}", summary.downloaded);
    info!("Files not found:  {}", summary.not_found);
    if summary.failed > 0 {
        info!("Files failed:     {}", summary.failed);
    }
    Ok(summary)
}
