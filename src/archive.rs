use crate::error::Result;
use crate::resolver::numbered_name;
use crate::store::{RemoteEntry, RemoteStore};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::{FileOptions, SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

/// Largest entry a ZIP can hold without ZIP64 extensions.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Writes ZIP parts into a scratch directory, pulling member files from a store.
///
/// Each member is downloaded to a scratch file, streamed into the archive and
/// removed again, so at most one member is held on disk next to the ZIP.
pub struct ZipBuilder<'a> {
    store: &'a dyn RemoteStore,
    scratch_dir: &'a Path,
}

impl<'a> ZipBuilder<'a> {
    pub fn new(store: &'a dyn RemoteStore, scratch_dir: &'a Path) -> Self {
        Self { store, scratch_dir }
    }

    /// Builds `file_name` in the scratch directory from `members`, in order.
    /// Members sharing a name are stored as `name_1.ext`, `name_2.ext`, ...
    pub fn build(&self, file_name: &str, members: &[RemoteEntry]) -> Result<PathBuf> {
        let zip_path = self.scratch_dir.join(file_name);
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&zip_path)?));
        let options: FileOptions<()> = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut used_names = HashSet::new();
        for (index, member) in members.iter().enumerate() {
            let entry_name = unique_entry_name(&mut used_names, &member.name);
            debug!("Downloading \"{}\" ({}) into {}", member.name, member.id, file_name);

            let data = self.store.download(&member.id)?;
            let entry_options = member_options(options, data.len() as u64);
            let scratch_file = self.scratch_dir.join(format!("member-{}.tmp", index));
            fs::write(&scratch_file, data)?;

            zip.start_file(entry_name, entry_options)?;
            let mut reader = BufReader::new(File::open(&scratch_file)?);
            io::copy(&mut reader, &mut zip)?;
            fs::remove_file(&scratch_file)?;
        }

        zip.finish()?.flush()?;
        Ok(zip_path)
    }
}

/// Entries of 4 GiB or more must be written as ZIP64 or the writer aborts them.
fn member_options(base: SimpleFileOptions, size: u64) -> SimpleFileOptions {
    base.large_file(size >= ZIP64_THRESHOLD)
}

fn unique_entry_name(used: &mut HashSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut counter = 0;
    while used.contains(&candidate) {
        counter += 1;
        candidate = numbered_name(name, counter);
    }
    used.insert(candidate.clone());
    candidate
}

/// Names of the file entries in an archive, in archive order.
pub fn entry_names<R: Read + Seek>(reader: R) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}
