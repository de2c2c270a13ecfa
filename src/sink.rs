use anyhow::{Context, Result};
use csv::{Terminator, WriterBuilder};
use glob::{glob, Pattern};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::discovery::output_file_name;
use crate::summary::SummarizedTable;

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTable {
    pub path: PathBuf,
    /// Records below the header, synthetic rows included.
    pub records: usize,
    pub sha256: String,
}

/// Durable destination for finished task tables.
pub trait TableSink {
    fn write_table(&mut self, task: &str, table: &SummarizedTable) -> Result<WrittenTable>;
    fn report_files_written(&self) -> usize;
}

pub fn to_csv_bytes(table: &SummarizedTable) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().terminator(Terminator::Any(b'\n')).from_writer(Vec::new());
    writer.write_record(table.data.columns())?;
    for record in table.records() {
        writer.write_record(record)?;
    }
    writer.into_inner().map_err(|e| anyhow::anyhow!("Failed to finish CSV buffer: {}", e.error()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes `<task>_with_notes.csv` files into one directory, replacing any
/// previous file through a rename so readers never see a partial table.
pub struct CsvDirectorySink {
    output_dir: PathBuf,
    files_written: usize,
}

impl CsvDirectorySink {
    pub fn new(output_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
        Ok(Self { output_dir, files_written: 0 })
    }
}

impl TableSink for CsvDirectorySink {
    fn write_table(&mut self, task: &str, table: &SummarizedTable) -> Result<WrittenTable> {
        let path = self.output_dir.join(output_file_name(task));
        let bytes = to_csv_bytes(table).with_context(|| format!("Failed to serialize table for {}", task))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("csv.tmp");
        fs::write(&staging, &bytes).with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &path).with_context(|| format!("Failed to move table into place at {}", path.display()))?;
        self.files_written += 1;
        let written = WrittenTable { path, records: table.record_count(), sha256: sha256_hex(&bytes) };
        debug!("Wrote {} ({} bytes)", written.path.display(), bytes.len());
        Ok(written)
    }

    fn report_files_written(&self) -> usize {
        self.files_written
    }
}

/// Replaces `destination` with a recursive copy of `source`.
pub fn mirror_directory(source: &Path, destination: &Path) -> Result<usize> {
    if destination.exists() {
        fs::remove_dir_all(destination)
            .with_context(|| format!("Failed to remove previous mirror at {}", destination.display()))?;
    }
    fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create mirror directory: {}", destination.display()))?;
    // glob reports matches without `.` components, so walk from the same form
    let root: PathBuf = source.components().filter(|c| !matches!(c, Component::CurDir)).collect();
    let pattern = Path::new(&Pattern::escape(&root.to_string_lossy())).join("**").join("*");
    let pattern_str = pattern.to_string_lossy();
    let mut copied = 0;
    for entry in glob(&pattern_str)?.filter_map(Result::ok) {
        let relative = entry.strip_prefix(&root).with_context(|| format!("{} is outside {}", entry.display(), source.display()))?;
        let target = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&entry, &target)
                .with_context(|| format!("Failed to copy {} to {}", entry.display(), target.display()))?;
            copied += 1;
        }
    }
    info!("Mirrored {} files from {} to {}", copied, source.display(), destination.display());
    Ok(copied)
}
