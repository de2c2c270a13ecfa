use anyhow::{Context, Result};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::discovery::find_csv_files;
use crate::loader::strip_synthetic_rows;
use crate::schema::Schema;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub file: PathBuf,
    pub total_subjects: usize,
    /// Subjects whose row count differs from the expected session count.
    pub incorrect_counts: BTreeMap<String, usize>,
}

impl AuditReport {
    pub fn all_expected(&self) -> bool {
        self.incorrect_counts.is_empty()
    }
}

pub fn audit_table(file: &Path, table: Table, schema: &Schema, expected: usize) -> Result<AuditReport> {
    let table = strip_synthetic_rows(table, schema)?;
    let id_col = table.column_index(schema.identifier()).context("identifier column missing")?;
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for id in table.column_values(id_col) {
        *counts.entry(id.to_string()).or_insert(0) += 1;
    }
    let total_subjects = counts.len();
    let incorrect_counts = counts.into_iter().filter(|(_, n)| *n != expected).collect();
    Ok(AuditReport { file: file.to_path_buf(), total_subjects, incorrect_counts })
}

/// Audits every table in `directory`; unreadable tables are logged and skipped.
pub fn audit_directory(directory: &Path, schema: &Schema, expected: usize) -> Result<Vec<AuditReport>> {
    let mut reports = Vec::new();
    for path in find_csv_files(directory)? {
        info!("Analyzing {}...", path.display());
        let report = Table::read_csv(&path).and_then(|t| audit_table(&path, t, schema, expected));
        match report {
            Ok(report) => {
                if report.all_expected() {
                    info!("All {} subjects have exactly {} rows", report.total_subjects, expected);
                } else {
                    warn!("{}: {} subjects with incorrect counts:", report.file.display(), report.incorrect_counts.len());
                    for (id, count) in &report.incorrect_counts {
                        warn!("  {}: {} rows", id, count);
                    }
                }
                reports.push(report);
            }
            Err(e) => error!("Error auditing {}: {:#}", path.display(), e),
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use std::fs;

    #[test]
    fn test_audit_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("stroop_with_notes.csv"),
            "sub_id,date_time,v\na,1,1\na,2,1\nb,1,1\nMean,,1\nSD,,0\nMax,,1\nMin,,1\nsub_id,date_time,v\n",
        )
        .unwrap();
        fs::write(dir.path().join("flanker_with_notes.csv"), "sub_id,date_time\na,1\na,2\n").unwrap();
        fs::write(dir.path().join("broken.csv"), "sub_id,date_time\na,1,extra\n").unwrap();

        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let reports = audit_directory(dir.path(), &schema, 2).unwrap();
        assert_eq!(reports.len(), 2);

        let flanker = &reports[0];
        assert!(flanker.file.ends_with("flanker_with_notes.csv"));
        assert!(flanker.all_expected());

        let stroop = &reports[1];
        assert_eq!(stroop.total_subjects, 2);
        assert_eq!(stroop.incorrect_counts.get("b"), Some(&1));
        assert_eq!(stroop.incorrect_counts.len(), 1);
    }
}
