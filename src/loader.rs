use anyhow::Result;
use log::debug;
use std::collections::HashSet;
use std::path::Path;

use crate::eligibility::Eligibility;
use crate::format::{format_cell, is_blank, parse_numeric};
use crate::schema::Schema;
use crate::table::Table;

/// Labels of the synthetic statistic rows, in the order they are written.
pub const SUMMARY_LABELS: [&str; 4] = ["Mean", "SD", "Max", "Min"];

pub fn is_summary_label(cell: &str) -> bool {
    SUMMARY_LABELS.contains(&cell.trim())
}

fn is_header_echo(row: &[String], names: &HashSet<&str>) -> bool {
    !row.is_empty() && row.iter().all(|cell| names.contains(cell.as_str()))
}

/// Removes rows left behind by a previous save: rows without an identifier,
/// statistic rows, and rows that repeat the column names.
pub fn strip_synthetic_rows(mut table: Table, schema: &Schema) -> Result<Table> {
    schema.validate(&table)?;
    let id_col = table.column_index(schema.identifier()).unwrap_or(0);
    let before = table.len();
    table.retain_rows(|row| !is_blank(&row[id_col]) && !is_summary_label(&row[id_col]));

    let columns: Vec<String> = table.columns().to_vec();
    let names: HashSet<&str> = columns.iter().map(|c| c.as_str()).collect();
    table.retain_rows(|row| !is_header_echo(row, &names));

    if table.len() != before {
        debug!("Stripped {} blank or synthetic rows", before - table.len());
    }
    Ok(table)
}

fn drop_denylisted(table: &mut Table, schema: &Schema, eligibility: &Eligibility) {
    let Some(id_col) = table.column_index(schema.identifier()) else { return };
    let before = table.len();
    table.retain_rows(|row| !eligibility.is_denylisted(row[id_col].trim()));
    if table.len() != before {
        debug!("Dropped {} rows belonging to denylisted subjects", before - table.len());
    }
}

/// Drops columns with no value in any row and rows with no value in any
/// column. The identifier and timestamp columns are always kept.
fn drop_empty(table: &mut Table, schema: &Schema) {
    let empty: HashSet<usize> = (0..table.columns().len())
        .filter(|&i| table.column_values(i).all(is_blank))
        .collect();
    let protected = [schema.identifier(), schema.timestamp()];
    table.retain_columns(|i, name| {
        let keep = !empty.contains(&i) || protected.contains(&name);
        if !keep {
            debug!("Dropping empty column '{}'", name);
        }
        keep
    });
    table.retain_rows(|row| row.iter().any(|c| !is_blank(c)));
}

/// Rewrites every numeric cell in columns holding at least one number.
/// Text cells in such columns are left as they are.
fn format_numeric_columns(table: &mut Table, schema: &Schema) {
    let opaque = [schema.identifier(), schema.timestamp()];
    for col in 0..table.columns().len() {
        if opaque.contains(&table.columns()[col].as_str()) {
            continue;
        }
        if !table.column_values(col).any(|c| parse_numeric(c).is_some()) {
            continue;
        }
        for row in 0..table.len() {
            let formatted = format_cell(table.cell(row, col));
            table.set_cell(row, col, formatted);
        }
    }
}

pub fn load_and_clean(raw: Table, schema: &Schema, eligibility: &Eligibility) -> Result<Table> {
    let mut table = strip_synthetic_rows(raw, schema)?;
    drop_denylisted(&mut table, schema, eligibility);
    drop_empty(&mut table, schema);
    format_numeric_columns(&mut table, schema);
    Ok(table)
}

pub fn load_and_clean_file(path: &Path, schema: &Schema, eligibility: &Eligibility) -> Result<Table> {
    let raw = Table::read_csv(path)?;
    load_and_clean(raw, schema, eligibility)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DenylistEntry, SchemaConfig};
    use crate::table::table_of;

    fn denylisting(id: &str) -> Eligibility {
        Eligibility::new(
            HashSet::new(),
            HashSet::new(),
            vec![DenylistEntry { id: id.to_string(), reason: "test".to_string() }],
        )
    }

    #[test]
    fn test_strip_synthetic_rows() {
        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let table = table_of(
            &["sub_id", "date_time", "rt"],
            &[
                &["s1", "t1", "400"],
                &["", "t2", "410"],
                &["  ", "t3", "420"],
                &["Mean", "", "400"],
                &["SD", "", ""],
                &["Max", "", "400"],
                &["Min", "", "400"],
                &["sub_id", "date_time", "rt"],
            ],
        );
        let stripped = strip_synthetic_rows(table, &schema).unwrap();
        assert_eq!(stripped.rows(), &[vec!["s1", "t1", "400"]]);
    }

    #[test]
    fn test_load_and_clean() {
        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let table = table_of(
            &["sub_id", "date_time", "rt", "empty", "notes", "mixed"],
            &[
                &["s1", "2024-01-01", "400.00001", "", "looks fine", "n/a"],
                &["bad", "2024-01-02", "1", "", "", "2.50000"],
                &["123e4", "2024-01-03", "3.14159", " ", "", ""],
            ],
        );
        let cleaned = load_and_clean(table, &schema, &denylisting("bad")).unwrap();
        assert_eq!(cleaned.columns(), &["sub_id", "date_time", "rt", "notes", "mixed"]);
        assert_eq!(
            cleaned.rows(),
            &[
                vec!["s1", "2024-01-01", "400", "looks fine", "n/a"],
                vec!["123e4", "2024-01-03", "3.1416", "", ""],
            ]
        );
    }

    #[test]
    fn test_missing_identifier_is_error() {
        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let table = table_of(&["subject", "date_time"], &[&["s1", "t1"]]);
        assert!(load_and_clean(table, &schema, &Eligibility::default()).is_err());
    }

    #[test]
    fn test_header_only_table_keeps_key_columns() {
        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let table = table_of(&["sub_id", "date_time", "rt"], &[]);
        let cleaned = load_and_clean(table, &schema, &Eligibility::default()).unwrap();
        assert_eq!(cleaned.columns(), &["sub_id", "date_time"]);
        assert!(cleaned.is_empty());
    }
}
