use anyhow::{Context, Result};
use log::debug;
use std::collections::{HashMap, HashSet};

use crate::eligibility::Eligibility;
use crate::format::is_blank;
use crate::schema::Schema;
use crate::table::Table;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Incoming rows whose (identifier, timestamp) matched an existing row.
    pub updated_rows: usize,
    /// Incoming rows appended as new observations.
    pub inserted_rows: usize,
    /// Incoming rows refused by the eligibility filter.
    pub rejected_rows: usize,
    pub added_columns: Vec<String>,
}

type RowKey = (String, String);

/// Merges a cleaned incoming table into a cleaned cumulative table.
///
/// Rows are matched on (identifier, timestamp). Matches are overwritten column
/// by column, except that a blank incoming reviewer comment never replaces an
/// existing one. Unmatched rows are appended in incoming order when the
/// subject is eligible; a subject already in `known_subjects` or in `old`
/// counts as present. Columns only the incoming table has are inserted before
/// the tail-start column.
pub fn reconcile(
    old: Table,
    new: &Table,
    schema: &Schema,
    eligibility: &Eligibility,
    known_subjects: &HashSet<String>,
) -> Result<(Table, ReconcileReport)> {
    schema.validate(&old).context("Cumulative table failed schema validation")?;
    schema.validate(new).context("Incoming table failed schema validation")?;
    let mut merged = old;
    let mut report = ReconcileReport::default();

    let mut at = schema.insertion_point(&merged);
    for column in new.columns() {
        if !merged.has_column(column) {
            merged.insert_column(at, column.clone());
            report.added_columns.push(column.clone());
            at += 1;
        }
    }
    if !report.added_columns.is_empty() {
        debug!("Added columns from incoming data: {:?}", report.added_columns);
    }

    let id_col = merged.column_index(schema.identifier()).context("identifier column vanished")?;
    let ts_col = merged.column_index(schema.timestamp()).context("timestamp column vanished")?;
    let new_id_col = new.column_index(schema.identifier()).context("identifier column vanished")?;
    let new_ts_col = new.column_index(schema.timestamp()).context("timestamp column vanished")?;

    // incoming column index -> merged column index
    let mapping: Vec<usize> = new
        .columns()
        .iter()
        .map(|c| merged.column_index(c).context("column union is incomplete"))
        .collect::<Result<_>>()?;
    let reviewer_col = merged.column_index(&schema.config().reviewer_comment);

    let mut index: HashMap<RowKey, usize> = HashMap::new();
    for (i, row) in merged.rows().iter().enumerate() {
        index.entry((row[id_col].clone(), row[ts_col].clone())).or_insert(i);
    }
    let present: HashSet<String> = merged.column_values(id_col).map(str::to_string).collect();

    for row in 0..new.len() {
        let key = (new.cell(row, new_id_col).to_string(), new.cell(row, new_ts_col).to_string());
        match index.get(&key) {
            Some(&target) => {
                for (src, &dst) in mapping.iter().enumerate() {
                    let value = new.cell(row, src);
                    if Some(dst) == reviewer_col && is_blank(value) {
                        continue;
                    }
                    merged.set_cell(target, dst, value.to_string());
                }
                report.updated_rows += 1;
            }
            None => {
                let subject = &key.0;
                let already_present = present.contains(subject) || known_subjects.contains(subject);
                if eligibility.is_eligible(subject, already_present) {
                    merged.push_row(merged.project_row(new, row))?;
                    index.insert(key, merged.len() - 1);
                    report.inserted_rows += 1;
                } else {
                    debug!("Subject {} is not eligible for inclusion; skipping row at {}", subject, key.1);
                    report.rejected_rows += 1;
                }
            }
        }
    }
    Ok((merged, report))
}
