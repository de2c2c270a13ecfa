use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::format::is_blank;

/// A task table holding observation rows only. Synthetic summary and
/// header-echo rows never live here; they are produced at serialization time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                bail!("Row {} has {} cells but the table has {} columns", i + 1, row.len(), columns.len());
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open table: {}", path.display()))?;
        Self::from_csv_reader(file).with_context(|| format!("Failed to parse table: {}", path.display()))
    }

    /// Short records are padded with blanks; a record wider than the header is an error.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns: Vec<String> = csv_reader.headers()?.iter().map(|h| h.to_string()).collect();
        if columns.is_empty() || columns.iter().all(|c| is_blank(c)) {
            bail!("Table has no header row");
        }
        let mut rows = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("Malformed record at data line {}", line + 1))?;
            if record.len() > columns.len() {
                bail!("Data line {} has {} fields, expected at most {}", line + 1, record.len(), columns.len());
            }
            let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        &self.rows[row][column]
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        self.rows[row][column] = value;
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |r| r[column].as_str())
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!("Cannot append a row of {} cells to a table of {} columns", row.len(), self.columns.len());
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[String]) -> bool,
    {
        self.rows.retain(|r| keep(r));
    }

    /// Keeps the columns for which `keep(index, name)` holds, dropping their cells from every row.
    pub fn retain_columns<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, &str) -> bool,
    {
        let kept: Vec<usize> = (0..self.columns.len()).filter(|&i| keep(i, &self.columns[i])).collect();
        if kept.len() == self.columns.len() {
            return;
        }
        self.select_columns(&kept);
    }

    pub fn remove_column(&mut self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => {
                self.columns.remove(idx);
                for row in &mut self.rows {
                    row.remove(idx);
                }
                true
            }
            None => false,
        }
    }

    /// Inserts an all-blank column at `at`, shifting later columns right.
    pub fn insert_column(&mut self, at: usize, name: String) {
        let at = at.min(self.columns.len());
        self.columns.insert(at, name);
        for row in &mut self.rows {
            row.insert(at, String::new());
        }
    }

    /// Rebuilds the table from the given column indices, in that order.
    pub fn select_columns(&mut self, order: &[usize]) {
        self.columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let selected: Vec<String> = order.iter().map(|&i| std::mem::take(&mut row[i])).collect();
            *row = selected;
        }
    }

    /// Reads `row` of another table into this table's column layout; missing columns are blank.
    pub fn project_row(&self, source: &Table, row: usize) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| source.column_index(c).map(|i| source.cell(row, i).to_string()).unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn table_of(columns: &[&str], rows: &[&[&str]]) -> Table {
    Table::new(
        columns.iter().map(|c| c.to_string()).collect(),
        rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect(),
    )
    .unwrap()
}
