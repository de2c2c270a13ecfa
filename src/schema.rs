use anyhow::{bail, Result};
use std::collections::HashSet;
use std::ops::Range;

use crate::config::SchemaConfig;
use crate::table::Table;

/// Bumped whenever column roles or their canonical order change.
pub const SCHEMA_VERSION: u32 = 1;

/// Role of a column. Declaration order is the canonical column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnKind {
    Identifier,
    Timestamp,
    Metric,
    Feedback,
    AttentionCheck,
    Session,
    Annotation,
}

impl ColumnKind {
    /// Members of the fixed trailing block that closes the metric range.
    pub fn is_tail(self) -> bool {
        matches!(self, ColumnKind::Feedback | ColumnKind::AttentionCheck | ColumnKind::Session)
    }
}

pub struct Schema<'a> {
    config: &'a SchemaConfig,
}

impl<'a> Schema<'a> {
    pub fn new(config: &'a SchemaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchemaConfig {
        self.config
    }

    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    pub fn timestamp(&self) -> &str {
        &self.config.timestamp
    }

    pub fn kind_of(&self, name: &str) -> ColumnKind {
        let c = self.config;
        if name == c.identifier {
            ColumnKind::Identifier
        } else if name == c.timestamp {
            ColumnKind::Timestamp
        } else if name == c.feedback {
            ColumnKind::Feedback
        } else if c.attention_checks.iter().any(|a| a == name) {
            ColumnKind::AttentionCheck
        } else if name == c.session {
            ColumnKind::Session
        } else if self.is_annotation(name) {
            ColumnKind::Annotation
        } else {
            ColumnKind::Metric
        }
    }

    pub fn is_annotation(&self, name: &str) -> bool {
        name.to_lowercase().contains("comment")
            || name == self.config.reviewer_comment
            || self.config.annotation_columns.iter().any(|a| a == name)
    }

    /// Typed layout of a table, in its current column order.
    pub fn describe(&self, table: &Table) -> Vec<(String, ColumnKind)> {
        table.columns().iter().map(|c| (c.clone(), self.kind_of(c))).collect()
    }

    pub fn validate(&self, table: &Table) -> Result<()> {
        let mut seen = HashSet::new();
        for column in table.columns() {
            if !seen.insert(column.as_str()) {
                bail!("Duplicate column '{}' (schema v{})", column, SCHEMA_VERSION);
            }
        }
        for required in [self.identifier(), self.timestamp()] {
            if !table.has_column(required) {
                bail!("Required column '{}' is missing (schema v{})", required, SCHEMA_VERSION);
            }
        }
        Ok(())
    }

    fn rank(&self, name: &str) -> (ColumnKind, usize) {
        let kind = self.kind_of(name);
        let within = match kind {
            ColumnKind::AttentionCheck => {
                self.config.attention_checks.iter().position(|a| a == name).unwrap_or(0)
            }
            _ => 0,
        };
        (kind, within)
    }

    /// Permutes columns into canonical order: identifier, timestamp, metrics,
    /// feedback, attention checks, session, annotations. Metrics and annotations
    /// keep their relative order; absent roles are skipped.
    pub fn normalize_columns(&self, mut table: Table) -> Table {
        let mut order: Vec<usize> = (0..table.columns().len()).collect();
        order.sort_by_key(|&i| self.rank(&table.columns()[i]));
        if order.iter().enumerate().any(|(pos, &i)| pos != i) {
            table.select_columns(&order);
        }
        table
    }

    pub fn tail_start(&self, table: &Table) -> Option<usize> {
        table.columns().iter().position(|c| self.kind_of(c).is_tail())
    }

    /// Where incoming columns unknown to the cumulative table are placed.
    pub fn insertion_point(&self, table: &Table) -> usize {
        self.tail_start(table)
            .or_else(|| table.columns().iter().position(|c| self.is_annotation(c)))
            .unwrap_or(table.columns().len())
    }

    /// Columns after the timestamp up to, but excluding, the session column.
    /// Without a session column the range stops at the first annotation column.
    pub fn summary_range(&self, table: &Table) -> Result<Range<usize>> {
        let Some(timestamp) = table.column_index(self.timestamp()) else {
            bail!("Cannot summarize a table without a '{}' column", self.timestamp());
        };
        let start = timestamp + 1;
        let end = table
            .column_index(&self.config.session)
            .or_else(|| table.columns().iter().position(|c| self.is_annotation(c)))
            .unwrap_or(table.columns().len());
        Ok(start..end.max(start))
    }
}
