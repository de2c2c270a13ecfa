use anyhow::Result;

use crate::format::{format_optional, parse_numeric};
use crate::loader::SUMMARY_LABELS;
use crate::schema::Schema;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two values.
    pub sd: Option<f64>,
    pub max: f64,
    pub min: f64,
}

impl ColumnStats {
    pub fn compute<'a, I>(cells: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let values: Vec<f64> = cells.into_iter().filter_map(parse_numeric).collect();
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let sd = if values.len() > 1 {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Some((ss / (n - 1.0)).sqrt())
        } else {
            None
        };
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        Some(Self { mean, sd, max, min })
    }
}

/// Mean, SD, Max and Min rows, one cell per column of the table they describe.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryBlock {
    rows: [Vec<String>; 4],
}

impl SummaryBlock {
    pub fn rows(&self) -> &[Vec<String>; 4] {
        &self.rows
    }
}

/// Data rows plus their statistics. The two are only interleaved when written.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedTable {
    pub data: Table,
    pub summary: SummaryBlock,
}

impl SummarizedTable {
    /// Every record below the header: data rows, the four statistic rows,
    /// then a row repeating the column names.
    pub fn records(&self) -> impl Iterator<Item = &[String]> + '_ {
        self.data
            .rows()
            .iter()
            .chain(self.summary.rows().iter())
            .map(|r| r.as_slice())
            .chain(std::iter::once(self.data.columns()))
    }

    pub fn record_count(&self) -> usize {
        self.data.len() + SUMMARY_LABELS.len() + 1
    }
}

pub fn append_summary(table: Table, schema: &Schema) -> Result<SummarizedTable> {
    let range = schema.summary_range(&table)?;
    let width = table.columns().len();
    let id_col = table.column_index(schema.identifier()).unwrap_or(0);

    let mut rows: [Vec<String>; 4] = std::array::from_fn(|i| {
        let mut row = vec![String::new(); width];
        row[id_col] = SUMMARY_LABELS[i].to_string();
        row
    });
    for col in range {
        if let Some(stats) = ColumnStats::compute(table.column_values(col)) {
            rows[0][col] = format_optional(Some(stats.mean));
            rows[1][col] = format_optional(stats.sd);
            rows[2][col] = format_optional(Some(stats.max));
            rows[3][col] = format_optional(Some(stats.min));
        }
    }
    Ok(SummarizedTable { data: table, summary: SummaryBlock { rows } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::loader::strip_synthetic_rows;
    use crate::table::table_of;

    #[test]
    fn test_column_stats() {
        let stats = ColumnStats::compute(["1", "2", "3", "4", "x", ""]).unwrap();
        assert_eq!(format_optional(Some(stats.mean)), "2.5");
        assert_eq!(format_optional(stats.sd), "1.291");
        assert_eq!(format_optional(Some(stats.max)), "4");
        assert_eq!(format_optional(Some(stats.min)), "1");
        assert!(ColumnStats::compute(["a", ""]).is_none());
        assert_eq!(ColumnStats::compute(["3"]).unwrap().sd, None);
    }

    #[test]
    fn test_append_summary() {
        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let table = table_of(
            &["sub_id", "date_time", "v", "label", "session", "notes"],
            &[&["a", "t", "1", "x", "1", "n"], &["b", "t", "2", "y", "1", ""], &["c", "t", "3", "z", "2", ""], &["d", "t", "4", "w", "2", ""]],
        );
        let summarized = append_summary(table, &schema).unwrap();
        let rows = summarized.summary.rows();
        assert_eq!(rows[0], vec!["Mean", "", "2.5", "", "", ""]);
        assert_eq!(rows[1], vec!["SD", "", "1.291", "", "", ""]);
        assert_eq!(rows[2], vec!["Max", "", "4", "", "", ""]);
        assert_eq!(rows[3], vec!["Min", "", "1", "", "", ""]);

        let records: Vec<&[String]> = summarized.records().collect();
        assert_eq!(records.len(), summarized.record_count());
        assert_eq!(records.len(), 9);
        assert_eq!(records[8], summarized.data.columns());
    }

    #[test]
    fn test_summary_then_strip_round_trips() {
        let config = SchemaConfig::default();
        let schema = Schema::new(&config);
        let table = table_of(
            &["sub_id", "date_time", "v", "session"],
            &[&["a", "t1", "1.5", "1"], &["b", "t2", "", "1"]],
        );
        let summarized = append_summary(table.clone(), &schema).unwrap();
        let flattened = Table::new(
            summarized.data.columns().to_vec(),
            summarized.records().map(|r| r.to_vec()).collect(),
        )
        .unwrap();
        assert_eq!(strip_synthetic_rows(flattened, &schema).unwrap(), table);
    }
}
