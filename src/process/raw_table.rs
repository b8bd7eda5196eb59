use anyhow::Result;
use arrow::record_batch::RecordBatch;

use crate::process::convert::{batch_from_columns, convert_column, Conversion};
use crate::process::utils::clean_str;

/// A delimited file read as strings, before any typing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column names from the file's header record.
    pub headers: Vec<String>,
    /// Data records, each padded or cut to `headers.len()`.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cleaned values of column `idx`; empty cells become `None`.
    pub fn values(&self, idx: usize) -> Vec<Option<String>> {
        self.rows
            .iter()
            .map(|r| r.get(idx).map(|v| clean_str(v)).filter(|v| !v.is_empty()))
            .collect()
    }

    pub fn drop_column(&mut self, idx: usize) {
        self.headers.remove(idx);
        for row in &mut self.rows {
            if idx < row.len() {
                row.remove(idx);
            }
        }
    }

    /// Drops columns whose header is blank (a trailing delimiter leaves one behind).
    pub fn drop_unnamed(&mut self) {
        while let Some(idx) = self.headers.iter().rposition(|h| h.trim().is_empty()) {
            self.drop_column(idx);
        }
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column(from) {
            self.headers[idx] = to.to_string();
        }
    }

    /// Type every column with `conversion_for(header)`.
    pub fn to_record_batch_with<F>(&self, conversion_for: F) -> Result<RecordBatch>
    where
        F: Fn(&str) -> Conversion,
    {
        let cols = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, name)| convert_column(name, &self.values(i), &conversion_for(name)))
            .collect();
        batch_from_columns(cols)
    }

    /// Type every column by inference (numeric if every value parses).
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.to_record_batch_with(|_| Conversion::Infer)
    }
}
