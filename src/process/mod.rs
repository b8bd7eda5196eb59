// src/process/mod.rs
use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

pub mod cme;
pub mod convert;
pub mod date_parser;
pub mod delimited;
pub mod ib_borrow;
pub mod nasdaq;
pub mod raw_table;
pub mod settlement_bulletin;
pub mod utils;

pub use raw_table::RawTable;
pub use settlement_bulletin::{parse_bulletin, Bulletin, BulletinFormat, SettlementBulletinProcessor};

/// Turns one downloaded file into a table. One implementation per source format.
pub trait ResourceProcessor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    fn process(&self, path: &Path) -> Result<RecordBatch>;
}

/// All lines of a local text file, in order, line terminators removed.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(|c| c == '\r' || c == '\n').to_string());
    }
    Ok(lines)
}
