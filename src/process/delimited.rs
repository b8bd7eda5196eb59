// src/process/delimited.rs
use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use csv::ReaderBuilder;
use std::{
    fs::{self, File},
    io::{Cursor, Read},
    path::Path,
};
use tracing::debug;
use zip::ZipArchive;

use crate::process::{RawTable, ResourceProcessor};

/// Lines inspected when guessing the delimiter.
const SNIFF_LINES: usize = 3;
const CANDIDATES: &[char] = &[',', '|', '\t', ';'];

/// Guess the delimiter from the first few lines: the candidate that appears
/// the same non-zero number of times on each line wins, most occurrences first.
pub fn detect_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();

    let mut best: Option<(char, usize, bool)> = None;
    for &c in CANDIDATES {
        let counts: Vec<usize> = sample.iter().map(|l| l.matches(c).count()).collect();
        let first = counts.first().copied().unwrap_or(0);
        if first == 0 {
            continue;
        }
        let consistent = counts.iter().all(|&n| n == first);
        let better = match best {
            None => true,
            Some((_, n, was_consistent)) => {
                (consistent && !was_consistent) || (consistent == was_consistent && first > n)
            }
        };
        if better {
            best = Some((c, first, consistent));
        }
    }
    best.map(|(c, _, _)| c as u8).unwrap_or(b',')
}

/// File bytes; for `.zip` archives, the first `.csv`/`.txt` entry.
pub fn read_payload<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("zip"));
    if !is_zip {
        return fs::read(path).with_context(|| format!("Failed to read {}", path.display()));
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open ZIP file: {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {}", path.display()))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).with_context(|| {
            format!("Failed to access ZIP entry #{} in {}", i, path.display())
        })?;
        let name = entry.name().to_lowercase();
        if entry.is_file() && (name.ends_with(".csv") || name.ends_with(".txt")) {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut buf)
                .with_context(|| format!("Failed to read {} into memory", name))?;
            debug!(entry = %name, bytes = buf.len(), "extracted zip entry");
            return Ok(buf);
        }
    }
    anyhow::bail!("no csv entry in {}", path.display())
}

/// Parse delimited bytes. Records before `header_row` are skipped, the
/// record at `header_row` names the columns, and every later record is data.
pub fn read_delimited(data: &[u8], delimiter: u8, header_row: usize) -> Result<RawTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(Cursor::new(data));

    let mut table = RawTable::default();
    let mut seen_header = false;
    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("delimited parse error at record {}", idx))?;
        if idx < header_row {
            continue;
        }
        if !seen_header {
            table.headers = record.iter().map(|s| s.trim().to_string()).collect();
            seen_header = true;
            continue;
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(table.headers.len(), String::new());
        table.rows.push(row);
    }
    Ok(table)
}

/// Sniff the delimiter, then read with the first record as header.
pub fn robust_read<P: AsRef<Path>>(path: P) -> Result<RawTable> {
    let path = path.as_ref();
    let data = read_payload(path)?;
    let delimiter = detect_delimiter(&String::from_utf8_lossy(&data));
    debug!(path = %path.display(), delimiter = %(delimiter as char), "reading delimited file");
    read_delimited(&data, delimiter, 0)
        .with_context(|| format!("reading {}", path.display()))
}

/// Any sniffable delimited file, columns typed by inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedProcessor;

impl ResourceProcessor for DelimitedProcessor {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn process(&self, path: &Path) -> Result<RecordBatch> {
        robust_read(path)?.to_record_batch()
    }
}
