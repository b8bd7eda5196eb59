// src/process/ib_borrow.rs
use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array},
    datatypes::{DataType, Field},
    record_batch::RecordBatch,
};
use std::{path::Path, sync::Arc};
use tracing::info;

use crate::process::{
    convert::{batch_from_columns, convert_column, Conversion},
    delimited::{read_delimited, read_payload},
    utils::parse_number,
    ResourceProcessor,
};

/// Interactive Brokers short-stock availability (`ftp3.interactivebrokers.com/<country>.txt`).
///
/// Layout: a `#BOF` line, the `#SYM|...|` header, data rows, a `#EOF` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct IbBorrowProcessor;

const RENAMES: &[(&str, &str)] = &[
    ("#SYM", "symbol"),
    ("NAME", "desc"),
    ("REBATERATE", "lend"),
    ("FEERATE", "borrow"),
];

fn scaled(values: &[Option<String>], factor: f64) -> ArrayRef {
    Arc::new(
        values
            .iter()
            .map(|v| v.as_deref().and_then(parse_number).map(|x| x * factor))
            .collect::<Float64Array>(),
    )
}

impl ResourceProcessor for IbBorrowProcessor {
    fn name(&self) -> &'static str {
        "ib_borrow"
    }

    #[tracing::instrument(level = "info", skip(self, path), fields(path = %path.display()))]
    fn process(&self, path: &Path) -> Result<RecordBatch> {
        let data = read_payload(path)?;
        let mut table = read_delimited(&data, b'|', 1)
            .with_context(|| format!("reading borrow file {}", path.display()))?;
        table.drop_unnamed();
        if table.rows.last().and_then(|r| r.first()).map_or(false, |s| s.starts_with("#EOF")) {
            table.rows.pop();
        }
        for (from, to) in RENAMES {
            table.rename(from, to);
        }
        for header in &mut table.headers {
            *header = header.to_lowercase();
        }

        let mut cols = Vec::with_capacity(table.headers.len());
        for (i, name) in table.headers.iter().enumerate() {
            let values = table.values(i);
            let col = match name.as_str() {
                // rebate is paid to the lender, quoted in percent
                "lend" => (Field::new(name, DataType::Float64, true), scaled(&values, -0.01)),
                "borrow" => (Field::new(name, DataType::Float64, true), scaled(&values, 0.01)),
                // ">10000000" and friends mean effectively unlimited
                "available" => {
                    let arr: Float64Array = values
                        .iter()
                        .map(|v| Some(v.as_deref().and_then(parse_number).unwrap_or(f64::INFINITY)))
                        .collect();
                    (Field::new(name, DataType::Float64, true), Arc::new(arr) as ArrayRef)
                }
                "symbol" | "desc" | "cur" | "isin" | "con" => {
                    convert_column(name, &values, &Conversion::Text)
                }
                _ => convert_column(name, &values, &Conversion::Infer),
            };
            cols.push(col);
        }

        let batch = batch_from_columns(cols)?;
        info!(rows = batch.num_rows(), "loaded borrow rates");
        Ok(batch)
    }
}
