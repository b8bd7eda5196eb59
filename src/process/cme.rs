// src/process/cme.rs
use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use std::path::Path;
use tracing::info;

use crate::process::{convert::Conversion, delimited::robust_read, ResourceProcessor};

/// CME end-of-day settlement CSV (`{exch}.settle.{YYYYMMDD}.s.csv[.zip]`), kept as published.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmeSettleProcessor;

impl ResourceProcessor for CmeSettleProcessor {
    fn name(&self) -> &'static str {
        "cme_settle"
    }

    #[tracing::instrument(level = "info", skip(self, path), fields(path = %path.display()))]
    fn process(&self, path: &Path) -> Result<RecordBatch> {
        let table = robust_read(path)?;
        let batch = table.to_record_batch()?;
        info!(rows = batch.num_rows(), cols = batch.num_columns(), "loaded settlements");
        Ok(batch)
    }
}

/// CME IRS ATM volatility cube. `Date` becomes a `Date32` leading column.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmeIrsVolProcessor;

pub const IRS_DATE_COLUMN: &str = "Date";

impl ResourceProcessor for CmeIrsVolProcessor {
    fn name(&self) -> &'static str {
        "cme_irs_vol"
    }

    #[tracing::instrument(level = "info", skip(self, path), fields(path = %path.display()))]
    fn process(&self, path: &Path) -> Result<RecordBatch> {
        let mut table = robust_read(path)?;
        let idx = table
            .column(IRS_DATE_COLUMN)
            .with_context(|| format!("no {} column in {}", IRS_DATE_COLUMN, path.display()))?;

        // move the date column to the front
        let header = table.headers.remove(idx);
        table.headers.insert(0, header);
        for row in &mut table.rows {
            let v = row.remove(idx);
            row.insert(0, v);
        }

        table.to_record_batch_with(|name| {
            if name == IRS_DATE_COLUMN {
                Conversion::Date32
            } else {
                Conversion::Infer
            }
        })
    }
}
