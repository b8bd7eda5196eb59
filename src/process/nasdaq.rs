// src/process/nasdaq.rs

//! NASDAQ Trader symbol directory files.
//!
//! Field definitions: <https://www.nasdaqtrader.com/trader.aspx?id=symboldirdefs>

use anyhow::Result;
use arrow::{
    array::{ArrayRef, BooleanArray, TimestampMillisecondArray},
    datatypes::{DataType, Field, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::{America::New_York, Tz};
use std::{path::Path, sync::Arc};
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::process::{
    convert::{batch_from_columns, convert_column, Conversion},
    delimited::robust_read,
    ResourceProcessor,
};

pub const FILE_CREATE_COLUMN: &str = "File Create Date";
pub const FINANCIAL_STATUS_COLUMN: &str = "Financial Status";

const MPID_TYPES: &[(&str, &str)] = &[
    ("A", "agency quote"),
    ("C", "ecn"),
    ("E", "exchange"),
    ("M", "market maker"),
    ("N", "misc"),
    ("O", "order entry firm"),
    ("P", "nasdaq participant"),
    ("Q", "query only firm"),
    ("S", "specialist"),
];

const EXCHANGES: &[(&str, &str)] = &[
    ("A", "NYSE MKT"),
    ("N", "NYSE"),
    ("P", "ARCA"),
    ("Z", "BATS"),
    ("V", "IEXG"),
];

const MARKET_CATEGORIES: &[(&str, &str)] = &[
    ("Q", "global select market-sm"),
    ("G", "global market-sm"),
    ("S", "capital market"),
];

const OPTION_CLOSING_TYPES: &[(&str, &str)] = &[("N", "normal"), ("L", "late")];

const OPTION_TYPES: &[(&str, &str)] = &[("P", "put"), ("C", "call")];

// Financial Status codes carrying each condition.
const DEFICIENT: &str = "DGHK";
const DELINQUENT: &str = "EHJK";
const BANKRUPT: &str = "QGJK";

/// Column name → how its codes expand.
pub fn column_conversion(name: &str) -> Conversion {
    match name {
        "MP Type" => Conversion::Lookup(MPID_TYPES),
        "NASDAQ Member" | "FINRA Member" | "NASDAQ BX Member" | "PSX Participant"
        | "Test Issue" | "ETF" | "NextShares" | "Pending" | "PHLX Traded" => Conversion::YesNo,
        "Market Category" => Conversion::Lookup(MARKET_CATEGORIES),
        "Options Closing Type" => Conversion::Lookup(OPTION_CLOSING_TYPES),
        "Options Type" => Conversion::Lookup(OPTION_TYPES),
        "Expiration Date" | "Trigger Time" => Conversion::IsoDate,
        "Listing Exchange" | "Exchange" => Conversion::Lookup(EXCHANGES),
        _ => Conversion::Infer,
    }
}

/// The trailer row: `File Creation Time: 0118202422:01` or a bare `20240118220100`.
pub fn parse_file_create_time(trailer: &str) -> Result<DateTime<Tz>> {
    let trailer = trailer.trim();
    let naive = trailer
        .split(' ')
        .last()
        .and_then(|tail| NaiveDateTime::parse_from_str(tail, "%m%d%Y%H:%M").ok())
        .or_else(|| NaiveDateTime::parse_from_str(trailer, "%Y%m%d%H%M%S").ok())
        .ok_or_else(|| ScrapeError::parse(format!("Failed to parse file timestamp {:?}", trailer)))?;
    let local = New_York
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ScrapeError::parse(format!("{} does not exist in US/Eastern", naive)))?;
    Ok(local)
}

fn status_flags(values: &[Option<String>], codes: &'static str) -> ArrayRef {
    Arc::new(
        values
            .iter()
            .map(|v| v.as_deref().map(|s| !s.is_empty() && codes.contains(s)))
            .collect::<BooleanArray>(),
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NasdaqDirectoryProcessor;

impl ResourceProcessor for NasdaqDirectoryProcessor {
    fn name(&self) -> &'static str {
        "nasdaq_directory"
    }

    #[tracing::instrument(level = "info", skip(self, path), fields(path = %path.display()))]
    fn process(&self, path: &Path) -> Result<RecordBatch> {
        let mut table = robust_read(path)?;
        let trailer = table
            .rows
            .pop()
            .ok_or_else(|| ScrapeError::parse(format!("{} has no rows", path.display())))?;
        let created = parse_file_create_time(trailer.first().map(String::as_str).unwrap_or(""))?;
        if let Some(first) = table.rows.first() {
            debug!(row = ?first, "example directory row");
        }

        let mut cols = Vec::with_capacity(table.headers.len() + 3);
        let mut status = None;
        for (i, name) in table.headers.iter().enumerate() {
            let values = table.values(i);
            if name == FINANCIAL_STATUS_COLUMN {
                status = Some(values);
                continue;
            }
            cols.push(convert_column(name, &values, &column_conversion(name)));
        }

        let tz_name = created.timezone().name();
        let stamps = TimestampMillisecondArray::from(vec![created.timestamp_millis(); table.rows.len()])
            .with_timezone(tz_name);
        cols.push((
            Field::new(
                FILE_CREATE_COLUMN,
                DataType::Timestamp(TimeUnit::Millisecond, Some(Arc::from(tz_name))),
                false,
            ),
            Arc::new(stamps) as ArrayRef,
        ));

        if let Some(values) = status {
            for (name, codes) in [
                ("deficient", DEFICIENT),
                ("delinquent", DELINQUENT),
                ("bankrupt", BANKRUPT),
            ] {
                cols.push((
                    Field::new(name, DataType::Boolean, true),
                    status_flags(&values, codes),
                ));
            }
        }

        let batch = batch_from_columns(cols)?;
        info!(rows = batch.num_rows(), created = %created, "loaded symbol directory");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OTHER_LISTED: &str = "\
ACT Symbol|Security Name|Exchange|CQS Symbol|ETF|Round Lot Size|Test Issue|NASDAQ Symbol
A|Agilent Technologies, Inc. Common Stock|N|A|N|100|N|A
SPY|SPDR S&P 500 ETF Trust|P|SPY|Y|100|N|SPY
File Creation Time: 0118202422:01|||||||
";

    const LISTED: &str = "\
Symbol|Security Name|Market Category|Test Issue|Financial Status|Round Lot Size|ETF|NextShares
AAPL|Apple Inc. - Common Stock|Q|N|N|100|N|N
ZZZ|Troubled Corp|S|N|H|100|N|N
QQQ|Invesco QQQ Trust|G|N||100|Y|N
File Creation Time: 0118202422:01|||||||
";

    fn load(text: &str) -> Result<RecordBatch> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(text.as_bytes())?;
        NasdaqDirectoryProcessor.process(tmp.path())
    }

    fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> &'a T {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<T>()
            .unwrap()
    }

    #[test]
    fn trailer_timestamps() -> Result<()> {
        let ts = parse_file_create_time("File Creation Time: 0118202422:01")?;
        assert_eq!(ts, New_York.with_ymd_and_hms(2024, 1, 18, 22, 1, 0).single().unwrap());
        let ts = parse_file_create_time("20240118220100")?;
        assert_eq!(ts, New_York.with_ymd_and_hms(2024, 1, 18, 22, 1, 0).single().unwrap());
        assert!(parse_file_create_time("garbage").is_err());
        Ok(())
    }

    #[test]
    fn expands_other_listed() -> Result<()> {
        let batch = load(OTHER_LISTED)?;
        assert_eq!(batch.num_rows(), 2);
        let exch = column::<StringArray>(&batch, "Exchange");
        assert_eq!(exch.value(0), "NYSE");
        assert_eq!(exch.value(1), "ARCA");
        let etf = column::<BooleanArray>(&batch, "ETF");
        assert!(!etf.value(0));
        assert!(etf.value(1));
        let created = column::<TimestampMillisecondArray>(&batch, FILE_CREATE_COLUMN);
        assert_eq!(
            created.value(1),
            New_York.with_ymd_and_hms(2024, 1, 18, 22, 1, 0).unwrap().timestamp_millis()
        );
        assert!(batch.column_by_name("deficient").is_none());
        Ok(())
    }

    #[test]
    fn financial_status_flags() -> Result<()> {
        let batch = load(LISTED)?;
        assert!(batch.column_by_name(FINANCIAL_STATUS_COLUMN).is_none());
        let cat = column::<StringArray>(&batch, "Market Category");
        assert_eq!(cat.value(0), "global select market-sm");

        let deficient = column::<BooleanArray>(&batch, "deficient");
        let delinquent = column::<BooleanArray>(&batch, "delinquent");
        let bankrupt = column::<BooleanArray>(&batch, "bankrupt");
        assert!(!deficient.value(0) && !delinquent.value(0) && !bankrupt.value(0));
        assert!(deficient.value(1) && delinquent.value(1) && !bankrupt.value(1));
        assert!(deficient.is_null(2));

        let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(&names[names.len() - 4..], &[
            FILE_CREATE_COLUMN.to_string(),
            "deficient".to_string(),
            "delinquent".to_string(),
            "bankrupt".to_string(),
        ]);
        Ok(())
    }
}
