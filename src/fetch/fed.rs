// src/fetch/fed.rs

//! Overnight reference rate fixings from the New York Fed markets API.
//!
//! Browsable at <https://www.newyorkfed.org/markets/reference-rates/sofr> (or `/effr`, `/obfr`).

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Date32Array, Float64Array, StringArray},
    datatypes::{DataType, Field},
    record_batch::RecordBatch,
};
use reqwest::Client;
use serde::Deserialize;
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{info, warn};

use super::json::{extra_columns, Extra};
use crate::error::ScrapeError;
use crate::process::{convert::batch_from_columns, date_parser::date32};

pub const FED_READ_URL: &str = "https://markets.newyorkfed.org/read";
const REFERENCE_RATES_PRODUCT: &str = "50";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OisIndex {
    Sofr,
    Effr,
    Obfr,
}

impl OisIndex {
    pub fn event_code(&self) -> &'static str {
        match self {
            OisIndex::Sofr => "520",
            OisIndex::Effr => "500",
            OisIndex::Obfr => "505",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OisIndex::Sofr => "sofr",
            OisIndex::Effr => "effr",
            OisIndex::Obfr => "obfr",
        }
    }
}

impl FromStr for OisIndex {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sofr" => Ok(OisIndex::Sofr),
            "effr" | "fedfund" | "fedfunds" => Ok(OisIndex::Effr),
            "obfr" => Ok(OisIndex::Obfr),
            _ => Err(ScrapeError::UnknownResource(s.to_string())),
        }
    }
}

/// The most recent `limit` fixings of one index, newest first.
#[derive(Debug, Clone)]
pub struct FixingHistoryRequest {
    pub index: OisIndex,
    pub limit: usize,
    pub timeout: Duration,
}

impl FixingHistoryRequest {
    pub fn new(index: OisIndex, limit: usize) -> Self {
        Self {
            index,
            limit,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("productCode", REFERENCE_RATES_PRODUCT.to_string()),
            ("eventCodes", self.index.event_code().to_string()),
            ("limit", self.limit.to_string()),
            ("startPosition", "0".to_string()),
            ("format", "json".to_string()),
            ("sort", "postDt:-1".to_string()),
        ]
    }

    #[tracing::instrument(level = "info", skip(self, client), fields(index = self.index.name()))]
    pub async fn load(&self, client: &Client) -> Result<RecordBatch> {
        let body = client
            .get(FED_READ_URL)
            .query(&self.query_params())
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("reading {} fixings", self.index.name()))?;
        let batch = parse_reference_rates(&body)?;
        info!(rows = batch.num_rows(), "loaded reference rates");
        Ok(batch)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceRatesPage {
    #[serde(default)]
    ref_rates: Vec<ReferenceRate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceRate {
    effective_date: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    percent_rate: Option<f64>,
    percent_percentile1: Option<f64>,
    percent_percentile25: Option<f64>,
    percent_percentile75: Option<f64>,
    percent_percentile99: Option<f64>,
    volume_in_billions: Option<f64>,
    revision_indicator: Option<String>,
    target_rate_from: Option<f64>,
    target_rate_to: Option<f64>,
    footnote_id: Option<String>,
    #[serde(flatten)]
    extra: Extra,
}

/// Flatten a `{"refRates": [...]}` body into one row per fixing.
pub fn parse_reference_rates(body: &str) -> Result<RecordBatch> {
    let page: ReferenceRatesPage = serde_json::from_str(body)
        .map_err(|e| ScrapeError::parse(format!("reference rates body: {}", e)))?;
    let rates = page.ref_rates;

    let mut dates = Vec::with_capacity(rates.len());
    for rate in &rates {
        let d = chrono::NaiveDate::parse_from_str(&rate.effective_date, "%Y-%m-%d")
            .map_err(|e| {
                ScrapeError::parse(format!("effectiveDate {:?}: {}", rate.effective_date, e))
            })?;
        dates.push(date32(d));
    }
    if rates.is_empty() {
        warn!("reference rates response had no fixings");
    }

    let float_col = |name: &str, f: fn(&ReferenceRate) -> Option<f64>| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Float64, true),
            Arc::new(rates.iter().map(f).collect::<Float64Array>()),
        )
    };
    let text_col = |name: &str, f: fn(&ReferenceRate) -> Option<&str>| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Utf8, true),
            Arc::new(rates.iter().map(f).collect::<StringArray>()),
        )
    };

    let mut columns: Vec<(Field, ArrayRef)> = vec![
        (
            Field::new("effective_date", DataType::Date32, false),
            Arc::new(Date32Array::from(dates)) as ArrayRef,
        ),
        text_col("type", |r| r.kind.as_deref()),
        float_col("percent_rate", |r| r.percent_rate),
        float_col("percentile_1", |r| r.percent_percentile1),
        float_col("percentile_25", |r| r.percent_percentile25),
        float_col("percentile_75", |r| r.percent_percentile75),
        float_col("percentile_99", |r| r.percent_percentile99),
        float_col("volume_in_billions", |r| r.volume_in_billions),
        text_col("revision_indicator", |r| r.revision_indicator.as_deref()),
        float_col("target_rate_from", |r| r.target_rate_from),
        float_col("target_rate_to", |r| r.target_rate_to),
        text_col("footnote_id", |r| r.footnote_id.as_deref()),
    ];
    let taken: Vec<String> = columns.iter().map(|(f, _)| f.name().clone()).collect();
    let taken: Vec<&str> = taken.iter().map(String::as_str).collect();
    let extras: Vec<&Extra> = rates.iter().map(|r| &r.extra).collect();
    columns.extend(extra_columns(&extras, &taken));
    batch_from_columns(columns)
}
