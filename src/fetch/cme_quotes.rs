// src/fetch/cme_quotes.rs

//! Delayed futures quotes from the cmegroup.com product pages.

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Date32Array, Float64Array, StringArray},
    datatypes::{DataType, Field},
    record_batch::RecordBatch,
};
use chrono::{Days, NaiveDate, Utc, Weekday};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use super::json::{extra_columns, Extra};
use crate::error::ScrapeError;
use crate::process::{
    convert::batch_from_columns,
    date_parser::{date32, kth_weekday_of_month, parse_flexible_date},
    utils::to_numeric,
};

const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 6.0; Nexus 5 Build/MRA58N) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/103.0.5060.134 Mobile Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,\
image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9";

pub const QUOTES_URL: &str = "https://www.cmegroup.com/CmeWS/mvc/Quotes/Future/{}/G";

/// One-month SOFR fixes over the contract month itself.
const ONE_MONTH_SOFR: &str = "SR1";

/// The quotes endpoint rejects requests without a browser-looking session.
pub fn browser_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US;q=0.9"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .cookie_store(true)
        .gzip(true)
        .timeout(timeout)
        .build()
        .context("building cme http client")
}

#[derive(Debug, Clone)]
pub struct FutureQuoteRequest {
    pub page_url: String,
    pub product_id: u32,
}

impl FutureQuoteRequest {
    pub fn three_month_sofr() -> Self {
        Self {
            page_url: "https://www.cmegroup.com/markets/interest-rates/stirs/three-month-sofr.quotes.html"
                .to_string(),
            product_id: 8462,
        }
    }

    pub fn one_month_sofr() -> Self {
        Self {
            page_url: "https://www.cmegroup.com/markets/interest-rates/stirs/one-month-sofr.quotes.html"
                .to_string(),
            product_id: 8463,
        }
    }

    pub fn data_url(&self) -> String {
        QUOTES_URL.replace("{}", &self.product_id.to_string())
    }

    /// Visit the product page for cookies, then pull the quotes JSON.
    #[tracing::instrument(level = "info", skip(self, client), fields(product = self.product_id))]
    pub async fn load(&self, client: &Client) -> Result<RecordBatch> {
        client
            .get(&self.page_url)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("loading {}", self.page_url))?;
        debug!("loaded main page");

        let body = client
            .get(self.data_url())
            .header(header::REFERER, &self.page_url)
            .query(&[("_t", Utc::now().timestamp())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .with_context(|| format!("loading {}", self.data_url()))?;
        let batch = parse_quotes(&body)?;
        info!(quotes = batch.num_rows(), "loaded quotes page");
        Ok(batch)
    }
}

#[derive(Debug, Deserialize)]
struct QuotesPage {
    #[serde(default)]
    quotes: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Quote {
    product_code: String,
    quote_code: String,
    expiration_month: String,
    expiration_date: String,
    last: JsonValue,
    prior_settle: JsonValue,
    close: JsonValue,
    volume: JsonValue,
    change: JsonValue,
    open: JsonValue,
    high: JsonValue,
    low: JsonValue,
    high_limit: JsonValue,
    low_limit: JsonValue,
    last_trade_date: LastTradeDate,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LastTradeDate {
    date_only_long_format: String,
    #[serde(flatten)]
    extra: Extra,
}

impl Quote {
    /// Unnamed fields, with the rest of `lastTradeDate` nested back under its key.
    fn leftovers(&self) -> Extra {
        let mut extra = self.extra.clone();
        if !self.last_trade_date.extra.is_empty() {
            extra.insert(
                "lastTradeDate".to_string(),
                JsonValue::Object(self.last_trade_date.extra.clone()),
            );
        }
        extra
    }
}

/// Display value as text; `"-"`, empty and null all mean "no print".
fn printed(v: &JsonValue) -> Option<String> {
    let s = match v {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty() && s != "-").then_some(s)
}

fn numeric(v: &JsonValue) -> Option<f64> {
    printed(v).as_deref().and_then(to_numeric)
}

/// Close, else last, else prior settle.
fn mark(q: &Quote) -> Option<f64> {
    printed(&q.close)
        .or_else(|| printed(&q.last))
        .or_else(|| printed(&q.prior_settle))
        .as_deref()
        .and_then(to_numeric)
}

fn expiration(q: &Quote) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(q.expiration_date.trim(), "%Y%m%d").ok()
}

/// Third Wednesday of the expiration month; SR1 accrues from its expiration date.
fn first_fixing_date(q: &Quote) -> Option<NaiveDate> {
    if q.product_code == ONE_MONTH_SOFR {
        return expiration(q);
    }
    let code = q.expiration_date.trim();
    let year = code.get(..4)?.parse().ok()?;
    let month = code.get(4..6)?.parse().ok()?;
    kth_weekday_of_month(year, month, 2, Weekday::Wed)
}

struct QuoteRow {
    quote: Quote,
    mark: f64,
    last_trade: Option<NaiveDate>,
}

/// One row per quoted contract that has a usable mark.
pub fn parse_quotes(body: &str) -> Result<RecordBatch> {
    let page: QuotesPage = serde_json::from_str(body)
        .map_err(|e| ScrapeError::parse(format!("quotes body: {}", e)))?;
    let total = page.quotes.len();
    let rows: Vec<QuoteRow> = page
        .quotes
        .into_iter()
        .filter_map(|quote| {
            let mark = mark(&quote)?;
            let last_trade = parse_flexible_date(&quote.last_trade_date.date_only_long_format);
            Some(QuoteRow {
                quote,
                mark,
                last_trade,
            })
        })
        .collect();
    debug!(total, kept = rows.len(), "dropped quotes without a mark");

    let text = |name: &str, f: fn(&Quote) -> &str| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Utf8, false),
            Arc::new(rows.iter().map(|r| Some(f(&r.quote))).collect::<StringArray>()),
        )
    };
    let float = |name: &str, f: fn(&Quote) -> &JsonValue| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Float64, true),
            Arc::new(rows.iter().map(|r| numeric(f(&r.quote))).collect::<Float64Array>()),
        )
    };
    let date = |name: &str, dates: Vec<Option<NaiveDate>>| -> (Field, ArrayRef) {
        (
            Field::new(name, DataType::Date32, true),
            Arc::new(dates.into_iter().map(|d| d.map(date32)).collect::<Date32Array>()),
        )
    };

    let expirations = rows.iter().map(|r| expiration(&r.quote)).collect();
    let fixings = rows.iter().map(|r| first_fixing_date(&r.quote)).collect();
    let last_trades: Vec<Option<NaiveDate>> = rows.iter().map(|r| r.last_trade).collect();
    let settlements = last_trades
        .iter()
        .map(|d| d.and_then(|d| d.checked_add_days(Days::new(1))))
        .collect();

    let mut columns: Vec<(Field, ArrayRef)> = vec![
        text("product_code", |q| q.product_code.as_str()),
        text("quote_code", |q| q.quote_code.as_str()),
        text("expiration_month", |q| q.expiration_month.as_str()),
        date("expiration_date", expirations),
        float("last", |q| &q.last),
        float("prior_settle", |q| &q.prior_settle),
        float("close", |q| &q.close),
        float("volume", |q| &q.volume),
        float("change", |q| &q.change),
        float("open", |q| &q.open),
        float("high", |q| &q.high),
        float("low", |q| &q.low),
        float("high_limit", |q| &q.high_limit),
        float("low_limit", |q| &q.low_limit),
        (
            Field::new("mark", DataType::Float64, false),
            Arc::new(Float64Array::from(rows.iter().map(|r| r.mark).collect::<Vec<_>>())) as ArrayRef,
        ),
        date("first_fixing_date", fixings),
        date("last_trade_date", last_trades),
        date("final_settlement_date", settlements),
    ];
    let taken: Vec<String> = columns.iter().map(|(f, _)| f.name().clone()).collect();
    let taken: Vec<&str> = taken.iter().map(String::as_str).collect();
    let leftovers: Vec<Extra> = rows.iter().map(|r| r.quote.leftovers()).collect();
    let leftovers: Vec<&Extra> = leftovers.iter().collect();
    columns.extend(extra_columns(&leftovers, &taken));
    batch_from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    const BODY: &str = r#"{"tradeDate":"15 Mar 2024","quotes":[
        {"productCode":"SR3","quoteCode":"SR3H4","expirationMonth":"MAR 2024","expirationDate":"20240319",
         "last":"94.6850","priorSettle":"94.6800","close":"-","volume":"123,456",
         "lastTradeDate":{"timestamp":1718668800000,"dateOnlyLongFormat":"06/18/2024"}},
        {"productCode":"SR3","quoteCode":"SR3M4","expirationMonth":"JUN 2024","expirationDate":"20240618",
         "last":"-","priorSettle":"94.8100","close":"-","volume":"0",
         "lastTradeDate":{"dateOnlyLongFormat":"09/17/2024"}},
        {"productCode":"SR3","quoteCode":"SR3U4","expirationMonth":"SEP 2024","expirationDate":"20240917",
         "last":"-","priorSettle":"-","close":"-","volume":"-",
         "lastTradeDate":{"dateOnlyLongFormat":"12/17/2024"}},
        {"productCode":"SR1","quoteCode":"SR1J4","expirationMonth":"APR 2024","expirationDate":"20240430",
         "last":"94.6700","priorSettle":"94.6650","close":"94.6725","volume":"10",
         "lastTradeDate":{"dateOnlyLongFormat":"04/30/2024"}}
    ]}"#;

    fn ymd(y: i32, m: u32, d: u32) -> i32 {
        date32(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn dates<'a>(batch: &'a RecordBatch, name: &str) -> &'a Date32Array {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap()
    }

    #[test]
    fn request_urls() {
        let req = FutureQuoteRequest::one_month_sofr();
        assert_eq!(req.data_url(), "https://www.cmegroup.com/CmeWS/mvc/Quotes/Future/8463/G");
        assert_eq!(FutureQuoteRequest::three_month_sofr().product_id, 8462);
    }

    #[test]
    fn mark_falls_back_and_unmarked_rows_drop() -> Result<()> {
        let batch = parse_quotes(BODY)?;
        assert_eq!(batch.num_rows(), 3);
        let codes = batch
            .column_by_name("quote_code")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(codes.value(2), "SR1J4");

        let mark = batch
            .column_by_name("mark")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(mark.value(0), 94.685);
        assert_eq!(mark.value(1), 94.81);
        assert_eq!(mark.value(2), 94.6725);

        let volume = batch
            .column_by_name("volume")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(volume.value(0), 123456.0);
        let close = batch
            .column_by_name("close")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(close.is_null(0));
        Ok(())
    }

    #[test]
    fn contract_dates() -> Result<()> {
        let batch = parse_quotes(BODY)?;
        let fixing = dates(&batch, "first_fixing_date");
        // third Wednesday of March / June 2024
        assert_eq!(fixing.value(0), ymd(2024, 3, 20));
        assert_eq!(fixing.value(1), ymd(2024, 6, 19));
        assert_eq!(fixing.value(2), ymd(2024, 4, 30));

        assert_eq!(dates(&batch, "last_trade_date").value(0), ymd(2024, 6, 18));
        assert_eq!(dates(&batch, "final_settlement_date").value(0), ymd(2024, 6, 19));
        assert_eq!(dates(&batch, "expiration_date").value(1), ymd(2024, 6, 18));
        Ok(())
    }

    #[test]
    fn keeps_price_fields_and_chart() -> Result<()> {
        let body = r#"{"quotes":[
            {"productCode":"SR3","quoteCode":"SR3H4","expirationDate":"20240319",
             "last":"94.6850","change":"+0.0050","open":"94.6800","high":"94.6900","low":"94.6750",
             "highLimit":"-","lowLimit":"-","updated":"17:00:00 CT",
             "priceChart":{"code":"SR3H4","venue":"G"},
             "lastTradeDate":{"timestamp":1718668800000,"dateOnlyLongFormat":"06/18/2024"}}
        ]}"#;
        let batch = parse_quotes(body)?;
        let float = |name: &str| {
            batch
                .column_by_name(name)
                .unwrap()
                .as_any()
                .downcast_ref::<Float64Array>()
                .unwrap()
                .clone()
        };
        let text = |name: &str| {
            batch
                .column_by_name(name)
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap()
                .value(0)
                .to_string()
        };
        assert_eq!(float("change").value(0), 0.005);
        assert_eq!(float("high").value(0), 94.69);
        assert!(float("high_limit").is_null(0));
        assert_eq!(float("last_trade_date_timestamp").value(0), 1718668800000.0);
        assert_eq!(text("price_chart_code"), "SR3H4");
        assert_eq!(text("price_chart_venue"), "G");
        assert_eq!(text("updated"), "17:00:00 CT");
        Ok(())
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_quotes("<!doctype html>").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScrapeError>(),
            Some(ScrapeError::Parse(_))
        ));
    }
}
