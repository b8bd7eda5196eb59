// src/fetch/mod.rs

//! HTTP sources: normalizers that take a caller-supplied `reqwest::Client`.

pub mod cme_quotes;
pub mod fed;
pub mod json;

pub use cme_quotes::{browser_client, parse_quotes, FutureQuoteRequest};
pub use fed::{parse_reference_rates, FixingHistoryRequest, OisIndex};
