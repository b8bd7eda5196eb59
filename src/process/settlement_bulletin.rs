// src/process/settlement_bulletin.rs

//! Fixed-width settlement bulletin parser.
//!
//! A bulletin is a timestamp line, a couple of boilerplate lines, then any
//! number of sections. Each section is a header (`<PRODUCT> <description>`)
//! followed by right-justified data rows of a handful of fixed widths, and is
//! closed by `TOTAL` / `END OF REPORT` lines or by the first row whose width
//! does not match.

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, BooleanBuilder, Float64Builder, StringBuilder, TimestampMillisecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path, sync::Arc};
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::process::{read_lines, utils::parse_number, ResourceProcessor};

/// Field whose trailing `MONYY` drives the futures contract code.
pub const STRIKE_MONTH_FIELD: &str = "strike_month";

const UNCHANGED: &str = "UNCH";
const NOT_AVAILABLE: &str = "----";

// Two-digit-year layouts first: `%Y` happily reads "24" as year 24.
const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%y %I:%M %p",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%m/%d/%y", "%m/%d/%Y"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    /// One-character bid/ask marker.
    Flag,
}

/// One named column of the fixed-width layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Column the field ends at (exclusive). Zero selects the leading token of the line.
    pub position: usize,
    /// Keep only this many trailing characters of the extracted token.
    #[serde(default)]
    pub width: Option<usize>,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: &str, position: usize, width: Option<usize>, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            position,
            width,
            kind,
        }
    }

    /// Right-justified extraction: cut the line at `position`, keep whatever
    /// follows the last space, then its last `width` characters.
    ///
    /// Returns `None` when the line is shorter than `position`.
    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        if self.position == 0 {
            return line.split_whitespace().next();
        }
        let head = line.get(..self.position)?;
        let token = head.rsplit(' ').next()?;
        match self.width {
            Some(width) => token.get(token.len().saturating_sub(width)..),
            None => Some(token),
        }
    }
}

/// Ordered field descriptors for one bulletin row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ColumnLayout(pub Vec<FieldSpec>);

impl ColumnLayout {
    pub fn fields(&self) -> &[FieldSpec] {
        &self.0
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|f| f.name == name)
    }

    pub fn decode(&self, line: &str) -> Row {
        Row {
            values: self
                .0
                .iter()
                .map(|spec| Value::decode(spec.extract(line), spec.kind))
                .collect(),
        }
    }
}

impl Default for ColumnLayout {
    /// The published CME layout. The low/last/settlement bid-ask flags all
    /// read the (26, 1) slot that belongs to `high`.
    fn default() -> Self {
        use FieldKind::*;
        ColumnLayout(vec![
            FieldSpec::new(STRIKE_MONTH_FIELD, 0, None, Text),
            FieldSpec::new("open", 15, None, Number),
            FieldSpec::new("open_bid_ask", 16, Some(1), Flag),
            FieldSpec::new("high", 25, None, Number),
            FieldSpec::new("high_bid_ask", 26, Some(1), Flag),
            FieldSpec::new("low", 35, None, Number),
            FieldSpec::new("low_bid_ask", 26, Some(1), Flag),
            FieldSpec::new("last", 45, None, Number),
            FieldSpec::new("last_bid_ask", 26, Some(1), Flag),
            FieldSpec::new("settlement", 55, None, Number),
            FieldSpec::new("settlement_bid_ask", 26, Some(1), Flag),
            FieldSpec::new("change", 63, None, Number),
            FieldSpec::new("estimated_volume", 75, None, Number),
            FieldSpec::new("prior_settlement", 86, None, Number),
            FieldSpec::new("prior_volume", 98, None, Number),
            FieldSpec::new("prior_open_interest", 110, None, Number),
        ])
    }
}

/// Structural knobs of the bulletin format.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BulletinFormat {
    /// The timestamp follows the last occurrence of this token on the first line.
    pub timestamp_marker: String,
    /// Lines discarded after the timestamp line.
    pub boilerplate_lines: usize,
    /// Accepted data row widths, in bytes, line terminator excluded.
    pub row_widths: Vec<usize>,
    pub sentinels: Vec<String>,
    pub excluded_products: Vec<String>,
    /// Zone abbreviation → IANA zone name.
    pub zones: BTreeMap<String, String>,
    pub layout: ColumnLayout,
}

impl Default for BulletinFormat {
    fn default() -> Self {
        Self {
            timestamp_marker: " OF ".to_string(),
            boilerplate_lines: 2,
            row_widths: vec![110, 98, 86],
            sentinels: vec!["TOTAL".to_string(), "END OF REPORT".to_string()],
            excluded_products: vec!["00N".to_string(), "0GE".to_string()],
            zones: BTreeMap::from([("CST".to_string(), "America/Chicago".to_string())]),
            layout: ColumnLayout::default(),
        }
    }
}

impl BulletinFormat {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing bulletin format")
    }

    pub fn is_sentinel(&self, line: &str) -> bool {
        self.sentinels.iter().any(|s| line.contains(s.as_str()))
    }

    pub fn is_data_row(&self, line: &str) -> bool {
        self.row_widths.contains(&line.len()) && !self.is_sentinel(line)
    }

    pub fn is_excluded(&self, product_code: &str) -> bool {
        self.excluded_products.iter().any(|p| p == product_code)
    }

    fn zone(&self, abbreviation: &str) -> Result<Tz, ScrapeError> {
        let name = self
            .zones
            .get(abbreviation)
            .ok_or_else(|| ScrapeError::parse(format!("unknown time zone {:?}", abbreviation)))?;
        name.parse::<Tz>()
            .map_err(|e| ScrapeError::Config(format!("zone {} → {}: {}", abbreviation, name, e)))
    }
}

/// A decoded field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Text(String),
    Number(f64),
}

impl Value {
    /// Apply the bulletin's placeholder conventions and coerce by kind.
    pub fn decode(raw: Option<&str>, kind: FieldKind) -> Value {
        let raw = match raw.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Value::Missing,
        };
        if raw == NOT_AVAILABLE {
            return Value::Missing;
        }
        if raw == UNCHANGED {
            return Value::Number(0.0);
        }
        match kind {
            FieldKind::Number => parse_number(raw).map_or(Value::Missing, Value::Number),
            FieldKind::Text | FieldKind::Flag => Value::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            Value::Missing => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Missing => None,
        }
    }
}

/// One data line, values aligned with the layout it was decoded with.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub product_code: String,
    pub description: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct Bulletin {
    pub report_time: DateTime<Tz>,
    pub sections: Vec<Section>,
}

/// Instrument flags derived from the section description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_call: bool,
    pub is_put: bool,
    pub is_future: bool,
}

impl Classification {
    pub fn from_description(description: &str) -> Self {
        let is_call = description.contains("CALL");
        let is_put = description.contains("PUT");
        Self {
            is_call,
            is_put,
            is_future: !is_call && !is_put,
        }
    }
}

/// A retained row together with its section context and derived columns.
#[derive(Debug, Clone)]
pub struct NormalizedRow<'a> {
    pub section: &'a Section,
    pub row: &'a Row,
    pub class: Classification,
    pub contract_code: Option<String>,
}

/// Standard futures month letter for a three-letter month abbreviation.
pub fn month_code(month: &str) -> Option<char> {
    let code = match month.to_ascii_uppercase().as_str() {
        "JAN" => 'F',
        "FEB" => 'G',
        "MAR" => 'H',
        "APR" => 'J',
        "MAY" => 'K',
        "JUN" => 'M',
        "JUL" => 'N',
        "AUG" => 'Q',
        "SEP" => 'U',
        "OCT" => 'V',
        "NOV" => 'X',
        "DEC" => 'Z',
        _ => return None,
    };
    Some(code)
}

/// `("ES", "MAR24")` → `"ESH24"`. Only the trailing `MONYY` of the token is used.
pub fn futures_contract_code(product_code: &str, strike_month: &str) -> Option<String> {
    let token = strike_month.trim();
    let suffix = token.get(token.len().checked_sub(5)?..)?;
    let month = suffix.get(..3)?;
    let year = suffix.get(3..)?;
    if !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let letter = month_code(month)?;
    Some(format!("{}{}{}", product_code, letter, year))
}

fn parse_naive_datetime(stamp: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(stamp, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(stamp, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Parse `"... AS OF 03/15/24 05:00 PM (CST)"` into a zoned timestamp.
pub fn parse_report_time(line: &str, format: &BulletinFormat) -> Result<DateTime<Tz>> {
    let (_, trailing) = line
        .rsplit_once(format.timestamp_marker.as_str())
        .ok_or_else(|| {
            ScrapeError::parse(format!(
                "timestamp marker {:?} missing from {:?}",
                format.timestamp_marker, line
            ))
        })?;
    let tokens: Vec<&str> = trailing.split_whitespace().collect();
    let (zone_token, stamp) = tokens
        .split_last()
        .ok_or_else(|| ScrapeError::parse(format!("no timestamp after marker in {:?}", line)))?;

    let abbreviation = zone_token.trim_matches(|c| c == '(' || c == ')');
    let tz = format.zone(abbreviation)?;

    let stamp = stamp.join(" ");
    let naive = parse_naive_datetime(&stamp)
        .ok_or_else(|| ScrapeError::parse(format!("unrecognised report time {:?}", stamp)))?;
    let local = tz
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ScrapeError::parse(format!("{} does not exist in {}", naive, tz)))?;
    Ok(local)
}

/// Single linear pass over the bulletin text.
pub fn parse_bulletin<S: AsRef<str>>(lines: &[S], format: &BulletinFormat) -> Result<Bulletin> {
    let mut lines = lines
        .iter()
        .map(|l| l.as_ref().trim_end_matches(|c| c == '\r' || c == '\n'))
        .peekable();

    // 1) timestamp line
    let header = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ScrapeError::parse("bulletin is empty"))?;
    let report_time = parse_report_time(header, format)?;

    // 2) boilerplate
    for _ in 0..format.boilerplate_lines {
        lines.next();
    }

    // 3) sections
    let mut sections = Vec::new();
    while let Some(line) = lines.next() {
        if line.trim().is_empty() || format.is_sentinel(line) {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let product_code = match tokens.next() {
            Some(code) => code.to_string(),
            None => continue,
        };
        let description = tokens.collect::<Vec<_>>().join(" ");

        let mut rows = Vec::new();
        while let Some(next) = lines.peek() {
            if !format.is_data_row(next) {
                break;
            }
            rows.push(format.layout.decode(next));
            lines.next();
        }
        while lines.peek().map_or(false, |l| format.is_sentinel(l)) {
            lines.next();
        }

        debug!(product = %product_code, rows = rows.len(), "section");
        sections.push(Section {
            product_code,
            description,
            rows,
        });
    }

    Ok(Bulletin {
        report_time,
        sections,
    })
}

enum ColumnBuilder {
    Text(StringBuilder),
    Number(Float64Builder),
}

impl ColumnBuilder {
    fn for_kind(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Number => ColumnBuilder::Number(Float64Builder::new()),
            FieldKind::Text | FieldKind::Flag => ColumnBuilder::Text(StringBuilder::new()),
        }
    }

    fn data_type(kind: FieldKind) -> DataType {
        match kind {
            FieldKind::Number => DataType::Float64,
            FieldKind::Text | FieldKind::Flag => DataType::Utf8,
        }
    }

    fn append(&mut self, value: Option<&Value>) {
        match self {
            ColumnBuilder::Text(b) => b.append_option(value.and_then(Value::as_text)),
            ColumnBuilder::Number(b) => b.append_option(value.and_then(Value::as_f64)),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
            ColumnBuilder::Number(b) => Arc::new(b.finish()),
        }
    }
}

impl Bulletin {
    /// Rows that survive product exclusion, classified, in input order.
    pub fn normalized_rows<'a>(
        &'a self,
        format: &'a BulletinFormat,
    ) -> impl Iterator<Item = NormalizedRow<'a>> + 'a {
        let strike_idx = format.layout.index_of(STRIKE_MONTH_FIELD);
        self.sections
            .iter()
            .filter(move |s| !format.is_excluded(&s.product_code))
            .flat_map(move |section| {
                let class = Classification::from_description(&section.description);
                section.rows.iter().map(move |row| {
                    let contract_code = if class.is_future {
                        let strike = strike_idx
                            .and_then(|i| row.values.get(i))
                            .and_then(Value::as_text);
                        let code = strike
                            .as_deref()
                            .and_then(|s| futures_contract_code(&section.product_code, s));
                        if code.is_none() {
                            warn!(product = %section.product_code, ?strike, "no contract code for futures row");
                        }
                        code
                    } else {
                        None
                    };
                    NormalizedRow {
                        section,
                        row,
                        class,
                        contract_code,
                    }
                })
            })
    }

    /// Flatten into one table: context columns, layout fields, flags, contract code.
    pub fn to_record_batch(&self, format: &BulletinFormat) -> Result<RecordBatch> {
        let tz_name = self.report_time.timezone().name();
        let layout = format.layout.fields();

        let mut product_code = StringBuilder::new();
        let mut product_name = StringBuilder::new();
        let mut fields: Vec<ColumnBuilder> = layout
            .iter()
            .map(|f| ColumnBuilder::for_kind(f.kind))
            .collect();
        let mut is_call = BooleanBuilder::new();
        let mut is_put = BooleanBuilder::new();
        let mut is_future = BooleanBuilder::new();
        let mut contract_code = StringBuilder::new();
        let mut n_rows = 0;

        for norm in self.normalized_rows(format) {
            product_code.append_value(&norm.section.product_code);
            product_name.append_value(&norm.section.description);
            for (i, builder) in fields.iter_mut().enumerate() {
                builder.append(norm.row.values.get(i));
            }
            is_call.append_value(norm.class.is_call);
            is_put.append_value(norm.class.is_put);
            is_future.append_value(norm.class.is_future);
            contract_code.append_option(norm.contract_code.as_deref());
            n_rows += 1;
        }

        let mut schema_fields = vec![
            Field::new(
                "report_time",
                DataType::Timestamp(TimeUnit::Millisecond, Some(Arc::from(tz_name))),
                false,
            ),
            Field::new("product_code", DataType::Utf8, false),
            Field::new("product_name", DataType::Utf8, false),
        ];
        schema_fields.extend(
            layout
                .iter()
                .map(|f| Field::new(&f.name, ColumnBuilder::data_type(f.kind), true)),
        );
        schema_fields.extend([
            Field::new("is_call", DataType::Boolean, false),
            Field::new("is_put", DataType::Boolean, false),
            Field::new("is_future", DataType::Boolean, false),
            Field::new("contract_code", DataType::Utf8, true),
        ]);

        let report_time = TimestampMillisecondArray::from(vec![
            self.report_time.timestamp_millis();
            n_rows
        ])
        .with_timezone(tz_name);

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(report_time),
            Arc::new(product_code.finish()),
            Arc::new(product_name.finish()),
        ];
        columns.extend(fields.iter_mut().map(ColumnBuilder::finish));
        columns.push(Arc::new(is_call.finish()));
        columns.push(Arc::new(is_put.finish()));
        columns.push(Arc::new(is_future.finish()));
        columns.push(Arc::new(contract_code.finish()));

        RecordBatch::try_new(Arc::new(Schema::new(schema_fields)), columns)
            .context("building settlement bulletin batch")
    }
}

/// Reads a downloaded bulletin file into a normalized table.
#[derive(Debug, Clone, Default)]
pub struct SettlementBulletinProcessor {
    pub format: BulletinFormat,
}

impl SettlementBulletinProcessor {
    pub fn new(format: BulletinFormat) -> Self {
        Self { format }
    }
}

impl ResourceProcessor for SettlementBulletinProcessor {
    fn name(&self) -> &'static str {
        "settlement_bulletin"
    }

    #[tracing::instrument(level = "info", skip(self, path), fields(path = %path.display()))]
    fn process(&self, path: &Path) -> Result<RecordBatch> {
        let lines = read_lines(path)?;
        let bulletin = parse_bulletin(&lines, &self.format)
            .with_context(|| format!("parsing bulletin {}", path.display()))?;
        let batch = bulletin.to_record_batch(&self.format)?;
        info!(
            sections = bulletin.sections.len(),
            rows = batch.num_rows(),
            report_time = %bulletin.report_time,
            "parsed settlement bulletin"
        );
        Ok(batch)
    }
}
