// src/registry.rs

//! Named resources and the processor each one feeds.
//!
//! ```yaml
//! resources:
//!   listed_tickers:
//!     uri: ftp://ftp.nasdaqtrader.com/symboldirectory/nasdaqlisted.txt
//!     kind: nasdaq_symbol_directory
//!   short_halts:
//!     uri: ftp://ftp.nasdaqtrader.com/symboldirectory/shorthalts/
//!     kind: delimited
//!     fname_format: shorthalts%Y%m%d.txt
//! ```

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};
use tracing::info;

use crate::error::ScrapeError;
use crate::ftp::{FolderResource, FtpRemote, FtpResource, ModifiedTimeMethod, Remote};
use crate::process::{
    cme::{CmeIrsVolProcessor, CmeSettleProcessor},
    delimited::DelimitedProcessor,
    ib_borrow::IbBorrowProcessor,
    nasdaq::NasdaqDirectoryProcessor,
    BulletinFormat, ResourceProcessor, SettlementBulletinProcessor,
};
use crate::retry::RetryPolicy;

const NASDAQ_DIR: &str = "ftp://ftp.nasdaqtrader.com/symboldirectory/";
const CME_FTP: &str = "ftp://ftp.cmegroup.com";
const IB_FTP: &str = "ftp://ftp3.interactivebrokers.com";
const IB_USER: &str = "shortstock";

/// Which processor turns a downloaded file into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    SettlementBulletin,
    Delimited,
    CmeSettleCsv,
    CmeIrsVolCube,
    NasdaqSymbolDirectory,
    IbBorrow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSpec {
    pub uri: String,
    #[serde(default = "anonymous")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub kind: ResourceKind,
    /// IANA zone for the server's modification times; UTC when absent.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Set for folders of dated files; the latest file is fetched.
    #[serde(default)]
    pub fname_format: Option<String>,
    #[serde(default)]
    pub modified_method: ModifiedTimeMethod,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Overrides for `settlement_bulletin` resources.
    #[serde(default)]
    pub bulletin: BulletinFormat,
}

fn anonymous() -> String {
    "anonymous".to_string()
}

impl ResourceSpec {
    pub fn new(uri: &str, kind: ResourceKind) -> Self {
        Self {
            uri: uri.to_string(),
            user: anonymous(),
            password: String::new(),
            kind,
            timezone: None,
            fname_format: None,
            modified_method: ModifiedTimeMethod::default(),
            retry: RetryPolicy::default(),
            bulletin: BulletinFormat::default(),
        }
    }

    fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    fn with_timezone(mut self, tz: &str) -> Self {
        self.timezone = Some(tz.to_string());
        self
    }

    fn with_fname_format(mut self, fmt: &str) -> Self {
        self.fname_format = Some(fmt.to_string());
        self
    }

    pub fn tz(&self) -> Result<Tz> {
        match &self.timezone {
            None => Ok(Tz::UTC),
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ScrapeError::Config(format!("unknown timezone {:?}", name)).into()),
        }
    }

    pub fn processor(&self) -> Box<dyn ResourceProcessor> {
        match self.kind {
            ResourceKind::SettlementBulletin => {
                Box::new(SettlementBulletinProcessor::new(self.bulletin.clone()))
            }
            ResourceKind::Delimited => Box::new(DelimitedProcessor),
            ResourceKind::CmeSettleCsv => Box::new(CmeSettleProcessor),
            ResourceKind::CmeIrsVolCube => Box::new(CmeIrsVolProcessor),
            ResourceKind::NasdaqSymbolDirectory => Box::new(NasdaqDirectoryProcessor),
            ResourceKind::IbBorrow => Box::new(IbBorrowProcessor),
        }
    }

    /// Configure an already-constructed resource the way this entry asks.
    pub fn configure<R: Remote>(&self, resource: FtpResource<R>) -> Result<FtpResource<R>> {
        Ok(resource
            .with_timezone(self.tz()?)
            .with_retry(self.retry.clone())
            .with_modified_method(self.modified_method))
    }

    pub fn open(&self) -> Result<FtpResource> {
        self.configure(FtpResource::open(&self.uri, &self.user, &self.password)?)
    }

    /// Fetch (latest file, for folders) and process.
    pub fn fetch_table_with<R: Remote>(&self, resource: FtpResource<R>) -> Result<RecordBatch> {
        let processor = self.processor();
        match &self.fname_format {
            None => {
                let mut resource = resource;
                resource.fetch_table(None, processor.as_ref())
            }
            Some(fmt) => {
                let mut folder = FolderResource::new(resource, fmt);
                let latest = folder
                    .latest_date()?
                    .with_context(|| format!("no files matching {} under {}", fmt, self.uri))?;
                info!(uri = %self.uri, date = %latest, "fetching latest dated file");
                folder.fetch_date(latest, processor.as_ref())
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceRegistry {
    pub resources: BTreeMap<String, ResourceSpec>,
}

impl ResourceRegistry {
    /// The NASDAQ symbol directory, its short-halts folder and IB US borrow.
    pub fn builtin() -> Self {
        let mut resources = BTreeMap::new();
        for (name, file) in [
            ("listed_tickers", "nasdaqlisted.txt"),
            ("other_listed", "otherlisted.txt"),
            ("traded_tickers", "nasdaqtraded.txt"),
            ("market_participants", "mpidlist.txt"),
            ("options", "options.txt"),
            ("bxoptions", "bxoptions.txt"),
            ("psx_traded", "psxtraded.txt"),
        ] {
            resources.insert(
                name.to_string(),
                ResourceSpec::new(
                    &format!("{}{}", NASDAQ_DIR, file),
                    ResourceKind::NasdaqSymbolDirectory,
                ),
            );
        }
        resources.insert(
            "short_halts".to_string(),
            ResourceSpec::new(&format!("{}shorthalts/", NASDAQ_DIR), ResourceKind::Delimited)
                .with_fname_format("shorthalts%Y%m%d.txt"),
        );
        resources.insert(
            "ib_borrow_usa".to_string(),
            ResourceSpec::new(&ib_borrow_uri("usa"), ResourceKind::IbBorrow)
                .with_user(IB_USER)
                .with_timezone("US/Eastern"),
        );
        Self { resources }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text)
            .map_err(|e| ScrapeError::Config(format!("bad registry yaml: {}", e)))?;
        for (name, spec) in &registry.resources {
            spec.tz().with_context(|| format!("resource {}", name))?;
        }
        Ok(registry)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry {}", path.display()))?;
        Self::from_yaml(&text)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&ResourceSpec> {
        self.resources
            .get(name)
            .ok_or_else(|| ScrapeError::UnknownResource(name.to_string()).into())
    }

    pub fn open(&self, name: &str) -> Result<FtpResource<FtpRemote>> {
        self.get(name)?.open()
    }

    /// Download (if needed) and process the named resource.
    pub fn fetch_table(&self, name: &str) -> Result<RecordBatch> {
        let spec = self.get(name)?;
        spec.fetch_table_with(spec.open()?)
            .with_context(|| format!("fetching resource {}", name))
    }
}

/// CME end-of-day settlements for one exchange (`CME`, `CBT`, `NYMEX`, ...).
pub fn cme_settlement_uri(date: NaiveDate, exchange: &str, compressed: bool) -> String {
    format!(
        "{}/settle/{}.settle.{}.s.csv{}",
        CME_FTP,
        exchange.to_lowercase(),
        date.format("%Y%m%d"),
        if compressed { ".zip" } else { "" }
    )
}

pub fn cme_irs_uri(date: NaiveDate) -> String {
    format!("{}/irs/CME_ATM_VolCube_{}.csv", CME_FTP, date.format("%Y%m%d"))
}

/// IB short-stock availability file for a country (`usa`, `canada`, ...).
pub fn ib_borrow_uri(country: &str) -> String {
    format!("{}/{}.txt", IB_FTP, country.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::remote::memory::MemoryRemote;
    use crate::ftp::ResourceUri;
    use chrono::NaiveDateTime;
    use chrono_tz::US::Eastern;

    #[test]
    fn builtin_entries() -> Result<()> {
        let reg = ResourceRegistry::builtin();
        assert_eq!(reg.names().count(), 9);
        let ib = reg.get("ib_borrow_usa")?;
        assert_eq!(ib.uri, "ftp://ftp3.interactivebrokers.com/usa.txt");
        assert_eq!(ib.user, "shortstock");
        assert_eq!(ib.tz()?, Eastern);
        assert_eq!(ib.processor().name(), "ib_borrow");

        let listed = reg.get("listed_tickers")?;
        assert_eq!(listed.user, "anonymous");
        assert_eq!(listed.tz()?, Tz::UTC);
        assert_eq!(listed.processor().name(), "nasdaq_directory");

        let err = reg.get("nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScrapeError>(),
            Some(ScrapeError::UnknownResource(_))
        ));
        Ok(())
    }

    #[test]
    fn uri_builders() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            cme_settlement_uri(d, "CBT", true),
            "ftp://ftp.cmegroup.com/settle/cbt.settle.20240315.s.csv.zip"
        );
        assert_eq!(
            cme_settlement_uri(d, "cme", false),
            "ftp://ftp.cmegroup.com/settle/cme.settle.20240315.s.csv"
        );
        assert_eq!(
            cme_irs_uri(d),
            "ftp://ftp.cmegroup.com/irs/CME_ATM_VolCube_20240315.csv"
        );
        assert_eq!(ib_borrow_uri("Canada"), "ftp://ftp3.interactivebrokers.com/canada.txt");
    }

    #[test]
    fn loads_yaml() -> Result<()> {
        let reg = ResourceRegistry::from_yaml(
            r#"
resources:
  bulletin:
    uri: ftp://ftp.cmegroup.com/bulletin/DailyBulletin_pdf.txt
    kind: settlement_bulletin
    timezone: America/Chicago
    retry:
      max_attempts: 5
    bulletin:
      excluded_products: ["00N"]
  irs:
    uri: ftp://ftp.cmegroup.com/irs/CME_ATM_VolCube_20240315.csv
    kind: cme_irs_vol_cube
    modified_method: mlsd
"#,
        )?;
        let b = reg.get("bulletin")?;
        assert_eq!(b.kind, ResourceKind::SettlementBulletin);
        assert_eq!(b.retry.max_attempts, 5);
        assert_eq!(b.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
        assert!(!b.bulletin.is_excluded("0GE"));
        assert_eq!(reg.get("irs")?.modified_method, ModifiedTimeMethod::Mlsd);

        let bad = ResourceRegistry::from_yaml(
            "resources:\n  x:\n    uri: ftp://h/x\n    kind: ib_borrow\n    timezone: Mars/Olympus\n",
        );
        assert!(bad.is_err());
        Ok(())
    }

    #[test]
    fn fetches_latest_dated_file() -> Result<()> {
        let stamp = NaiveDateTime::parse_from_str("20220124180000", "%Y%m%d%H%M%S")?;
        let remote = MemoryRemote::default()
            .with_file("/symboldirectory/shorthalts/shorthalts20220121.txt", stamp, b"Symbol|Time\nOLD|09:30\n")
            .with_file(
                "/symboldirectory/shorthalts/shorthalts20220124.txt",
                stamp,
                b"Symbol|Time\nAAA|09:30\nBBB|10:15\n",
            );
        let reg = ResourceRegistry::builtin();
        let spec = reg.get("short_halts")?;
        let resource = spec.configure(FtpResource::with_remote(
            ResourceUri::parse(&spec.uri)?,
            remote,
        )?)?;
        let batch = spec.fetch_table_with(resource)?;
        assert_eq!(batch.num_rows(), 2);
        Ok(())
    }
}
