// src/ftp/mod.rs

//! Fetch-if-absent cache over FTP resources.
//!
//! A resource owns a private scratch directory that disappears when the
//! resource is dropped. Files land at `<scratch>/<host>/<remote path>` and are
//! handed to a [`ResourceProcessor`] to become a table.

use anyhow::{anyhow, Context, Result};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::{Tz, UTC};
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

use crate::error::ScrapeError;
use crate::process::ResourceProcessor;
use crate::retry::RetryPolicy;

pub mod remote;

pub use remote::{parse_mlsd_line, FtpRemote, Remote};

/// How `last_modified` asks the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifiedTimeMethod {
    #[default]
    Mdtm,
    Mlsd,
}

/// `ftp://host[:port]/path` split into the pieces the cache needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    /// Host name, used for the local directory.
    pub host: String,
    /// `host[:port]` to connect to.
    pub authority: String,
    /// Absolute remote path; a trailing `/` marks a directory.
    pub path: String,
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|_| ScrapeError::InvalidUri(uri.to_string()))?;
        if url.scheme() != "ftp" {
            return Err(ScrapeError::InvalidUri(uri.to_string()).into());
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ScrapeError::InvalidUri(uri.to_string()))?
            .to_string();
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        Ok(Self {
            host,
            authority,
            path: url.path().to_string(),
        })
    }

    /// Remote path, optionally extended by a file name inside it.
    pub fn remote_path(&self, suffix: Option<&str>) -> String {
        match suffix {
            None => self.path.clone(),
            Some(s) if self.path.ends_with('/') => format!("{}{}", self.path, s),
            Some(s) => format!("{}/{}", self.path, s),
        }
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ftp://{}{}", self.authority, self.path)
    }
}

/// One remote file (or directory) plus its local scratch copy.
pub struct FtpResource<R: Remote = FtpRemote> {
    uri: ResourceUri,
    remote: R,
    scratch: TempDir,
    tz: Tz,
    retry: RetryPolicy,
    modified_method: ModifiedTimeMethod,
}

impl FtpResource<FtpRemote> {
    /// Parse the uri and allocate scratch space. No network traffic happens until first use.
    pub fn open(uri: &str, user: &str, password: &str) -> Result<Self> {
        let uri = ResourceUri::parse(uri)?;
        let remote = FtpRemote::new(&uri.authority, user, password);
        Self::with_remote(uri, remote)
    }
}

impl<R: Remote> FtpResource<R> {
    pub fn with_remote(uri: ResourceUri, remote: R) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("macroscrape-")
            .tempdir()
            .context("creating scratch directory")?;
        debug!(dir = %scratch.path().display(), uri = %uri, "using temp directory");
        Ok(Self {
            uri,
            remote,
            scratch,
            tz: UTC,
            retry: RetryPolicy::default(),
            modified_method: ModifiedTimeMethod::default(),
        })
    }

    /// Zone the server's naive modification times are read in.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_modified_method(mut self, method: ModifiedTimeMethod) -> Self {
        self.modified_method = method;
        self
    }

    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn remote_path(&self, suffix: Option<&str>) -> String {
        self.uri.remote_path(suffix)
    }

    pub fn local_path(&self, suffix: Option<&str>) -> PathBuf {
        let mut path = self
            .scratch
            .path()
            .join(&self.uri.host)
            .join(self.uri.path.trim_start_matches('/'));
        if let Some(s) = suffix {
            path.push(s);
        }
        path
    }

    pub fn local_copy_exists(&self, suffix: Option<&str>) -> bool {
        self.local_path(suffix).exists()
    }

    /// Remote modification time, localized to the resource's zone.
    pub fn last_modified(&mut self, suffix: Option<&str>) -> Result<DateTime<Tz>> {
        let remote_path = self.remote_path(suffix);
        let naive = match self.modified_method {
            ModifiedTimeMethod::Mdtm => self.remote.modified(&remote_path)?,
            ModifiedTimeMethod::Mlsd => {
                let (dir, name) = match remote_path.rsplit_once('/') {
                    Some((dir, name)) => (if dir.is_empty() { "/" } else { dir }, name),
                    None => ("", remote_path.as_str()),
                };
                self.remote
                    .listing(dir)?
                    .iter()
                    .filter_map(|line| parse_mlsd_line(line))
                    .find(|(n, _)| n == name)
                    .map(|(_, dt)| dt)
                    .ok_or_else(|| anyhow!("{} not present in MLSD listing of {}", name, dir))?
            }
        };
        let dt = self
            .tz
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| anyhow!("{} does not exist in {}", naive, self.tz))?;
        info!(remote = %remote_path, modified = %dt, "remote file last modified");
        Ok(dt)
    }

    /// Names in the remote directory.
    pub fn list_files(&mut self) -> Result<Vec<String>> {
        let dir = self.uri.path.clone();
        self.remote.list(&dir)
    }

    /// Download unconditionally, replacing any local copy.
    #[tracing::instrument(level = "info", skip(self), fields(uri = %self.uri))]
    pub fn download_file(&mut self, suffix: Option<&str>) -> Result<PathBuf> {
        let local = self.local_path(suffix);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let remote_path = self.remote_path(suffix);
        info!(remote = %remote_path, "downloading remote file");
        let start = Instant::now();
        let remote = &mut self.remote;
        let bytes = self
            .retry
            .retry(|attempt| {
                if attempt > 0 {
                    remote.reset();
                }
                remote.retrieve(&remote_path)
            })
            .with_context(|| format!("downloading {}", remote_path))?;
        fs::write(&local, &bytes).with_context(|| format!("writing {}", local.display()))?;
        info!(
            remote = %remote_path,
            bytes = bytes.len(),
            elapsed = ?start.elapsed(),
            "finished downloading remote file"
        );

        if !local.exists() {
            return Err(ScrapeError::Download(remote_path).into());
        }
        Ok(local)
    }

    /// Download only when no local copy exists; returns the local path either way.
    pub fn fetch(&mut self, suffix: Option<&str>) -> Result<PathBuf> {
        if self.local_copy_exists(suffix) {
            info!(uri = %self.uri, ?suffix, "already got file");
            return Ok(self.local_path(suffix));
        }
        self.download_file(suffix)
    }

    /// Run `processor` over the local copy. Fails with
    /// [`ScrapeError::ResourceNotFound`] when nothing has been fetched.
    pub fn load_from_local(
        &self,
        suffix: Option<&str>,
        processor: &dyn ResourceProcessor,
    ) -> Result<RecordBatch> {
        let path = self.local_path(suffix);
        if !path.exists() {
            return Err(ScrapeError::ResourceNotFound(path).into());
        }
        debug!(processor = processor.name(), path = %path.display(), "processing local copy");
        processor
            .process(&path)
            .with_context(|| format!("{} failed on {}", processor.name(), path.display()))
    }

    /// `fetch` then `load_from_local`.
    pub fn fetch_table(
        &mut self,
        suffix: Option<&str>,
        processor: &dyn ResourceProcessor,
    ) -> Result<RecordBatch> {
        self.fetch(suffix)?;
        self.load_from_local(suffix, processor)
    }
}

impl<R: Remote> Drop for FtpResource<R> {
    fn drop(&mut self) {
        debug!(dir = %self.scratch.path().display(), "cleaning up temp directory");
    }
}

/// A remote directory of dated files, e.g. `shorthalts%Y%m%d.txt`.
pub struct FolderResource<R: Remote = FtpRemote> {
    resource: FtpResource<R>,
    fname_format: String,
}

impl FolderResource<FtpRemote> {
    pub fn open(uri: &str, user: &str, password: &str, fname_format: &str) -> Result<Self> {
        Ok(Self::new(FtpResource::open(uri, user, password)?, fname_format))
    }
}

impl<R: Remote> FolderResource<R> {
    pub fn new(resource: FtpResource<R>, fname_format: &str) -> Self {
        Self {
            resource,
            fname_format: fname_format.to_string(),
        }
    }

    pub fn resource(&mut self) -> &mut FtpResource<R> {
        &mut self.resource
    }

    /// Date encoded in a (possibly path-qualified) file name.
    pub fn fname_to_date(&self, path: &str) -> Option<NaiveDate> {
        let name = path.rsplit('/').next().unwrap_or(path);
        NaiveDate::parse_from_str(name, &self.fname_format).ok()
    }

    /// File name for `date`, relative to the folder.
    pub fn date_to_fname(&self, date: NaiveDate) -> String {
        date.format(&self.fname_format).to_string()
    }

    /// Dates of every listed file that matches the pattern, ascending.
    pub fn list_dates_available(&mut self) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = self
            .resource
            .list_files()?
            .iter()
            .filter_map(|p| self.fname_to_date(p))
            .collect();
        dates.sort();
        Ok(dates)
    }

    pub fn latest_date(&mut self) -> Result<Option<NaiveDate>> {
        Ok(self.list_dates_available()?.pop())
    }

    pub fn fetch_date(
        &mut self,
        date: NaiveDate,
        processor: &dyn ResourceProcessor,
    ) -> Result<RecordBatch> {
        let fname = self.date_to_fname(date);
        self.resource.fetch_table(Some(&fname), processor)
    }
}
