// src/ftp/remote.rs
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use suppaftp::{types::FileType, FtpResult, FtpStream};
use tracing::{debug, info, warn};

/// The handful of server operations the resource cache needs.
pub trait Remote {
    /// Modification time as reported by `MDTM`.
    fn modified(&mut self, path: &str) -> Result<NaiveDateTime>;
    /// Raw `MLSD` lines for a directory.
    fn listing(&mut self, dir: &str) -> Result<Vec<String>>;
    /// `NLST` names for a directory.
    fn list(&mut self, dir: &str) -> Result<Vec<String>>;
    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>>;
    /// Forget the current session so the next call logs in again.
    fn reset(&mut self) {}
}

/// An FTP session that logs in on first use and quits on drop.
pub struct FtpRemote {
    host: String,
    user: String,
    password: String,
    stream: Option<FtpStream>,
}

impl FtpRemote {
    /// `host` may carry an explicit `:port`; otherwise port 21 is used.
    pub fn new(host: &str, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            stream: None,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.stream.is_some()
    }

    fn login(&mut self) -> Result<&mut FtpStream> {
        if self.stream.is_none() {
            info!(host = %self.host, "logging into remote resource");
            let addr = if self.host.contains(':') {
                self.host.clone()
            } else {
                format!("{}:21", self.host)
            };
            let mut stream = FtpStream::connect(addr.as_str())
                .with_context(|| format!("connecting to {}", addr))?;
            stream
                .login(self.user.as_str(), self.password.as_str())
                .with_context(|| format!("logging into {} as {:?}", self.host, self.user))?;
            stream
                .transfer_type(FileType::Binary)
                .context("switching to binary transfers")?;
            debug!(host = %self.host, "logged in");
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| anyhow!("ftp session to {} unavailable", self.host))
    }

    /// Run `op` on the session. A failed command drops the session: after a
    /// 421 or a broken pipe the control connection is unusable.
    fn session<T>(
        &mut self,
        what: String,
        op: impl FnOnce(&mut FtpStream) -> FtpResult<T>,
    ) -> Result<T> {
        match op(self.login()?) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(host = %self.host, "{} failed, dropping session: {}", what, e);
                self.reset();
                Err(anyhow::Error::new(e).context(what))
            }
        }
    }
}

impl Remote for FtpRemote {
    fn modified(&mut self, path: &str) -> Result<NaiveDateTime> {
        self.session(format!("MDTM {}", path), |s| s.mdtm(path))
    }

    fn listing(&mut self, dir: &str) -> Result<Vec<String>> {
        self.session(format!("MLSD {}", dir), |s| s.mlsd(Some(dir)))
    }

    fn list(&mut self, dir: &str) -> Result<Vec<String>> {
        self.session(format!("NLST {}", dir), |s| s.nlst(Some(dir)))
    }

    fn retrieve(&mut self, path: &str) -> Result<Vec<u8>> {
        let buf = self.session(format!("RETR {}", path), |s| s.retr_as_buffer(path))?;
        Ok(buf.into_inner())
    }

    fn reset(&mut self) {
        if self.stream.take().is_some() {
            debug!(host = %self.host, "ftp session dropped");
        }
    }
}

impl Drop for FtpRemote {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.quit() {
                warn!(host = %self.host, "ftp quit failed: {}", e);
            }
        }
    }
}

/// `modify` fact and name from one MLSD line
/// (`modify=20240118220100;size=42;type=file; name.txt`).
pub fn parse_mlsd_line(line: &str) -> Option<(String, NaiveDateTime)> {
    let (facts, name) = line.split_once(' ')?;
    let modify = facts.split(';').find_map(|fact| {
        let (key, value) = fact.split_once('=')?;
        key.eq_ignore_ascii_case("modify").then_some(value)
    })?;
    let stamp = modify.get(..14)?;
    let dt = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?;
    Some((name.trim().to_string(), dt))
}
