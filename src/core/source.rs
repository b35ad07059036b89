//! Source resolution logic for trident-dl
//!
//! Turns a user-supplied URL into a normalized endpoint descriptor and derives
//! the local destination path from it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use url::Url;

use crate::core::error::{Error, Result};

/// Transfer protocols understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Ftp,
    Sftp,
}

impl Protocol {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Protocol::Http),
            "ftp" => Some(Protocol::Ftp),
            "sftp" => Some(Protocol::Sftp),
            _ => None,
        }
    }

    /// Whether a `name,user,password` final path segment carries credentials
    fn splits_credentials(self) -> bool {
        matches!(self, Protocol::Ftp | Protocol::Sftp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Sftp => write!(f, "sftp"),
        }
    }
}

/// A normalized remote endpoint
#[derive(Clone, PartialEq)]
pub struct Source {
    pub protocol: Protocol,
    pub host: String,
    pub port: Option<u16>,
    /// Remote path with any credential suffix removed, percent-decoded
    pub path: String,
    pub filename: String,
    pub user: Option<String>,
    pub password: Option<String>,
    request_url: String,
    display_url: String,
}

// Keeps passwords out of logs.
impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("filename", &self.filename)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Source {
    /// Parse and validate a download URL
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let url = Url::parse(input)?;

        let protocol = Protocol::from_scheme(url.scheme()).ok_or_else(|| {
            Error::InvalidSource(format!(
                "unsupported scheme '{}' (expected http, ftp or sftp)",
                url.scheme()
            ))
        })?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::InvalidSource(format!("missing host in '{input}'"))),
        };

        let raw_path = url.path();
        let (dir, last) = match raw_path.rfind('/') {
            Some(pos) => (&raw_path[..=pos], &raw_path[pos + 1..]),
            None => ("/", raw_path),
        };
        let last = decode(last)?;

        let mut user = non_empty(decode(url.username())?);
        let mut password = match url.password() {
            Some(p) => non_empty(decode(p)?),
            None => None,
        };

        let filename = if protocol.splits_credentials() && last.contains(',') {
            let mut fields = last.split(',');
            let name = fields.next().unwrap_or_default().to_string();
            user = fields.next().map(str::to_string);
            password = fields.next().map(str::to_string);
            name
        } else {
            last
        };

        if filename.is_empty() || filename == "." || filename == ".." {
            return Err(Error::InvalidSource(format!("'{input}' does not name a file")));
        }
        if filename.contains('/') || filename.contains('\\') {
            return Err(Error::InvalidSource(format!(
                "file name '{filename}' contains a path separator"
            )));
        }

        let path = format!("{}{}", decode(dir)?, filename);

        let mut public = url.clone();
        let _ = public.set_username("");
        let _ = public.set_password(None);
        let display_url = if protocol.splits_credentials() {
            strip_credential_suffix(public.as_str()).to_string()
        } else {
            public.as_str().to_string()
        };

        Ok(Self {
            protocol,
            host,
            port: url.port(),
            path,
            filename,
            user,
            password,
            request_url: url.to_string(),
            display_url,
        })
    }

    /// URL as sent to an HTTP server
    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    /// URL safe to show to a user: no userinfo, no credential suffix
    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    /// Directory under `base_dir` where files from this host land
    pub fn local_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(self.host.replace('.', "_"))
    }

    /// `<base_dir>/<host_with_underscores>/<filename>`
    pub fn local_path(&self, base_dir: &Path) -> PathBuf {
        self.local_dir(base_dir).join(&self.filename)
    }
}

/// Cut `,user,password` from the last path segment; earlier commas stay
fn strip_credential_suffix(url: &str) -> &str {
    let tail = url.rfind('/').map_or(0, |slash| slash + 1);
    match url[tail..].find(',') {
        Some(comma) => &url[..tail + comma],
        None => url,
    }
}

fn decode(raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| Error::InvalidSource(format!("bad percent-encoding in '{raw}': {e}")))
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
