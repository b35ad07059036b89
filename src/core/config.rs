//! Engine configuration
//!
//! The base download directory comes from a key/value properties file
//! (`BASE.DOWNLOAD.PATH`); everything else has a code default that the CLI
//! may override.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::Result;

/// Properties key naming the base download directory
pub const BASE_DIR_KEY: &str = "BASE.DOWNLOAD.PATH";

/// Default properties file, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.properties";

/// Largest single read in the copy loop
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Configuration shared by every download of a `Downloader`
#[derive(Debug, Clone)]
pub struct Config {
    /// Root under which `<host>/<filename>` destinations are created
    pub base_dir: PathBuf,

    /// Copy-loop buffer cap in bytes
    pub buffer_size: usize,

    /// Deadline for connect, metadata, stream open and each read
    pub io_timeout: Option<Duration>,

    /// Digest an existing local file against the remote before resuming
    pub verify_existing: bool,

    pub ftp_port: u16,
    pub sftp_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: current_dir(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            io_timeout: Some(Duration::from_secs(30)),
            verify_existing: true,
            ftp_port: 21,
            sftp_port: 22,
        }
    }
}

impl Config {
    /// Build a configuration whose base directory comes from a properties file.
    ///
    /// A missing file is not an error; the base directory then falls back to
    /// the current working directory.
    pub fn from_properties_file(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let props = parse_properties(&text);
                if let Some(dir) = props.get(BASE_DIR_KEY).filter(|d| !d.is_empty()) {
                    config.base_dir = PathBuf::from(dir);
                }
                log::info!("{BASE_DIR_KEY}: {}", config.base_dir.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "No {} found, downloading into {}",
                    path.display(),
                    config.base_dir.display()
                );
            }
            Err(e) => return Err(e.into()),
        }
        Ok(config)
    }

    /// Base directory override
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Minimal `key=value` / `key: value` reader with `#` and `!` comments
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let sep = line.find(['=', ':'])?;
            let key = line[..sep].trim();
            let value = line[sep + 1..].trim();
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
