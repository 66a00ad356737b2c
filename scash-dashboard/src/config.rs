//! Dashboard configuration.
//!
//! Built in layers: defaults, then an optional TOML file, then
//! environment variables. The binaries apply command-line flags last.
//!
//! ```toml
//! api_url = "http://192.168.1.20:8080"
//! poll_interval_secs = 5
//!
//! [[catalog.pools]]
//! value = "stratum+tcp://pool.scash.pro:8888"
//! label = "pool.scash.pro"
//! coin = "scash"
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::api_client::DEFAULT_API_URL;
use crate::error::{Error, Result};
use crate::setup::Catalog;
use crate::tracing::prelude::*;

/// Overrides the backend address.
pub const ENV_API_URL: &str = "SCASH_API_URL";

/// Path of the optional TOML config file.
pub const ENV_CONFIG_PATH: &str = "SCASH_DASHBOARD_CONFIG";

/// Background refresh period. The web console shipped with both 5 s and
/// 15 s variants; the slower one keeps log traffic down on small boxes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// How long transient confirmations ("refreshed") stay on screen.
pub const DEFAULT_NOTICE_DURATION: Duration = Duration::from_millis(1500);

const DEFAULT_LOG_TAIL_LINES: usize = 20;

/// Shortest accepted poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// Manager backend base URL.
    pub api_url: String,

    /// Period of the background status/log/history refresh.
    pub poll_interval: Duration,

    /// Lifetime of transient dashboard messages.
    pub notice_duration: Duration,

    /// Number of trailing log lines the terminal view shows.
    pub log_tail_lines: usize,

    /// Choices offered by the setup form.
    pub catalog: Catalog,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            notice_duration: DEFAULT_NOTICE_DURATION,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            catalog: Catalog::default(),
        }
    }
}

/// On-disk shape; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_url: Option<String>,
    poll_interval_secs: Option<f64>,
    notice_duration_ms: Option<u64>,
    log_tail_lines: Option<usize>,
    catalog: Option<Catalog>,
}

impl DashboardConfig {
    /// Load defaults, then `path` (or `$SCASH_DASHBOARD_CONFIG`), then
    /// `$SCASH_API_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(ENV_CONFIG_PATH).map(PathBuf::from));
        if let Some(path) = path {
            let text = std::fs::read_to_string(&path).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            config.merge_toml(&text)?;
            debug!(path = %path.display(), "Loaded config file");
        }

        if let Ok(url) = env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                config.api_url = url.trim().to_owned();
            }
        }

        Ok(config)
    }

    /// Apply the keys present in a TOML document.
    pub fn merge_toml(&mut self, text: &str) -> Result<()> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| Error::Config(e.message().to_owned()))?;

        if let Some(url) = file.api_url {
            self.api_url = url;
        }
        if let Some(secs) = file.poll_interval_secs {
            self.set_poll_interval_secs(secs)?;
        }
        if let Some(ms) = file.notice_duration_ms {
            self.notice_duration = Duration::from_millis(ms);
        }
        if let Some(lines) = file.log_tail_lines {
            self.log_tail_lines = lines;
        }
        if let Some(catalog) = file.catalog {
            if catalog.coins.is_empty() {
                return Err(Error::Config("catalog must list at least one coin".into()));
            }
            self.catalog = catalog;
        }
        Ok(())
    }

    pub fn set_poll_interval_secs(&mut self, secs: f64) -> Result<()> {
        let interval = Duration::try_from_secs_f64(secs)
            .map_err(|_| Error::Config(format!("invalid poll interval: {secs}")))?;
        if interval < MIN_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "poll interval must be at least {}s",
                MIN_POLL_INTERVAL.as_secs()
            )));
        }
        self.poll_interval = interval;
        Ok(())
    }
}
