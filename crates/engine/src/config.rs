//! Server configuration
//!
//! Settings come from a TOML file, the environment, or both (environment
//! wins):
//!
//! ```toml
//! driver = "sqlite"          # log | flat_file | sqlite | memory | mock | none
//! location = "data/kv.db"    # backend file, driver default when omitted
//! sync_interval = 10         # seconds between persistence passes
//! ```
//!
//! | variable                 | field           |
//! |--------------------------|-----------------|
//! | `SIMPLEKV_DRIVER`        | `driver`        |
//! | `SIMPLEKV_LOCATION`      | `location`      |
//! | `SIMPLEKV_SYNC_INTERVAL` | `sync_interval` |

use serde::Deserialize;
use simplekv_durability::DriverKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Interval used when none is configured, or the value is unusable
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Environment variable selecting the driver
pub const ENV_DRIVER: &str = "SIMPLEKV_DRIVER";
/// Environment variable selecting the backend location
pub const ENV_LOCATION: &str = "SIMPLEKV_LOCATION";
/// Environment variable selecting the sync interval in seconds
pub const ENV_SYNC_INTERVAL: &str = "SIMPLEKV_SYNC_INTERVAL";

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for [`KvConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvConfig {
    /// Persistence backend
    pub driver: DriverKind,
    /// Backend file; `None` uses the driver default
    pub location: Option<PathBuf>,
    /// Time between periodic sync passes
    pub sync_interval: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            location: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// On-disk shape; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    driver: Option<DriverKind>,
    location: Option<PathBuf>,
    sync_interval: Option<RawInterval>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Seconds(i64),
    Text(String),
}

impl RawInterval {
    fn resolve(&self) -> Duration {
        match self {
            RawInterval::Seconds(secs) => interval_from_secs(*secs),
            RawInterval::Text(text) => parse_interval(text),
        }
    }
}

fn interval_from_secs(secs: i64) -> Duration {
    if secs > 0 {
        Duration::from_secs(secs as u64)
    } else {
        tracing::warn!(sync_interval = secs, "non-positive sync interval, using default");
        DEFAULT_SYNC_INTERVAL
    }
}

/// Parse a sync interval in whole seconds, falling back to
/// [`DEFAULT_SYNC_INTERVAL`] for empty, unparsable or zero input
pub fn parse_interval(text: &str) -> Duration {
    match text.trim().parse::<i64>() {
        Ok(secs) => interval_from_secs(secs),
        Err(_) => {
            if !text.trim().is_empty() {
                tracing::warn!(sync_interval = %text, "unparsable sync interval, using default");
            }
            DEFAULT_SYNC_INTERVAL
        }
    }
}

impl KvConfig {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        let defaults = KvConfig::default();
        Ok(Self {
            driver: raw.driver.unwrap_or(defaults.driver),
            location: raw.location,
            sync_interval: raw
                .sync_interval
                .map(|v| v.resolve())
                .unwrap_or(defaults.sync_interval),
        })
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), driver = %config.driver, "loaded config");
        Ok(config)
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        Self::default().apply_env_overrides()
    }

    /// Overlay `SIMPLEKV_*` environment variables
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`, which maps a variable name to its value
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup(ENV_DRIVER) {
            self.driver = DriverKind::parse_lossy(&driver);
        }
        if let Some(location) = lookup(ENV_LOCATION).filter(|l| !l.is_empty()) {
            self.location = Some(PathBuf::from(location));
        }
        if let Some(interval) = lookup(ENV_SYNC_INTERVAL) {
            self.sync_interval = parse_interval(&interval);
        }
        self
    }

    /// Backend location after applying the driver default
    pub fn resolved_location(&self) -> Option<PathBuf> {
        self.location
            .clone()
            .or_else(|| self.driver.default_location())
    }
}
