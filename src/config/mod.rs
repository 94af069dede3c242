//! Refresh configuration for the backend's cached data sources.
//!
//! Three sources are refreshed in the background, each with an `enabled`
//! flag and an interval in milliseconds:
//!
//! | section    | consumer                 | default   |
//! |------------|--------------------------|-----------|
//! | `location` | precacher                | 2 minutes |
//! | `git`      | precacher                | 10 minutes|
//! | `music`    | streamer                 | 1 second  |
//!
//! Configuration is read from JSON; any field left out keeps its default.
//!
//! ```rust
//! use precache::config::RefreshConfig;
//!
//! let cfg = RefreshConfig::from_json(r#"{ "git": { "enabled": false } }"#).unwrap();
//! assert!(!cfg.git.enabled);
//! assert_eq!(cfg.git.interval_ms, 600_000);
//! assert!(cfg.validate().is_ok());
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poll::{PollerOptions, StreamerOptions};

/// Files searched by [`RefreshConfig::load_default`], in order.
pub const DEFAULT_PATHS: &[&str] = &["precache.json", "/etc/precache/config.json"];

/// Prefix of the environment overrides read by [`RefreshConfig::apply_env`].
pub const ENV_PREFIX: &str = "PRECACHE";

const DEFAULT_LOCATION_INTERVAL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_GIT_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_MUSIC_INTERVAL: Duration = Duration::from_secs(1);

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no config file found (searched {searched:?})")]
    NoFilesFound { searched: Vec<PathBuf> },

    #[error("{section}: interval must be greater than zero when enabled")]
    InvalidInterval { section: &'static str },

    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv { key: String, value: String },
}

/// Settings for one refreshed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSection {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl RefreshSection {
    fn enabled_every(interval: Duration) -> Self {
        Self {
            enabled: true,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Scheduling options whose span names the source.
    pub fn poller_options(&self, name: &'static str) -> PollerOptions {
        PollerOptions::new().span(tracing::debug_span!(
            "refresh",
            source = name,
            interval_ms = self.interval_ms
        ))
    }

    /// Streaming options whose span names the source.
    pub fn streamer_options(&self, name: &'static str) -> StreamerOptions {
        StreamerOptions::from(self.poller_options(name))
    }
}

/// Background refresh settings for every cached source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRefreshConfig")]
pub struct RefreshConfig {
    pub location: RefreshSection,
    pub git: RefreshSection,
    pub music: RefreshSection,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            location: RefreshSection::enabled_every(DEFAULT_LOCATION_INTERVAL),
            git: RefreshSection::enabled_every(DEFAULT_GIT_INTERVAL),
            music: RefreshSection::enabled_every(DEFAULT_MUSIC_INTERVAL),
        }
    }
}

// Partially specified sections are merged over the per-section defaults.
#[derive(Default, Deserialize)]
#[serde(default)]
struct RawRefreshConfig {
    location: RawSection,
    git: RawSection,
    music: RawSection,
}

#[derive(Default, Deserialize)]
struct RawSection {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
}

impl RawSection {
    fn over(self, base: RefreshSection) -> RefreshSection {
        RefreshSection {
            enabled: self.enabled.unwrap_or(base.enabled),
            interval_ms: self.interval_ms.unwrap_or(base.interval_ms),
        }
    }
}

impl From<RawRefreshConfig> for RefreshConfig {
    fn from(raw: RawRefreshConfig) -> Self {
        let base = Self::default();
        Self {
            location: raw.location.over(base.location),
            git: raw.git.over(base.git),
            music: raw.music.over(base.music),
        }
    }
}

impl RefreshConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Decode`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON document from `reader`.
    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Reads the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Loads the first of [`DEFAULT_PATHS`] that exists.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoFilesFound`] if none exists, or the error of loading
    /// the one that does.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_first(DEFAULT_PATHS.iter().map(PathBuf::from))
    }

    fn load_first(paths: impl IntoIterator<Item = PathBuf>) -> Result<Self, ConfigError> {
        let mut searched = Vec::new();
        for path in paths {
            match std::fs::metadata(&path) {
                Ok(_) => return Self::load(&path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => searched.push(path),
                Err(source) => return Err(ConfigError::Io { path, source }),
            }
        }
        Err(ConfigError::NoFilesFound { searched })
    }

    /// The sections with their names, in a fixed order.
    pub fn sections(&self) -> [(&'static str, &RefreshSection); 3] {
        [
            ("location", &self.location),
            ("git", &self.git),
            ("music", &self.music),
        ]
    }

    fn sections_mut(&mut self) -> [(&'static str, &mut RefreshSection); 3] {
        [
            ("location", &mut self.location),
            ("git", &mut self.git),
            ("music", &mut self.music),
        ]
    }

    /// Applies `PRECACHE_<SECTION>_ENABLED` and
    /// `PRECACHE_<SECTION>_INTERVAL_MS` overrides from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up through `lookup` instead of the process
    /// environment.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        for (name, section) in self.sections_mut() {
            let upper = name.to_uppercase();

            let key = format!("{ENV_PREFIX}_{upper}_ENABLED");
            if let Some(value) = lookup(&key) {
                section.enabled = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
                    key: key.clone(),
                    value: value.clone(),
                })?;
            }

            let key = format!("{ENV_PREFIX}_{upper}_INTERVAL_MS");
            if let Some(value) = lookup(&key) {
                section.interval_ms =
                    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                        key: key.clone(),
                        value: value.clone(),
                    })?;
            }
        }
        Ok(())
    }

    /// Rejects enabled sections with a zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, section) in self.sections() {
            if section.enabled && section.interval_ms == 0 {
                return Err(ConfigError::InvalidInterval { section: name });
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
