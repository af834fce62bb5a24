//! Configuration management for geotrack.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "geotrack";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "trackers.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GEOTRACK_`, `__` separates sections)
/// 2. TOML config file at `~/.config/geotrack/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler configuration.
    pub tracker: TrackerConfig,
    /// Position source configuration.
    pub position: PositionConfig,
    /// Public address lookup configuration.
    pub network: NetworkConfig,
    /// Device fingerprint overrides.
    pub device: DeviceConfig,
    /// Remote store configuration.
    pub sync: SyncConfig,
    /// Session identity configuration.
    pub session: SessionConfig,
    /// Presentation configuration.
    pub display: DisplayConfig,
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between capture cycles.
    pub update_interval_secs: u64,
}

/// Where positions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSourceKind {
    /// Fixed coordinates from this configuration.
    #[default]
    Static,
    /// A network geolocation service.
    Http,
    /// Location access is turned off; every request is denied.
    Disabled,
}

/// Requested accuracy for position fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyMode {
    /// Ask the locator for its most precise fix.
    High,
    /// Default trade-off.
    #[default]
    Balanced,
    /// Accept cached fixes.
    Low,
}

/// Position source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Which locator to use.
    pub source: PositionSourceKind,
    /// Latitude for the static locator, in degrees.
    pub latitude: f64,
    /// Longitude for the static locator, in degrees.
    pub longitude: f64,
    /// Accuracy reported by the static locator, in meters.
    pub accuracy_m: f64,
    /// Geolocation service used by the HTTP locator.
    pub lookup_url: String,
    /// Accuracy reported when the geolocation service gives none, in meters.
    pub approximate_accuracy_m: f64,
    /// Requested accuracy.
    pub accuracy_mode: AccuracyMode,
    /// Upper bound for a single position request, in seconds.
    pub timeout_secs: u64,
}

/// Public address lookup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// IP echo endpoint returning `{"ip": "..."}`.
    pub ip_lookup_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Device fingerprint overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// User-agent string to report instead of the native one.
    pub user_agent: Option<String>,
    /// Screen geometry, e.g. `1920x1080`.
    pub screen: Option<String>,
}

/// Remote store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncBackend {
    /// Local `SQLite` database.
    #[default]
    Sqlite,
    /// REST document store.
    Http,
}

/// Remote store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Which backend to write to.
    pub backend: SyncBackend,
    /// Path to the database file.
    /// Defaults to `~/.local/share/geotrack/trackers.db`
    pub database_path: Option<PathBuf>,
    /// Base URL of the REST store.
    pub endpoint: Option<String>,
    /// Bearer token for the REST store.
    pub api_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Session identity configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the session identifier.
    /// Defaults to `$XDG_RUNTIME_DIR/geotrack`
    pub storage_dir: Option<PathBuf>,
}

/// Map service used for links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapProvider {
    /// `OpenStreetMap`.
    #[default]
    Osm,
    /// Google Maps.
    Google,
}

/// Presentation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Map service used for links.
    pub map_provider: MapProvider,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 15,
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            source: PositionSourceKind::Static,
            latitude: 0.0,
            longitude: 0.0,
            accuracy_m: 10.0,
            lookup_url: "https://ipapi.co/json/".to_string(),
            approximate_accuracy_m: 5_000.0,
            accuracy_mode: AccuracyMode::Balanced,
            timeout_secs: 10,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip_lookup_url: "https://api.ipify.org?format=json".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: SyncBackend::Sqlite,
            database_path: None, // Resolved at runtime
            endpoint: None,
            api_token: None,
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("GEOTRACK_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.update_interval_secs == 0 {
            return Err(Error::config_validation(
                "update_interval_secs must be greater than 0",
            ));
        }

        for (name, secs) in [
            ("position.timeout_secs", self.position.timeout_secs),
            ("network.timeout_secs", self.network.timeout_secs),
            ("sync.timeout_secs", self.sync.timeout_secs),
        ] {
            if secs == 0 {
                return Err(Error::config_validation(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.position.source == PositionSourceKind::Static {
            let (lat, lon) = (self.position.latitude, self.position.longitude);
            if !(-90.0..=90.0).contains(&lat) {
                return Err(Error::config_validation(format!(
                    "latitude ({lat}) must be between -90 and 90"
                )));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(Error::config_validation(format!(
                    "longitude ({lon}) must be between -180 and 180"
                )));
            }
            if self.position.accuracy_m.is_nan() || self.position.accuracy_m < 0.0 {
                return Err(Error::config_validation(
                    "accuracy_m must not be negative",
                ));
            }
        }

        if self.position.source == PositionSourceKind::Http {
            validate_url("position.lookup_url", &self.position.lookup_url)?;
        }
        validate_url("network.ip_lookup_url", &self.network.ip_lookup_url)?;

        if self.sync.backend == SyncBackend::Http {
            match &self.sync.endpoint {
                Some(endpoint) => validate_url("sync.endpoint", endpoint)?,
                None => {
                    return Err(Error::config_validation(
                        "sync.endpoint is required for the http backend",
                    ))
                }
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.sync
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the session storage directory, if one is available.
    ///
    /// Returns `None` when no per-session runtime directory exists on this
    /// platform; the session identity then lives in memory only.
    #[must_use]
    pub fn session_storage_dir(&self) -> Option<PathBuf> {
        self.session
            .storage_dir
            .clone()
            .or_else(|| dirs::runtime_dir().map(|dir| dir.join(DATA_DIR_NAME)))
    }

    /// Get the update interval as a Duration.
    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.update_interval_secs)
    }

    /// Get the position request timeout as a Duration.
    #[must_use]
    pub fn position_timeout(&self) -> Duration {
        Duration::from_secs(self.position.timeout_secs)
    }

    /// Get the address lookup timeout as a Duration.
    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    /// Get the remote store timeout as a Duration.
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout_secs)
    }
}

fn validate_url(name: &str, value: &str) -> Result<()> {
    reqwest::Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::config_validation(format!("{name} is not a valid URL ({value}): {e}")))
}
