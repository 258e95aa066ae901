//! Configuration management for privbanner
//!
//! Handles loading and validation of privbanner.toml configuration files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::governor::GovernorKeys;
use crate::prefs::{MemoryPrefStore, PREF_BANNER_SHOWN, PREF_UI_ENABLED, PrefStore};
use crate::prefs_file::FilePrefStore;
use crate::prefs_sqlite::SqlitePrefStore;
use crate::telemetry::Platform;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PRIVBANNER_CONFIG";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Preference storage settings
    #[serde(default)]
    pub prefs: PrefsConfig,

    /// Banner pref keys
    #[serde(default)]
    pub banner: BannerConfig,

    /// Telemetry settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("privbanner")
}

/// Which pref store backs the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefsBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

impl fmt::Display for PrefsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Preference storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefsConfig {
    #[serde(default)]
    pub backend: PrefsBackend,

    /// Store path; defaults to `<data_dir>/prefs.toml` or `<data_dir>/prefs.db`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Banner pref keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannerConfig {
    #[serde(default = "default_enabled_pref")]
    pub enabled_pref: String,

    #[serde(default = "default_shown_pref")]
    pub shown_pref: String,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            enabled_pref: default_enabled_pref(),
            shown_pref: default_shown_pref(),
        }
    }
}

fn default_enabled_pref() -> String {
    PREF_UI_ENABLED.to_string()
}

fn default_shown_pref() -> String {
    PREF_BANNER_SHOWN.to_string()
}

impl BannerConfig {
    #[must_use]
    pub fn keys(&self) -> GovernorKeys {
        GovernorKeys {
            enabled: self.enabled_pref.clone(),
            shown: self.shown_pref.clone(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub platform: Platform,

    /// Record banner interactions as telemetry events
    #[serde(default = "default_true")]
    pub record_banner_events: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            record_banner_events: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Resolve the config file to load.
///
/// Order: explicit path, `PRIVBANNER_CONFIG`, then
/// `<config_dir>/privbanner/privbanner.toml` if it exists.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir()
        .map(|dir| dir.join("privbanner").join("privbanner.toml"))
        .filter(|path| path.exists())
}

impl Config {
    /// Load configuration from default locations, falling back to defaults.
    pub fn load() -> Result<Self> {
        match resolve_config_path(None) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let path_str = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path_str.clone())
            } else {
                ConfigError::ReadFailed(path_str.clone(), e.to_string())
            }
        })?;
        let config = Self::from_toml(&text)?;
        debug!(path = %path_str, "Config loaded");
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.banner.enabled_pref.trim().is_empty() {
            return Err(ConfigError::ValidationError("banner.enabled_pref is empty".into()).into());
        }
        if self.banner.shown_pref.trim().is_empty() {
            return Err(ConfigError::ValidationError("banner.shown_pref is empty".into()).into());
        }
        if self.banner.enabled_pref == self.banner.shown_pref {
            return Err(ConfigError::ValidationError(
                "banner.enabled_pref and banner.shown_pref must differ".into(),
            )
            .into());
        }
        if let Err(e) = self.general.log_level.parse::<crate::logging::LogLevel>() {
            return Err(ConfigError::ValidationError(e).into());
        }
        Ok(())
    }

    /// Path of the pref store for the configured backend.
    #[must_use]
    pub fn prefs_path(&self) -> PathBuf {
        if let Some(path) = &self.prefs.path {
            return path.clone();
        }
        let file = match self.prefs.backend {
            PrefsBackend::Sqlite => "prefs.db",
            PrefsBackend::File | PrefsBackend::Memory => "prefs.toml",
        };
        self.general.data_dir.join(file)
    }

    /// Open the configured pref store.
    pub fn open_prefs(&self) -> Result<Arc<dyn PrefStore>> {
        let store: Arc<dyn PrefStore> = match self.prefs.backend {
            PrefsBackend::Memory => Arc::new(MemoryPrefStore::new()),
            PrefsBackend::File => Arc::new(FilePrefStore::open(self.prefs_path())?),
            PrefsBackend::Sqlite => Arc::new(SqlitePrefStore::open(self.prefs_path())?),
        };
        debug!(backend = %self.prefs.backend, "Pref store opened");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, LogFormat::Pretty);
        assert_eq!(config.prefs.backend, PrefsBackend::File);
        assert_eq!(config.banner.keys(), GovernorKeys::default());
        assert!(config.telemetry.record_banner_events);
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_file() {
        let config = Config::from_toml(
            r#"
            [general]
            log_format = "json"
            data_dir = "/tmp/pb"

            [prefs]
            backend = "sqlite"

            [telemetry]
            platform = "android"
            "#,
        )
        .unwrap();
        assert_eq!(config.general.log_format, LogFormat::Json);
        assert_eq!(config.prefs.backend, PrefsBackend::Sqlite);
        assert_eq!(config.prefs_path(), PathBuf::from("/tmp/pb/prefs.db"));
        assert_eq!(config.telemetry.platform, Platform::Android);
        assert_eq!(config.banner.shown_pref, PREF_BANNER_SHOWN);
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = Config::from_toml("[prefs]\nbackend = \"redis\"\n").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn rejects_empty_pref_key() {
        let err = Config::from_toml("[banner]\nshown_pref = \"\"\n").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn rejects_bad_log_level() {
        assert!(Config::from_toml("[general]\nlog_level = \"loud\"\n").is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Config(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn load_from_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privbanner.toml");
        std::fs::write(&path, "[prefs]\nbackend = \"memory\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.prefs.backend, PrefsBackend::Memory);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn explicit_path_wins() {
        let path = PathBuf::from("/etc/privbanner.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }

    #[test]
    fn open_prefs_per_backend() {
        let dir = TempDir::new().unwrap();
        for backend in [PrefsBackend::File, PrefsBackend::Sqlite, PrefsBackend::Memory] {
            let mut config = Config::default();
            config.general.data_dir = dir.path().to_path_buf();
            config.prefs.backend = backend;
            let store = config.open_prefs().unwrap();
            store.set_int("k", 3).unwrap();
            assert_eq!(store.get_int("k", 0).unwrap(), 3, "backend {backend}");
        }
    }
}
