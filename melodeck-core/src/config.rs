use crate::error::{CoreError, Result};
use crate::protocol::Origin;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const LOG_TARGET: &str = "melodeck::config";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Highlight recomputations per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// "Previous" restarts the current song once playback is past this point
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold_secs: f64,
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

const fn default_frame_rate() -> u32 {
    60
}

const fn default_restart_threshold() -> f64 {
    5.0
}

const fn default_volume() -> u8 {
    crate::store::DEFAULT_VOLUME
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            restart_threshold_secs: default_restart_threshold(),
            default_volume: default_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Clock sample interval of the simulated output
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Duration used when a song record has none
    #[serde(default = "default_fallback_duration")]
    pub fallback_duration_secs: f64,
}

const fn default_tick_interval() -> u64 {
    250
}

const fn default_fallback_duration() -> f64 {
    180.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            fallback_duration_secs: default_fallback_duration(),
        }
    }
}

impl AudioConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Origin shared by the controller and player windows
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Upper bound on waiting for `playerReady`
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
}

fn default_origin() -> String {
    "http://localhost:8080".to_string()
}

const fn default_ready_timeout() -> u64 {
    5000
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            ready_timeout_ms: default_ready_timeout(),
        }
    }
}

impl WindowConfig {
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Parsed application origin
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOrigin`] if `origin` is not a valid URL origin.
    pub fn origin(&self) -> Result<Origin> {
        self.origin.parse()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Library database path; defaults to `~/.config/melodeck/library.db`
    pub database: Option<PathBuf>,
}

impl StorageConfig {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(crate::paths::library_db_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `~/.config/melodeck/melodeck.log`
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    /// Get the configuration directory path (~/.config/melodeck/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        crate::paths::config_dir()
    }

    /// Get the config file path (~/.config/melodeck/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default location, writing a template on first run
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed or validated.
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_at(&Self::config_path())
    }

    /// Load config from `path`, writing a template there if it is missing.
    ///
    /// A missing file is not an error: the template holds the defaults, so
    /// the defaults are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed or validated.
    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, CONFIG_TEMPLATE)?;
            info!(target: LOG_TARGET, "Wrote config template to {:?}", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate config text
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigParseError`] for malformed TOML and
    /// [`CoreError::ConfigInvalid`] for out-of-range values.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigInvalid`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.player.frame_rate == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "player.frame_rate must be at least 1".to_string(),
            });
        }
        if !self.player.restart_threshold_secs.is_finite() || self.player.restart_threshold_secs < 0.0 {
            return Err(CoreError::ConfigInvalid {
                message: "player.restart_threshold_secs must be a non-negative number".to_string(),
            });
        }
        if self.player.default_volume > 100 {
            return Err(CoreError::ConfigInvalid {
                message: "player.default_volume must be between 0 and 100".to_string(),
            });
        }
        if self.audio.tick_interval_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "audio.tick_interval_ms must be at least 1".to_string(),
            });
        }
        if !(self.audio.fallback_duration_secs.is_finite() && self.audio.fallback_duration_secs > 0.0) {
            return Err(CoreError::ConfigInvalid {
                message: "audio.fallback_duration_secs must be positive".to_string(),
            });
        }
        self.window.origin().map_err(|e| CoreError::ConfigInvalid {
            message: format!("window.origin: {e}"),
        })?;
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"# Melodeck Configuration
# ~/.config/melodeck/config.toml

[player]
# Highlight updates per second
frame_rate = 60
# "Previous" restarts the current song when it has played longer than this
restart_threshold_secs = 5.0
default_volume = 70

[audio]
tick_interval_ms = 250
# Used when a song has no stored duration
fallback_duration_secs = 180.0

[window]
# Messages between controller and player windows must carry this origin
origin = "http://localhost:8080"
ready_timeout_ms = 5000

[storage]
# database = "/path/to/library.db"

[logging]
# Also write logs to ~/.config/melodeck/melodeck.log
enabled = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config = Config::parse(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.player.frame_rate, 60);
        assert!((config.player.restart_threshold_secs - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.player.default_volume, 70);
        assert_eq!(config.audio.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.window.ready_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.window.origin().unwrap().as_str(),
            "http://localhost:8080"
        );
        assert!(config.storage.database.is_none());
        assert!(!config.logging.enabled);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse("[logging]\nenabled = true\n").unwrap();
        assert!(config.logging.enabled);
        assert_eq!(config.player.frame_rate, 60);
    }

    #[test]
    fn test_zero_frame_rate_rejected() {
        let err = Config::parse("[player]\nframe_rate = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_bad_origin_rejected() {
        let err = Config::parse("[window]\norigin = \"not a url\"\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::parse("[player\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParseError(_)));
    }

    #[test]
    fn test_missing_file_writes_template() {
        let dir = std::env::temp_dir().join(format!("melodeck-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = fs::remove_file(&path);

        let config = Config::load_or_create_at(&path).unwrap();
        assert_eq!(config.player.frame_rate, 60);
        assert_eq!(fs::read_to_string(&path).unwrap(), CONFIG_TEMPLATE);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_storage_database_path() {
        let storage = StorageConfig {
            database: Some(PathBuf::from("/tmp/songs.db")),
        };
        assert_eq!(storage.database_path(), PathBuf::from("/tmp/songs.db"));
        assert!(StorageConfig::default()
            .database_path()
            .ends_with("melodeck/library.db"));
    }
}
