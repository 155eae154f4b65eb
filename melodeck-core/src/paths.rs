//! Path constants for configuration, library and log files.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "melodeck";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the library database file
pub const LIBRARY_DB_FILE_NAME: &str = "library.db";

/// The name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "melodeck.log";

/// Get the configuration directory path (~/.config/melodeck/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/melodeck/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the library database path (`~/.config/melodeck/library.db`)
#[must_use]
pub fn library_db_path() -> PathBuf {
    config_dir().join(LIBRARY_DB_FILE_NAME)
}

/// Get the log file path (`~/.config/melodeck/melodeck.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    config_dir().join(LOG_FILE_NAME)
}
