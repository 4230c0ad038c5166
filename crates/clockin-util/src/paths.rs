//! Default paths for clockin components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/clockin/config.toml` or `~/.config/clockin/config.toml`
//! - Data: `$XDG_DATA_HOME/clockin` or `~/.local/share/clockin`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const CLOCKIN_CONFIG_ENV: &str = "CLOCKIN_CONFIG";

/// Environment variable for overriding the data directory
pub const CLOCKIN_DATA_DIR_ENV: &str = "CLOCKIN_DATA_DIR";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "clockin.db";

/// Application subdirectory name
const APP_DIR: &str = "clockin";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$CLOCKIN_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/clockin/config.toml`
/// 3. `~/.config/clockin/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CLOCKIN_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    xdg_dir("XDG_CONFIG_HOME", &[".config"], "config")
        .join("config.toml")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$CLOCKIN_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/clockin`
/// 3. `~/.local/share/clockin`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(CLOCKIN_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking `CLOCKIN_DATA_DIR`.
/// Used for config defaults where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"], "data")
}

fn xdg_dir(xdg_var: &str, home_fallback: &[&str], last_resort: &str) -> PathBuf {
    if let Ok(base) = std::env::var(xdg_var) {
        return PathBuf::from(base).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        let mut path = PathBuf::from(home);
        path.extend(home_fallback);
        return path.join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join(last_resort)
}
