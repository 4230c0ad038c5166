//! Configuration parsing and validation for clockind
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Service settings (tick period, concurrency, locale, paths)
//! - Project definitions with confirmation policies
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Config::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use clockin_model::Locale;
    use clockin_util::GuildRef;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1

            [service]
            guild_id = 1234

            [[projects]]
            name = "backend"
        "#;

        let config = parse_config(config).unwrap();
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].name, "backend");
        assert!(config.projects[0].policy.require_confirmation);
        assert!(config.get_project(GuildRef::new(1234), "backend").is_some());
    }

    #[test]
    fn legacy_log_dir_key_is_ignored() {
        let config = r#"
            config_version = 1

            [service]
            guild_id = 1234
            log_dir = "/var/log/clockin"
            data_dir = "/var/lib/clockin"
        "#;

        let config = parse_config(config).unwrap();
        assert_eq!(config.service.data_dir, std::path::PathBuf::from("/var/lib/clockin"));
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [service]
            data_dir = "/var/lib/clockin"
            tick_interval_seconds = 30
            max_concurrent_sessions = 8
            default_locale = "en"
            guild_id = 1

            [defaults]
            check_interval_seconds = 1200
            default_timeout_seconds = 600

            [[projects]]
            name = "backend"
            description = "API work"

            [[projects]]
            name = "support"
            guild_id = 2
            check_interval_seconds = 3600
            require_confirmation = false
            require_modal = false
        "#;

        let config = parse_config(config).unwrap();
        assert_eq!(config.service.tick_interval, Duration::from_secs(30));
        assert_eq!(config.service.max_concurrent_sessions, 8);
        assert_eq!(config.service.default_locale, Locale::En);
        assert_eq!(
            config.service.data_dir,
            std::path::PathBuf::from("/var/lib/clockin")
        );

        let backend = &config.projects[0];
        assert_eq!(backend.description.as_deref(), Some("API work"));
        assert_eq!(backend.policy.check_interval, Duration::from_secs(1200));
        assert_eq!(backend.policy.default_timeout, Duration::from_secs(600));

        let support = &config.projects[1];
        assert_eq!(support.guild, GuildRef::new(2));
        assert_eq!(support.policy.check_interval, Duration::from_secs(3600));
        assert_eq!(support.policy.default_timeout, Duration::from_secs(600));
        assert!(!support.policy.require_confirmation);
    }

    #[test]
    fn reject_wrong_version() {
        let config = r#"
            config_version = 99
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_config() {
        let config = r#"
            config_version = 1

            [service]
            guild_id = 1
            tick_interval_seconds = 0

            [[projects]]
            name = "backend"

            [[projects]]
            name = "backend"
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "config_version = 1").unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.projects.is_empty());
        assert_eq!(config.defaults.check_interval, Duration::from_secs(1800));
        assert_eq!(config.defaults.default_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
