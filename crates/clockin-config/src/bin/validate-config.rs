//! Config validation CLI tool
//!
//! Validates a clockind configuration file and reports any errors.

use clockin_util::{default_config_path, format_duration_hms};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a clockind configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match clockin_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", clockin_config::CURRENT_CONFIG_VERSION);
            println!("  Tick interval: {}s", config.service.tick_interval.as_secs());
            println!("  Locale: {}", config.service.default_locale);
            println!("  Projects: {}", config.projects.len());

            if !config.projects.is_empty() {
                println!();
                println!("Projects:");
                for project in &config.projects {
                    let checks = if project.policy.require_confirmation {
                        format!(
                            "check every {}, timeout {}",
                            format_duration_hms(project.policy.check_interval),
                            format_duration_hms(project.policy.default_timeout)
                        )
                    } else {
                        "no confirmation".to_string()
                    };
                    println!("  - {} [guild {}]: {}", project.name, project.guild, checks);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                clockin_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                clockin_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                clockin_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                clockin_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        clockin_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
