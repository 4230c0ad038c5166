//! Configuration validation

use crate::schema::{RawConfig, RawProject};
use clockin_model::Locale;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Project '{project}': {message}")]
    ProjectError { project: String, message: String },

    #[error("Duplicate project name: {0}")]
    DuplicateProjectName(String),

    #[error("Unknown locale '{0}' (expected \"ja\" or \"en\")")]
    UnknownLocale(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let service = &config.service;

    if service.tick_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "tick_interval_seconds must be positive".into(),
        ));
    }

    if service.max_concurrent_sessions == Some(0) {
        errors.push(ValidationError::GlobalError(
            "max_concurrent_sessions must be positive".into(),
        ));
    }

    if let Some(locale) = &service.default_locale
        && locale.parse::<Locale>().is_err()
    {
        errors.push(ValidationError::UnknownLocale(locale.clone()));
    }

    if config.defaults.check_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "defaults.check_interval_seconds must be positive".into(),
        ));
    }

    if config.defaults.default_timeout_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "defaults.default_timeout_seconds must be positive".into(),
        ));
    }

    // Names are unique per guild
    let mut seen = HashSet::new();
    for project in &config.projects {
        let guild = project.guild_id.or(service.guild_id);
        if !seen.insert((guild, project.name.trim())) {
            errors.push(ValidationError::DuplicateProjectName(project.name.clone()));
        }
    }

    for project in &config.projects {
        errors.extend(validate_project(project, config));
    }

    errors
}

fn validate_project(project: &RawProject, config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut error = |message: &str| {
        errors.push(ValidationError::ProjectError {
            project: project.name.clone(),
            message: message.into(),
        })
    };

    if project.name.trim().is_empty() {
        error("name cannot be empty");
    }

    if project.guild_id.or(config.service.guild_id).is_none() {
        error("no guild_id (set it on the project or in [service])");
    }

    if project.check_interval_seconds == Some(0) {
        error("check_interval_seconds must be positive");
    }

    if project.default_timeout_seconds == Some(0) {
        error("default_timeout_seconds must be positive");
    }

    errors
}
