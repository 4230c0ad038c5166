//! Validated configuration structures

use crate::schema::{RawConfig, RawProject, RawProjectDefaults, RawServiceConfig};
use clockin_model::{Locale, ProjectPolicy};
use clockin_util::{GuildRef, default_data_dir};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Validated configuration ready for use by the service
#[derive(Debug, Clone)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Policy for projects that do not override intervals
    pub defaults: ProjectPolicy,

    /// Projects to register on startup
    pub projects: Vec<ProjectDefinition>,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let defaults = convert_defaults(&raw.defaults);
        let fallback_guild = raw.service.guild_id;

        let projects = raw
            .projects
            .into_iter()
            .filter_map(|p| ProjectDefinition::from_raw(p, &defaults, fallback_guild))
            .collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            defaults,
            projects,
        }
    }

    /// Get project by name
    pub fn get_project(&self, guild: GuildRef, name: &str) -> Option<&ProjectDefinition> {
        self.projects
            .iter()
            .find(|p| p.guild == guild && p.name == name)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
    pub max_concurrent_sessions: usize,
    pub default_locale: Locale,
}

impl ServiceConfig {
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 4;

    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
            tick_interval: raw
                .tick_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_TICK_INTERVAL),
            max_concurrent_sessions: raw
                .max_concurrent_sessions
                .unwrap_or(Self::DEFAULT_MAX_CONCURRENT_SESSIONS),
            default_locale: raw
                .default_locale
                .and_then(|l| l.parse().ok())
                .unwrap_or_default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Validated project definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDefinition {
    pub guild: GuildRef,
    pub name: String,
    pub description: Option<String>,
    pub policy: ProjectPolicy,
}

impl ProjectDefinition {
    fn from_raw(
        raw: RawProject,
        defaults: &ProjectPolicy,
        fallback_guild: Option<u64>,
    ) -> Option<Self> {
        // Validation rejects projects without a guild
        let guild = GuildRef::new(raw.guild_id.or(fallback_guild)?);

        let policy = clamp_timeout(
            &raw.name,
            ProjectPolicy {
                check_interval: raw
                    .check_interval_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.check_interval),
                default_timeout: raw
                    .default_timeout_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.default_timeout),
                require_confirmation: raw.require_confirmation,
                require_modal: raw.require_modal,
            },
        );

        Some(Self {
            guild,
            name: raw.name.trim().to_string(),
            description: raw.description,
            policy,
        })
    }
}

fn convert_defaults(raw: &RawProjectDefaults) -> ProjectPolicy {
    ProjectPolicy {
        check_interval: raw
            .check_interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(ProjectPolicy::DEFAULT_CHECK_INTERVAL),
        default_timeout: raw
            .default_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(ProjectPolicy::DEFAULT_TIMEOUT),
        ..ProjectPolicy::default()
    }
}

/// Keep `default_timeout` within `check_interval`.
fn clamp_timeout(project: &str, policy: ProjectPolicy) -> ProjectPolicy {
    if !policy.timeout_exceeds_interval() {
        return policy;
    }

    warn!(
        project = %project,
        default_timeout_secs = policy.default_timeout.as_secs(),
        check_interval_secs = policy.check_interval.as_secs(),
        "default_timeout exceeds check_interval, clamping"
    );

    ProjectPolicy {
        default_timeout: policy.check_interval,
        ..policy
    }
}
