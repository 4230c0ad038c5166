//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Confirmation policy applied to projects that do not override it
    #[serde(default)]
    pub defaults: RawProjectDefaults,

    /// Projects to register on startup
    #[serde(default)]
    pub projects: Vec<RawProject>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Scheduler tick period (default: 60)
    pub tick_interval_seconds: Option<u64>,

    /// Sessions processed in parallel within one tick (default: 4)
    pub max_concurrent_sessions: Option<usize>,

    /// Locale for guilds registered by this service (default: "ja")
    pub default_locale: Option<String>,

    /// Guild that configured projects belong to, unless a project names its own
    pub guild_id: Option<u64>,
}

/// Policy defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawProjectDefaults {
    /// Spacing between prompts (default: 1800)
    pub check_interval_seconds: Option<u64>,

    /// How long a prompt may go unanswered (default: 3600)
    pub default_timeout_seconds: Option<u64>,
}

/// Raw project definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawProject {
    pub name: String,

    pub description: Option<String>,

    /// Overrides `service.guild_id`
    pub guild_id: Option<u64>,

    pub check_interval_seconds: Option<u64>,

    pub default_timeout_seconds: Option<u64>,

    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    #[serde(default = "default_true")]
    pub require_modal: bool,
}

fn default_true() -> bool {
    true
}
