//! Shared types for clockin

use chrono::{DateTime, Utc};
use clockin_util::{
    ChannelRef, ConfirmationId, GuildRef, MessageRef, ProjectId, SessionId, UserId, UserRef,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How a session was ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Ended by the user (or still open)
    #[default]
    Manual,
    /// Ended by the scheduler after an unanswered prompt
    Auto,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Manual => "manual",
            SessionStatus::Auto => "auto",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SessionStatus::Manual),
            "auto" => Ok(SessionStatus::Auto),
            other => Err(ParseEnumError {
                kind: "session status",
                value: other.to_string(),
            }),
        }
    }
}

/// Display language for prompts sent to a guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Ja => "ja",
            Locale::En => "en",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ja" => Ok(Locale::Ja),
            "en" => Ok(Locale::En),
            other => Err(ParseEnumError {
                kind: "locale",
                value: other.to_string(),
            }),
        }
    }
}

/// One attendance period for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_summary: Option<String>,
    /// Only meaningful once `end_time` is set
    pub status: SessionStatus,
    /// Announcement posted when work started; annotated when the session ends
    pub start_message: Option<MessageRef>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Worked time, counting an open session up to `now`
    pub fn worked(&self, now: DateTime<Utc>) -> Duration {
        clockin_util::elapsed_between(self.start_time, self.end_time.unwrap_or(now))
    }
}

/// A liveness prompt and its response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: ConfirmationId,
    pub session_id: SessionId,
    pub prompt_time: DateTime<Utc>,
    pub responded: bool,
    pub response_time: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Delivered prompt message, kept for cleanup
    pub message: Option<MessageRef>,
}

impl Confirmation {
    pub fn is_outstanding(&self) -> bool {
        !self.responded
    }
}

/// Per-project confirmation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPolicy {
    /// Spacing between prompts while responses are timely
    pub check_interval: Duration,
    /// How long a prompt may stay unanswered before the session is auto-ended
    pub default_timeout: Duration,
    /// Whether the scheduler manages sessions of this project at all
    pub require_confirmation: bool,
    /// Whether ending work or answering a prompt asks for a summary
    pub require_modal: bool,
}

impl ProjectPolicy {
    pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1800);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

    /// True when a prompt could time out only after the next one is already due
    pub fn timeout_exceeds_interval(&self) -> bool {
        self.default_timeout > self.check_interval
    }
}

impl Default for ProjectPolicy {
    fn default() -> Self {
        Self {
            check_interval: Self::DEFAULT_CHECK_INTERVAL,
            default_timeout: Self::DEFAULT_TIMEOUT,
            require_confirmation: true,
            require_modal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub guild: GuildRef,
    pub name: String,
    pub description: Option<String>,
    pub policy: ProjectPolicy,
    pub is_archived: bool,
}

/// Input for creating a project
#[derive(Debug, Clone)]
pub struct NewProject {
    pub guild: GuildRef,
    pub name: String,
    pub description: Option<String>,
    pub policy: ProjectPolicy,
}

/// A user registered in a guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub guild: GuildRef,
    pub user: UserRef,
    pub name: String,
}

/// The private channel a user's attendance is tracked in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub user_id: UserId,
    pub channel: ChannelRef,
    /// Pinned live status display
    pub status_message: MessageRef,
}

/// An active session that the scheduler must evaluate, joined with the
/// project policy and everything needed to deliver a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCandidate {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub start_time: DateTime<Utc>,
    pub start_message: Option<MessageRef>,
    pub policy: ProjectPolicy,
    pub guild: GuildRef,
    pub user: UserRef,
    pub locale: Locale,
    /// None when the user has no channel mapping; prompts cannot be delivered
    pub channel: Option<ChannelRef>,
    pub status_message: Option<MessageRef>,
}
