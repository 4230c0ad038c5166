//! Audit event types

use chrono::{DateTime, Utc};
use clockin_model::SessionStatus;
use clockin_util::{ConfirmationId, ProjectId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configured projects written to the store
    ProjectsSynced { created: usize, updated: usize },

    /// Session started
    SessionStarted {
        session_id: SessionId,
        user_id: UserId,
        project_id: Option<ProjectId>,
    },

    /// Session ended, manually or by the scheduler
    SessionEnded {
        session_id: SessionId,
        status: SessionStatus,
        summary: Option<String>,
        worked: Duration,
    },

    /// Confirmation prompt created for a session
    PromptIssued {
        session_id: SessionId,
        confirmation_id: ConfirmationId,
    },

    /// User answered a prompt
    ConfirmationResponded {
        session_id: SessionId,
        confirmation_id: ConfirmationId,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, clockin_util::now())
    }

    /// Event stamped with an explicit time (scheduler ticks carry their own `now`)
    pub fn at(event: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
