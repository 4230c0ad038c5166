//! Interactive attendance actions
//!
//! These run concurrently with the scheduler. Like the processor, every
//! transition is a conditional write and a lost race is reported, not raised.

use chrono::{DateTime, Utc};
use clockin_config::ProjectDefinition;
use clockin_model::{
    AUTO_END_NEW_SESSION, CONFIRMED_WITHOUT_SUMMARY, Confirmation, Locale, NewProject, Session,
    SessionStatus,
};
use clockin_store::{AuditEvent, AuditEventType, Store};
use clockin_util::{ProjectId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{CoreError, CoreResult};

/// Bounds for history queries
pub const HISTORY_LIMIT_MAX: usize = 50;

/// Result of starting work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedWork {
    pub session: Session,
    /// Session that was still open and got ended to make room
    pub replaced: Option<Session>,
}

/// Result of ending work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    Ended {
        session: Session,
        /// Prompts left unanswered; their messages can be removed
        stale_prompts: Vec<Confirmation>,
    },
    /// No active session, or another actor ended it first
    NotWorking,
}

/// Result of answering a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed(Confirmation),
    NothingPending,
}

/// One line of a day summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLine {
    pub session: Session,
    pub worked: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySummary {
    pub sessions: Vec<SessionLine>,
    pub total: Duration,
}

/// Counts from writing configured projects to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSync {
    pub created: usize,
    pub updated: usize,
}

/// User-driven session actions
pub struct AttendanceService {
    store: Arc<dyn Store>,
}

impl AttendanceService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Start a session, ending any session the user still has open
    pub fn start_work(
        &self,
        user_id: UserId,
        project_id: Option<ProjectId>,
        now: DateTime<Utc>,
    ) -> CoreResult<StartedWork> {
        if let Some(id) = project_id
            && self.store.get_project(id)?.is_none()
        {
            return Err(CoreError::ProjectNotFound(id));
        }

        let mut replaced = None;
        if let Some(active) = self.store.get_active_session(user_id)? {
            let changed = self.store.end_session(
                active.id,
                Some(AUTO_END_NEW_SESSION),
                SessionStatus::Manual,
                now,
            )?;
            if changed == 1 {
                info!(session_id = %active.id, user_id = %user_id, "Previous session ended for new start");
                replaced = self.store.get_session(active.id)?;
                if let Some(ended) = &replaced {
                    self.audit_end(ended, now);
                }
            } else {
                debug!(session_id = %active.id, "Previous session already ended");
            }
        }

        let session = self.store.start_session(user_id, project_id, now)?;
        info!(session_id = %session.id, user_id = %user_id, "Work started");
        self.audit(
            AuditEventType::SessionStarted {
                session_id: session.id,
                user_id,
                project_id,
            },
            now,
        );

        Ok(StartedWork { session, replaced })
    }

    /// End the user's active session
    pub fn end_work(
        &self,
        user_id: UserId,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<EndOutcome> {
        let Some(active) = self.store.get_active_session(user_id)? else {
            return Ok(EndOutcome::NotWorking);
        };

        let changed = self
            .store
            .end_session(active.id, summary, SessionStatus::Manual, now)?;
        if changed == 0 {
            debug!(session_id = %active.id, "End work lost race; session already ended");
            return Ok(EndOutcome::NotWorking);
        }

        let session = self
            .store
            .get_session(active.id)?
            .ok_or(CoreError::SessionVanished(active.id))?;
        let stale_prompts = self.store.get_outstanding_confirmations(active.id)?;

        info!(
            session_id = %session.id,
            worked = %clockin_util::format_duration_hms(session.worked(now)),
            "Work ended"
        );
        self.audit_end(&session, now);

        Ok(EndOutcome::Ended {
            session,
            stale_prompts,
        })
    }

    /// Answer the user's outstanding prompt
    pub fn confirm(
        &self,
        user_id: UserId,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<ConfirmOutcome> {
        let Some(active) = self.store.get_active_session(user_id)? else {
            return Ok(ConfirmOutcome::NothingPending);
        };
        let Some(pending) = self.store.get_outstanding_confirmation(active.id)? else {
            return Ok(ConfirmOutcome::NothingPending);
        };

        let summary = summary
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(CONFIRMED_WITHOUT_SUMMARY);
        let changed = self
            .store
            .respond_to_confirmation(pending.id, Some(summary), now)?;
        if changed == 0 {
            debug!(confirmation_id = %pending.id, "Confirmation already answered");
            return Ok(ConfirmOutcome::NothingPending);
        }

        info!(session_id = %active.id, confirmation_id = %pending.id, "Confirmation answered");
        self.audit(
            AuditEventType::ConfirmationResponded {
                session_id: active.id,
                confirmation_id: pending.id,
            },
            now,
        );

        Ok(self
            .store
            .get_confirmation(pending.id)?
            .map(ConfirmOutcome::Confirmed)
            .unwrap_or(ConfirmOutcome::NothingPending))
    }

    /// Sessions started on `now`'s UTC day, open ones counted up to `now`
    pub fn today_summary(&self, user_id: UserId, now: DateTime<Utc>) -> CoreResult<DaySummary> {
        let from = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        let to = from + chrono::Duration::days(1);

        let sessions: Vec<SessionLine> = self
            .store
            .get_sessions_between(user_id, from, to)?
            .into_iter()
            .map(|session| SessionLine {
                worked: session.worked(now),
                session,
            })
            .collect();
        let total = sessions.iter().map(|line| line.worked).sum();

        Ok(DaySummary { sessions, total })
    }

    /// Most recent sessions, newest first. `limit` is clamped to 1..=50.
    pub fn recent_sessions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> CoreResult<Vec<Session>> {
        let limit = limit.clamp(1, HISTORY_LIMIT_MAX);
        Ok(self.store.get_recent_sessions(user_id, limit, offset)?)
    }

    /// Create configured projects that are missing and refresh the policy of
    /// those that exist
    pub fn sync_projects(
        &self,
        projects: &[ProjectDefinition],
        locale: Locale,
    ) -> CoreResult<ProjectSync> {
        let mut sync = ProjectSync::default();
        let mut guilds = HashSet::new();

        for project in projects {
            if guilds.insert(project.guild) && self.store.get_guild_locale(project.guild)?.is_none()
            {
                self.store.upsert_guild(project.guild, locale)?;
            }

            match self.store.find_project(project.guild, &project.name)? {
                Some(existing) => {
                    if existing.policy != project.policy
                        || existing.description != project.description
                    {
                        self.store.update_project(
                            existing.id,
                            project.description.as_deref(),
                            &project.policy,
                        )?;
                        sync.updated += 1;
                    }
                }
                None => {
                    self.store.create_project(&NewProject {
                        guild: project.guild,
                        name: project.name.clone(),
                        description: project.description.clone(),
                        policy: project.policy,
                    })?;
                    sync.created += 1;
                }
            }
        }

        if sync.created > 0 || sync.updated > 0 {
            info!(created = sync.created, updated = sync.updated, "Projects synced");
            self.audit(
                AuditEventType::ProjectsSynced {
                    created: sync.created,
                    updated: sync.updated,
                },
                clockin_util::now(),
            );
        }

        Ok(sync)
    }

    fn audit_end(&self, session: &Session, now: DateTime<Utc>) {
        self.audit(
            AuditEventType::SessionEnded {
                session_id: session.id,
                status: session.status,
                summary: session.end_summary.clone(),
                worked: session.worked(now),
            },
            now,
        );
    }

    fn audit(&self, event: AuditEventType, now: DateTime<Utc>) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, now)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}
