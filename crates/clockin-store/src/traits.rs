//! Store trait definitions

use chrono::{DateTime, Utc};
use clockin_model::{
    ChannelMapping, Confirmation, Locale, NewProject, Project, ProjectPolicy, Session,
    SessionCandidate, SessionStatus, UserRecord,
};
use clockin_util::{ConfirmationId, GuildRef, MessageRef, ProjectId, SessionId, UserId, UserRef};

use crate::{AuditEvent, StoreResult};

/// Main store trait
///
/// Every state transition the scheduler races on is a conditional write:
/// the returned row count (or `None`) tells the caller whether it won.
pub trait Store: Send + Sync {
    // Guilds and users

    /// Register a guild, or update its display locale
    fn upsert_guild(&self, guild: GuildRef, locale: Locale) -> StoreResult<()>;

    fn get_guild_locale(&self, guild: GuildRef) -> StoreResult<Option<Locale>>;

    /// Register a user in a guild, or refresh their display name
    fn upsert_user(&self, guild: GuildRef, user: UserRef, name: &str) -> StoreResult<UserRecord>;

    fn get_user(&self, guild: GuildRef, user: UserRef) -> StoreResult<Option<UserRecord>>;

    fn set_channel_mapping(&self, mapping: &ChannelMapping) -> StoreResult<()>;

    fn get_channel_mapping(&self, user_id: UserId) -> StoreResult<Option<ChannelMapping>>;

    // Projects

    fn create_project(&self, project: &NewProject) -> StoreResult<Project>;

    fn get_project(&self, id: ProjectId) -> StoreResult<Option<Project>>;

    /// Look up a non-archived project by name within a guild
    fn find_project(&self, guild: GuildRef, name: &str) -> StoreResult<Option<Project>>;

    fn list_projects(&self, guild: GuildRef, include_archived: bool) -> StoreResult<Vec<Project>>;

    /// Replace a project's description and policy. Returns false if the project does not exist.
    fn update_project(
        &self,
        id: ProjectId,
        description: Option<&str>,
        policy: &ProjectPolicy,
    ) -> StoreResult<bool>;

    // Sessions

    /// Open a session. Fails with `StoreError::Conflict` if the user already
    /// has an active one.
    fn start_session(
        &self,
        user_id: UserId,
        project_id: Option<ProjectId>,
        now: DateTime<Utc>,
    ) -> StoreResult<Session>;

    fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    fn get_active_session(&self, user_id: UserId) -> StoreResult<Option<Session>>;

    /// End a session only if it is still active.
    ///
    /// Returns the number of rows changed: 1 for the writer that ended the
    /// session, 0 for everyone else.
    fn end_session(
        &self,
        id: SessionId,
        summary: Option<&str>,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Remember the announcement posted when the session started
    fn set_start_message(&self, id: SessionId, message: MessageRef) -> StoreResult<()>;

    /// Sessions of a user that started in `[from, to)`, oldest first
    fn get_sessions_between(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;

    /// Most recent sessions of a user, newest first
    fn get_recent_sessions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Session>>;

    /// Active sessions whose project requires confirmation, joined with the
    /// policy, guild locale, and channel mapping
    fn get_active_sessions_requiring_confirmation(&self) -> StoreResult<Vec<SessionCandidate>>;

    // Confirmations

    /// Create a prompt only if the session is active and has no outstanding
    /// prompt. Returns `None` when either condition fails.
    fn create_confirmation(
        &self,
        session_id: SessionId,
        prompt_time: DateTime<Utc>,
    ) -> StoreResult<Option<ConfirmationId>>;

    fn record_confirmation_message_ref(
        &self,
        id: ConfirmationId,
        message: MessageRef,
    ) -> StoreResult<()>;

    /// Mark a prompt answered only if it is still outstanding. Returns rows changed.
    fn respond_to_confirmation(
        &self,
        id: ConfirmationId,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;

    fn get_confirmation(&self, id: ConfirmationId) -> StoreResult<Option<Confirmation>>;

    /// Outstanding prompts for a session, latest first
    fn get_outstanding_confirmations(&self, session_id: SessionId)
    -> StoreResult<Vec<Confirmation>>;

    /// Latest outstanding prompt for a session
    fn get_outstanding_confirmation(
        &self,
        session_id: SessionId,
    ) -> StoreResult<Option<Confirmation>> {
        Ok(self
            .get_outstanding_confirmations(session_id)?
            .into_iter()
            .next())
    }

    /// Full prompt history for a session, oldest first
    fn get_session_confirmations(&self, session_id: SessionId) -> StoreResult<Vec<Confirmation>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
