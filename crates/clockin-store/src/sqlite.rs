//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use clockin_model::{
    ChannelMapping, Confirmation, Locale, NewProject, Project, ProjectPolicy, Session,
    SessionCandidate, SessionStatus, UserRecord,
};
use clockin_util::{
    ChannelRef, ConfirmationId, GuildRef, MessageRef, ProjectId, SessionId, UserId, UserRef,
    format_timestamp, parse_timestamp,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{AuditEvent, Store, StoreError, StoreResult};

const SESSION_COLUMNS: &str =
    "id, user_id, project_id, start_time, end_time, end_summary, status, start_message_ref";

const CONFIRMATION_COLUMNS: &str =
    "id, session_id, prompt_time, responded, response_time, summary, message_ref";

const PROJECT_COLUMNS: &str = "id, guild_id, name, description, check_interval, default_timeout, \
     require_confirmation, require_modal, is_archived";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS guilds (
                guild_id INTEGER PRIMARY KEY,
                locale TEXT NOT NULL DEFAULT 'ja',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL REFERENCES guilds(guild_id) ON DELETE CASCADE,
                user_ref INTEGER NOT NULL,
                user_name TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                UNIQUE (guild_id, user_ref)
            );

            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL REFERENCES guilds(guild_id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                check_interval INTEGER NOT NULL DEFAULT 1800,
                default_timeout INTEGER NOT NULL DEFAULT 3600,
                require_confirmation INTEGER NOT NULL DEFAULT 1,
                require_modal INTEGER NOT NULL DEFAULT 1,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- One private channel per user, with its pinned status message
            CREATE TABLE IF NOT EXISTS channel_mappings (
                user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                channel_ref INTEGER NOT NULL,
                status_message_ref INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                project_id INTEGER REFERENCES projects(id),
                start_time TEXT NOT NULL,
                end_time TEXT,
                end_summary TEXT,
                status TEXT NOT NULL DEFAULT 'manual' CHECK (status IN ('manual', 'auto')),
                start_message_ref INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS confirmations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                prompt_time TEXT NOT NULL,
                responded INTEGER NOT NULL DEFAULT 0,
                response_time TEXT,
                summary TEXT,
                message_ref INTEGER,
                created_at TEXT NOT NULL
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- At most one active session per user
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
                ON sessions(user_id) WHERE end_time IS NULL;

            -- At most one outstanding prompt per session
            CREATE UNIQUE INDEX IF NOT EXISTS idx_confirmations_one_outstanding
                ON confirmations(session_id) WHERE responded = 0;

            CREATE INDEX IF NOT EXISTS idx_sessions_user_start ON sessions(user_id, start_time);
            CREATE INDEX IF NOT EXISTS idx_confirmations_session ON confirmations(session_id);
            CREATE INDEX IF NOT EXISTS idx_projects_guild ON projects(guild_id);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

#[derive(Debug, Error)]
#[error("unparseable timestamp: {0}")]
struct InvalidTimestamp(String);

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, InvalidTimestamp(raw)))
}

fn opt_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, InvalidTimestamp(raw))))
        .transpose()
}

fn seconds_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Duration> {
    let secs: i64 = row.get(idx)?;
    Ok(Duration::from_secs(secs.max(0) as u64))
}

fn opt_message_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<MessageRef>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(MessageRef::from_sql))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(6)?;
    Ok(Session {
        id: SessionId::new(row.get(0)?),
        user_id: UserId::new(row.get(1)?),
        project_id: row.get::<_, Option<i64>>(2)?.map(ProjectId::new),
        start_time: timestamp_at(row, 3)?,
        end_time: opt_timestamp_at(row, 4)?,
        end_summary: row.get(5)?,
        status: status.parse().map_err(|e| conversion_error(6, e))?,
        start_message: opt_message_at(row, 7)?,
    })
}

fn confirmation_from_row(row: &Row<'_>) -> rusqlite::Result<Confirmation> {
    Ok(Confirmation {
        id: ConfirmationId::new(row.get(0)?),
        session_id: SessionId::new(row.get(1)?),
        prompt_time: timestamp_at(row, 2)?,
        responded: row.get(3)?,
        response_time: opt_timestamp_at(row, 4)?,
        summary: row.get(5)?,
        message: opt_message_at(row, 6)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId::new(row.get(0)?),
        guild: GuildRef::from_sql(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        policy: ProjectPolicy {
            check_interval: seconds_at(row, 4)?,
            default_timeout: seconds_at(row, 5)?,
            require_confirmation: row.get(6)?,
            require_modal: row.get(7)?,
        },
        is_archived: row.get(8)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId::new(row.get(0)?),
        guild: GuildRef::from_sql(row.get(1)?),
        user: UserRef::from_sql(row.get(2)?),
        name: row.get(3)?,
    })
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<SessionCandidate> {
    let locale: String = row.get(11)?;
    let locale = locale.parse::<Locale>().unwrap_or_else(|_| {
        warn!(locale = %locale, "Unknown guild locale, using default");
        Locale::default()
    });

    Ok(SessionCandidate {
        session_id: SessionId::new(row.get(0)?),
        user_id: UserId::new(row.get(1)?),
        project_id: ProjectId::new(row.get(2)?),
        start_time: timestamp_at(row, 3)?,
        start_message: opt_message_at(row, 4)?,
        policy: ProjectPolicy {
            check_interval: seconds_at(row, 5)?,
            default_timeout: seconds_at(row, 6)?,
            require_confirmation: row.get(7)?,
            require_modal: row.get(8)?,
        },
        guild: GuildRef::from_sql(row.get(9)?),
        user: UserRef::from_sql(row.get(10)?),
        locale,
        channel: row.get::<_, Option<i64>>(12)?.map(ChannelRef::from_sql),
        status_message: opt_message_at(row, 13)?,
    })
}

fn policy_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

impl Store for SqliteStore {
    fn upsert_guild(&self, guild: GuildRef, locale: Locale) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO guilds (guild_id, locale, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(guild_id)
            DO UPDATE SET locale = excluded.locale
            "#,
            params![
                guild.to_sql(),
                locale.as_str(),
                format_timestamp(&clockin_util::now())
            ],
        )?;

        debug!(guild = %guild, locale = %locale, "Guild upserted");
        Ok(())
    }

    fn get_guild_locale(&self, guild: GuildRef) -> StoreResult<Option<Locale>> {
        let conn = self.conn()?;
        let locale: Option<String> = conn
            .query_row(
                "SELECT locale FROM guilds WHERE guild_id = ?",
                [guild.to_sql()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(locale.map(|l| l.parse().unwrap_or_default()))
    }

    fn upsert_user(&self, guild: GuildRef, user: UserRef, name: &str) -> StoreResult<UserRecord> {
        let conn = self.conn()?;
        let record = conn.query_row(
            r#"
            INSERT INTO users (guild_id, user_ref, user_name, joined_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(guild_id, user_ref)
            DO UPDATE SET user_name = excluded.user_name
            RETURNING id, guild_id, user_ref, user_name
            "#,
            params![
                guild.to_sql(),
                user.to_sql(),
                name,
                format_timestamp(&clockin_util::now())
            ],
            user_from_row,
        )?;

        debug!(user_id = %record.id, guild = %guild, "User upserted");
        Ok(record)
    }

    fn get_user(&self, guild: GuildRef, user: UserRef) -> StoreResult<Option<UserRecord>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, guild_id, user_ref, user_name FROM users \
                 WHERE guild_id = ? AND user_ref = ?",
                params![guild.to_sql(), user.to_sql()],
                user_from_row,
            )
            .optional()?)
    }

    fn set_channel_mapping(&self, mapping: &ChannelMapping) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO channel_mappings (user_id, channel_ref, status_message_ref, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id)
            DO UPDATE SET channel_ref = excluded.channel_ref,
                          status_message_ref = excluded.status_message_ref
            "#,
            params![
                mapping.user_id.get(),
                mapping.channel.to_sql(),
                mapping.status_message.to_sql(),
                format_timestamp(&clockin_util::now())
            ],
        )?;

        debug!(user_id = %mapping.user_id, channel = %mapping.channel, "Channel mapping set");
        Ok(())
    }

    fn get_channel_mapping(&self, user_id: UserId) -> StoreResult<Option<ChannelMapping>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT user_id, channel_ref, status_message_ref FROM channel_mappings \
                 WHERE user_id = ?",
                [user_id.get()],
                |row| {
                    Ok(ChannelMapping {
                        user_id: UserId::new(row.get(0)?),
                        channel: ChannelRef::from_sql(row.get(1)?),
                        status_message: MessageRef::from_sql(row.get(2)?),
                    })
                },
            )
            .optional()?)
    }

    fn create_project(&self, project: &NewProject) -> StoreResult<Project> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            INSERT INTO projects (guild_id, name, description, check_interval, default_timeout,
                                  require_confirmation, require_modal, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING {PROJECT_COLUMNS}
            "#
        );
        let created = conn.query_row(
            &sql,
            params![
                project.guild.to_sql(),
                project.name,
                project.description,
                policy_secs(project.policy.check_interval),
                policy_secs(project.policy.default_timeout),
                project.policy.require_confirmation,
                project.policy.require_modal,
                format_timestamp(&clockin_util::now())
            ],
            project_from_row,
        )?;

        debug!(project_id = %created.id, name = %created.name, "Project created");
        Ok(created)
    }

    fn get_project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"),
                [id.get()],
                project_from_row,
            )
            .optional()?)
    }

    fn find_project(&self, guild: GuildRef, name: &str) -> StoreResult<Option<Project>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects \
                     WHERE guild_id = ? AND name = ? AND is_archived = 0 \
                     ORDER BY id LIMIT 1"
                ),
                params![guild.to_sql(), name],
                project_from_row,
            )
            .optional()?)
    }

    fn list_projects(&self, guild: GuildRef, include_archived: bool) -> StoreResult<Vec<Project>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects \
             WHERE guild_id = ?1 AND (?2 OR is_archived = 0) ORDER BY name"
        ))?;
        let projects = stmt
            .query_map(params![guild.to_sql(), include_archived], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    fn update_project(
        &self,
        id: ProjectId,
        description: Option<&str>,
        policy: &ProjectPolicy,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE projects
            SET description = ?1, check_interval = ?2, default_timeout = ?3,
                require_confirmation = ?4, require_modal = ?5
            WHERE id = ?6
            "#,
            params![
                description,
                policy_secs(policy.check_interval),
                policy_secs(policy.default_timeout),
                policy.require_confirmation,
                policy.require_modal,
                id.get()
            ],
        )?;

        debug!(project_id = %id, changed, "Project updated");
        Ok(changed > 0)
    }

    fn start_session(
        &self,
        user_id: UserId,
        project_id: Option<ProjectId>,
        now: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let conn = self.conn()?;
        let stamp = format_timestamp(&now);
        let session = conn.query_row(
            &format!(
                "INSERT INTO sessions (user_id, project_id, start_time, status, created_at) \
                 VALUES (?1, ?2, ?3, 'manual', ?3) RETURNING {SESSION_COLUMNS}"
            ),
            params![user_id.get(), project_id.map(ProjectId::get), stamp],
            session_from_row,
        )?;

        debug!(session_id = %session.id, user_id = %user_id, "Session started");
        Ok(session)
    }

    fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"),
                [id.get()],
                session_from_row,
            )
            .optional()?)
    }

    fn get_active_session(&self, user_id: UserId) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions \
                     WHERE user_id = ? AND end_time IS NULL"
                ),
                [user_id.get()],
                session_from_row,
            )
            .optional()?)
    }

    fn end_session(
        &self,
        id: SessionId,
        summary: Option<&str>,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE sessions
            SET end_time = ?1, end_summary = ?2, status = ?3
            WHERE id = ?4 AND end_time IS NULL
            "#,
            params![format_timestamp(&now), summary, status.as_str(), id.get()],
        )?;

        debug!(session_id = %id, status = %status, changed, "Session end attempted");
        Ok(changed)
    }

    fn set_start_message(&self, id: SessionId, message: MessageRef) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET start_message_ref = ? WHERE id = ?",
            params![message.to_sql(), id.get()],
        )?;
        Ok(())
    }

    fn get_sessions_between(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = ?1 \
               AND julianday(start_time) >= julianday(?2) \
               AND julianday(start_time) < julianday(?3) \
             ORDER BY julianday(start_time), id"
        ))?;
        let sessions = stmt
            .query_map(
                params![user_id.get(), format_timestamp(&from), format_timestamp(&to)],
                session_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn get_recent_sessions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE user_id = ?1 \
             ORDER BY julianday(start_time) DESC, id DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let sessions = stmt
            .query_map(
                params![
                    user_id.get(),
                    i64::try_from(limit).unwrap_or(i64::MAX),
                    i64::try_from(offset).unwrap_or(i64::MAX)
                ],
                session_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn get_active_sessions_requiring_confirmation(&self) -> StoreResult<Vec<SessionCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, s.user_id, s.project_id, s.start_time, s.start_message_ref,
                   p.check_interval, p.default_timeout, p.require_confirmation, p.require_modal,
                   u.guild_id, u.user_ref, g.locale,
                   c.channel_ref, c.status_message_ref
            FROM sessions s
            JOIN projects p ON p.id = s.project_id
            JOIN users u ON u.id = s.user_id
            JOIN guilds g ON g.guild_id = u.guild_id
            LEFT JOIN channel_mappings c ON c.user_id = u.id
            WHERE s.end_time IS NULL AND p.require_confirmation = 1
            ORDER BY s.id
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        // A row that fails to decode is skipped so the rest still get processed
        while let Some(row) = rows.next()? {
            match candidate_from_row(row) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    skipped += 1;
                    error!(
                        session_id = ?row.get::<_, i64>(0).ok(),
                        error = %e,
                        "Skipping undecodable session row"
                    );
                }
            }
        }

        debug!(
            count = candidates.len(),
            skipped = skipped,
            "Loaded active sessions requiring confirmation"
        );
        Ok(candidates)
    }

    fn create_confirmation(
        &self,
        session_id: SessionId,
        prompt_time: DateTime<Utc>,
    ) -> StoreResult<Option<ConfirmationId>> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            INSERT INTO confirmations (session_id, prompt_time, created_at)
            SELECT ?1, ?2, ?2
            WHERE EXISTS (SELECT 1 FROM sessions WHERE id = ?1 AND end_time IS NULL)
              AND NOT EXISTS (
                  SELECT 1 FROM confirmations WHERE session_id = ?1 AND responded = 0
              )
            "#,
            params![session_id.get(), format_timestamp(&prompt_time)],
        )?;

        if changed == 0 {
            debug!(session_id = %session_id, "Confirmation not created");
            return Ok(None);
        }

        let id = ConfirmationId::new(conn.last_insert_rowid());
        debug!(session_id = %session_id, confirmation_id = %id, "Confirmation created");
        Ok(Some(id))
    }

    fn record_confirmation_message_ref(
        &self,
        id: ConfirmationId,
        message: MessageRef,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE confirmations SET message_ref = ? WHERE id = ?",
            params![message.to_sql(), id.get()],
        )?;
        Ok(())
    }

    fn respond_to_confirmation(
        &self,
        id: ConfirmationId,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE confirmations
            SET responded = 1, response_time = ?1, summary = ?2
            WHERE id = ?3 AND responded = 0
            "#,
            params![format_timestamp(&now), summary, id.get()],
        )?;

        debug!(confirmation_id = %id, changed, "Confirmation response attempted");
        Ok(changed)
    }

    fn get_confirmation(&self, id: ConfirmationId) -> StoreResult<Option<Confirmation>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {CONFIRMATION_COLUMNS} FROM confirmations WHERE id = ?"),
                [id.get()],
                confirmation_from_row,
            )
            .optional()?)
    }

    fn get_outstanding_confirmations(
        &self,
        session_id: SessionId,
    ) -> StoreResult<Vec<Confirmation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIRMATION_COLUMNS} FROM confirmations \
             WHERE session_id = ? AND responded = 0 \
             ORDER BY prompt_time DESC, id DESC"
        ))?;
        let confirmations = stmt
            .query_map([session_id.get()], confirmation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(confirmations)
    }

    fn get_session_confirmations(&self, session_id: SessionId) -> StoreResult<Vec<Confirmation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIRMATION_COLUMNS} FROM confirmations \
             WHERE session_id = ? ORDER BY prompt_time, id"
        ))?;
        let confirmations = stmt
            .query_map([session_id.get()], confirmation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(confirmations)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![format_timestamp(&event.timestamp), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            let id: i64 = row.get(0)?;
            let timestamp = timestamp_at(row, 1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_json) = row?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;
    use std::sync::{Arc, Barrier};

    const GUILD: GuildRef = GuildRef::new(900_000_000_000_000_001);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    /// Store with one guild, one user, and one confirmation-required project
    fn seeded() -> (SqliteStore, UserRecord, Project) {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_guild(GUILD, Locale::En).unwrap();
        let user = store
            .upsert_user(GUILD, UserRef::new(42), "alice")
            .unwrap();
        let project = store
            .create_project(&NewProject {
                guild: GUILD,
                name: "backend".into(),
                description: Some("API work".into()),
                policy: ProjectPolicy {
                    check_interval: Duration::from_secs(1800),
                    default_timeout: Duration::from_secs(600),
                    require_confirmation: true,
                    require_modal: false,
                },
            })
            .unwrap();
        (store, user, project)
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::at(
                AuditEventType::SessionEnded {
                    session_id: SessionId::new(3),
                    status: SessionStatus::Auto,
                    summary: Some("auto-ended: no response".into()),
                    worked: Duration::from_secs(3600),
                },
                t0(),
            ))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, t0());
        assert!(matches!(
            events[0].event,
            AuditEventType::SessionEnded { status: SessionStatus::Auto, .. }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn test_upsert_user_is_idempotent() {
        let (store, user, _) = seeded();
        let again = store
            .upsert_user(GUILD, UserRef::new(42), "alice-renamed")
            .unwrap();

        assert_eq!(again.id, user.id);
        assert_eq!(again.name, "alice-renamed");
        assert_eq!(
            store.get_user(GUILD, UserRef::new(42)).unwrap().unwrap().name,
            "alice-renamed"
        );
        assert!(store.get_user(GUILD, UserRef::new(7)).unwrap().is_none());
    }

    #[test]
    fn test_guild_locale() {
        let (store, _, _) = seeded();
        assert_eq!(store.get_guild_locale(GUILD).unwrap(), Some(Locale::En));

        store.upsert_guild(GUILD, Locale::Ja).unwrap();
        assert_eq!(store.get_guild_locale(GUILD).unwrap(), Some(Locale::Ja));
        assert_eq!(store.get_guild_locale(GuildRef::new(1)).unwrap(), None);
    }

    #[test]
    fn test_projects() {
        let (store, _, project) = seeded();

        assert_eq!(project.policy.default_timeout, Duration::from_secs(600));
        assert!(!project.is_archived);

        let found = store.find_project(GUILD, "backend").unwrap().unwrap();
        assert_eq!(found, project);
        assert!(store.find_project(GUILD, "frontend").unwrap().is_none());

        let policy = ProjectPolicy {
            require_confirmation: false,
            ..project.policy
        };
        assert!(store.update_project(project.id, None, &policy).unwrap());
        let updated = store.get_project(project.id).unwrap().unwrap();
        assert!(!updated.policy.require_confirmation);
        assert_eq!(updated.description, None);

        assert!(!store
            .update_project(ProjectId::new(999), None, &policy)
            .unwrap());
        assert_eq!(store.list_projects(GUILD, false).unwrap().len(), 1);
    }

    #[test]
    fn test_one_active_session_per_user() {
        let (store, user, project) = seeded();

        let session = store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();
        assert!(session.is_active());
        assert_eq!(session.start_time, t0());

        let second = store.start_session(user.id, Some(project.id), t0() + minutes(1));
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        assert_eq!(
            store.get_active_session(user.id).unwrap().unwrap().id,
            session.id
        );
    }

    #[test]
    fn test_end_session_is_conditional() {
        let (store, user, project) = seeded();
        let session = store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();

        let first = store
            .end_session(session.id, Some("done"), SessionStatus::Manual, t0() + minutes(30))
            .unwrap();
        let second = store
            .end_session(session.id, Some("late"), SessionStatus::Auto, t0() + minutes(31))
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let ended = store.get_session(session.id).unwrap().unwrap();
        assert_eq!(ended.end_time, Some(t0() + minutes(30)));
        assert_eq!(ended.end_summary.as_deref(), Some("done"));
        assert_eq!(ended.status, SessionStatus::Manual);

        // A new session may start once the previous one ended
        assert!(store
            .start_session(user.id, Some(project.id), t0() + minutes(40))
            .is_ok());
    }

    #[test]
    fn test_concurrent_end_has_one_winner() {
        let (store, user, project) = seeded();
        let session = store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();
        let store = Arc::new(store);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [SessionStatus::Manual, SessionStatus::Auto]
            .into_iter()
            .map(|status| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .end_session(session.id, Some(status.as_str()), status, t0() + minutes(70))
                        .unwrap()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1);

        let ended = store.get_session(session.id).unwrap().unwrap();
        assert_eq!(ended.end_summary.as_deref(), Some(ended.status.as_str()));
    }

    #[test]
    fn test_create_confirmation_is_conditional() {
        let (store, user, project) = seeded();
        let session = store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();

        let first = store
            .create_confirmation(session.id, t0() + minutes(30))
            .unwrap()
            .unwrap();
        assert!(store
            .create_confirmation(session.id, t0() + minutes(31))
            .unwrap()
            .is_none());

        let outstanding = store.get_outstanding_confirmation(session.id).unwrap().unwrap();
        assert_eq!(outstanding.id, first);
        assert_eq!(outstanding.prompt_time, t0() + minutes(30));

        // Responding frees the slot
        assert_eq!(
            store
                .respond_to_confirmation(first, Some("still here"), t0() + minutes(35))
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .respond_to_confirmation(first, None, t0() + minutes(36))
                .unwrap(),
            0
        );
        let second = store
            .create_confirmation(session.id, t0() + minutes(65))
            .unwrap();
        assert!(second.is_some());

        // No prompts for ended sessions
        store
            .end_session(session.id, None, SessionStatus::Manual, t0() + minutes(66))
            .unwrap();
        store
            .respond_to_confirmation(second.unwrap(), None, t0() + minutes(66))
            .unwrap();
        assert!(store
            .create_confirmation(session.id, t0() + minutes(95))
            .unwrap()
            .is_none());

        let history = store.get_session_confirmations(session.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].summary.as_deref(), Some("still here"));
        assert_eq!(history[0].response_time, Some(t0() + minutes(35)));
    }

    #[test]
    fn test_confirmation_message_ref() {
        let (store, user, project) = seeded();
        let session = store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();
        let id = store
            .create_confirmation(session.id, t0() + minutes(30))
            .unwrap()
            .unwrap();

        let message = MessageRef::new(u64::MAX - 1);
        store.record_confirmation_message_ref(id, message).unwrap();
        assert_eq!(
            store.get_confirmation(id).unwrap().unwrap().message,
            Some(message)
        );
    }

    #[test]
    fn test_candidates_query() {
        let (store, user, project) = seeded();
        let other = store
            .upsert_user(GUILD, UserRef::new(43), "bob")
            .unwrap();
        let relaxed = store
            .create_project(&NewProject {
                guild: GUILD,
                name: "docs".into(),
                description: None,
                policy: ProjectPolicy {
                    require_confirmation: false,
                    ..ProjectPolicy::default()
                },
            })
            .unwrap();

        store
            .set_channel_mapping(&ChannelMapping {
                user_id: user.id,
                channel: ChannelRef::new(5),
                status_message: MessageRef::new(6),
            })
            .unwrap();

        let tracked = store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();
        store
            .start_session(other.id, Some(relaxed.id), t0())
            .unwrap();

        let candidates = store.get_active_sessions_requiring_confirmation().unwrap();
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.session_id, tracked.id);
        assert_eq!(candidate.locale, Locale::En);
        assert_eq!(candidate.channel, Some(ChannelRef::new(5)));
        assert_eq!(candidate.status_message, Some(MessageRef::new(6)));
        assert_eq!(candidate.user, UserRef::new(42));
        assert_eq!(candidate.guild, GUILD);
        assert_eq!(candidate.policy, project.policy);

        store
            .end_session(tracked.id, None, SessionStatus::Manual, t0() + minutes(5))
            .unwrap();
        assert!(store
            .get_active_sessions_requiring_confirmation()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_candidate_without_channel_mapping() {
        let (store, user, project) = seeded();
        store
            .start_session(user.id, Some(project.id), t0())
            .unwrap();

        let candidates = store.get_active_sessions_requiring_confirmation().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].channel, None);
        assert_eq!(candidates[0].status_message, None);
    }

    #[test]
    fn test_zone_less_rows_read_as_utc() {
        let (store, user, project) = seeded();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO sessions (user_id, project_id, start_time, status, created_at) \
                 VALUES (?1, ?2, '2025-03-01 09:00:00', 'manual', '2025-03-01 09:00:00')",
                params![user.id.get(), project.id.get()],
            )
            .unwrap();
        }

        let session = store.get_active_session(user.id).unwrap().unwrap();
        assert_eq!(session.start_time, t0());
    }

    #[test]
    fn test_corrupt_candidate_row_is_skipped() {
        let (store, _, project) = seeded();
        let mut sessions = Vec::new();
        for n in 0..3 {
            let user = store
                .upsert_user(GUILD, UserRef::new(500 + n), &format!("user-{n}"))
                .unwrap();
            sessions.push(
                store
                    .start_session(user.id, Some(project.id), t0())
                    .unwrap()
                    .id,
            );
        }

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE sessions SET start_time = 'garbage' WHERE id = ?",
                params![sessions[1].get()],
            )
            .unwrap();
        }

        let candidates = store.get_active_sessions_requiring_confirmation().unwrap();
        let ids: Vec<_> = candidates.iter().map(|c| c.session_id).collect();
        assert_eq!(ids, vec![sessions[0], sessions[2]]);
    }

    #[test]
    fn test_zone_less_rows_fall_within_day_range() {
        let (store, user, project) = seeded();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO sessions (user_id, project_id, start_time, end_time, status, created_at) \
                 VALUES (?1, ?2, '2025-03-01 09:00:00', '2025-03-01 10:00:00', 'manual', \
                         '2025-03-01 09:00:00')",
                params![user.id.get(), project.id.get()],
            )
            .unwrap();
        }
        let later = store
            .start_session(user.id, Some(project.id), t0() + minutes(120))
            .unwrap();

        let day = store
            .get_sessions_between(user.id, t0(), t0() + chrono::Duration::hours(24))
            .unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].start_time, t0());
        assert_eq!(day[1].id, later.id);

        // Bounds are exclusive at the end, inclusive at the start
        let none = store
            .get_sessions_between(user.id, t0() + minutes(1), t0() + minutes(120))
            .unwrap();
        assert!(none.is_empty());

        let recent = store.get_recent_sessions(user.id, 10, 0).unwrap();
        assert_eq!(recent[0].id, later.id);
        assert_eq!(recent[1].start_time, t0());
    }

    #[test]
    fn test_sessions_between_and_recent() {
        let (store, user, project) = seeded();
        for (start, end) in [(0, 60), (120, 180), (24 * 60, 25 * 60)] {
            let session = store
                .start_session(user.id, Some(project.id), t0() + minutes(start))
                .unwrap();
            store
                .end_session(session.id, None, SessionStatus::Manual, t0() + minutes(end))
                .unwrap();
        }

        let day = store
            .get_sessions_between(user.id, t0(), t0() + chrono::Duration::hours(24))
            .unwrap();
        assert_eq!(day.len(), 2);
        assert!(day[0].start_time < day[1].start_time);

        let recent = store.get_recent_sessions(user.id, 2, 0).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].start_time, t0() + minutes(24 * 60));

        let older = store.get_recent_sessions(user.id, 2, 2).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].start_time, t0());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clockin.db");

        let session_id = {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_guild(GUILD, Locale::Ja).unwrap();
            let user = store.upsert_user(GUILD, UserRef::new(1), "carol").unwrap();
            let project = store
                .create_project(&NewProject {
                    guild: GUILD,
                    name: "ops".into(),
                    description: None,
                    policy: ProjectPolicy::default(),
                })
                .unwrap();
            store
                .start_session(user.id, Some(project.id), t0())
                .unwrap()
                .id
        };

        let store = SqliteStore::open(&path).unwrap();
        let session = store.get_session(session_id).unwrap().unwrap();
        assert!(session.is_active());
        assert_eq!(session.start_time, t0());
    }
}
