//! Per-session processing
//!
//! Every step re-checks persisted state and every transition is a
//! conditional write, so the processor is safe to run concurrently with
//! interactive actions and with itself.

use chrono::{DateTime, Utc};
use clockin_gateway::{NotificationGateway, PromptRequest};
use clockin_model::{AUTO_END_NO_RESPONSE, Session, SessionCandidate, SessionStatus};
use clockin_store::{AuditEvent, AuditEventType, Store};
use clockin_util::{ConfirmationId, MessageRef, SessionId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::timeline::{self, TimelineSignal};
use crate::{CoreError, CoreResult};

/// What processing one session did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The session was no longer active when re-read
    AlreadyEnded,

    /// No prompt due yet
    Idle,

    /// Waiting on an outstanding prompt
    Awaiting,

    /// The session was auto-ended by this call
    AutoEnded { session: Session },

    /// Another actor ended the session first
    LostRace,

    /// A prompt was created. `message` is None when delivery failed.
    PromptIssued {
        confirmation_id: ConfirmationId,
        message: Option<MessageRef>,
    },

    /// A prompt was due but the conditional insert found the session ended
    /// or already prompted
    PromptAbandoned,

    /// A prompt was due but the user has no channel to deliver into
    NoChannel,
}

/// Applies the confirmation timeline to one session
pub struct SessionProcessor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn NotificationGateway>,
    /// Sessions already warned about a missing channel mapping
    unreachable: Mutex<HashSet<SessionId>>,
}

impl SessionProcessor {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self {
            store,
            gateway,
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// Returns true the first time a session is found unreachable
    fn mark_unreachable(&self, session_id: SessionId) -> bool {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id)
    }

    /// Forget unreachable sessions that are no longer candidates
    pub(crate) fn retain_unreachable(&self, active: &HashSet<SessionId>) {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| active.contains(id));
    }

    /// Process one candidate at `now`.
    ///
    /// Store errors are returned; gateway errors are logged and never undo a
    /// committed write.
    pub async fn process(
        &self,
        candidate: &SessionCandidate,
        now: DateTime<Utc>,
    ) -> CoreResult<ProcessOutcome> {
        let session_id = candidate.session_id;

        let session = match self.store.get_session(session_id)? {
            Some(session) if session.is_active() => session,
            _ => {
                debug!(session_id = %session_id, "Session already ended");
                return Ok(ProcessOutcome::AlreadyEnded);
            }
        };

        let confirmations = self.store.get_session_confirmations(session_id)?;
        let outstanding = timeline::outstanding_count(&confirmations);
        if outstanding > 1 {
            error!(
                session_id = %session_id,
                outstanding,
                "Session has more than one outstanding confirmation"
            );
        }

        let signal = timeline::evaluate(session.start_time, &confirmations, &candidate.policy, now);
        debug!(session_id = %session_id, signal = signal.name(), "Timeline evaluated");

        match signal {
            TimelineSignal::TimedOut { confirmation_id } => {
                self.auto_end(candidate, &session, confirmation_id, now).await
            }
            TimelineSignal::Awaiting { expires_at, .. } => {
                debug!(session_id = %session_id, expires_at = ?expires_at, "Awaiting response");
                Ok(ProcessOutcome::Awaiting)
            }
            TimelineSignal::Idle { due_at } => {
                debug!(session_id = %session_id, due_at = ?due_at, "No prompt due");
                Ok(ProcessOutcome::Idle)
            }
            TimelineSignal::PromptDue { due_at } => self.issue_prompt(candidate, due_at, now).await,
        }
    }

    async fn auto_end(
        &self,
        candidate: &SessionCandidate,
        session: &Session,
        confirmation_id: ConfirmationId,
        now: DateTime<Utc>,
    ) -> CoreResult<ProcessOutcome> {
        let session_id = session.id;
        let changed = self.store.end_session(
            session_id,
            Some(AUTO_END_NO_RESPONSE),
            SessionStatus::Auto,
            now,
        )?;

        if changed == 0 {
            debug!(session_id = %session_id, "Auto-end lost race; session already ended");
            return Ok(ProcessOutcome::LostRace);
        }

        let ended = self
            .store
            .get_session(session_id)?
            .ok_or(CoreError::SessionVanished(session_id))?;
        let worked = ended.worked(now);

        info!(
            session_id = %session_id,
            user_id = %ended.user_id,
            confirmation_id = %confirmation_id,
            timeout_secs = candidate.policy.default_timeout.as_secs(),
            worked = %clockin_util::format_duration_hms(worked),
            "Session auto-ended: no response"
        );

        self.audit(
            AuditEventType::SessionEnded {
                session_id,
                status: SessionStatus::Auto,
                summary: ended.end_summary.clone(),
                worked,
            },
            now,
        );

        if let Err(e) = self.gateway.on_auto_ended(candidate, &ended).await {
            warn!(session_id = %session_id, error = %e, "Failed to publish auto-end");
        }

        self.cleanup_stale_prompts(session_id).await;

        Ok(ProcessOutcome::AutoEnded { session: ended })
    }

    async fn cleanup_stale_prompts(&self, session_id: SessionId) {
        let stale = match self.store.get_outstanding_confirmations(session_id) {
            Ok(stale) => stale,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not list stale prompts");
                return;
            }
        };

        for confirmation in stale.iter().filter(|c| c.message.is_some()) {
            if let Err(e) = self.gateway.cleanup_stale_prompt(confirmation).await {
                warn!(
                    session_id = %session_id,
                    confirmation_id = %confirmation.id,
                    error = %e,
                    "Failed to clean up stale prompt"
                );
            }
        }
    }

    async fn issue_prompt(
        &self,
        candidate: &SessionCandidate,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoreResult<ProcessOutcome> {
        let session_id = candidate.session_id;

        if !self
            .store
            .get_session(session_id)?
            .is_some_and(|s| s.is_active())
        {
            debug!(session_id = %session_id, "Session ended before prompt; abandoning");
            return Ok(ProcessOutcome::PromptAbandoned);
        }

        let Some(request) = PromptRequest::for_candidate(candidate) else {
            if self.mark_unreachable(session_id) {
                warn!(
                    session_id = %session_id,
                    user = %candidate.user,
                    "Prompt due but user has no channel mapping"
                );
            } else {
                debug!(session_id = %session_id, "Still no channel mapping");
            }
            return Ok(ProcessOutcome::NoChannel);
        };

        let Some(confirmation_id) = self.store.create_confirmation(session_id, now)? else {
            debug!(session_id = %session_id, "Prompt not created; session ended or already prompted");
            return Ok(ProcessOutcome::PromptAbandoned);
        };

        self.audit(
            AuditEventType::PromptIssued {
                session_id,
                confirmation_id,
            },
            now,
        );

        let message = match self.gateway.deliver_prompt(&request).await {
            Ok(message) => {
                self.store
                    .record_confirmation_message_ref(confirmation_id, message)?;
                Some(message)
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    confirmation_id = %confirmation_id,
                    error = %e,
                    "Prompt delivery failed"
                );
                None
            }
        };

        info!(
            session_id = %session_id,
            confirmation_id = %confirmation_id,
            due_at = %due_at,
            delivered = message.is_some(),
            "Confirmation prompt issued"
        );

        Ok(ProcessOutcome::PromptIssued {
            confirmation_id,
            message,
        })
    }

    fn audit(&self, event: AuditEventType, now: DateTime<Utc>) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, now)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use clockin_gateway::MockGateway;
    use clockin_model::{ChannelMapping, Locale, NewProject, ProjectPolicy};
    use clockin_store::SqliteStore;
    use clockin_util::{ChannelRef, GuildRef, UserRef};

    const GUILD: GuildRef = GuildRef::new(77);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        gateway: Arc<MockGateway>,
        processor: SessionProcessor,
    }

    impl Fixture {
        /// One user with a channel, one project (30 min interval, 10 min timeout)
        fn new() -> Self {
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let gateway = Arc::new(MockGateway::new());
            let processor = SessionProcessor::new(store.clone(), gateway.clone());
            Self {
                store,
                gateway,
                processor,
            }
        }

        fn start(&self, with_channel: bool) -> SessionCandidate {
            self.store.upsert_guild(GUILD, Locale::Ja).unwrap();
            let user = self
                .store
                .upsert_user(GUILD, UserRef::new(1), "dana")
                .unwrap();
            if with_channel {
                self.store
                    .set_channel_mapping(&ChannelMapping {
                        user_id: user.id,
                        channel: ChannelRef::new(11),
                        status_message: clockin_util::MessageRef::new(12),
                    })
                    .unwrap();
            }
            let project = self
                .store
                .create_project(&NewProject {
                    guild: GUILD,
                    name: "backend".into(),
                    description: None,
                    policy: ProjectPolicy {
                        check_interval: std::time::Duration::from_secs(30 * 60),
                        default_timeout: std::time::Duration::from_secs(10 * 60),
                        require_confirmation: true,
                        require_modal: true,
                    },
                })
                .unwrap();
            self.store
                .start_session(user.id, Some(project.id), t0())
                .unwrap();

            self.store
                .get_active_sessions_requiring_confirmation()
                .unwrap()
                .remove(0)
        }
    }

    #[tokio::test]
    async fn test_idle_before_interval() {
        let fx = Fixture::new();
        let candidate = fx.start(true);

        let outcome = fx.processor.process(&candidate, at(10)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Idle);
        assert!(fx.gateway.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_issued_when_due() {
        let fx = Fixture::new();
        let candidate = fx.start(true);

        let outcome = fx.processor.process(&candidate, at(30)).await.unwrap();
        let ProcessOutcome::PromptIssued {
            confirmation_id,
            message: Some(message),
        } = &outcome
        else {
            panic!("expected delivered prompt, got {:?}", outcome);
        };

        let stored = fx.store.get_confirmation(*confirmation_id).unwrap().unwrap();
        assert_eq!(stored.prompt_time, at(30));
        assert_eq!(stored.message, Some(*message));
        assert!(!stored.responded);

        let prompts = fx.gateway.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].request.channel, ChannelRef::new(11));
        assert_eq!(prompts[0].request.locale, Locale::Ja);

        // Second pass awaits instead of prompting again
        let outcome = fx.processor.process(&candidate, at(31)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Awaiting);
        assert_eq!(fx.gateway.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_prompt_auto_ends() {
        let fx = Fixture::new();
        let candidate = fx.start(true);

        fx.processor.process(&candidate, at(30)).await.unwrap();
        let outcome = fx.processor.process(&candidate, at(40)).await.unwrap();

        let ProcessOutcome::AutoEnded { session } = &outcome else {
            panic!("expected auto-end, got {:?}", outcome);
        };
        assert_eq!(session.status, SessionStatus::Auto);
        assert_eq!(session.end_summary.as_deref(), Some(AUTO_END_NO_RESPONSE));
        assert_eq!(session.end_time, Some(at(40)));

        assert_eq!(fx.gateway.auto_ended().len(), 1);
        assert_eq!(fx.gateway.cleaned().len(), 1);

        // Running again is a no-op
        let outcome = fx.processor.process(&candidate, at(41)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::AlreadyEnded);
        assert_eq!(fx.gateway.auto_ended().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_end_wins_over_timeout() {
        let fx = Fixture::new();
        let candidate = fx.start(true);
        fx.processor.process(&candidate, at(30)).await.unwrap();

        // User ends work after the processor re-read the session but before its write
        let session = fx.store.get_session(candidate.session_id).unwrap().unwrap();
        fx.store
            .end_session(session.id, Some("done"), SessionStatus::Manual, at(39))
            .unwrap();

        let confirmation = fx
            .store
            .get_outstanding_confirmation(candidate.session_id)
            .unwrap()
            .unwrap();
        let outcome = fx
            .processor
            .auto_end(&candidate, &session, confirmation.id, at(40))
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::LostRace);
        assert!(fx.gateway.auto_ended().is_empty());
        let stored = fx.store.get_session(candidate.session_id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Manual);
        assert_eq!(stored.end_summary.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_confirmation() {
        let fx = Fixture::new();
        let candidate = fx.start(true);
        fx.gateway.set_fail_deliver(true);

        let outcome = fx.processor.process(&candidate, at(30)).await.unwrap();
        let ProcessOutcome::PromptIssued {
            confirmation_id,
            message: None,
        } = &outcome
        else {
            panic!("expected undelivered prompt, got {:?}", outcome);
        };

        assert!(fx
            .store
            .get_confirmation(*confirmation_id)
            .unwrap()
            .is_some_and(|c| c.is_outstanding()));
    }

    #[tokio::test]
    async fn test_auto_end_hook_failure_does_not_roll_back() {
        let fx = Fixture::new();
        let candidate = fx.start(true);
        fx.processor.process(&candidate, at(30)).await.unwrap();
        fx.gateway.set_fail_auto_end(true);

        let outcome = fx.processor.process(&candidate, at(45)).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::AutoEnded { .. }));
        assert!(!fx
            .store
            .get_session(candidate.session_id)
            .unwrap()
            .unwrap()
            .is_active());
    }

    #[tokio::test]
    async fn test_no_channel_skips_prompt() {
        let fx = Fixture::new();
        let candidate = fx.start(false);

        let outcome = fx.processor.process(&candidate, at(30)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::NoChannel);
        assert!(fx
            .store
            .get_session_confirmations(candidate.session_id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_missing_channel_warns_once_per_session() {
        let fx = Fixture::new();
        let candidate = fx.start(false);

        fx.processor.process(&candidate, at(30)).await.unwrap();
        assert!(!fx.processor.mark_unreachable(candidate.session_id));

        let outcome = fx.processor.process(&candidate, at(31)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::NoChannel);
        assert!(!fx.processor.mark_unreachable(candidate.session_id));

        // Dropped once the session is no longer a candidate
        fx.processor.retain_unreachable(&HashSet::new());
        assert!(fx.processor.mark_unreachable(candidate.session_id));
    }

    #[tokio::test]
    async fn test_prompt_abandoned_when_session_ended() {
        let fx = Fixture::new();
        let candidate = fx.start(true);
        fx.store
            .end_session(candidate.session_id, None, SessionStatus::Manual, at(29))
            .unwrap();

        // Stale candidate from an earlier query
        let outcome = fx
            .processor
            .issue_prompt(&candidate, at(30), at(30))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::PromptAbandoned);
        assert!(fx.gateway.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_answered_prompt_schedules_next() {
        let fx = Fixture::new();
        let candidate = fx.start(true);

        let ProcessOutcome::PromptIssued {
            confirmation_id, ..
        } = fx.processor.process(&candidate, at(30)).await.unwrap()
        else {
            panic!("expected prompt");
        };
        fx.store
            .respond_to_confirmation(confirmation_id, Some("ok"), at(35))
            .unwrap();

        assert_eq!(
            fx.processor.process(&candidate, at(64)).await.unwrap(),
            ProcessOutcome::Idle
        );
        assert!(matches!(
            fx.processor.process(&candidate, at(65)).await.unwrap(),
            ProcessOutcome::PromptIssued { .. }
        ));
    }
}
