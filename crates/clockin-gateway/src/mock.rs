//! Mock gateway for testing

use async_trait::async_trait;
use clockin_model::{Confirmation, Session, SessionCandidate};
use clockin_util::{ConfirmationId, MessageRef, SessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::{GatewayError, GatewayResult, NotificationGateway, PromptRequest};

/// A prompt the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredPrompt {
    pub request: PromptRequest,
    pub message: MessageRef,
}

/// Mock gateway for unit/integration testing. Records every call.
pub struct MockGateway {
    next_message: AtomicU64,
    prompts: Arc<Mutex<Vec<DeliveredPrompt>>>,
    auto_ended: Arc<Mutex<Vec<Session>>>,
    cleaned: Arc<Mutex<Vec<ConfirmationId>>>,

    /// Configure prompt delivery to fail
    pub fail_deliver: Arc<Mutex<bool>>,

    /// Configure the auto-end hook to fail
    pub fail_auto_end: Arc<Mutex<bool>>,

    /// Configure prompt cleanup to fail
    pub fail_cleanup: Arc<Mutex<bool>>,

    /// Delay before a delivery completes (simulates a slow platform)
    pub deliver_delay: Arc<Mutex<Option<Duration>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            next_message: AtomicU64::new(1),
            prompts: Arc::new(Mutex::new(Vec::new())),
            auto_ended: Arc::new(Mutex::new(Vec::new())),
            cleaned: Arc::new(Mutex::new(Vec::new())),
            fail_deliver: Arc::new(Mutex::new(false)),
            fail_auto_end: Arc::new(Mutex::new(false)),
            fail_cleanup: Arc::new(Mutex::new(false)),
            deliver_delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Prompts delivered so far, in order
    pub fn prompts(&self) -> Vec<DeliveredPrompt> {
        lock(&self.prompts).clone()
    }

    /// Prompts delivered for one session
    pub fn prompts_for(&self, session_id: SessionId) -> Vec<DeliveredPrompt> {
        lock(&self.prompts)
            .iter()
            .filter(|p| p.request.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Sessions reported through the auto-end hook
    pub fn auto_ended(&self) -> Vec<Session> {
        lock(&self.auto_ended).clone()
    }

    /// Confirmations whose prompt messages were cleaned up
    pub fn cleaned(&self) -> Vec<ConfirmationId> {
        lock(&self.cleaned).clone()
    }

    pub fn set_fail_deliver(&self, fail: bool) {
        *lock(&self.fail_deliver) = fail;
    }

    pub fn set_fail_auto_end(&self, fail: bool) {
        *lock(&self.fail_auto_end) = fail;
    }

    pub fn set_fail_cleanup(&self, fail: bool) {
        *lock(&self.fail_cleanup) = fail;
    }

    pub fn set_deliver_delay(&self, delay: Option<Duration>) {
        *lock(&self.deliver_delay) = delay;
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationGateway for MockGateway {
    async fn deliver_prompt(&self, request: &PromptRequest) -> GatewayResult<MessageRef> {
        let delay = *lock(&self.deliver_delay);
        if let Some(delay) = delay {
            debug!(session_id = %request.session_id, delay = ?delay, "Mock delaying delivery");
            tokio::time::sleep(delay).await;
        }

        if *lock(&self.fail_deliver) {
            debug!(session_id = %request.session_id, "Mock failing delivery");
            return Err(GatewayError::Unreachable("Mock delivery failure".into()));
        }

        let message = MessageRef::new(self.next_message.fetch_add(1, Ordering::SeqCst));
        lock(&self.prompts).push(DeliveredPrompt {
            request: request.clone(),
            message,
        });

        Ok(message)
    }

    async fn on_auto_ended(
        &self,
        _candidate: &SessionCandidate,
        ended: &Session,
    ) -> GatewayResult<()> {
        if *lock(&self.fail_auto_end) {
            debug!(session_id = %ended.id, "Mock failing auto-end hook");
            return Err(GatewayError::Internal("Mock auto-end failure".into()));
        }

        lock(&self.auto_ended).push(ended.clone());
        Ok(())
    }

    async fn cleanup_stale_prompt(&self, confirmation: &Confirmation) -> GatewayResult<()> {
        if *lock(&self.fail_cleanup) {
            debug!(confirmation_id = %confirmation.id, "Mock failing cleanup");
            return Err(GatewayError::MessageNotFound(
                confirmation.message.unwrap_or(MessageRef::new(0)),
            ));
        }

        lock(&self.cleaned).push(confirmation.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clockin_model::Locale;
    use clockin_util::{ChannelRef, UserRef};

    fn request(session: i64) -> PromptRequest {
        PromptRequest {
            session_id: SessionId::new(session),
            user: UserRef::new(10),
            channel: ChannelRef::new(20),
            locale: Locale::Ja,
            require_modal: true,
        }
    }

    #[tokio::test]
    async fn mock_records_deliveries() {
        let gateway = MockGateway::new();

        let first = gateway.deliver_prompt(&request(1)).await.unwrap();
        let second = gateway.deliver_prompt(&request(2)).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(gateway.prompts().len(), 2);
        assert_eq!(gateway.prompts_for(SessionId::new(2))[0].message, second);
    }

    #[tokio::test]
    async fn mock_delivery_failure() {
        let gateway = MockGateway::new();
        gateway.set_fail_deliver(true);

        let result = gateway.deliver_prompt(&request(1)).await;

        assert!(matches!(result, Err(GatewayError::Unreachable(_))));
        assert!(gateway.prompts().is_empty());
    }

    #[tokio::test]
    async fn mock_hook_failures_record_nothing() {
        use chrono::{TimeZone, Utc};
        use clockin_model::SessionStatus;
        use clockin_util::UserId;

        let gateway = MockGateway::new();
        gateway.set_fail_auto_end(true);
        gateway.set_fail_cleanup(true);

        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let session = Session {
            id: SessionId::new(3),
            user_id: UserId::new(1),
            project_id: None,
            start_time: start,
            end_time: Some(start),
            end_summary: None,
            status: SessionStatus::Auto,
            start_message: None,
        };
        let candidate = SessionCandidate {
            session_id: session.id,
            user_id: session.user_id,
            project_id: clockin_util::ProjectId::new(1),
            start_time: start,
            start_message: None,
            policy: Default::default(),
            guild: clockin_util::GuildRef::new(1),
            user: UserRef::new(10),
            locale: Locale::En,
            channel: Some(ChannelRef::new(20)),
            status_message: None,
        };
        let confirmation = Confirmation {
            id: ConfirmationId::new(8),
            session_id: session.id,
            prompt_time: start,
            responded: false,
            response_time: None,
            summary: None,
            message: Some(MessageRef::new(5)),
        };

        assert!(gateway.on_auto_ended(&candidate, &session).await.is_err());
        assert!(matches!(
            gateway.cleanup_stale_prompt(&confirmation).await,
            Err(GatewayError::MessageNotFound(m)) if m == MessageRef::new(5)
        ));
        assert!(gateway.auto_ended().is_empty());
        assert!(gateway.cleaned().is_empty());
    }
}
