//! Gateway that only writes to the log
//!
//! Used when clockind runs headless: prompts and auto-end notices become
//! structured log lines, and message references are synthesized locally.

use async_trait::async_trait;
use clockin_gateway::{GatewayResult, NotificationGateway, PromptRequest};
use clockin_model::{Confirmation, Session, SessionCandidate};
use clockin_util::MessageRef;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct LogGateway {
    next_message: AtomicU64,
}

impl LogGateway {
    pub fn new() -> Self {
        Self {
            next_message: AtomicU64::new(1),
        }
    }
}

impl Default for LogGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn deliver_prompt(&self, request: &PromptRequest) -> GatewayResult<MessageRef> {
        let message = MessageRef::new(self.next_message.fetch_add(1, Ordering::Relaxed));
        info!(
            session_id = %request.session_id,
            user = %request.user,
            channel = %request.channel,
            locale = %request.locale,
            require_modal = request.require_modal,
            message = %message,
            "Prompt: are you still working?"
        );
        Ok(message)
    }

    async fn on_auto_ended(
        &self,
        candidate: &SessionCandidate,
        ended: &Session,
    ) -> GatewayResult<()> {
        let worked = ended
            .end_time
            .map(|end| clockin_util::elapsed_between(ended.start_time, end))
            .unwrap_or_default();

        info!(
            session_id = %ended.id,
            user = %candidate.user,
            channel = ?candidate.channel,
            start_message = ?ended.start_message,
            worked = %clockin_util::format_duration_hms(worked),
            summary = ended.end_summary.as_deref().unwrap_or_default(),
            "Session auto-ended"
        );
        Ok(())
    }

    async fn cleanup_stale_prompt(&self, confirmation: &Confirmation) -> GatewayResult<()> {
        debug!(
            confirmation_id = %confirmation.id,
            message = ?confirmation.message,
            "Stale prompt withdrawn"
        );
        Ok(())
    }
}
