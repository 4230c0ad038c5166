//! Notification gateway traits

use async_trait::async_trait;
use clockin_model::{Confirmation, Locale, Session, SessionCandidate};
use clockin_util::{ChannelRef, MessageRef, SessionId, UserRef};
use thiserror::Error;

/// Errors from gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Platform unreachable: {0}")]
    Unreachable(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelRef),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageRef),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Everything needed to render one liveness prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub session_id: SessionId,
    pub user: UserRef,
    pub channel: ChannelRef,
    pub locale: Locale,
    /// Whether answering should collect a summary
    pub require_modal: bool,
}

impl PromptRequest {
    /// Build a request for a scheduler candidate. None when the user has no
    /// channel to deliver into.
    pub fn for_candidate(candidate: &SessionCandidate) -> Option<Self> {
        Some(Self {
            session_id: candidate.session_id,
            user: candidate.user,
            channel: candidate.channel?,
            locale: candidate.locale,
            require_modal: candidate.policy.require_modal,
        })
    }
}

/// Notification gateway trait - implemented by platform adapters
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver a prompt and return a reference to the delivered message
    async fn deliver_prompt(&self, request: &PromptRequest) -> GatewayResult<MessageRef>;

    /// The scheduler ended `candidate`'s session; refresh the status display
    /// and annotate the start message
    async fn on_auto_ended(
        &self,
        candidate: &SessionCandidate,
        ended: &Session,
    ) -> GatewayResult<()>;

    /// Remove a prompt that can no longer be answered (best effort)
    async fn cleanup_stale_prompt(&self, confirmation: &Confirmation) -> GatewayResult<()>;

    /// Optional: check if the platform connection is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}
