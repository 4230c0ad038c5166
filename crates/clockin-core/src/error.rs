//! Core error types

use clockin_gateway::GatewayError;
use clockin_store::StoreError;
use clockin_util::{ProjectId, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Session vanished: {0}")]
    SessionVanished(SessionId),
}

pub type CoreResult<T> = Result<T, CoreError>;
