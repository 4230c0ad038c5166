//! Domain types for clockin
//!
//! Shared by the store, the notification gateway, and the scheduler core:
//! - Sessions and their end status
//! - Confirmation prompts
//! - Projects and their confirmation policy
//! - Scheduler candidates (active session joined with policy and delivery details)

mod types;

pub use types::*;

/// Summary recorded when the scheduler ends a session whose prompt went unanswered
pub const AUTO_END_NO_RESPONSE: &str = "auto-ended: no response";

/// Summary recorded when starting work closes a session that was still open
pub const AUTO_END_NEW_SESSION: &str = "auto-ended: new session started";

/// Summary recorded when a prompt is acknowledged without a summary
pub const CONFIRMED_WITHOUT_SUMMARY: &str = "Confirmed without summary";
