//! Confirmation timeline
//!
//! Pure decision logic: given a session's start time, its confirmation
//! history, and the project policy, decide what the scheduler should do now.
//! No I/O and no clock reads; `now` is always passed in.

use chrono::{DateTime, Utc};
use clockin_model::{Confirmation, ProjectPolicy};
use clockin_util::{ConfirmationId, secs};

/// What the scheduler should do for one session at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineSignal {
    /// Nothing to do. `due_at` is when the next prompt becomes due
    /// (`None` if it lies beyond the representable range).
    Idle { due_at: Option<DateTime<Utc>> },

    /// A prompt is due now
    PromptDue { due_at: DateTime<Utc> },

    /// A prompt is outstanding and has not yet expired
    Awaiting {
        confirmation_id: ConfirmationId,
        expires_at: Option<DateTime<Utc>>,
    },

    /// The outstanding prompt went unanswered for `default_timeout`
    TimedOut { confirmation_id: ConfirmationId },
}

impl TimelineSignal {
    pub fn name(&self) -> &'static str {
        match self {
            TimelineSignal::Idle { .. } => "idle",
            TimelineSignal::PromptDue { .. } => "prompt_due",
            TimelineSignal::Awaiting { .. } => "awaiting",
            TimelineSignal::TimedOut { .. } => "timed_out",
        }
    }
}

/// Evaluate the timeline for one session.
///
/// Rules, in priority order:
/// 1. An outstanding prompt aged `>= default_timeout` is `TimedOut`; a younger
///    one is `Awaiting`. Timeout detection always wins over prompt issuance.
/// 2. Otherwise the next prompt is due `check_interval` after the latest
///    response, or after `start_time` when the session has no prompts yet.
///
/// More than one outstanding prompt violates the store's invariant; the
/// latest one is reported as `Awaiting` and the caller is expected to log it.
pub fn evaluate(
    start_time: DateTime<Utc>,
    confirmations: &[Confirmation],
    policy: &ProjectPolicy,
    now: DateTime<Utc>,
) -> TimelineSignal {
    let outstanding: Vec<&Confirmation> =
        confirmations.iter().filter(|c| c.is_outstanding()).collect();

    if let Some(latest) = outstanding
        .iter()
        .copied()
        .max_by_key(|c| (c.prompt_time, c.id))
    {
        let expires_at = latest
            .prompt_time
            .checked_add_signed(secs(policy.default_timeout.as_secs()));

        if outstanding.len() == 1 && expires_at.is_some_and(|at| now >= at) {
            return TimelineSignal::TimedOut {
                confirmation_id: latest.id,
            };
        }

        return TimelineSignal::Awaiting {
            confirmation_id: latest.id,
            expires_at,
        };
    }

    let anchor = confirmations
        .iter()
        .filter(|c| c.responded)
        .map(|c| c.response_time.unwrap_or(c.prompt_time))
        .max()
        .unwrap_or(start_time);

    match anchor.checked_add_signed(secs(policy.check_interval.as_secs())) {
        Some(due_at) if now >= due_at => TimelineSignal::PromptDue { due_at },
        due_at => TimelineSignal::Idle { due_at },
    }
}

/// Number of unanswered prompts in a history
pub fn outstanding_count(confirmations: &[Confirmation]) -> usize {
    confirmations.iter().filter(|c| c.is_outstanding()).count()
}
