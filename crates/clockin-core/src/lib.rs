//! Confirmation scheduling core for clockind
//!
//! This crate contains:
//! - The confirmation timeline (pure: what should happen to a session now)
//! - The session processor (applies one timeline decision with conditional writes)
//! - The tick coordinator (periodic, overlap-safe, bounded-concurrency dispatch)
//! - Interactive attendance actions that race safely with the scheduler

mod attendance;
mod coordinator;
mod error;
mod processor;
pub mod timeline;

pub use attendance::*;
pub use coordinator::*;
pub use error::*;
pub use processor::*;
pub use timeline::{TimelineSignal, evaluate};
