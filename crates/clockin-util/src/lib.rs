//! Shared utilities for clockin
//!
//! This crate provides:
//! - ID types (row ids for users, projects, sessions, confirmations;
//!   opaque chat-platform references; tick ids)
//! - UTC time utilities (mockable `now()`, timestamp parsing, duration formatting)
//! - Default paths for the config file and data directory

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
