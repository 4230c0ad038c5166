//! Notification gateway interface for clockin
//!
//! This crate defines the boundary between the scheduler core and whatever
//! chat platform renders prompts. It takes structured data and hands back
//! message references; it contains no platform code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
