//! Strongly-typed identifiers for clockin
//!
//! Row ids are assigned by the store. References (`*Ref`) are opaque ids owned
//! by the chat platform and are only stored and handed back to the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

macro_rules! platform_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }

            /// SQLite integers are signed; snowflake-style ids round-trip bit-for-bit.
            pub const fn to_sql(self) -> i64 {
                self.0 as i64
            }

            pub const fn from_sql(raw: i64) -> Self {
                Self(raw as u64)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Store id of a registered user (one per guild membership)
    UserId
);
row_id!(
    /// Store id of a project
    ProjectId
);
row_id!(
    /// Store id of an attendance session
    SessionId
);
row_id!(
    /// Store id of a confirmation prompt
    ConfirmationId
);

platform_ref!(
    /// Chat-platform guild (server)
    GuildRef
);
platform_ref!(
    /// Chat-platform user account
    UserRef
);
platform_ref!(
    /// Chat-platform channel
    ChannelRef
);
platform_ref!(
    /// A delivered chat-platform message
    MessageRef
);

/// Correlation id for one scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickId(Uuid);

impl TickId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TickId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
