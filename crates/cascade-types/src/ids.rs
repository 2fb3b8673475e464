//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Scenarios, entities, and simulations each get their own ID type, so an
//! entity ID can never be passed where a simulation ID is expected. New IDs
//! are UUID v7, which sort by creation time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a `Copy` UUID newtype that serializes as the bare UUID string.
///
/// `Default` mints a fresh v7 ID, which lets scenario files omit IDs.
macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// A fresh, time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// The wrapped UUID.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_newtype! {
    /// Unique identifier for a scenario.
    ScenarioId
}

uuid_newtype! {
    /// Unique identifier for a stakeholder entity taking part in a scenario.
    EntityId
}

uuid_newtype! {
    /// Unique identifier for one simulation run.
    SimulationId
}
