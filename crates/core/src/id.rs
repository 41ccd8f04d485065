//! Identifiers for subscriptions and handlers.

use core::str::FromStr;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of one `subscribe` call for one listener.
///
/// Re-subscribing a listener yields a fresh id, so handler ids from a replaced
/// subscription never collide with the new ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered), so ids sort in creation order.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| CoreError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(SubscriptionId, "SubscriptionId");

/// Stable identifier of a single handler.
///
/// Enough for a publisher to correlate a failed notification back to the
/// subscriber and the handler that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerId {
    subscription: SubscriptionId,
    listener: &'static str,
    name: Cow<'static, str>,
}

impl HandlerId {
    pub fn new(
        subscription: SubscriptionId,
        listener: &'static str,
        name: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            subscription,
            listener,
            name: name.into(),
        }
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Type name of the listener the handler belongs to.
    pub fn listener_type(&self) -> &'static str {
        self.listener
    }

    /// Handler name, unique within its listener.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl core::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}@{}", self.listener, self.name, self.subscription)
    }
}
