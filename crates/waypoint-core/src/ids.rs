//! Opaque string identifiers shared across the crate

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a guideline
    GuidelineId
);
string_id!(
    /// Identifier of a tag; guidelines carrying no tags are global
    TagId
);
string_id!(
    /// Identifier of a journey
    JourneyId
);
string_id!(
    /// Identifier of a stored relationship
    RelationshipId
);
string_id!(SessionId);
string_id!(AgentId);
string_id!(CustomerId);

const JOURNEY_TAG_PREFIX: &str = "journey:";

impl TagId {
    /// The tag every guideline scoped to `journey` depends on
    pub fn for_journey(journey: &JourneyId) -> Self {
        Self(format!("{}{}", JOURNEY_TAG_PREFIX, journey))
    }

    /// Extract the journey id from a journey tag
    pub fn journey_id(&self) -> Option<JourneyId> {
        self.0
            .strip_prefix(JOURNEY_TAG_PREFIX)
            .map(|id| JourneyId(id.to_string()))
    }
}

impl GuidelineId {
    /// Id for a guideline synthesized during a matching cycle and never stored
    pub fn transient() -> Self {
        Self(format!("<transient_{}>", Uuid::new_v4().simple()))
    }

    pub fn is_transient(&self) -> bool {
        self.0.starts_with("<transient_")
    }
}
