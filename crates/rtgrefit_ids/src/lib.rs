//! Shared identifier wrappers for RTG Refit.
//!
//! Remote documents are keyed by opaque strings. Identifiers minted locally
//! are UUID v4; identifiers received from the remote are accepted as-is as
//! long as they are usable as a storage path segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when an identifier is not a valid document key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

fn check_segment(value: &str, label: &str) -> Result<(), IdParseError> {
    if value.trim().is_empty() {
        return Err(IdParseError::new(format!("Invalid {}: empty", label)));
    }
    if value.contains('/') || value.chars().any(char::is_control) {
        return Err(IdParseError::new(format!(
            "Invalid {}: {:?} is not a valid document key",
            label, value
        )));
    }
    Ok(())
}

macro_rules! define_doc_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                check_segment(value, $label)?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_doc_id!(ScopeKey, "scope key");
define_doc_id!(UnitId, "unit ID");
define_doc_id!(ZoneId, "zone ID");
define_doc_id!(WorkOrderId, "work order ID");
define_doc_id!(PointId, "corrosion point ID");
define_doc_id!(PaintingSystemId, "painting system ID");
define_doc_id!(CoatingControlId, "coating control ID");
define_doc_id!(InspectionId, "inspection ID");
define_doc_id!(UserId, "user ID");
