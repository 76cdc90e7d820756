//! Image references.
//!
//! An image is either a transient local preview (a `data:` URI shown while
//! the upload is in flight) or a durable remote URL. Both travel as a plain
//! string and are told apart by prefix.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const DATA_URI_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageRef {
    /// Local preview, never persisted remotely on purpose.
    Preview(String),
    /// Durable URL returned by binary storage.
    Remote(String),
}

impl ImageRef {
    pub fn parse(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.starts_with(DATA_URI_PREFIX) {
            Self::Preview(value)
        } else {
            Self::Remote(value)
        }
    }

    /// Build a preview from raw image bytes.
    pub fn preview(content_type: &str, bytes: &[u8]) -> Self {
        Self::Preview(format!(
            "{}{};base64,{}",
            DATA_URI_PREFIX,
            content_type,
            STANDARD.encode(bytes)
        ))
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self::Remote(url.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Preview(s) | Self::Remote(s) => s,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Preview(_))
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Previews can be megabytes; never dump them into logs.
            Self::Preview(s) => write!(f, "<preview {} bytes>", s.len()),
            Self::Remote(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(raw))
    }
}

/// Replace or drop every occurrence of `from` in an optional slot.
pub(crate) fn swap_in_slot(
    slot: &mut Option<ImageRef>,
    from: &ImageRef,
    to: Option<&ImageRef>,
) -> bool {
    if slot.as_ref() == Some(from) {
        *slot = to.cloned();
        true
    } else {
        false
    }
}

/// Replace or drop every occurrence of `from` in a list.
pub(crate) fn swap_in_list(
    list: &mut Vec<ImageRef>,
    from: &ImageRef,
    to: Option<&ImageRef>,
) -> bool {
    let before = list.len();
    let mut changed = false;
    match to {
        Some(to) => {
            for image in list.iter_mut() {
                if image == from {
                    *image = to.clone();
                    changed = true;
                }
            }
        }
        None => {
            list.retain(|image| image != from);
            changed = list.len() != before;
        }
    }
    changed
}
