//! Opaque identity of the principal that uploaded an object.

use serde::{Deserialize, Serialize};
use std::fmt;

const OWNER_ID_MAX_LEN: usize = 64;

/// Identifier of an authenticated upload owner.
///
/// The store never checks that the principal exists. The value is only a
/// namespace partition inside storage keys, so construction enforces the
/// key-safe alphabet instead of any account semantics.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
    /// Accepts `[A-Za-z0-9_-]`, 1..=64 characters. Anything else is not a
    /// usable namespace component and is treated as absent by callers.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > OWNER_ID_MAX_LEN {
            return None;
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return None;
        }
        Some(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
