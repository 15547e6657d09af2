//! Endpoint identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RelayLinkError, Result};

/// Normalized address identifying one logical connection target.
///
/// The registry caches exactly one connection per `Endpoint`, so two raw
/// target strings that normalize to the same value share a connection.
/// Normalization strips a trailing path separator: `ws://host:1/` and
/// `ws://host:1` are the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    /// Normalize and validate a raw connection target.
    ///
    /// Returns [`RelayLinkError::InvalidTarget`] when the input is empty
    /// (or becomes empty after normalization).
    pub fn try_new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let normalized = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if normalized.is_empty() {
            return Err(RelayLinkError::InvalidTarget(
                "endpoint must not be empty".to_string(),
            ));
        }
        Ok(Self(normalized.to_string()))
    }

    /// The normalized target string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
