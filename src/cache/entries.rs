//! Values stored in the three cache tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::resolver::{MediaMetadata, ResolveError};

/// A successfully resolved, directly fetchable URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionEntry {
    #[serde(skip_serializing)]
    #[serde(default)]
    pub id: String,
    pub url: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
}

impl ResolutionEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Why a resolution attempt was negatively cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The resolver found nothing playable for the identifier.
    Empty,
    /// The resolver itself failed; retried sooner.
    Unavailable,
}

/// Tombstone left by a failed resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub id: String,
    pub class: FailureClass,
    pub reason: String,
}

impl FailureEntry {
    pub fn from_resolve_error(id: &str, err: &ResolveError) -> Self {
        let class = if err.is_definitive() {
            FailureClass::Empty
        } else {
            FailureClass::Unavailable
        };
        Self {
            id: id.to_string(),
            class,
            reason: err.to_string(),
        }
    }

    /// The error returned to the caller whose resolution failed.
    pub fn to_error(&self) -> Error {
        match self.class {
            FailureClass::Empty => Error::empty(&self.id, &self.reason),
            FailureClass::Unavailable => Error::unavailable(&self.id, &self.reason),
        }
    }

    /// The error returned to later callers while the tombstone is live.
    ///
    /// A cached failure always fails fast as [`Error::ResolverEmpty`]; the
    /// class only decides how long the tombstone lives.
    pub fn replay_error(&self) -> Error {
        Error::empty(&self.id, &self.reason)
    }
}

/// Descriptor cached independently of the short-lived URL.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub id: String,
    pub metadata: MediaMetadata,
}
