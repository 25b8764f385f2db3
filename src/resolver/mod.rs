//! Resolver collaborator contract.
//!
//! A [`Resolver`] turns an opaque content identifier into a time-limited,
//! directly fetchable media URL plus optional descriptive metadata. The
//! coordinator treats it as slow, rate-limited and not safely cancellable,
//! so implementations only need to be correct, not fast.
//!
//! - [`command`] -- Production resolver backed by an external extractor tool.

pub mod command;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use command::{check_tool, CommandResolver, ToolInfo};

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Successful output of a resolver call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Directly fetchable media URL (usually signed and short-lived).
    pub url: String,
    /// MIME type of the media behind `url`.
    pub content_type: String,
    /// Expiry reported by the resolver, used when the URL carries none.
    pub expiry_hint: Option<DateTime<Utc>>,
    /// Descriptor cached separately from the URL.
    pub metadata: Option<MediaMetadata>,
}

impl Resolution {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            expiry_hint: None,
            metadata: None,
        }
    }

    pub fn with_expiry_hint(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_hint = Some(expiry);
        self
    }

    pub fn with_metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Descriptive data about a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub title: String,
    /// Duration in seconds, if known.
    pub duration: Option<f64>,
    /// Largest thumbnail URL, if any.
    pub thumbnail: Option<String>,
    /// Raw format list as reported by the resolver.
    #[serde(default)]
    pub formats: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The identifier does not name an available item.
    #[error("content not found")]
    NotFound,

    /// The item exists but exposes no playable format.
    #[error("no playable format")]
    NoPlayableFormat,

    /// The resolver or its upstream failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The resolver did not answer within its own timeout.
    #[error("resolver timed out")]
    Timeout,
}

impl ResolveError {
    /// Whether the failure says something about the identifier itself rather
    /// than about the resolver's health.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoPlayableFormat)
    }
}

// ---------------------------------------------------------------------------
// Resolver trait
// ---------------------------------------------------------------------------

/// Async trait implemented by every resolution backend.
///
/// Implementations must be shareable across tasks; the coordinator holds one
/// behind an `Arc<dyn Resolver>`.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Short, lowercase identifier for this resolver (e.g. `"command"`).
    fn name(&self) -> &'static str;

    /// Resolve `id` into a fetchable URL.
    async fn resolve(&self, id: &str) -> Result<Resolution, ResolveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitive_errors() {
        assert!(ResolveError::NotFound.is_definitive());
        assert!(ResolveError::NoPlayableFormat.is_definitive());
        assert!(!ResolveError::Timeout.is_definitive());
        assert!(!ResolveError::Upstream("503".into()).is_definitive());
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let meta = MediaMetadata {
            title: "Sandstorm".into(),
            duration: Some(225.0),
            thumbnail: Some("https://i.example/t.jpg".into()),
            formats: Vec::new(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["title"], "Sandstorm");
        assert_eq!(json["duration"], 225.0);
        assert_eq!(json["thumbnail"], "https://i.example/t.jpg");
    }
}
