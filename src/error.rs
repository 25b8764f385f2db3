//! Error taxonomy for resolution and streaming.
//!
//! Every failure that reaches a client is expressed as one of these variants.
//! Resolver-facing errors are converted at the coordinator boundary, so the
//! HTTP layer never sees a raw upstream error.

/// Common error type for nova-stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The resolver found no playable stream (negatively cached).
    #[error("No playable stream for {id}: {reason}")]
    ResolverEmpty { id: String, reason: String },

    /// The resolver call failed or timed out (negatively cached, shorter TTL).
    #[error("Resolver unavailable for {id}: {reason}")]
    ResolverUnavailable { id: String, reason: String },

    /// Waiting for the per-identifier resolution lock exceeded its bound.
    #[error("Timed out waiting for resolution of {0}")]
    LockTimeout(String),

    /// The upstream byte transfer could not be started or broke mid-stream.
    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),

    /// The upstream host did not answer in time.
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The resolved URL expired and re-resolution did not produce a fresh one.
    #[error("Resolved URL for {0} is stale")]
    StaleUrl(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The background scheduler rejected a submission.
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new ResolverEmpty error.
    pub fn empty<I: Into<String>, R: Into<String>>(id: I, reason: R) -> Self {
        Self::ResolverEmpty {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ResolverUnavailable error.
    pub fn unavailable<I: Into<String>, R: Into<String>>(id: I, reason: R) -> Self {
        Self::ResolverUnavailable {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code this error maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ResolverEmpty { .. } => 404,
            Self::ResolverUnavailable { .. } => 502,
            Self::LockTimeout(_) => 503,
            Self::UpstreamStream(_) => 502,
            Self::UpstreamTimeout(_) => 504,
            Self::StaleUrl(_) => 502,
            Self::InvalidInput(_) => 400,
            Self::SchedulerUnavailable(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code used in JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResolverEmpty { .. } => "resolver_empty",
            Self::ResolverUnavailable { .. } => "resolver_unavailable",
            Self::LockTimeout(_) => "lock_timeout",
            Self::UpstreamStream(_) => "upstream_stream_error",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::StaleUrl(_) => "stale_url",
            Self::InvalidInput(_) => "invalid_input",
            Self::SchedulerUnavailable(_) => "scheduler_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
