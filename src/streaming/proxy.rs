//! Range-forwarding proxy for resolved media URLs.
//!
//! The proxy resolves a content identifier through the [`Coordinator`] and then
//! relays the upstream bytes as they arrive. No lock is held during the
//! transfer; the resolution lock only covers the resolver call itself.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResolutionEntry;
use crate::config::ProxyConfig;
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};

/// Upstream headers relayed to the client.
const FORWARDED_HEADERS: [HeaderName; 4] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
];

/// One initial attempt plus one re-resolution for a stale URL.
const MAX_ATTEMPTS: usize = 2;

/// Streams resolved media to clients, forwarding byte ranges upstream.
pub struct StreamProxy {
    coordinator: Arc<Coordinator>,
    client: reqwest::Client,
    response_timeout: Duration,
}

impl StreamProxy {
    pub fn new(coordinator: Arc<Coordinator>, config: &ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            coordinator,
            client,
            response_timeout: Duration::from_secs(config.response_timeout_secs),
        })
    }

    /// Open an upstream stream for `id`, forwarding `range` verbatim.
    ///
    /// An already-expired resolution, or an upstream 403/410, purges the cached
    /// URL and re-resolves once before failing with [`Error::StaleUrl`]. Any
    /// other non-2xx upstream answer purges the URL and fails with
    /// [`Error::UpstreamStream`].
    pub async fn open(&self, id: &str, range: Option<&str>) -> Result<ProxiedStream> {
        for attempt in 1..=MAX_ATTEMPTS {
            let entry = self.coordinator.resolve(id).await?;

            if entry.is_expired(Utc::now()) {
                tracing::warn!(id = %id, attempt, expires_at = %entry.expires_at, "Resolved URL already expired");
                self.coordinator.invalidate(id);
                continue;
            }

            let response = self.fetch(id, &entry, range).await?;
            let status = response.status().as_u16();

            if status == 403 || status == 410 {
                tracing::warn!(id = %id, attempt, status, "Upstream rejected signed URL; re-resolving");
                self.coordinator.invalidate(id);
                continue;
            }

            if !response.status().is_success() {
                tracing::warn!(id = %id, attempt, status, "Upstream refused stream; dropping cached URL");
                self.coordinator.invalidate(id);
                return Err(Error::UpstreamStream(format!(
                    "{}: upstream answered {}",
                    id, status
                )));
            }

            tracing::debug!(id = %id, status, range = ?range, "Streaming upstream response");
            return Ok(ProxiedStream::forward(id, &entry, response));
        }

        Err(Error::StaleUrl(id.to_string()))
    }

    async fn fetch(
        &self,
        id: &str,
        entry: &ResolutionEntry,
        range: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.get(&entry.url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }

        match tokio::time::timeout(self.response_timeout, request.send()).await {
            Err(_) => Err(Error::UpstreamTimeout(format!(
                "{}: no response within {}s",
                id,
                self.response_timeout.as_secs()
            ))),
            Ok(Err(e)) if e.is_timeout() => {
                Err(Error::UpstreamTimeout(format!("{}: {}", id, e.without_url())))
            }
            Ok(Err(e)) => Err(Error::UpstreamStream(format!("{}: {}", id, e.without_url()))),
            Ok(Ok(response)) => Ok(response),
        }
    }
}

/// An upstream response ready to be relayed to the client.
#[derive(Debug)]
pub struct ProxiedStream {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl ProxiedStream {
    fn forward(id: &str, entry: &ResolutionEntry, response: reqwest::Response) -> Self {
        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            let value = response
                .headers()
                .get(name.as_str())
                .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());
            if let Some(value) = value {
                headers.insert(name, value);
            }
        }

        if !headers.contains_key(header::CONTENT_TYPE) {
            if let Ok(value) = HeaderValue::from_str(&entry.content_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(&content_disposition(id)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }

        let stream_id = id.to_string();
        let stream = response.bytes_stream().map_err(move |e| {
            let e = e.without_url();
            tracing::warn!(id = %stream_id, error = %e, "Upstream stream error; truncating response");
            std::io::Error::other(Error::UpstreamStream(e.to_string()))
        });

        Self {
            status,
            headers,
            body: Body::from_stream(stream),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl IntoResponse for ProxiedStream {
    fn into_response(self) -> Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// `Content-Disposition` for a streamed identifier.
pub fn content_disposition(id: &str) -> String {
    format!("inline; filename=\"{}.mp3\"", id)
}
