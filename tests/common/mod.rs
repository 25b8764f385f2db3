//! Shared test harness for integration tests.
//!
//! Provides [`StubResolver`] (a scriptable, call-counting resolver),
//! [`RangeResponder`] (a wiremock upstream that honours `Range`), and
//! [`TestHarness`] which builds a full [`AppContext`] around a stub. The
//! [`TestHarness::with_server`] constructor starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;

use nova_stream::config::Config;
use nova_stream::resolver::{Resolution, ResolveError, Resolver};
use nova_stream::server::{create_router, AppContext};

type Responder = dyn Fn(&str, usize) -> Result<Resolution, ResolveError> + Send + Sync;

/// Resolver double that counts calls and answers from a closure.
///
/// The closure receives the identifier and the 1-based call number.
pub struct StubResolver {
    calls: AtomicUsize,
    delay: Duration,
    responder: Box<Responder>,
}

impl StubResolver {
    pub fn scripted<F>(responder: F) -> Self
    where
        F: Fn(&str, usize) -> Result<Resolution, ResolveError> + Send + Sync + 'static,
    {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            responder: Box::new(responder),
        }
    }

    /// Always resolve to `url` with an `audio/mp4` content type.
    pub fn ok(url: impl Into<String>) -> Self {
        let url = url.into();
        Self::scripted(move |_, _| Ok(Resolution::new(url.clone(), "audio/mp4")))
    }

    /// Always fail with `err`.
    pub fn failing(err: ResolveError) -> Self {
        Self::scripted(move |_, _| Err(err.clone()))
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StubResolver {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn resolve(&self, id: &str) -> Result<Resolution, ResolveError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(id, call)
    }
}

/// Deterministic media body: byte `i` is `i % 251`.
pub fn media_fixture(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Wiremock responder serving a fixed body with single-range support.
pub struct RangeResponder {
    body: Vec<u8>,
    content_type: &'static str,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            content_type: "audio/mp4",
        }
    }
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let total = self.body.len();
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_range(v, total));

        match range {
            Some((start, end)) => wiremock::ResponseTemplate::new(206)
                .insert_header("content-type", self.content_type)
                .insert_header("accept-ranges", "bytes")
                .insert_header(
                    "content-range",
                    format!("bytes {}-{}/{}", start, end, total).as_str(),
                )
                .set_body_bytes(self.body[start..=end].to_vec()),
            None => wiremock::ResponseTemplate::new(200)
                .insert_header("content-type", self.content_type)
                .insert_header("accept-ranges", "bytes")
                .set_body_bytes(self.body.clone()),
        }
    }
}

fn parse_range(header: &str, total: usize) -> Option<(usize, usize)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => total - 1,
        end => end.parse::<usize>().ok()?.min(total - 1),
    };
    (start <= end).then_some((start, end))
}

/// Config suited to tests: no resolver rate limit, short lock waits.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.resolver.max_calls_per_minute = 0;
    config.locks.acquire_timeout_secs = 5;
    config.proxy.response_timeout_secs = 2;
    config.proxy.connect_timeout_secs = 2;
    config
}

/// Test harness wrapping a fully-constructed [`AppContext`] around a stub resolver.
pub struct TestHarness {
    pub ctx: AppContext,
    pub resolver: Arc<StubResolver>,
}

impl TestHarness {
    pub fn new(resolver: StubResolver) -> Self {
        Self::with_config(test_config(), resolver)
    }

    pub fn with_config(config: Config, resolver: StubResolver) -> Self {
        let resolver = Arc::new(resolver);
        let ctx = AppContext::new(config, resolver.clone()).expect("failed to build context");
        Self { ctx, resolver }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(resolver: StubResolver) -> (Self, SocketAddr) {
        let harness = Self::new(resolver);
        let app = harness.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }
}
