//! Singleflight resolution coordinator.
//!
//! [`Coordinator::resolve`] is the only path to the [`Resolver`]. It answers
//! from the cache when it can, and otherwise serializes resolutions per
//! identifier through the [`LockRegistry`], so at most one resolver call per
//! identifier is in flight at any time. Concurrent callers for the same
//! identifier wait on the lock and then find the first caller's result (or
//! tombstone) in the cache.

mod expiry;

pub use expiry::{compute_expiry, url_expiry};

use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{CacheStore, FailureClass, FailureEntry, MetadataEntry, ResolutionEntry};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::locks::{KeyLease, LockRegistry};
use crate::resolver::{MediaMetadata, Resolver};

/// A shared limiter for resolver calls.
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a limiter admitting `calls_per_minute` resolver calls.
pub fn create_limiter(calls_per_minute: u32) -> Option<SharedLimiter> {
    let quota = Quota::per_minute(NonZeroU32::new(calls_per_minute)?);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Timing and lifetime policy for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub lock_timeout: Duration,
    pub default_horizon: Duration,
    pub empty_ttl: Duration,
    pub unavailable_ttl: Duration,
    pub metadata_ttl: Duration,
    pub expiry_margin: Duration,
    /// Resolver calls per minute; 0 disables rate limiting.
    pub max_calls_per_minute: u32,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_timeout: config.locks.acquire_timeout(),
            default_horizon: config.cache.success_ttl(),
            empty_ttl: config.cache.empty_ttl(),
            unavailable_ttl: config.cache.unavailable_ttl(),
            metadata_ttl: config.cache.metadata_ttl(),
            expiry_margin: config.cache.expiry_margin(),
            max_calls_per_minute: config.resolver.max_calls_per_minute,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Resolves identifiers through the cache, one resolver call per identifier at a time.
pub struct Coordinator {
    resolver: Arc<dyn Resolver>,
    cache: Arc<CacheStore>,
    locks: LockRegistry,
    limiter: Option<SharedLimiter>,
    settings: CoordinatorSettings,
    resolver_calls: AtomicU64,
}

impl Coordinator {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        cache: Arc<CacheStore>,
        locks: LockRegistry,
        settings: CoordinatorSettings,
    ) -> Self {
        let limiter = create_limiter(settings.max_calls_per_minute);
        Self {
            resolver,
            cache,
            locks,
            limiter,
            settings,
            resolver_calls: AtomicU64::new(0),
        }
    }

    /// Resolve `id` into a fresh, directly fetchable URL.
    pub async fn resolve(&self, id: &str) -> Result<ResolutionEntry> {
        if let Some(outcome) = self.cached_outcome(id) {
            return outcome;
        }

        let lease = self.locks.acquire(id, self.settings.lock_timeout).await?;

        // Another caller may have finished while we waited for the lock.
        if let Some(outcome) = self.cached_outcome(id) {
            tracing::debug!(id = %id, "Resolution completed by concurrent caller");
            return outcome;
        }

        self.resolve_locked(id, &lease).await
    }

    /// Peek at a live cached resolution without resolving.
    pub fn cached(&self, id: &str) -> Option<ResolutionEntry> {
        self.cache.resolved().get(id)
    }

    /// Purge the cached resolution for `id`, e.g. after the URL proved stale.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.cache.resolved().remove(id).is_some();
        if removed {
            tracing::debug!(id = %id, "Invalidated cached resolution");
        }
        removed
    }

    /// Metadata for `id`, resolving first when nothing is cached.
    pub async fn metadata(&self, id: &str) -> Result<Option<MediaMetadata>> {
        if let Some(entry) = self.cache.metadata().get(id) {
            return Ok(Some(entry.metadata));
        }
        // The descriptor only arrives with a resolver call, so a cached URL
        // must not short-circuit it.
        self.invalidate(id);
        self.resolve(id).await?;
        Ok(self.cache.metadata().get(id).map(|entry| entry.metadata))
    }

    /// Number of resolver calls issued since startup.
    pub fn resolver_calls(&self) -> u64 {
        self.resolver_calls.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    fn cached_outcome(&self, id: &str) -> Option<Result<ResolutionEntry>> {
        if let Some(failure) = self.cache.failures().get(id) {
            tracing::debug!(id = %id, class = ?failure.class, "Negative cache hit");
            return Some(Err(failure.replay_error()));
        }
        self.cache.resolved().get(id).map(Ok)
    }

    async fn resolve_locked(&self, id: &str, lease: &KeyLease) -> Result<ResolutionEntry> {
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = limiter.until_ready() => {}
                _ = lease.cancelled() => return Err(self.abandoned(id, lease)),
            }
        }

        self.resolver_calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        tracing::info!(id = %id, resolver = self.resolver.name(), "Resolving");

        let outcome = tokio::select! {
            outcome = self.resolver.resolve(id) => outcome,
            _ = lease.cancelled() => return Err(self.abandoned(id, lease)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(resolution) => {
                let now = Utc::now();
                let expires_at = compute_expiry(
                    &resolution.url,
                    resolution.expiry_hint,
                    now,
                    self.settings.expiry_margin,
                    self.settings.default_horizon,
                );

                let entry = ResolutionEntry {
                    id: id.to_string(),
                    url: resolution.url,
                    content_type: resolution.content_type,
                    expires_at,
                };

                if entry.is_expired(now) {
                    tracing::warn!(id = %id, expires_at = %expires_at, "Resolver returned an already-expired URL");
                }

                // A result that outlived its lease must not overwrite a newer one.
                let metadata = resolution.metadata;
                self.locks
                    .commit_if_current(lease, || {
                        if let Some(metadata) = metadata {
                            self.cache.metadata().insert(
                                id,
                                MetadataEntry {
                                    id: id.to_string(),
                                    metadata,
                                },
                                self.settings.metadata_ttl,
                            );
                        }
                        self.cache
                            .resolved()
                            .insert_until(id, entry.clone(), expires_at);
                    })
                    .ok_or_else(|| self.abandoned(id, lease))?;

                tracing::info!(id = %id, elapsed_ms, expires_at = %expires_at, "Resolved");
                Ok(entry)
            }
            Err(e) => {
                let failure = FailureEntry::from_resolve_error(id, &e);
                let ttl = match failure.class {
                    FailureClass::Empty => self.settings.empty_ttl,
                    FailureClass::Unavailable => self.settings.unavailable_ttl,
                };
                let err = failure.to_error();

                self.locks
                    .commit_if_current(lease, || self.cache.failures().insert(id, failure, ttl))
                    .ok_or_else(|| self.abandoned(id, lease))?;

                tracing::warn!(
                    id = %id,
                    elapsed_ms,
                    error = %e,
                    negative_ttl_secs = ttl.as_secs(),
                    "Resolution failed; caching tombstone"
                );
                Err(err)
            }
        }
    }

    fn abandoned(&self, id: &str, lease: &KeyLease) -> Error {
        tracing::warn!(
            id = %id,
            generation = lease.generation(),
            "Resolution lock reclaimed; discarding in-flight result"
        );
        Error::LockTimeout(id.to_string())
    }
}
