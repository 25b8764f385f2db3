//! Per-identifier resolution locks.
//!
//! The [`LockRegistry`] hands out one async mutex per content identifier on
//! demand. Holding a [`KeyLease`] means "I am the only caller resolving this
//! identifier". Handles are dropped from the registry as soon as they are
//! free and nobody is waiting, and a reaper force-frees handles held past a
//! staleness threshold.
//!
//! Forced reclamation cannot stop a resolver call that is already running.
//! Instead each handle carries a [`CancellationToken`] that is cancelled on
//! reclamation, and [`LockRegistry::commit_if_current`] only lets the holder
//! write its result while it still owns the identifier.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::config::LockConfig;
use crate::error::{Error, Result};

/// One mutual-exclusion handle for one identifier.
struct LockHandle {
    generation: u64,
    mutex: Arc<tokio::sync::Mutex<()>>,
    held_since: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl LockHandle {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            held_since: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn held_for(&self, now: Instant) -> Option<Duration> {
        self.held_since
            .lock()
            .map(|since| now.saturating_duration_since(since))
    }
}

struct RegistryInner {
    handles: DashMap<String, Arc<LockHandle>>,
    next_generation: AtomicU64,
    stale_after: Duration,
    max_handles: usize,
}

/// Registry of per-identifier locks. Cheap to clone.
#[derive(Clone)]
pub struct LockRegistry {
    inner: Arc<RegistryInner>,
}

impl LockRegistry {
    /// Create a registry that reclaims handles held longer than `stale_after`
    /// and forces a sweep once more than `max_handles` are outstanding.
    pub fn new(stale_after: Duration, max_handles: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                handles: DashMap::new(),
                next_generation: AtomicU64::new(1),
                stale_after,
                max_handles: max_handles.max(1),
            }),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(config.stale_after(), config.max_handles)
    }

    /// Acquire the lock for `key`, waiting at most `timeout`.
    ///
    /// On timeout the handle blocking us is reclaimed if it has been held past
    /// the staleness threshold, so one stuck attempt cannot block every later
    /// caller.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<KeyLease> {
        if self.inner.handles.len() > self.inner.max_handles {
            tracing::warn!(
                outstanding = self.inner.handles.len(),
                max = self.inner.max_handles,
                "Lock registry over capacity; forcing sweep"
            );
            self.sweep();
        }

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let handle = self.handle_for(key);
            let lock = Arc::clone(&handle.mutex).lock_owned();

            let guard = tokio::select! {
                guard = lock => Some(guard),
                _ = handle.cancel.cancelled() => None,
                _ = tokio::time::sleep_until(deadline) => {
                    self.reclaim_if_stale(key, &handle);
                    return Err(Error::LockTimeout(key.to_string()));
                }
            };

            match guard {
                Some(guard) if self.owns(key, &handle) => {
                    *handle.held_since.lock() = Some(Instant::now());
                    return Ok(KeyLease {
                        key: key.to_string(),
                        handle,
                        registry: Arc::clone(&self.inner),
                        _guard: guard,
                    });
                }
                // The handle was reclaimed while we waited; queue on its replacement.
                _ => continue,
            }
        }
    }

    /// Run `commit` only if `lease` still owns its identifier.
    ///
    /// The registry entry stays read-locked while `commit` runs, so a
    /// concurrent reclaim cannot slip in between the ownership check and the
    /// write. `commit` must not touch this registry.
    pub fn commit_if_current<T>(&self, lease: &KeyLease, commit: impl FnOnce() -> T) -> Option<T> {
        let current = self.inner.handles.get(&lease.key)?;
        if !Arc::ptr_eq(current.value(), &lease.handle) || lease.is_cancelled() {
            return None;
        }
        let committed = commit();
        drop(current);
        Some(committed)
    }

    /// Force-free every handle held longer than the staleness threshold and
    /// drop idle handles. Returns the number of handles reclaimed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<(String, Arc<LockHandle>)> = self
            .inner
            .handles
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .held_for(now)
                    .is_some_and(|held| held >= self.inner.stale_after)
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut reclaimed = 0;
        for (key, handle) in stale {
            if self.reclaim(&key, &handle) {
                reclaimed += 1;
            }
        }

        // Free handles nobody holds or waits on.
        self.inner.handles.retain(|_, handle| {
            handle.held_since.lock().is_some() || Arc::strong_count(handle) > 1
        });

        reclaimed
    }

    /// Number of outstanding handles.
    pub fn len(&self) -> usize {
        self.inner.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.handles.is_empty()
    }

    /// Whether a live handle exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.handles.contains_key(key)
    }

    fn handle_for(&self, key: &str) -> Arc<LockHandle> {
        let entry = self
            .inner
            .handles
            .entry(key.to_string())
            .or_insert_with(|| {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                Arc::new(LockHandle::new(generation))
            });
        Arc::clone(entry.value())
    }

    fn owns(&self, key: &str, handle: &Arc<LockHandle>) -> bool {
        !handle.cancel.is_cancelled()
            && self
                .inner
                .handles
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), handle))
    }

    fn reclaim_if_stale(&self, key: &str, handle: &Arc<LockHandle>) {
        let stale = handle
            .held_for(Instant::now())
            .is_some_and(|held| held >= self.inner.stale_after);
        if stale {
            self.reclaim(key, handle);
        }
    }

    /// Detach `handle` from the registry and cancel it. The map entry is
    /// removed before cancelling so woken waiters find a fresh handle.
    fn reclaim(&self, key: &str, handle: &Arc<LockHandle>) -> bool {
        let removed = self
            .inner
            .handles
            .remove_if(key, |_, current| Arc::ptr_eq(current, handle))
            .is_some();

        if removed {
            handle.cancel.cancel();
            tracing::warn!(
                key = %key,
                generation = handle.generation,
                held_ms = handle
                    .held_for(Instant::now())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                "Force-reclaimed stuck resolution lock"
            );
        }

        removed
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::from_config(&LockConfig::default())
    }
}

/// Exclusive right to resolve one identifier. Released on drop.
pub struct KeyLease {
    key: String,
    handle: Arc<LockHandle>,
    registry: Arc<RegistryInner>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation
    }

    /// Completes when this lease is force-reclaimed.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.handle.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.cancel.is_cancelled()
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        *self.handle.held_since.lock() = None;

        // Drop the handle if only the registry and this lease reference it.
        self.registry.handles.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, &self.handle) && Arc::strong_count(current) <= 2
        });
    }
}

impl std::fmt::Debug for KeyLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLease")
            .field("key", &self.key)
            .field("generation", &self.handle.generation)
            .finish()
    }
}

/// Start a background task that periodically reaps stale lock handles.
pub fn start_sweep_task(registry: LockRegistry, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let reclaimed = registry.sweep();
            if reclaimed > 0 {
                tracing::warn!(reclaimed, "Lock sweep reclaimed stuck handles");
            }
        }
    })
}
