//! Multi-tier resolution cache.
//!
//! Three independently bounded tables keyed by content identifier:
//!
//! - **resolved** -- signed URLs, living until the URL itself expires.
//! - **failures** -- tombstones that short-circuit repeated failing lookups.
//! - **metadata** -- descriptors, kept far longer than the URLs they came with.

mod entries;
mod table;

pub use entries::{FailureClass, FailureEntry, MetadataEntry, ResolutionEntry};
pub use table::TtlTable;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

/// Owner of the three cache tables.
pub struct CacheStore {
    resolved: TtlTable<ResolutionEntry>,
    failures: TtlTable<FailureEntry>,
    metadata: TtlTable<MetadataEntry>,
}

/// Entry counts per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheSizes {
    pub resolved: usize,
    pub failures: usize,
    pub metadata: usize,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            resolved: TtlTable::new("resolved", config.max_resolved),
            failures: TtlTable::new("failures", config.max_failures),
            metadata: TtlTable::new("metadata", config.max_metadata),
        }
    }

    pub fn resolved(&self) -> &TtlTable<ResolutionEntry> {
        &self.resolved
    }

    pub fn failures(&self) -> &TtlTable<FailureEntry> {
        &self.failures
    }

    pub fn metadata(&self) -> &TtlTable<MetadataEntry> {
        &self.metadata
    }

    /// Drop expired entries from every table.
    pub fn sweep(&self) -> CacheSizes {
        let removed = CacheSizes {
            resolved: self.resolved.sweep(),
            failures: self.failures.sweep(),
            metadata: self.metadata.sweep(),
        };

        if removed != CacheSizes::default() {
            tracing::debug!(
                resolved = removed.resolved,
                failures = removed.failures,
                metadata = removed.metadata,
                "Swept expired cache entries"
            );
        }

        removed
    }

    pub fn sizes(&self) -> CacheSizes {
        CacheSizes {
            resolved: self.resolved.len(),
            failures: self.failures.len(),
            metadata: self.metadata.len(),
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Start a background task that periodically sweeps expired entries.
pub fn start_sweep_task(store: Arc<CacheStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            store.sweep();
        }
    })
}
