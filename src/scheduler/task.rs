//! Priority tiers and queued tasks.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

use crate::error::Error;

/// Urgency tier of a scheduled task. Lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Needed for playback that is about to start.
    PlaybackCritical = 0,
    /// Triggered by an explicit user action such as search.
    Interactive = 1,
    /// Trending and recommendation lists.
    Ambient = 2,
    /// Speculative prefetch.
    Background = 3,
}

impl Priority {
    /// All tiers, most urgent first.
    pub const ALL: [Priority; 4] = [
        Priority::PlaybackCritical,
        Priority::Interactive,
        Priority::Ambient,
        Priority::Background,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlaybackCritical => "playback_critical",
            Self::Interactive => "interactive",
            Self::Ambient => "ambient",
            Self::Background => "background",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Background
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_lowercase().as_str() {
            "playback" | "playback_critical" | "playback-critical" | "critical" => {
                Ok(Self::PlaybackCritical)
            }
            "interactive" | "search" => Ok(Self::Interactive),
            "ambient" | "trending" | "recommendations" => Ok(Self::Ambient),
            "background" | "prefetch" => Ok(Self::Background),
            other => Err(Error::invalid_input(format!("unknown priority {:?}", other))),
        }
    }
}

/// Work executed by a scheduler worker.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A queued unit of work.
///
/// Ordered by priority, then enqueue time, then submission sequence, so the
/// order is total and strictly FIFO within a tier.
pub struct PriorityTask {
    pub priority: Priority,
    pub id: String,
    pub enqueued_at: Instant,
    pub(crate) seq: u64,
    pub(crate) work: TaskFuture,
}

impl PriorityTask {
    pub(crate) fn new(priority: Priority, id: String, seq: u64, work: TaskFuture) -> Self {
        Self {
            priority,
            id,
            enqueued_at: Instant::now(),
            seq,
            work,
        }
    }
}

impl Ord for PriorityTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.enqueued_at.cmp(&other.enqueued_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PriorityTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PriorityTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityTask {}

impl std::fmt::Debug for PriorityTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityTask")
            .field("priority", &self.priority)
            .field("id", &self.id)
            .field("seq", &self.seq)
            .finish()
    }
}
