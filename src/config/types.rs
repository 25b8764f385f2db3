use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Lifetimes and capacities of the three cache tables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Horizon for resolved URLs that carry no expiry of their own.
    #[serde(default = "default_success_ttl")]
    pub success_ttl_secs: u64,

    /// Tombstone lifetime after the resolver reported no playable stream.
    #[serde(default = "default_empty_ttl")]
    pub empty_ttl_secs: u64,

    /// Tombstone lifetime after the resolver failed or timed out.
    #[serde(default = "default_unavailable_ttl")]
    pub unavailable_ttl_secs: u64,

    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_secs: u64,

    /// Subtracted from expiries embedded in resolved URLs.
    #[serde(default = "default_expiry_margin")]
    pub expiry_margin_secs: u64,

    #[serde(default = "default_max_resolved")]
    pub max_resolved: usize,

    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    #[serde(default = "default_max_metadata")]
    pub max_metadata: usize,

    #[serde(default = "default_cache_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_success_ttl() -> u64 {
    7200
}
fn default_empty_ttl() -> u64 {
    300
}
fn default_unavailable_ttl() -> u64 {
    60
}
fn default_metadata_ttl() -> u64 {
    86400
}
fn default_expiry_margin() -> u64 {
    30
}
fn default_max_resolved() -> usize {
    4096
}
fn default_max_failures() -> usize {
    4096
}
fn default_max_metadata() -> usize {
    1000
}
fn default_cache_sweep_interval() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            success_ttl_secs: default_success_ttl(),
            empty_ttl_secs: default_empty_ttl(),
            unavailable_ttl_secs: default_unavailable_ttl(),
            metadata_ttl_secs: default_metadata_ttl(),
            expiry_margin_secs: default_expiry_margin(),
            max_resolved: default_max_resolved(),
            max_failures: default_max_failures(),
            max_metadata: default_max_metadata(),
            sweep_interval_secs: default_cache_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// How long a caller waits for another caller's resolution of the same id.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// A handle held longer than this is reclaimed by the sweep.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Outstanding handles above this force an immediate sweep.
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,

    #[serde(default = "default_lock_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_acquire_timeout() -> u64 {
    35
}
fn default_stale_after() -> u64 {
    30
}
fn default_max_handles() -> usize {
    10_000
}
fn default_lock_sweep_interval() -> u64 {
    10
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: default_acquire_timeout(),
            stale_after_secs: default_stale_after(),
            max_handles: default_max_handles(),
            sweep_interval_secs: default_lock_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending tasks above this are rejected at submission.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,

    /// Maximum identifiers accepted by one prefetch request.
    #[serde(default = "default_max_prefetch_batch")]
    pub max_prefetch_batch: usize,
}

fn default_workers() -> usize {
    4
}
fn default_max_queued() -> usize {
    1000
}
fn default_max_prefetch_batch() -> usize {
    50
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_queued: default_max_queued(),
            max_prefetch_batch: default_max_prefetch_batch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Time allowed for the upstream to answer with headers.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_response_timeout() -> u64 {
    15
}
fn default_user_agent() -> String {
    format!("nova-stream/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            response_timeout_secs: default_response_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Extractor executable, looked up on PATH when not absolute.
    #[serde(default = "default_command")]
    pub command: String,

    /// Page URL handed to the extractor; `{id}` is replaced by the content id.
    #[serde(default = "default_page_url")]
    pub page_url: String,

    /// Format selector passed with `-f`.
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default = "default_resolver_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Resolver calls admitted per minute (0 disables the limiter).
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: u32,
}

fn default_command() -> String {
    "yt-dlp".to_string()
}
fn default_page_url() -> String {
    "https://www.youtube.com/watch?v={id}".to_string()
}
fn default_format() -> String {
    "bestaudio/best".to_string()
}
fn default_resolver_timeout() -> u64 {
    30
}
fn default_max_calls_per_minute() -> u32 {
    60
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            page_url: default_page_url(),
            format: default_format(),
            timeout_secs: default_resolver_timeout(),
            extra_args: Vec::new(),
            max_calls_per_minute: default_max_calls_per_minute(),
        }
    }
}

impl CacheConfig {
    pub fn success_ttl(&self) -> Duration {
        Duration::from_secs(self.success_ttl_secs)
    }

    pub fn empty_ttl(&self) -> Duration {
        Duration::from_secs(self.empty_ttl_secs)
    }

    pub fn unavailable_ttl(&self) -> Duration {
        Duration::from_secs(self.unavailable_ttl_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    pub fn expiry_margin(&self) -> Duration {
        Duration::from_secs(self.expiry_margin_secs)
    }
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
