//! Lookup configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Upstream snapshot dataset.
    #[serde(default)]
    pub source: SourceConfig,

    /// Persistent cache parameters.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Fetch admission parameters.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Where snapshots are fetched from and how politely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL; candidate paths are appended as `{base_url}/{STATE}/{name}.{ext}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// File extension of snapshot documents.
    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout. Unset means requests run to completion.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Upper bound on requests per second against the upstream host.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

/// Cache freshness and eviction bounds (all durations in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database file.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Entries younger than this are served without refetching.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Entries older than this are deleted by the sweep regardless of count.
    #[serde(default = "default_expiry")]
    pub expiry_secs: u64,

    /// Maximum entries kept after a sweep.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum fetch tasks in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────

const DAY_SECS: u64 = 24 * 60 * 60;

/// Longest ttl or expiry honoured; larger values are clamped to this.
pub const MAX_CACHE_SECS: u64 = 100 * 365 * DAY_SECS;

fn default_base_url() -> String {
    "https://raw.githubusercontent.com/LukePrior/nbn-upgrade-map/main/results".into()
}
fn default_extension() -> String {
    "geojson".into()
}
fn default_user_agent() -> String {
    "nbn-lookup/0.1".into()
}
fn default_requests_per_second() -> u32 {
    10
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("nbn-lookup-cache.sqlite3")
}
fn default_ttl() -> u64 {
    7 * DAY_SECS
}
fn default_expiry() -> u64 {
    28 * DAY_SECS
}
fn default_max_entries() -> usize {
    100
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            extension: default_extension(),
            user_agent: default_user_agent(),
            timeout_secs: None,
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_ttl(),
            expiry_secs: default_expiry(),
            max_entries: default_max_entries(),
        }
    }
}

fn clamped_seconds(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_CACHE_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        clamped_seconds(self.ttl_secs)
    }

    pub fn expiry(&self) -> chrono::Duration {
        clamped_seconds(self.expiry_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}
