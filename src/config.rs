//! Typed configuration bag (spec.md §6 constants, §9 "Configuration bag").
//!
//! The teacher repo parses a YAML file into a `Config` struct; that shape
//! doesn't apply here (config-file parsing is an explicit Non-goal). What
//! does carry over is the pattern of one struct with `Default` giving sane
//! defaults and small accessor methods rather than a stringly-typed map —
//! spec.md §9 calls the latter "a re-architecture hazard".

use std::time::Duration;

/// Default max body size prior to the per-format/compression factor
/// (spec.md §6).
pub const STREAMING_MAX_BODY_SIZE: u64 = 4 * 1024 * 1024;
pub const MAX_BLOBS_PER_BATCH: usize = 500;
pub const UPLOAD_BLOCK_SIZE: u64 = 8 * 1024 * 1024;
pub const UPLOAD_MAX_SINGLE_SIZE: u64 = 256 * 1024 * 1024;
pub const BLOB_UPLOAD_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
pub const FAILURE_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum in-memory/estimated source size the uploader will accept
    /// unless `ignore_size_limit` is set on the request properties.
    pub max_data_size: u64,
    pub upload_block_size: u64,
    pub upload_max_single_size: u64,
    pub blob_upload_timeout: Duration,
    /// Bounds simultaneous storage uploads and file-level (chunked)
    /// parallelism within each blob (spec.md §5).
    pub max_concurrency: usize,
    pub max_blobs_per_batch_fallback: usize,
    pub streaming_max_body_size: u64,
    pub default_refresh_interval: Duration,
    pub failure_refresh_interval: Duration,
    pub default_polling_interval: Duration,
    pub default_poll_timeout: Duration,
    /// Mirrors `ExponentialBackoffRetryPolicy::max_attempts` (spec.md §6);
    /// `retry::ExponentialBackoffRetryPolicy::from_config` reads this field
    /// so callers get a retry policy consistent with the rest of the
    /// config bag instead of having to repeat the number separately.
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_data_size: 6 * 1024 * 1024 * 1024,
            upload_block_size: UPLOAD_BLOCK_SIZE,
            upload_max_single_size: UPLOAD_MAX_SINGLE_SIZE,
            blob_upload_timeout: BLOB_UPLOAD_TIMEOUT,
            max_concurrency: effective_max_concurrency(8),
            max_blobs_per_batch_fallback: MAX_BLOBS_PER_BATCH,
            streaming_max_body_size: STREAMING_MAX_BODY_SIZE,
            default_refresh_interval: DEFAULT_REFRESH_INTERVAL,
            failure_refresh_interval: FAILURE_REFRESH_INTERVAL,
            default_polling_interval: DEFAULT_POLLING_INTERVAL,
            default_poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// `effectiveMaxConcurrency = min(configuredMax, availableCPUs)` (spec.md §5).
pub fn effective_max_concurrency(configured_max: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    configured_max.min(cpus).max(1)
}
