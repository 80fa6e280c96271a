//! C2 AccountRanker (spec.md §4.2 "Account ranking").
//!
//! Tracks a bucketed sliding-window success rate per storage account and
//! orders containers/queues by it, shuffling ties so that accounts with
//! indistinguishable health don't always receive traffic in the same order.
//! The bucketed ring buffer and `tokio::sync::Mutex`-guarded shared state
//! follow the shape of `known_blobs_cache.rs`'s `SharedKnownBlobsCache`:
//! one struct owning the raw state, wrapped once in `Arc<RwLock/Mutex<_>>`
//! for the whole client to share.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::sync::Mutex;

const DEFAULT_MAX_BUCKETS: usize = 6;
const DEFAULT_BUCKET_DURATION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u32,
    failures: u32,
}

impl Bucket {
    fn total(&self) -> u32 {
        self.successes + self.failures
    }
}

/// Per-account bucket ring. `buckets.back()` is always the current (newest)
/// bucket; `buckets.front()` is the oldest still in the window.
#[derive(Debug)]
struct AccountHistory {
    buckets: VecDeque<Bucket>,
    last_action_at: Instant,
}

impl AccountHistory {
    fn new(now: Instant) -> Self {
        let mut buckets = VecDeque::with_capacity(1);
        buckets.push_back(Bucket::default());
        AccountHistory { buckets, last_action_at: now }
    }

    /// spec.md §4.2 "Algorithm": "advance time by (now - lastActionTs) /
    /// bucketDuration buckets (push empty buckets, evict oldest; if advance
    /// >= maxBuckets, clear and start fresh)", then record the outcome in
    /// the (now-current) newest bucket.
    fn record(&mut self, success: bool, now: Instant, bucket_duration: Duration, max_buckets: usize) {
        let elapsed = now.saturating_duration_since(self.last_action_at);
        let buckets_elapsed = (elapsed.as_nanos() / bucket_duration.as_nanos().max(1)) as usize;

        if buckets_elapsed >= max_buckets {
            self.buckets.clear();
            self.buckets.push_back(Bucket::default());
        } else {
            for _ in 0..buckets_elapsed {
                self.buckets.push_back(Bucket::default());
                while self.buckets.len() > max_buckets {
                    self.buckets.pop_front();
                }
            }
        }
        self.last_action_at = now;

        let bucket = self.buckets.back_mut().expect("buckets never empty");
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    /// Weighted average over the buckets, most-recent weighted highest
    /// (weight = N for the newest populated bucket down to 1 for the
    /// oldest), so a recent run of failures drags the score down faster
    /// than an old one fades out. Buckets with `total() == 0` are skipped
    /// and omit their weight entirely (spec.md §4.2).
    fn weighted_score(&self) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let count = self.buckets.len();
        for (offset_from_newest, bucket) in self.buckets.iter().rev().enumerate() {
            let weight = (count - offset_from_newest) as f64;
            if bucket.total() > 0 {
                let rate = bucket.successes as f64 / bucket.total() as f64;
                weighted_sum += rate * weight;
                weight_total += weight;
            }
        }
        if weight_total == 0.0 {
            // No history at all: treat as fully healthy so new/idle
            // accounts get an equal first chance.
            1.0
        } else {
            weighted_sum / weight_total
        }
    }
}

struct Inner {
    history: HashMap<String, AccountHistory>,
}

/// Ranks storage accounts by recent upload success rate so `Uploader` tries
/// the healthiest ones first (spec.md §4.2).
#[derive(Clone)]
pub struct AccountRanker {
    inner: Arc<Mutex<Inner>>,
    bucket_duration: Duration,
    max_buckets: usize,
}

impl AccountRanker {
    pub fn new() -> Self {
        Self::with_bucket_policy(DEFAULT_BUCKET_DURATION, DEFAULT_MAX_BUCKETS)
    }

    pub fn with_bucket_policy(bucket_duration: Duration, max_buckets: usize) -> Self {
        AccountRanker {
            inner: Arc::new(Mutex::new(Inner { history: HashMap::new() })),
            bucket_duration,
            max_buckets: max_buckets.max(1),
        }
    }

    pub async fn record_success(&self, account_name: &str) {
        self.record(account_name, true).await;
    }

    pub async fn record_failure(&self, account_name: &str) {
        self.record(account_name, false).await;
    }

    async fn record(&self, account_name: &str, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner
            .history
            .entry(account_name.to_string())
            .or_insert_with(|| AccountHistory::new(now))
            .record(success, now, self.bucket_duration, self.max_buckets);
    }

    /// Orders `items` (keyed by `key_fn`) by descending weighted success
    /// rate, shuffling within groups of equal score so ties don't always
    /// resolve the same way (spec.md §4.2: "stable sort on rank
    /// descending; secondary key: random shuffle within equal rank").
    pub async fn rank<T, F>(&self, mut items: Vec<T>, key_fn: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        if items.len() <= 1 {
            return items;
        }
        items.shuffle(&mut thread_rng());

        let inner = self.inner.lock().await;
        let score_of = |item: &T| -> f64 {
            inner
                .history
                .get(key_fn(item))
                .map(|h| h.weighted_score())
                .unwrap_or(1.0)
        };
        items.sort_by(|a, b| score_of(b).partial_cmp(&score_of(a)).unwrap_or(std::cmp::Ordering::Equal));
        items
    }
}

impl Default for AccountRanker {
    fn default() -> Self {
        Self::new()
    }
}
