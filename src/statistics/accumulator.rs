//! In-memory statistics accumulator
//!
//! Buffers per-flag evaluation counters in interval buckets so that a burst of
//! feedback costs one durable write per (flag, interval) instead of one per
//! message. Buckets are keyed by interval start, truncated to the configured
//! bucket width.
//!
//! All mutation happens under one map-level mutex. Draining removes a bucket
//! and returns its value in the same critical section, so an increment either
//! lands before the drain (and is part of the returned value) or after it (and
//! starts a fresh bucket for the next flush). Nothing is written into a bucket
//! that has already been handed out.

use crate::types::{Counts, FlagId, FlushTask};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

type Buckets = HashMap<FlagId, HashMap<DateTime<Utc>, Counts>>;

/// Process-wide interval bucket store
#[derive(Debug)]
pub struct StatisticsAccumulator {
    buckets: Mutex<Buckets>,
    bucket_width_secs: i64,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl StatisticsAccumulator {
    /// Create an empty accumulator with the given bucket width
    ///
    /// Widths below one second are treated as one second.
    pub fn new(bucket_width: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            bucket_width_secs: bucket_width.as_secs().max(1) as i64,
        }
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::from_secs(self.bucket_width_secs as u64)
    }

    /// Start of the bucket containing `timestamp`
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let start = secs - secs.rem_euclid(self.bucket_width_secs);
        DateTime::from_timestamp(start, 0).unwrap_or(timestamp)
    }

    fn lock(&self) -> MutexGuard<'_, Buckets> {
        // Every critical section leaves the map consistent, so a poisoned
        // guard is still safe to use.
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add deltas to the bucket for (flag, interval), creating it at (0, 0)
    pub fn increment(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
        positive_delta: u64,
        negative_delta: u64,
    ) {
        let bucket = self.bucket_start(interval);
        let mut buckets = self.lock();
        buckets
            .entry(flag_id)
            .or_default()
            .entry(bucket)
            .or_default()
            .add(positive_delta, negative_delta);
    }

    /// Current value of a bucket, if it is still in memory
    pub fn get(&self, flag_id: FlagId, interval: DateTime<Utc>) -> Option<Counts> {
        let bucket = self.bucket_start(interval);
        self.lock()
            .get(&flag_id)
            .and_then(|intervals| intervals.get(&bucket))
            .copied()
    }

    /// Number of buckets currently held
    pub fn pending_buckets(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_buckets() == 0
    }

    /// Remove and return every bucket at least `cutoff_age` old
    pub fn drain_aged(&self, cutoff_age: Duration) -> Vec<FlushTask> {
        self.drain_aged_at(Utc::now(), cutoff_age)
    }

    /// Remove and return every bucket whose interval start is at or before `now - cutoff_age`
    pub fn drain_aged_at(&self, now: DateTime<Utc>, cutoff_age: Duration) -> Vec<FlushTask> {
        let cutoff = chrono::Duration::from_std(cutoff_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.drain_where(|interval| interval <= cutoff)
    }

    /// Remove and return every bucket regardless of age
    pub fn drain_all(&self) -> Vec<FlushTask> {
        self.drain_where(|_| true)
    }

    fn drain_where(&self, eligible: impl Fn(DateTime<Utc>) -> bool) -> Vec<FlushTask> {
        let mut tasks = Vec::new();
        let mut buckets = self.lock();

        for (flag_id, intervals) in buckets.iter_mut() {
            let aged: Vec<DateTime<Utc>> = intervals
                .keys()
                .copied()
                .filter(|interval| eligible(*interval))
                .collect();

            for interval in aged {
                if let Some(counts) = intervals.remove(&interval) {
                    tasks.push(FlushTask {
                        flag_id: *flag_id,
                        interval,
                        positive_count: counts.positive,
                        negative_count: counts.negative,
                    });
                }
            }
        }

        buckets.retain(|_, intervals| !intervals.is_empty());
        tasks
    }
}
