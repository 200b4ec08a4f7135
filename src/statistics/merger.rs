//! Additive merge of flush tasks into durable storage
//!
//! Merging is an upsert that adds the task's counts to whatever the
//! (flag, interval) row already holds. Several tasks for the same key (after a
//! restart, or a bucket that re-opened after being drained) compose by
//! addition. Merging is deliberately not idempotent: delivering the same task
//! twice counts it twice. The accumulator yielding each bucket at most once is
//! what prevents that in normal operation.

use crate::error::Result;
use crate::resolver::{with_timeout, DEFAULT_STORAGE_TIMEOUT};
use crate::storage::FeedbackStorage;
use crate::types::FlushTask;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Applies flush tasks to durable storage
pub struct StatisticsMerger {
    storage: Arc<dyn FeedbackStorage>,
    storage_timeout: Duration,
}

impl StatisticsMerger {
    pub fn new(storage: Arc<dyn FeedbackStorage>) -> Self {
        Self {
            storage,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, limit: Duration) -> Self {
        self.storage_timeout = limit;
        self
    }

    /// Add one task's counts to its (flag, interval) row
    pub async fn merge(&self, task: &FlushTask) -> Result<()> {
        if task.counts().is_zero() {
            return Ok(());
        }

        with_timeout(
            self.storage_timeout,
            self.storage.upsert_additive(
                task.flag_id,
                task.interval,
                task.positive_count,
                task.negative_count,
            ),
        )
        .await?;

        debug!(
            "Merged statistics for flag {} at {}: +{}/-{}",
            task.flag_id, task.interval, task.positive_count, task.negative_count
        );
        Ok(())
    }
}
