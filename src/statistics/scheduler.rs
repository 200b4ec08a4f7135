//! Background flush scheduler
//!
//! Long-running task that periodically drains aged buckets from the
//! accumulator and merges them into durable storage.
//!
//! # Design
//!
//! - Ticks on a fixed period; a tick with nothing aged is a no-op
//! - A task whose merge fails is dropped, not re-buffered: its counts were
//!   already removed from memory
//! - Stops on a broadcast shutdown signal, optionally draining every
//!   remaining bucket first

use crate::error::{FlagfeedError, Result};
use crate::statistics::accumulator::StatisticsAccumulator;
use crate::statistics::merger::StatisticsMerger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct FlushSchedulerConfig {
    /// Tick period
    pub period: Duration,
    /// Age a bucket must reach before it is drained
    pub cutoff_age: Duration,
    /// Drain all pending buckets when stopping
    pub flush_on_shutdown: bool,
}

impl Default for FlushSchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            cutoff_age: Duration::from_secs(120),
            flush_on_shutdown: true,
        }
    }
}

/// Outcome of one flush pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Buckets removed from memory
    pub drained: usize,
    /// Tasks written to storage
    pub merged: usize,
    /// Tasks whose merge failed; their counts are lost
    pub failed: usize,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.drained += other.drained;
        self.merged += other.merged;
        self.failed += other.failed;
    }
}

/// Drain buckets at least `cutoff_age` old and merge them
pub async fn flush_once(
    accumulator: &StatisticsAccumulator,
    merger: &StatisticsMerger,
    cutoff_age: Duration,
) -> FlushReport {
    let tasks = accumulator.drain_aged(cutoff_age);
    merge_all(merger, tasks).await
}

/// Drain every bucket regardless of age and merge them
pub async fn flush_all(accumulator: &StatisticsAccumulator, merger: &StatisticsMerger) -> FlushReport {
    let tasks = accumulator.drain_all();
    merge_all(merger, tasks).await
}

async fn merge_all(merger: &StatisticsMerger, tasks: Vec<crate::types::FlushTask>) -> FlushReport {
    let mut report = FlushReport {
        drained: tasks.len(),
        ..Default::default()
    };

    for task in tasks {
        match merger.merge(&task).await {
            Ok(()) => report.merged += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    "Dropping statistics for flag {} at {} (+{}/-{}): {}",
                    task.flag_id, task.interval, task.positive_count, task.negative_count, e
                );
            }
        }
    }

    report
}

/// Flush scheduler handle for controlling the background task
pub struct FlushSchedulerHandle {
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,

    /// Task handle; yields the accumulated report when the loop exits
    task_handle: Option<tokio::task::JoinHandle<FlushReport>>,

    accumulator: Arc<StatisticsAccumulator>,
    merger: Arc<StatisticsMerger>,
    flush_on_shutdown: bool,
}

impl FlushSchedulerHandle {
    /// Create and spawn a new flush scheduler task
    pub fn spawn(
        accumulator: Arc<StatisticsAccumulator>,
        merger: Arc<StatisticsMerger>,
        config: FlushSchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task_handle = tokio::spawn(run_flush_loop(
            accumulator.clone(),
            merger.clone(),
            config.period,
            config.cutoff_age,
            shutdown_rx,
        ));

        Self {
            shutdown_tx,
            task_handle: Some(task_handle),
            accumulator,
            merger,
            flush_on_shutdown: config.flush_on_shutdown,
        }
    }

    /// Stop the scheduler gracefully
    ///
    /// Returns the totals of every tick run so far plus the final drain.
    /// Calling it again after the task has stopped returns an empty report.
    pub async fn stop(&mut self) -> Result<FlushReport> {
        let Some(handle) = self.task_handle.take() else {
            return Ok(FlushReport::default());
        };

        let _ = self.shutdown_tx.send(());

        let mut report = handle.await.map_err(|e| {
            FlagfeedError::Other(format!("Failed to stop flush scheduler: {}", e))
        })?;

        if self.flush_on_shutdown {
            let last = flush_all(&self.accumulator, &self.merger).await;
            if last.drained > 0 {
                info!(
                    "Final flush merged {} of {} pending buckets",
                    last.merged, last.drained
                );
            }
            report.absorb(last);
        }

        info!("Flush scheduler stopped");
        Ok(report)
    }

    /// Check if the scheduler task is running
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

/// Run the flush loop until shutdown
async fn run_flush_loop(
    accumulator: Arc<StatisticsAccumulator>,
    merger: Arc<StatisticsMerger>,
    period: Duration,
    cutoff_age: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> FlushReport {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut totals = FlushReport::default();

    info!(
        "Starting flush scheduler (period: {:?}, cutoff age: {:?})",
        period, cutoff_age
    );

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let report = flush_once(&accumulator, &merger, cutoff_age).await;
                if report.drained > 0 {
                    info!(
                        "Flushed {} buckets ({} merged, {} failed)",
                        report.drained, report.merged, report.failed
                    );
                }
                totals.absorb(report);
            }

            _ = shutdown_rx.recv() => {
                debug!("Flush scheduler received shutdown signal");
                break;
            }
        }
    }

    totals
}
