//! Buffered flag statistics
//!
//! Counters reported by clients are summed in memory per (flag, interval)
//! bucket, drained once a bucket is old enough, and merged additively into
//! durable storage by a periodic background task.

pub mod accumulator;
pub mod merger;
pub mod scheduler;

pub use accumulator::StatisticsAccumulator;
pub use merger::StatisticsMerger;
pub use scheduler::{flush_all, flush_once, FlushReport, FlushSchedulerConfig, FlushSchedulerHandle};
