//! Flagfeed - Feature-Flag Usage Feedback Pipeline
//!
//! Ingests feedback from feature-flag clients and provides:
//! - Race-safe get-or-create of projects, variables and flags
//! - A process-wide identifier cache in front of durable storage
//! - In-memory accumulation of per-flag evaluation counters by interval
//! - Periodic, additive flushing of aged counters into durable storage
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: identifiers, entity keys, feedback and flush messages
//! - **Storage**: durable storage boundary (libSQL, in-memory)
//! - **Resolver**: cache-aside get-or-create over storage
//! - **Statistics**: accumulator, merger and flush scheduler
//! - **Ingest**: per-batch orchestration
//! - **API**: thin HTTP surface
//!
//! # Example
//!
//! ```ignore
//! use flagfeed_core::{FeedbackIngestor, EntityResolver, IdentifierCache, LibsqlStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(LibsqlStorage::from_path("flagfeed.db").await?);
//!     let resolver = Arc::new(EntityResolver::new(Arc::new(IdentifierCache::new()), storage.clone()));
//!     let accumulator = Arc::new(StatisticsAccumulator::default());
//!     let ingestor = FeedbackIngestor::new(resolver, accumulator.clone());
//!
//!     ingestor.ingest(&batch).await?;
//!     flush_all(&accumulator, &StatisticsMerger::new(storage)).await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod resolver;
pub mod statistics;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use cache::IdentifierCache;
pub use config::FlagfeedConfig;
pub use error::{FlagfeedError, Result};
pub use ingest::{FeedbackIngestor, IngestSummary};
pub use resolver::EntityResolver;
pub use statistics::{
    flush_all, flush_once, FlushReport, FlushSchedulerConfig, FlushSchedulerHandle,
    StatisticsAccumulator, StatisticsMerger,
};
pub use storage::{ConnectionMode, FeedbackStorage, LibsqlStorage, MemoryStorage};
pub use types::{
    Counts, EntityKey, EntityKind, FeedbackBatch, FlagId, FlagUsage, FlushTask, ProjectId,
    StatisticsRow, VariableDeclaration, VariableId, VariableType, MAX_COUNT,
};
