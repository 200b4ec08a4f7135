//! Durable storage layer for the feedback pipeline
//!
//! Provides the storage boundary consumed by the resolver and the statistics
//! merger, plus its implementations. Every operation is atomic with respect
//! to concurrent callers on the same key; uniqueness of (scope, name) per
//! entity kind and of (flag, interval) for statistics is enforced here, not
//! in memory.

pub mod libsql;
pub mod memory;

use crate::error::Result;
use crate::types::{EntityKey, FlagId, StatisticsRow, VariableType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Storage backend trait defining the operations the pipeline needs
#[async_trait]
pub trait FeedbackStorage: Send + Sync {
    /// Look up the identifier of an existing entity row
    async fn select_id(&self, key: &EntityKey) -> Result<Option<Uuid>>;

    /// Insert a new entity row unless one with the same (scope, name) exists
    ///
    /// Returns `true` if this call created the row and `false` if a
    /// conflicting row was already present, in which case nothing changes.
    /// `var_type` is required for variables and ignored for other kinds.
    async fn insert_if_absent(
        &self,
        key: &EntityKey,
        id: Uuid,
        var_type: Option<VariableType>,
    ) -> Result<bool>;

    /// Add counts to the statistics row for (flag, interval), creating it if absent
    async fn upsert_additive(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
        positive_delta: u64,
        negative_delta: u64,
    ) -> Result<()>;

    /// Read the statistics row for (flag, interval)
    async fn get_statistics(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
    ) -> Result<Option<StatisticsRow>>;

    /// List every statistics row of a flag, oldest interval first
    async fn list_statistics(&self, flag_id: FlagId) -> Result<Vec<StatisticsRow>>;
}

pub use self::libsql::{ConnectionMode, LibsqlStorage};
pub use self::memory::MemoryStorage;
