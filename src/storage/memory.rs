//! In-memory storage backend
//!
//! Mirrors the uniqueness and atomicity rules of the libSQL schema inside a
//! single mutex. Used for tests, dry runs and anywhere a throwaway store is
//! good enough. Each operation is counted so callers can check how often the
//! durable store was consulted.

use crate::error::{FlagfeedError, Result};
use crate::storage::FeedbackStorage;
use crate::types::{Counts, EntityKey, EntityKind, FlagId, ProjectId, StatisticsRow, VariableType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Snapshot of how many times each storage operation ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCalls {
    pub selects: usize,
    pub inserts: usize,
    pub upserts: usize,
}

impl StorageCalls {
    pub fn total(&self) -> usize {
        self.selects + self.inserts + self.upserts
    }
}

#[derive(Debug, Clone)]
struct EntityRow {
    id: Uuid,
    var_type: Option<VariableType>,
}

#[derive(Debug, Default)]
struct Tables {
    /// (kind, scope, name) -> row
    entities: HashMap<(EntityKind, Option<ProjectId>, String), EntityRow>,
    statistics: BTreeMap<(FlagId, DateTime<Utc>), Counts>,
}

/// Lock-protected in-memory store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    selects: AtomicUsize,
    inserts: AtomicUsize,
    upserts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> StorageCalls {
        StorageCalls {
            selects: self.selects.load(Ordering::SeqCst),
            inserts: self.inserts.load(Ordering::SeqCst),
            upserts: self.upserts.load(Ordering::SeqCst),
        }
    }

    /// Number of stored rows of one entity kind
    pub fn entity_count(&self, kind: EntityKind) -> usize {
        self.lock()
            .map(|tables| tables.entities.keys().filter(|(k, _, _)| *k == kind).count())
            .unwrap_or(0)
    }

    /// Declared type of a stored variable
    pub fn variable_type(&self, key: &EntityKey) -> Option<VariableType> {
        self.lock()
            .ok()
            .and_then(|tables| tables.entities.get(&Self::row_key(key)).and_then(|row| row.var_type))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| FlagfeedError::Database(format!("Failed to lock memory tables: {}", e)))
    }

    fn row_key(key: &EntityKey) -> (EntityKind, Option<ProjectId>, String) {
        (key.kind, key.scope, key.name.clone())
    }
}

#[async_trait]
impl FeedbackStorage for MemoryStorage {
    async fn select_id(&self, key: &EntityKey) -> Result<Option<Uuid>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let tables = self.lock()?;
        Ok(tables.entities.get(&Self::row_key(key)).map(|row| row.id))
    }

    async fn insert_if_absent(
        &self,
        key: &EntityKey,
        id: Uuid,
        var_type: Option<VariableType>,
    ) -> Result<bool> {
        self.inserts.fetch_add(1, Ordering::SeqCst);

        if key.kind != EntityKind::Project && key.scope.is_none() {
            return Err(FlagfeedError::Validation(format!("{} requires a project scope", key)));
        }
        if key.kind == EntityKind::Variable && var_type.is_none() {
            return Err(FlagfeedError::Validation(format!("{} requires a declared type", key)));
        }

        let mut tables = self.lock()?;
        let row_key = Self::row_key(key);
        if tables.entities.contains_key(&row_key) {
            return Ok(false);
        }
        tables.entities.insert(
            row_key,
            EntityRow {
                id,
                var_type: if key.kind == EntityKind::Variable { var_type } else { None },
            },
        );
        Ok(true)
    }

    async fn upsert_additive(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
        positive_delta: u64,
        negative_delta: u64,
    ) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.lock()?;
        tables
            .statistics
            .entry((flag_id, interval))
            .or_default()
            .add(positive_delta, negative_delta);
        Ok(())
    }

    async fn get_statistics(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
    ) -> Result<Option<StatisticsRow>> {
        let tables = self.lock()?;
        Ok(tables.statistics.get(&(flag_id, interval)).map(|counts| StatisticsRow {
            flag_id,
            interval,
            positive_count: counts.positive,
            negative_count: counts.negative,
        }))
    }

    async fn list_statistics(&self, flag_id: FlagId) -> Result<Vec<StatisticsRow>> {
        let tables = self.lock()?;
        Ok(tables
            .statistics
            .iter()
            .filter(|((flag, _), _)| *flag == flag_id)
            .map(|((flag, interval), counts)| StatisticsRow {
                flag_id: *flag,
                interval: *interval,
                positive_count: counts.positive,
                negative_count: counts.negative,
            })
            .collect())
    }
}
