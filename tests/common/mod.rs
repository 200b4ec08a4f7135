//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flagfeed_core::{
    ConnectionMode, EntityKey, FeedbackBatch, FeedbackStorage, FlagId, FlagUsage, FlagfeedError,
    LibsqlStorage, MemoryStorage, Result, StatisticsRow, VariableDeclaration, VariableType,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;
use uuid::Uuid;

/// Create a file-backed libSQL storage inside a fresh temp directory
///
/// The directory must outlive the storage, so it is returned alongside it.
pub async fn create_test_storage() -> (LibsqlStorage, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let storage = open_storage_in(&dir).await;
    (storage, dir)
}

/// Open (or reopen) the test database inside `dir`
pub async fn open_storage_in(dir: &TempDir) -> LibsqlStorage {
    let path = dir.path().join("flagfeed.db");
    LibsqlStorage::new(ConnectionMode::Local(path.to_string_lossy().into_owned()))
        .await
        .expect("Failed to create test storage")
}

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// The batch used across the end-to-end scenarios
pub fn acme_batch() -> FeedbackBatch {
    FeedbackBatch {
        project: "acme".to_string(),
        variables: vec![VariableDeclaration {
            name: "beta_flag_var".to_string(),
            var_type: VariableType::String,
        }],
        flags_usage: vec![FlagUsage {
            name: "checkout_v2".to_string(),
            interval: noon(),
            positive_count: 3,
            negative_count: 1,
        }],
    }
}

/// Storage wrapper whose first `parties` lookups wait for each other
///
/// Every racing caller therefore sees "absent" before anyone inserts, which
/// forces all but one of them through the conflicting-insert path.
pub struct RacingStorage {
    inner: MemoryStorage,
    barrier: Barrier,
    parties: usize,
    selects: AtomicUsize,
    pub conflicts: AtomicUsize,
}

impl RacingStorage {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            barrier: Barrier::new(parties),
            parties,
            selects: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl FeedbackStorage for RacingStorage {
    async fn select_id(&self, key: &EntityKey) -> Result<Option<Uuid>> {
        let result = self.inner.select_id(key).await;
        if self.selects.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
        result
    }

    async fn insert_if_absent(
        &self,
        key: &EntityKey,
        id: Uuid,
        var_type: Option<VariableType>,
    ) -> Result<bool> {
        let created = self.inner.insert_if_absent(key, id, var_type).await?;
        if !created {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(created)
    }

    async fn upsert_additive(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
        positive_delta: u64,
        negative_delta: u64,
    ) -> Result<()> {
        self.inner
            .upsert_additive(flag_id, interval, positive_delta, negative_delta)
            .await
    }

    async fn get_statistics(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
    ) -> Result<Option<StatisticsRow>> {
        self.inner.get_statistics(flag_id, interval).await
    }

    async fn list_statistics(&self, flag_id: FlagId) -> Result<Vec<StatisticsRow>> {
        self.inner.list_statistics(flag_id).await
    }
}

/// Storage that claims every key already exists but never returns a row
pub struct PhantomConflictStorage;

#[async_trait]
impl FeedbackStorage for PhantomConflictStorage {
    async fn select_id(&self, _key: &EntityKey) -> Result<Option<Uuid>> {
        Ok(None)
    }

    async fn insert_if_absent(
        &self,
        _key: &EntityKey,
        _id: Uuid,
        _var_type: Option<VariableType>,
    ) -> Result<bool> {
        Ok(false)
    }

    async fn upsert_additive(
        &self,
        _flag_id: FlagId,
        _interval: DateTime<Utc>,
        _positive_delta: u64,
        _negative_delta: u64,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_statistics(
        &self,
        _flag_id: FlagId,
        _interval: DateTime<Utc>,
    ) -> Result<Option<StatisticsRow>> {
        Ok(None)
    }

    async fn list_statistics(&self, _flag_id: FlagId) -> Result<Vec<StatisticsRow>> {
        Ok(Vec::new())
    }
}

/// Storage with switchable failure modes in front of a memory store
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    /// Fail every upsert with a database error
    pub fail_upserts: AtomicBool,
    /// Fail lookups of flags with a database error
    pub fail_flag_lookups: AtomicBool,
    /// Stall every lookup long enough to trip any short timeout
    pub stall_selects: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl FeedbackStorage for FlakyStorage {
    async fn select_id(&self, key: &EntityKey) -> Result<Option<Uuid>> {
        if self.stall_selects.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.fail_flag_lookups.load(Ordering::SeqCst)
            && key.kind == flagfeed_core::EntityKind::Flag
        {
            return Err(FlagfeedError::Database("flag table unavailable".to_string()));
        }
        self.inner.select_id(key).await
    }

    async fn insert_if_absent(
        &self,
        key: &EntityKey,
        id: Uuid,
        var_type: Option<VariableType>,
    ) -> Result<bool> {
        self.inner.insert_if_absent(key, id, var_type).await
    }

    async fn upsert_additive(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
        positive_delta: u64,
        negative_delta: u64,
    ) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(FlagfeedError::Database("statistics table unavailable".to_string()));
        }
        self.inner
            .upsert_additive(flag_id, interval, positive_delta, negative_delta)
            .await
    }

    async fn get_statistics(
        &self,
        flag_id: FlagId,
        interval: DateTime<Utc>,
    ) -> Result<Option<StatisticsRow>> {
        self.inner.get_statistics(flag_id, interval).await
    }

    async fn list_statistics(&self, flag_id: FlagId) -> Result<Vec<StatisticsRow>> {
        self.inner.list_statistics(flag_id).await
    }
}
