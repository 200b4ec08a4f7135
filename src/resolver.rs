//! Entity resolution: race-safe get-or-create of projects, variables and flags
//!
//! Resolution order for a natural key:
//!
//! 1. identifier cache hit → return, no storage access
//! 2. `select_id` finds a row → cache and return it
//! 3. `insert_if_absent` with a fresh identifier creates the row → cache and return it
//! 4. the insert lost a race to a concurrent first-writer → `select_id` again;
//!    the winner's row must be visible now, so a miss here is an
//!    [`FlagfeedError::InvariantViolation`]
//!
//! No lock is held across storage calls. Concurrent callers for the same key
//! all converge on whichever insert committed first.

use crate::cache::IdentifierCache;
use crate::error::{FlagfeedError, Result};
use crate::storage::FeedbackStorage;
use crate::types::{EntityKey, EntityKind, FlagId, ProjectId, VariableId, VariableType};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Default upper bound for one storage round-trip
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound a storage call by `limit`, mapping expiry to a transient error
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| FlagfeedError::Timeout(limit))?
}

/// Get-or-create resolver over the identifier cache and durable storage
pub struct EntityResolver {
    cache: Arc<IdentifierCache>,
    storage: Arc<dyn FeedbackStorage>,
    storage_timeout: Duration,
}

impl EntityResolver {
    pub fn new(cache: Arc<IdentifierCache>, storage: Arc<dyn FeedbackStorage>) -> Self {
        Self {
            cache,
            storage,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, limit: Duration) -> Self {
        self.storage_timeout = limit;
        self
    }

    pub fn cache(&self) -> &Arc<IdentifierCache> {
        &self.cache
    }

    /// Resolve a natural key to its stable identifier, creating the row if needed
    ///
    /// `var_type` must be present for variables; it is only written when this
    /// call creates the row, never compared against an existing one.
    pub async fn resolve(&self, key: &EntityKey, var_type: Option<VariableType>) -> Result<Uuid> {
        Self::validate(key, var_type)?;

        if let Some(id) = self.cache.get(key) {
            return Ok(id);
        }

        let id = match self.select(key).await? {
            Some(id) => {
                debug!("Resolved {} from storage: {}", key, id);
                id
            }
            None => self.create(key, var_type).await?,
        };

        self.cache.insert(key.clone(), id);
        Ok(id)
    }

    /// Resolve (or create) a project by name
    pub async fn project(&self, name: &str) -> Result<ProjectId> {
        self.resolve(&EntityKey::project(name), None)
            .await
            .map(ProjectId)
    }

    /// Resolve (or create) a variable within a project
    pub async fn variable(
        &self,
        project: ProjectId,
        name: &str,
        var_type: VariableType,
    ) -> Result<VariableId> {
        self.resolve(&EntityKey::variable(project, name), Some(var_type))
            .await
            .map(VariableId)
    }

    /// Resolve (or create) a flag within a project
    pub async fn flag(&self, project: ProjectId, name: &str) -> Result<FlagId> {
        self.resolve(&EntityKey::flag(project, name), None)
            .await
            .map(FlagId)
    }

    fn validate(key: &EntityKey, var_type: Option<VariableType>) -> Result<()> {
        if key.name.is_empty() {
            return Err(FlagfeedError::Validation(format!("{} name is empty", key.kind)));
        }
        match key.kind {
            EntityKind::Project => Ok(()),
            EntityKind::Variable | EntityKind::Flag if key.scope.is_none() => Err(
                FlagfeedError::Validation(format!("{} {:?} has no project scope", key.kind, key.name)),
            ),
            EntityKind::Variable if var_type.is_none() => Err(FlagfeedError::Validation(format!(
                "variable {:?} has no declared type",
                key.name
            ))),
            _ => Ok(()),
        }
    }

    async fn select(&self, key: &EntityKey) -> Result<Option<Uuid>> {
        with_timeout(self.storage_timeout, self.storage.select_id(key)).await
    }

    async fn create(&self, key: &EntityKey, var_type: Option<VariableType>) -> Result<Uuid> {
        let candidate = Uuid::new_v4();
        let created = with_timeout(
            self.storage_timeout,
            self.storage.insert_if_absent(key, candidate, var_type),
        )
        .await?;

        if created {
            debug!("Created {}: {}", key, candidate);
            return Ok(candidate);
        }

        // Lost the insert race; the winning row is committed and must be visible
        match self.select(key).await? {
            Some(id) => {
                debug!("Adopted concurrently created {}: {}", key, id);
                Ok(id)
            }
            None => {
                error!(
                    "Conflicting insert for {} reported an existing row, but re-read found none",
                    key
                );
                Err(FlagfeedError::InvariantViolation(format!(
                    "{} missing after conflicting insert",
                    key
                )))
            }
        }
    }
}
