//! Process-wide identifier cache
//!
//! Maps an entity's natural key (kind, scope, name) to its stable identifier.
//! Entries are installed only by the resolver after a durable row has been
//! confirmed, so a hit is always safe to return. A miss is never
//! authoritative: the resolver falls through to durable storage.
//!
//! The cache starts empty at process start and is never persisted.

use crate::types::EntityKey;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory (kind, scope, name) -> identifier map
#[derive(Debug, Default)]
pub struct IdentifierCache {
    entries: RwLock<HashMap<EntityKey, Uuid>>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the identifier for a key
    pub fn get(&self, key: &EntityKey) -> Option<Uuid> {
        // A poisoned lock only means another thread panicked mid-insert of a
        // plain map entry; the map itself is still consistent.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).copied()
    }

    /// Install a confirmed identifier
    ///
    /// Concurrent resolvers for the same key all observe the same durable row,
    /// so overwriting an existing entry always writes the same value.
    pub fn insert(&self, key: EntityKey, id: Uuid) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, e.g. to simulate a cold start
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectId;

    #[test]
    fn test_get_after_insert() {
        let cache = IdentifierCache::new();
        let key = EntityKey::project("acme");
        assert!(cache.get(&key).is_none());

        let id = Uuid::new_v4();
        cache.insert(key.clone(), id);
        assert_eq!(cache.get(&key), Some(id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_scope_separates_entries() {
        let cache = IdentifierCache::new();
        let p1 = ProjectId::new();
        let p2 = ProjectId::new();

        let id1 = Uuid::new_v4();
        cache.insert(EntityKey::flag(p1, "checkout"), id1);

        assert_eq!(cache.get(&EntityKey::flag(p1, "checkout")), Some(id1));
        assert!(cache.get(&EntityKey::flag(p2, "checkout")).is_none());
        // Same name, same scope, different kind
        assert!(cache.get(&EntityKey::variable(p1, "checkout")).is_none());
    }

    #[test]
    fn test_clear() {
        let cache = IdentifierCache::new();
        cache.insert(EntityKey::project("acme"), Uuid::new_v4());
        cache.clear();
        assert!(cache.is_empty());
    }
}
