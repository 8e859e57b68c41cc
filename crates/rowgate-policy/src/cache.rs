//! Resolved-policy cache.
//!
//! Two maps: controlled-table lookups by name (including negative results, so
//! unrestricted tables skip the store too) and role rules by (role, table id).
//! Entries expire after a fixed TTL and the administration service invalidates
//! the affected keys on every write.

use dashmap::DashMap;
use rowgate_core::{
    CacheConfig, ControlledTable, RoleDataPermission, RoleFieldPermission, RoleId, TableId,
};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Stored rules of one role on one controlled table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleRules {
    pub data: Option<RoleDataPermission>,
    pub fields: Vec<RoleFieldPermission>,
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct PolicyCache {
    tables: DashMap<String, CacheEntry<Option<ControlledTable>>>,
    rules: DashMap<(RoleId, TableId), CacheEntry<RoleRules>>,
    ttl: Duration,
    max_entries: usize,
}

impl PolicyCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            tables: DashMap::new(),
            rules: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Build the cache described by `config`, or `None` when disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.ttl(), config.max_entries))
    }

    /// Cached lookup result for a table name. The outer `None` is a miss.
    pub fn table(&self, table_name: &str) -> Option<Option<ControlledTable>> {
        lookup(&self.tables, table_name)
    }

    pub fn put_table(&self, table_name: &str, table: Option<ControlledTable>) {
        self.insert(&self.tables, table_name.to_string(), table);
    }

    pub fn role_rules(&self, role_id: RoleId, table_id: TableId) -> Option<RoleRules> {
        lookup(&self.rules, &(role_id, table_id))
    }

    pub fn put_role_rules(&self, role_id: RoleId, table_id: TableId, rules: RoleRules) {
        self.insert(&self.rules, (role_id, table_id), rules);
    }

    pub fn invalidate_table(&self, table_name: &str) {
        self.tables.remove(table_name);
    }

    /// Drop every entry tied to a table id: its name lookup and all role rules.
    pub fn invalidate_table_id(&self, table_id: TableId) {
        self.tables
            .retain(|_, entry| entry.value.as_ref().map(|t| t.id) != Some(table_id));
        self.rules.retain(|(_, id), _| *id != table_id);
    }

    pub fn invalidate_role_table(&self, role_id: RoleId, table_id: TableId) {
        self.rules.remove(&(role_id, table_id));
    }

    pub fn clear(&self) {
        self.tables.clear();
        self.rules.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert<K, V>(&self, map: &DashMap<K, CacheEntry<V>>, key: K, value: V)
    where
        K: Eq + Hash,
    {
        let now = Instant::now();
        if map.len() >= self.max_entries {
            map.retain(|_, entry| entry.expires_at > now);
            if map.len() >= self.max_entries {
                map.clear();
            }
        }
        map.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }
}

fn lookup<K, Q, V>(map: &DashMap<K, CacheEntry<V>>, key: &Q) -> Option<V>
where
    K: Eq + Hash + std::borrow::Borrow<Q>,
    Q: Eq + Hash + ?Sized,
    V: Clone,
{
    let now = Instant::now();
    let hit = map.get(key).map(|entry| {
        if entry.expires_at > now {
            Some(entry.value.clone())
        } else {
            None
        }
    })?;
    // The read guard is released before removing.
    if hit.is_none() {
        map.remove(key);
    }
    hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rowgate_core::DataScope;

    fn table(id: TableId, name: &str) -> ControlledTable {
        ControlledTable {
            id,
            table_name: name.to_string(),
            description: None,
            enabled: true,
            data_scope: DataScope::OwnOnly,
            user_field: Some("created_by".into()),
            dept_field: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_negative_table_lookup_is_cached() {
        let cache = PolicyCache::new(Duration::from_secs(60), 10);
        assert_eq!(cache.table("users"), None);
        cache.put_table("users", None);
        assert_eq!(cache.table("users"), Some(None));
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = PolicyCache::new(Duration::ZERO, 10);
        cache.put_table("users", Some(table(1, "users")));
        assert_eq!(cache.table("users"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_table_id_drops_role_rules() {
        let cache = PolicyCache::new(Duration::from_secs(60), 10);
        cache.put_table("users", Some(table(1, "users")));
        cache.put_role_rules(5, 1, RoleRules::default());
        cache.put_role_rules(5, 2, RoleRules::default());
        cache.invalidate_table_id(1);
        assert_eq!(cache.table("users"), None);
        assert_eq!(cache.role_rules(5, 1), None);
        assert_eq!(cache.role_rules(5, 2), Some(RoleRules::default()));
    }

    #[test]
    fn test_bounded_size() {
        let cache = PolicyCache::new(Duration::from_secs(60), 2);
        for role in 0..5 {
            cache.put_role_rules(role, 1, RoleRules::default());
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_disabled_config_builds_no_cache() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(PolicyCache::from_config(&config).is_none());
    }
}
