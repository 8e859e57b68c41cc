//! Policy persistence.
//!
//! [`PolicyStore`] is the read side consulted on every intercepted operation.
//! [`PolicyAdminStore`] adds the writes used by the administration service.
//! Policy reads go straight to storage and are never themselves intercepted.

use async_trait::async_trait;
use chrono::Utc;
use rowgate_core::{
    ControlledTable, DEFAULT_PRIORITY, DataPermissionConfig, NewControlledTable, PolicyStatistics,
    RoleDataPermission, RoleFieldPermission, RoleId, TableId,
};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Read access to policy rows.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// The enabled controlled table with this name.
    async fn controlled_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>>;

    /// The single effective data rule for a role on a table: among enabled
    /// rows, the highest priority wins, then the newest id.
    async fn data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>>;

    /// Enabled field rules for a role on a table.
    async fn field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>>;
}

/// Write access used by policy administration.
#[async_trait]
pub trait PolicyAdminStore: PolicyStore {
    /// Controlled table by name, enabled or not.
    async fn find_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>>;

    async fn table_by_id(&self, id: TableId) -> anyhow::Result<Option<ControlledTable>>;

    async fn list_tables(&self) -> anyhow::Result<Vec<ControlledTable>>;

    async fn insert_table(&self, table: NewControlledTable) -> anyhow::Result<ControlledTable>;

    async fn update_table(&self, table: ControlledTable) -> anyhow::Result<ControlledTable>;

    /// Delete a table and every role row referencing it. Returns false when
    /// no such table existed.
    async fn delete_table(&self, id: TableId) -> anyhow::Result<bool>;

    /// Replace every data and field row of `config.role_id` on `table_id`
    /// with the rows described by `config`, atomically.
    async fn replace_role_config(
        &self,
        table_id: TableId,
        config: &DataPermissionConfig,
    ) -> anyhow::Result<()>;

    /// Data rule for a role on a table regardless of the enabled flag.
    async fn stored_data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>>;

    /// Field rules for a role on a table regardless of the enabled flag.
    async fn stored_field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>>;

    async fn statistics(&self) -> anyhow::Result<PolicyStatistics>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    tables: Vec<ControlledTable>,
    data: Vec<RoleDataPermission>,
    fields: Vec<RoleFieldPermission>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_table(&mut self, table: NewControlledTable) -> ControlledTable {
        let now = Utc::now();
        let table = ControlledTable {
            id: self.next_id(),
            table_name: table.table_name,
            description: table.description,
            enabled: table.enabled,
            data_scope: table.data_scope,
            user_field: table.user_field,
            dept_field: table.dept_field,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.tables.push(table.clone());
        table
    }
}

/// Policy store held in process memory.
///
/// Used by tests and embedded deployments. Seeding methods bypass the
/// administration checks so fixtures can describe arbitrary stored states,
/// including disabled or duplicate historical rows.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    state: RwLock<MemoryState>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controlled table and return its id.
    pub async fn seed_table(&self, table: NewControlledTable) -> TableId {
        self.state.write().await.push_table(table).id
    }

    /// Insert a data rule row as given; `id` is assigned.
    pub async fn seed_data_permission(&self, mut row: RoleDataPermission) -> i64 {
        let mut state = self.state.write().await;
        row.id = state.next_id();
        let id = row.id;
        state.data.push(row);
        id
    }

    /// Insert a field rule row as given; `id` is assigned.
    pub async fn seed_field_permission(&self, mut row: RoleFieldPermission) -> i64 {
        let mut state = self.state.write().await;
        row.id = state.next_id();
        let id = row.id;
        state.fields.push(row);
        id
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn controlled_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .iter()
            .find(|t| t.enabled && t.table_name == table_name)
            .cloned())
    }

    async fn data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>> {
        let state = self.state.read().await;
        Ok(state
            .data
            .iter()
            .filter(|r| r.enabled && r.role_id == role_id && r.controlled_table_id == table_id)
            .max_by_key(|r| (r.priority, r.id))
            .cloned())
    }

    async fn field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>> {
        let state = self.state.read().await;
        Ok(state
            .fields
            .iter()
            .filter(|r| r.enabled && r.role_id == role_id && r.controlled_table_id == table_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PolicyAdminStore for MemoryPolicyStore {
    async fn find_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .iter()
            .find(|t| t.table_name == table_name)
            .cloned())
    }

    async fn table_by_id(&self, id: TableId) -> anyhow::Result<Option<ControlledTable>> {
        let state = self.state.read().await;
        Ok(state.tables.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tables(&self) -> anyhow::Result<Vec<ControlledTable>> {
        let state = self.state.read().await;
        let mut tables = state.tables.clone();
        tables.sort_by_key(|t| t.id);
        Ok(tables)
    }

    async fn insert_table(&self, table: NewControlledTable) -> anyhow::Result<ControlledTable> {
        let mut state = self.state.write().await;
        if state.tables.iter().any(|t| t.table_name == table.table_name) {
            anyhow::bail!("controlled table '{}' already exists", table.table_name);
        }
        Ok(state.push_table(table))
    }

    async fn update_table(&self, mut table: ControlledTable) -> anyhow::Result<ControlledTable> {
        let mut state = self.state.write().await;
        if state
            .tables
            .iter()
            .any(|t| t.id != table.id && t.table_name == table.table_name)
        {
            anyhow::bail!("controlled table '{}' already exists", table.table_name);
        }
        let slot = state
            .tables
            .iter_mut()
            .find(|t| t.id == table.id)
            .ok_or_else(|| anyhow::anyhow!("controlled table {} not found", table.id))?;
        table.created_at = slot.created_at;
        table.updated_at = Some(Utc::now());
        *slot = table.clone();
        Ok(table)
    }

    async fn delete_table(&self, id: TableId) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let before = state.tables.len();
        state.tables.retain(|t| t.id != id);
        if state.tables.len() == before {
            return Ok(false);
        }
        state.data.retain(|r| r.controlled_table_id != id);
        state.fields.retain(|r| r.controlled_table_id != id);
        Ok(true)
    }

    async fn replace_role_config(
        &self,
        table_id: TableId,
        config: &DataPermissionConfig,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let role_id = config.role_id;
        state
            .data
            .retain(|r| !(r.role_id == role_id && r.controlled_table_id == table_id));
        state
            .fields
            .retain(|r| !(r.role_id == role_id && r.controlled_table_id == table_id));

        let now = Utc::now();
        let id = state.next_id();
        state.data.push(RoleDataPermission {
            id,
            role_id,
            controlled_table_id: table_id,
            data_scope: config.data_scope.clone(),
            custom_condition: config.custom_condition.clone(),
            priority: DEFAULT_PRIORITY,
            enabled: true,
            created_at: Some(now),
        });
        for item in &config.fields {
            let id = state.next_id();
            state.fields.push(RoleFieldPermission {
                id,
                role_id,
                controlled_table_id: table_id,
                field_name: item.field_name.clone(),
                field_label: item.field_label.clone(),
                field_description: item.field_description.clone(),
                flags: item.flags,
                enabled: true,
                created_at: Some(now),
            });
        }
        Ok(())
    }

    async fn stored_data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>> {
        let state = self.state.read().await;
        Ok(state
            .data
            .iter()
            .filter(|r| r.role_id == role_id && r.controlled_table_id == table_id)
            .max_by_key(|r| (r.enabled, r.priority, r.id))
            .cloned())
    }

    async fn stored_field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>> {
        let state = self.state.read().await;
        Ok(state
            .fields
            .iter()
            .filter(|r| r.role_id == role_id && r.controlled_table_id == table_id)
            .cloned()
            .collect())
    }

    async fn statistics(&self) -> anyhow::Result<PolicyStatistics> {
        let state = self.state.read().await;
        let active_roles: HashSet<RoleId> = state.data.iter().map(|r| r.role_id).collect();
        Ok(PolicyStatistics {
            controlled_tables: state.tables.len() as u64,
            data_permissions: state.data.len() as u64,
            field_permissions: state.fields.len() as u64,
            active_roles: active_roles.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rowgate_core::DataScope;

    fn data_row(
        role_id: RoleId,
        table_id: TableId,
        scope: DataScope,
        priority: i32,
    ) -> RoleDataPermission {
        RoleDataPermission {
            id: 0,
            role_id,
            controlled_table_id: table_id,
            data_scope: scope,
            custom_condition: None,
            priority,
            enabled: true,
            created_at: None,
        }
    }

    async fn orders_table(store: &MemoryPolicyStore) -> TableId {
        store
            .seed_table(NewControlledTable {
                table_name: "orders".into(),
                enabled: true,
                ..Default::default()
            })
            .await
    }

    #[tokio::test]
    async fn test_disabled_table_is_not_controlled() {
        let store = MemoryPolicyStore::new();
        store
            .seed_table(NewControlledTable {
                table_name: "orders".into(),
                enabled: false,
                ..Default::default()
            })
            .await;
        assert!(store.controlled_table("orders").await.unwrap().is_none());
        assert!(store.find_table("orders").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_effective_data_row_prefers_priority_then_newest() {
        let store = MemoryPolicyStore::new();
        let table = orders_table(&store).await;
        store
            .seed_data_permission(data_row(1, table, DataScope::OwnOnly, 50))
            .await;
        store
            .seed_data_permission(data_row(1, table, DataScope::All, 80))
            .await;
        store
            .seed_data_permission(data_row(1, table, DataScope::Department, 80))
            .await;
        let mut disabled = data_row(1, table, DataScope::Custom, 99);
        disabled.enabled = false;
        store.seed_data_permission(disabled).await;

        let row = store.data_permission(1, table).await.unwrap().unwrap();
        assert_eq!(row.data_scope, DataScope::Department);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name() {
        let store = MemoryPolicyStore::new();
        orders_table(&store).await;
        let result = store
            .insert_table(NewControlledTable {
                table_name: "orders".into(),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_table_cascades_role_rows() {
        let store = MemoryPolicyStore::new();
        let table = orders_table(&store).await;
        store
            .seed_data_permission(data_row(1, table, DataScope::All, 50))
            .await;
        assert!(store.delete_table(table).await.unwrap());
        assert!(!store.delete_table(table).await.unwrap());
        assert_eq!(store.statistics().await.unwrap(), PolicyStatistics::default());
    }
}
