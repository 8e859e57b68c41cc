//! Policy administration.
//!
//! Writes go straight to the [`PolicyAdminStore`]; each one invalidates the
//! cache entries it could have made stale.

use rowgate_core::{
    ControlledTable, DataPermissionConfig, DataScope, FieldPermissionItem, NewControlledTable,
    PolicyStatistics, RoleId, TableId,
};
use std::sync::Arc;

use crate::cache::PolicyCache;
use crate::error::PolicyError;
use crate::expr::{CustomCondition, is_plain_identifier};
use crate::store::PolicyAdminStore;

pub struct PolicyAdmin {
    store: Arc<dyn PolicyAdminStore>,
    cache: Option<Arc<PolicyCache>>,
    custom_condition_check: bool,
}

impl PolicyAdmin {
    pub fn new(
        store: Arc<dyn PolicyAdminStore>,
        cache: Option<Arc<PolicyCache>>,
        custom_condition_check: bool,
    ) -> Self {
        Self {
            store,
            cache,
            custom_condition_check,
        }
    }

    pub async fn create_table(
        &self,
        table: NewControlledTable,
    ) -> Result<ControlledTable, PolicyError> {
        validate_table_name(&table.table_name)?;
        validate_owner_column("user_field", table.user_field.as_deref())?;
        validate_owner_column("dept_field", table.dept_field.as_deref())?;
        if self.store.find_table(&table.table_name).await?.is_some() {
            return Err(PolicyError::DuplicateTable(table.table_name));
        }

        let created = self.store.insert_table(table).await?;
        self.invalidate_table(&created);
        tracing::info!(
            table = %created.table_name,
            table_id = created.id,
            "Registered controlled table"
        );
        Ok(created)
    }

    pub async fn update_table(&self, table: ControlledTable) -> Result<ControlledTable, PolicyError> {
        validate_table_name(&table.table_name)?;
        validate_owner_column("user_field", table.user_field.as_deref())?;
        validate_owner_column("dept_field", table.dept_field.as_deref())?;

        let existing = self
            .store
            .table_by_id(table.id)
            .await?
            .ok_or_else(|| PolicyError::TableNotFound(table.id.to_string()))?;
        if let Some(other) = self.store.find_table(&table.table_name).await?
            && other.id != table.id
        {
            return Err(PolicyError::DuplicateTable(table.table_name));
        }

        let updated = self.store.update_table(table).await?;
        self.invalidate_table(&existing);
        self.invalidate_table(&updated);
        Ok(updated)
    }

    /// Delete a controlled table and all role rows on it.
    pub async fn delete_table(&self, id: TableId) -> Result<(), PolicyError> {
        let existing = self
            .store
            .table_by_id(id)
            .await?
            .ok_or_else(|| PolicyError::TableNotFound(id.to_string()))?;
        self.store.delete_table(id).await?;
        self.invalidate_table(&existing);
        tracing::info!(table = %existing.table_name, table_id = id, "Deleted controlled table");
        Ok(())
    }

    pub async fn list_tables(&self) -> Result<Vec<ControlledTable>, PolicyError> {
        Ok(self.store.list_tables().await?)
    }

    /// Replace a role's whole configuration on a table.
    ///
    /// The owner columns given in `config` are written onto the controlled
    /// table first, then every data and field row of the role on the table is
    /// replaced.
    pub async fn save_config(&self, config: DataPermissionConfig) -> Result<(), PolicyError> {
        let mut table = self
            .store
            .find_table(&config.table_name)
            .await?
            .ok_or_else(|| PolicyError::TableNotFound(config.table_name.clone()))?;

        self.validate_config(&config)?;

        let owner_changed =
            table.user_field != config.user_field || table.dept_field != config.dept_field;
        if owner_changed {
            table.user_field = config.user_field.clone();
            table.dept_field = config.dept_field.clone();
            table = self.store.update_table(table).await?;
        }

        self.store.replace_role_config(table.id, &config).await?;
        if owner_changed {
            self.invalidate_table(&table);
        } else if let Some(cache) = &self.cache {
            // Only this role's rules changed.
            cache.invalidate_role_table(config.role_id, table.id);
        }

        tracing::info!(
            table = %table.table_name,
            role_id = config.role_id,
            scope = %config.data_scope,
            fields = config.fields.len(),
            "Saved data permission configuration"
        );
        Ok(())
    }

    /// A role's saved configuration on a table; the `self` default when the
    /// role never saved one.
    pub async fn get_config(
        &self,
        role_id: RoleId,
        table_name: &str,
    ) -> Result<DataPermissionConfig, PolicyError> {
        let table = self
            .store
            .find_table(table_name)
            .await?
            .ok_or_else(|| PolicyError::TableNotFound(table_name.to_string()))?;

        let Some(data) = self.store.stored_data_permission(role_id, table.id).await? else {
            return Ok(DataPermissionConfig::default_for(role_id, table_name));
        };
        let fields = self
            .store
            .stored_field_permissions(role_id, table.id)
            .await?
            .into_iter()
            .map(|row| FieldPermissionItem {
                field_name: row.field_name,
                field_label: row.field_label,
                field_description: row.field_description,
                flags: row.flags,
            })
            .collect();

        Ok(DataPermissionConfig {
            role_id,
            table_name: table.table_name,
            data_scope: data.data_scope,
            custom_condition: data.custom_condition,
            user_field: table.user_field,
            dept_field: table.dept_field,
            fields,
        })
    }

    pub async fn statistics(&self) -> Result<PolicyStatistics, PolicyError> {
        Ok(self.store.statistics().await?)
    }

    fn validate_config(&self, config: &DataPermissionConfig) -> Result<(), PolicyError> {
        validate_owner_column("user_field", config.user_field.as_deref())?;
        validate_owner_column("dept_field", config.dept_field.as_deref())?;

        match &config.data_scope {
            DataScope::Unrecognized(raw) => {
                return Err(PolicyError::Validation(format!(
                    "unrecognized data scope '{raw}'"
                )));
            }
            DataScope::Custom => {
                let text = config.custom_condition.as_deref().unwrap_or_default();
                CustomCondition::parse(text, self.custom_condition_check)?;
            }
            DataScope::OwnOnly if is_blank(config.user_field.as_deref()) => {
                return Err(PolicyError::Validation(
                    "scope 'self' requires user_field".into(),
                ));
            }
            DataScope::Department | DataScope::DepartmentTree
                if is_blank(config.dept_field.as_deref()) =>
            {
                return Err(PolicyError::Validation(format!(
                    "scope '{}' requires dept_field",
                    config.data_scope
                )));
            }
            _ => {}
        }

        for (i, item) in config.fields.iter().enumerate() {
            if !is_plain_identifier(&item.field_name) {
                return Err(PolicyError::Validation(format!(
                    "fields[{i}].field_name '{}' is not a plain column name",
                    item.field_name
                )));
            }
            if config.fields[..i]
                .iter()
                .any(|other| other.field_name == item.field_name)
            {
                return Err(PolicyError::Validation(format!(
                    "field '{}' listed twice",
                    item.field_name
                )));
            }
        }
        Ok(())
    }

    fn invalidate_table(&self, table: &ControlledTable) {
        if let Some(cache) = &self.cache {
            cache.invalidate_table(&table.table_name);
            cache.invalidate_table_id(table.id);
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn validate_table_name(name: &str) -> Result<(), PolicyError> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(PolicyError::Validation(format!(
            "table name '{name}' is not a plain identifier"
        )))
    }
}

fn validate_owner_column(setting: &str, value: Option<&str>) -> Result<(), PolicyError> {
    match value {
        Some(v) if !v.trim().is_empty() && !is_plain_identifier(v.trim()) => Err(
            PolicyError::Validation(format!("{setting} '{v}' is not a plain column name")),
        ),
        _ => Ok(()),
    }
}
