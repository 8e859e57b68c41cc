//! Policy resolution: table name + role -> stored rules.

use rowgate_core::{
    ControlledTable, DataScope, FieldFlags, RoleDataPermission, RoleFieldPermission, RoleId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{PolicyCache, RoleRules};
use crate::error::PolicyError;
use crate::merger::merge_flags;
use crate::store::PolicyStore;

/// Field name -> flags.
pub type FieldRuleMap = BTreeMap<String, FieldFlags>;

/// Where a data-scope rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    /// An enabled stored row.
    Configured,
    /// No row exists; the `self` fallback applies.
    Defaulted,
}

/// The data-scope rule one role has on one controlled table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataScopeRule {
    pub scope: DataScope,
    pub custom_condition: Option<String>,
    pub origin: RuleOrigin,
}

impl DataScopeRule {
    /// Rule applied to a role without a stored row: `self`, regardless of the
    /// table's recorded default scope.
    pub fn defaulted() -> Self {
        Self {
            scope: DataScope::OwnOnly,
            custom_condition: None,
            origin: RuleOrigin::Defaulted,
        }
    }

    pub fn from_row(row: &RoleDataPermission) -> Self {
        Self {
            scope: row.data_scope.clone(),
            custom_condition: row.custom_condition.clone(),
            origin: RuleOrigin::Configured,
        }
    }
}

/// Rules of one role on a controlled table.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlledPolicy {
    pub table: ControlledTable,
    pub rule: DataScopeRule,
    pub fields: FieldRuleMap,
}

/// Outcome of resolving a table for a role.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No enabled controlled table: no row or field restriction.
    Unrestricted,
    Controlled(ControlledPolicy),
}

/// Reads policy rows, through the cache when one is configured.
#[derive(Clone)]
pub struct PolicyResolver {
    store: Arc<dyn PolicyStore>,
    cache: Option<Arc<PolicyCache>>,
    field_permission_enabled: bool,
}

impl PolicyResolver {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        cache: Option<Arc<PolicyCache>>,
        field_permission_enabled: bool,
    ) -> Self {
        Self {
            store,
            cache,
            field_permission_enabled,
        }
    }

    /// The enabled controlled table with this name, if any.
    pub async fn controlled_table(
        &self,
        table_name: &str,
    ) -> Result<Option<ControlledTable>, PolicyError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.table(table_name)
        {
            return Ok(hit);
        }

        let table = self
            .store
            .controlled_table(table_name)
            .await
            .map_err(|e| PolicyError::lookup(table_name, e))?;

        if let Some(cache) = &self.cache {
            cache.put_table(table_name, table.clone());
        }
        Ok(table)
    }

    /// Resolve `table_name` for one role. Unrestricted tables return before any
    /// role lookup.
    pub async fn resolve(&self, table_name: &str, role_id: RoleId) -> Result<Resolution, PolicyError> {
        let Some(table) = self.controlled_table(table_name).await? else {
            return Ok(Resolution::Unrestricted);
        };
        Ok(Resolution::Controlled(
            self.resolve_for_table(&table, role_id).await?,
        ))
    }

    /// Resolve a role on a table already known to be controlled.
    pub async fn resolve_for_table(
        &self,
        table: &ControlledTable,
        role_id: RoleId,
    ) -> Result<ControlledPolicy, PolicyError> {
        let rules = self.role_rules(table, role_id).await?;
        let rule = rules
            .data
            .as_ref()
            .map(DataScopeRule::from_row)
            .unwrap_or_else(DataScopeRule::defaulted);

        if rule.origin == RuleOrigin::Defaulted {
            tracing::debug!(
                table = %table.table_name,
                role_id,
                "No data rule for role, defaulting to self scope"
            );
        }

        Ok(ControlledPolicy {
            table: table.clone(),
            rule,
            fields: field_map(&rules.fields),
        })
    }

    /// Field rules of one role, read without the data rule. Empty when field
    /// rules are switched off.
    pub async fn field_rules(
        &self,
        table: &ControlledTable,
        role_id: RoleId,
    ) -> Result<FieldRuleMap, PolicyError> {
        if !self.field_permission_enabled {
            return Ok(FieldRuleMap::new());
        }
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.role_rules(role_id, table.id)
        {
            return Ok(field_map(&hit.fields));
        }
        let rows = self
            .store
            .field_permissions(role_id, table.id)
            .await
            .map_err(|e| PolicyError::lookup(&table.table_name, e))?;
        Ok(field_map(&rows))
    }

    /// Whether any of `roles` holds an enabled data rule on `table`.
    pub async fn can_create(
        &self,
        table: &ControlledTable,
        roles: &[RoleId],
    ) -> Result<bool, PolicyError> {
        for role_id in roles {
            if self.role_rules(table, *role_id).await?.data.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn role_rules(
        &self,
        table: &ControlledTable,
        role_id: RoleId,
    ) -> Result<RoleRules, PolicyError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.role_rules(role_id, table.id)
        {
            return Ok(hit);
        }

        let lookup = |e| PolicyError::lookup(&table.table_name, e);
        let data = self
            .store
            .data_permission(role_id, table.id)
            .await
            .map_err(lookup)?;
        let fields = if self.field_permission_enabled {
            self.store
                .field_permissions(role_id, table.id)
                .await
                .map_err(lookup)?
        } else {
            Vec::new()
        };

        let rules = RoleRules { data, fields };
        if let Some(cache) = &self.cache {
            cache.put_role_rules(role_id, table.id, rules.clone());
        }
        Ok(rules)
    }
}

/// Index field rows by name. Several rows for one field merge like roles do.
fn field_map(rows: &[RoleFieldPermission]) -> FieldRuleMap {
    let mut map = FieldRuleMap::new();
    for row in rows {
        map.entry(row.field_name.clone())
            .and_modify(|flags| *flags = merge_flags([*flags, row.flags]))
            .or_insert(row.flags);
    }
    map
}
