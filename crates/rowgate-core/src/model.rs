//! Persisted policy records.
//!
//! Three record kinds describe access control:
//! - [`ControlledTable`]: a physical table subject to filtering
//! - [`RoleDataPermission`]: the row scope a role gets on a controlled table
//! - [`RoleFieldPermission`]: per-field gates a role gets on a controlled table
//!
//! A table without a `ControlledTable` record is unrestricted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an authenticated user.
pub type UserId = i64;
/// Identifier of a role.
pub type RoleId = i64;
/// Identifier of a controlled table record.
pub type TableId = i64;
/// Identifier of a department.
pub type DeptId = i64;

/// Default priority stamped on data permission rows written by the admin path.
pub const DEFAULT_PRIORITY: i32 = 50;

// =============================================================================
// DATA SCOPE
// =============================================================================

/// Row-visibility class assigned to a role for a table.
///
/// Persisted as text. Values that do not match a known scope are preserved in
/// [`DataScope::Unrecognized`] so they can be reported instead of silently
/// turning into open access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataScope {
    /// Rows owned by the requesting user.
    #[default]
    OwnOnly,
    /// Rows belonging to the requesting user's department.
    Department,
    /// Rows belonging to the user's department or any descendant department.
    DepartmentTree,
    /// Every row.
    All,
    /// Administrator-supplied condition.
    Custom,
    /// Stored text that is not a known scope.
    Unrecognized(String),
}

impl DataScope {
    /// The persisted text form.
    pub fn as_str(&self) -> &str {
        match self {
            DataScope::OwnOnly => "self",
            DataScope::Department => "dept",
            DataScope::DepartmentTree => "dept_and_child",
            DataScope::All => "all",
            DataScope::Custom => "custom",
            DataScope::Unrecognized(raw) => raw,
        }
    }

    /// Parse persisted text. Never fails; unknown text becomes `Unrecognized`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "self" => DataScope::OwnOnly,
            "dept" | "department" => DataScope::Department,
            "dept_and_child" | "department_and_descendants" => DataScope::DepartmentTree,
            "all" => DataScope::All,
            "custom" => DataScope::Custom,
            _ => DataScope::Unrecognized(raw.to_string()),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, DataScope::Unrecognized(_))
    }
}

impl From<String> for DataScope {
    fn from(raw: String) -> Self {
        DataScope::parse(&raw)
    }
}

impl From<DataScope> for String {
    fn from(scope: DataScope) -> Self {
        scope.as_str().to_string()
    }
}

impl fmt::Display for DataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// FIELD AXES
// =============================================================================

/// One of the four independent per-field permission gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldAxis {
    Visible,
    Editable,
    Exportable,
    Queryable,
}

impl FieldAxis {
    pub const ALL: [FieldAxis; 4] = [
        FieldAxis::Visible,
        FieldAxis::Editable,
        FieldAxis::Exportable,
        FieldAxis::Queryable,
    ];

    /// Parse the operation names used by call sites (`view`, `edit`, ...).
    pub fn from_operation(op: &str) -> Option<Self> {
        match op {
            "view" | "visible" => Some(FieldAxis::Visible),
            "edit" | "editable" => Some(FieldAxis::Editable),
            "export" | "exportable" => Some(FieldAxis::Exportable),
            "query" | "queryable" => Some(FieldAxis::Queryable),
            _ => None,
        }
    }
}

impl fmt::Display for FieldAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldAxis::Visible => "visible",
            FieldAxis::Editable => "editable",
            FieldAxis::Exportable => "exportable",
            FieldAxis::Queryable => "queryable",
        };
        f.write_str(s)
    }
}

/// Tri-state flags for one field. `None` means unspecified (default allow).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFlags {
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub editable: Option<bool>,
    #[serde(default)]
    pub exportable: Option<bool>,
    #[serde(default)]
    pub queryable: Option<bool>,
}

impl FieldFlags {
    pub fn get(&self, axis: FieldAxis) -> Option<bool> {
        match axis {
            FieldAxis::Visible => self.visible,
            FieldAxis::Editable => self.editable,
            FieldAxis::Exportable => self.exportable,
            FieldAxis::Queryable => self.queryable,
        }
    }

    pub fn set(&mut self, axis: FieldAxis, value: Option<bool>) {
        match axis {
            FieldAxis::Visible => self.visible = value,
            FieldAxis::Editable => self.editable = value,
            FieldAxis::Exportable => self.exportable = value,
            FieldAxis::Queryable => self.queryable = value,
        }
    }

    /// Whether the axis is allowed. Only an explicit `false` blocks.
    pub fn allows(&self, axis: FieldAxis) -> bool {
        self.get(axis) != Some(false)
    }

    /// Builder-style setter, handy when assembling fixtures.
    pub fn with(mut self, axis: FieldAxis, value: bool) -> Self {
        self.set(axis, Some(value));
        self
    }
}

// =============================================================================
// PERSISTED RECORDS
// =============================================================================

/// A physical table subject to access control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlledTable {
    pub id: TableId,
    /// Physical table name (unique).
    pub table_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    /// Default scope recorded for the table. Informational for the resolver,
    /// which falls back to `self` when a role has no rule.
    #[serde(default)]
    pub data_scope: DataScope,
    /// Column holding the owning user id.
    #[serde(default)]
    pub user_field: Option<String>,
    /// Column holding the owning department id.
    #[serde(default)]
    pub dept_field: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ControlledTable {
    /// Configured owner-user column, ignoring blank values.
    pub fn user_column(&self) -> Option<&str> {
        self.user_field.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Configured owner-department column, ignoring blank values.
    pub fn dept_column(&self) -> Option<&str> {
        self.dept_field.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Binds one role to one controlled table with a row scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDataPermission {
    pub id: i64,
    pub role_id: RoleId,
    pub controlled_table_id: TableId,
    pub data_scope: DataScope,
    /// Only consulted when `data_scope` is `custom`. May contain `${USER_ID}`.
    #[serde(default)]
    pub custom_condition: Option<String>,
    /// Tie-break hint; the highest priority enabled row wins.
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub enabled: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Binds one role to one field of one controlled table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleFieldPermission {
    pub id: i64,
    pub role_id: RoleId,
    pub controlled_table_id: TableId,
    pub field_name: String,
    #[serde(default)]
    pub field_label: Option<String>,
    #[serde(default)]
    pub field_description: Option<String>,
    #[serde(flatten)]
    pub flags: FieldFlags,
    pub enabled: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

// =============================================================================
// ADMINISTRATION PAYLOADS
// =============================================================================

/// Input for registering a controlled table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewControlledTable {
    pub table_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub data_scope: DataScope,
    #[serde(default)]
    pub user_field: Option<String>,
    #[serde(default)]
    pub dept_field: Option<String>,
}

/// One field entry in a saved role configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPermissionItem {
    pub field_name: String,
    #[serde(default)]
    pub field_label: Option<String>,
    #[serde(default)]
    pub field_description: Option<String>,
    #[serde(flatten)]
    pub flags: FieldFlags,
}

/// Complete configuration an administrator saves for one role on one table.
///
/// Saving replaces every existing data and field row for the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPermissionConfig {
    pub role_id: RoleId,
    pub table_name: String,
    pub data_scope: DataScope,
    #[serde(default)]
    pub custom_condition: Option<String>,
    /// Owner-user column to record on the controlled table.
    #[serde(default)]
    pub user_field: Option<String>,
    /// Owner-department column to record on the controlled table.
    #[serde(default)]
    pub dept_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldPermissionItem>,
}

impl DataPermissionConfig {
    /// The configuration reported for a role that never saved one.
    pub fn default_for(role_id: RoleId, table_name: impl Into<String>) -> Self {
        Self {
            role_id,
            table_name: table_name.into(),
            data_scope: DataScope::OwnOnly,
            custom_condition: None,
            user_field: None,
            dept_field: None,
            fields: Vec::new(),
        }
    }
}

/// Counters reported by the administration surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatistics {
    pub controlled_tables: u64,
    pub data_permissions: u64,
    pub field_permissions: u64,
    /// Distinct roles with at least one data permission row.
    pub active_roles: u64,
}

fn default_true() -> bool {
    true
}
