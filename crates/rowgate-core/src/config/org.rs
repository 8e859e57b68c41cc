//! Organization schema used by department scopes.
//!
//! The `dept` and `dept_and_child` scopes compare a controlled table's
//! department column against the requesting user's department, which lives in
//! tables outside the policy store. These names tell the predicate renderer
//! where to look.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgSchemaConfig {
    /// Table holding users.
    #[serde(default = "default_users_table")]
    pub users_table: String,

    /// Primary key column of the users table.
    #[serde(default = "default_id_column")]
    pub user_id_column: String,

    /// Column on the users table holding the user's department.
    #[serde(default = "default_user_dept_column")]
    pub user_dept_column: String,

    /// Table holding departments.
    #[serde(default = "default_dept_table")]
    pub dept_table: String,

    /// Primary key column of the departments table.
    #[serde(default = "default_id_column")]
    pub dept_id_column: String,

    /// Column on the departments table pointing at the parent department.
    #[serde(default = "default_dept_parent_column")]
    pub dept_parent_column: String,
}

impl Default for OrgSchemaConfig {
    fn default() -> Self {
        Self {
            users_table: default_users_table(),
            user_id_column: default_id_column(),
            user_dept_column: default_user_dept_column(),
            dept_table: default_dept_table(),
            dept_id_column: default_id_column(),
            dept_parent_column: default_dept_parent_column(),
        }
    }
}

fn default_users_table() -> String {
    "sys_users".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_user_dept_column() -> String {
    "dept_id".to_string()
}

fn default_dept_table() -> String {
    "sys_dept".to_string()
}

fn default_dept_parent_column() -> String {
    "parent_id".to_string()
}
