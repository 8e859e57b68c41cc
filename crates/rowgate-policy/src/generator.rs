//! Predicate generation from a resolved data-scope rule.

use rowgate_core::{ControlledTable, DataScope, UserId};

use crate::error::PolicyError;
use crate::expr::{CustomCondition, Ident, Predicate};
use crate::resolver::DataScopeRule;

/// Turns one role's data-scope rule into a row predicate for one user.
///
/// Every outcome that cannot be expressed as a predicate is an error. There is
/// no empty result that a caller could mistake for open access.
#[derive(Debug, Clone, Copy)]
pub struct PredicateGenerator {
    custom_condition_check: bool,
}

impl Default for PredicateGenerator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PredicateGenerator {
    pub fn new(custom_condition_check: bool) -> Self {
        Self {
            custom_condition_check,
        }
    }

    pub fn generate(
        &self,
        rule: &DataScopeRule,
        table: &ControlledTable,
        user: UserId,
    ) -> Result<Predicate, PolicyError> {
        let name = table.table_name.as_str();
        match &rule.scope {
            DataScope::OwnOnly => {
                let column = owner_column(table.user_column(), name, "user_field", "self")?;
                Ok(Predicate::eq(column, user))
            }
            DataScope::Department => {
                let column = owner_column(table.dept_column(), name, "dept_field", "dept")?;
                Ok(Predicate::DeptOfUser { column, user })
            }
            DataScope::DepartmentTree => {
                let column =
                    owner_column(table.dept_column(), name, "dept_field", "dept_and_child")?;
                Ok(Predicate::DeptTreeOfUser { column, user })
            }
            DataScope::All => Ok(Predicate::True),
            DataScope::Custom => {
                let text = rule
                    .custom_condition
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        PolicyError::configuration(name, "custom scope without a condition")
                    })?;
                let condition = CustomCondition::parse(text, self.custom_condition_check)
                    .map_err(|e| PolicyError::configuration(name, e.to_string()))?;
                Ok(Predicate::Custom { condition, user })
            }
            DataScope::Unrecognized(raw) => Err(PolicyError::configuration(
                name,
                format!("unrecognized data scope '{raw}'"),
            )),
        }
    }
}

fn owner_column(
    column: Option<&str>,
    table: &str,
    setting: &str,
    scope: &str,
) -> Result<Ident, PolicyError> {
    let column = column.ok_or_else(|| {
        PolicyError::configuration(table, format!("scope '{scope}' requires {setting}"))
    })?;
    Ident::new(column).map_err(|e| PolicyError::configuration(table, e.to_string()))
}
