//! User directory lookups needed outside predicate rendering.

use async_trait::async_trait;
use rowgate_core::{DeptId, UserId};
use std::collections::HashMap;

/// Resolves organizational facts about a user.
#[async_trait]
pub trait Directory: Send + Sync {
    /// The department the user belongs to, if any.
    async fn department_of(&self, user_id: UserId) -> anyhow::Result<Option<DeptId>>;
}

/// Directory backed by a fixed map.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    departments: HashMap<UserId, DeptId>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, user_id: UserId, dept_id: DeptId) -> Self {
        self.departments.insert(user_id, dept_id);
        self
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn department_of(&self, user_id: UserId) -> anyhow::Result<Option<DeptId>> {
        Ok(self.departments.get(&user_id).copied())
    }
}
