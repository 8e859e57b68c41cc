//! The authenticated actor issuing a request.

use serde::{Deserialize, Serialize};

use crate::model::{RoleId, UserId};

/// Identity handed over by the authentication layer.
///
/// A principal without a user id is anonymous; the interceptor performs no
/// rewriting for anonymous access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Every role held by the principal.
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
    /// Role used by single-role call sites.
    #[serde(default)]
    pub primary_role: Option<RoleId>,
}

impl Principal {
    /// An authenticated principal holding the given roles. The first role
    /// becomes the primary role.
    pub fn new(user_id: UserId, role_ids: Vec<RoleId>) -> Self {
        let primary_role = role_ids.first().copied();
        Self {
            user_id: Some(user_id),
            role_ids,
            primary_role,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_primary_role(mut self, role: RoleId) -> Self {
        self.primary_role = Some(role);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    /// Role set with the primary role included, deduplicated, order kept.
    pub fn effective_roles(&self) -> Vec<RoleId> {
        let mut roles = Vec::with_capacity(self.role_ids.len() + 1);
        for role in self.primary_role.iter().chain(self.role_ids.iter()) {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        roles
    }
}
