use rowgate_core::RoleId;
use rowgate_policy::{PolicyAdmin, PolicyEngine};
use sqlx::PgPool;

/// Shared application state.
pub struct AppState {
    pub engine: PolicyEngine,
    pub admin: PolicyAdmin,
    /// Database used for schema listings. `None` when running without one,
    /// in which case the schema routes answer 503.
    pub pool: Option<PgPool>,
    /// Schema searched by the schema routes.
    pub schema: String,
    /// Roles allowed on the `/admin` routes.
    pub admin_role_ids: Vec<RoleId>,
}
