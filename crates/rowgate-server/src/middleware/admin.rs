use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use rowgate_core::{Principal, RoleId};
use std::sync::Arc;

use crate::state::AppState;

/// Axum middleware guarding the policy administration routes.
///
/// Runs after [`super::principal::principal_from_headers`]. Anonymous
/// requests get 401; principals holding none of the configured admin roles
/// get 403.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .filter(|p| !p.is_anonymous())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !is_admin(principal, &state.admin_role_ids) {
        tracing::warn!(
            user_id = ?principal.user_id,
            path = %req.uri().path(),
            "Admin route refused"
        );
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(req).await)
}

fn is_admin(principal: &Principal, admin_roles: &[RoleId]) -> bool {
    principal
        .effective_roles()
        .iter()
        .any(|role| admin_roles.contains(role))
}
