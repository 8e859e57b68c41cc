//! Effective-policy inspection.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use rowgate_core::{RoleId, UserId};
use rowgate_interceptor::RequestSession;
use rowgate_policy::PolicyPreview;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub role_id: RoleId,
    pub table: String,
    pub user_id: UserId,
}

/// What one role would see on a table for a given user, without running a
/// query.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<PolicyPreview>, ApiError> {
    let preview = state
        .engine
        .preview(params.role_id, &params.table, params.user_id)
        .await?;
    Ok(Json(preview))
}

/// The calling principal's merged policy on `table`.
pub async fn effective(
    Path(table): Path<String>,
    session: RequestSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let interceptor = session.interceptor();
    let policy = interceptor.policy(&table).await?;
    let rendered = interceptor.engine().renderer().render(&policy.predicate, 0);
    let principal = interceptor.principal();

    Ok(Json(json!({
        "table": table,
        "user_id": principal.user_id,
        "roles": principal.effective_roles(),
        "controlled": policy.is_controlled(),
        "sql_condition": rendered.sql,
        "params": rendered.params,
        "field_permissions": policy.fields,
    })))
}
