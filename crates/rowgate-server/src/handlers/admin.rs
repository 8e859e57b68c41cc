//! Policy administration routes.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rowgate_core::{
    ControlledTable, DataPermissionConfig, NewControlledTable, PolicyStatistics, RoleId, TableId,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_tables(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ControlledTable>>, ApiError> {
    Ok(Json(state.admin.list_tables().await?))
}

pub async fn create_table(
    State(state): State<Arc<AppState>>,
    Json(table): Json<NewControlledTable>,
) -> Result<(StatusCode, Json<ControlledTable>), ApiError> {
    let created = state.admin.create_table(table).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TableId>,
    Json(mut table): Json<ControlledTable>,
) -> Result<Json<ControlledTable>, ApiError> {
    table.id = id;
    Ok(Json(state.admin.update_table(table).await?))
}

pub async fn delete_table(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TableId>,
) -> Result<StatusCode, ApiError> {
    state.admin.delete_table(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ConfigParams {
    pub role_id: RoleId,
    pub table: String,
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConfigParams>,
) -> Result<Json<DataPermissionConfig>, ApiError> {
    Ok(Json(
        state.admin.get_config(params.role_id, &params.table).await?,
    ))
}

/// Replace a role's configuration on a table.
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<DataPermissionConfig>,
) -> Result<StatusCode, ApiError> {
    state.admin.save_config(config).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn statistics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PolicyStatistics>, ApiError> {
    Ok(Json(state.admin.statistics().await?))
}
