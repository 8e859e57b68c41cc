//! Table and column listings for building configurations.

use axum::{
    Json,
    extract::{Path, State},
};
use rowgate_adapter_pg::{TableInfo, introspect};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FieldInfo {
    pub field_name: String,
    pub data_type: String,
    pub nullable: bool,
    /// Suggested default for the editable flag in configuration screens.
    pub default_readonly: bool,
}

fn pool(state: &AppState) -> Result<&PgPool, ApiError> {
    state
        .pool
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("schema listing needs a database".into()))
}

pub async fn list_tables(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TableInfo>>, ApiError> {
    let tables = introspect::list_tables(pool(&state)?, &state.schema).await?;
    Ok(Json(tables))
}

pub async fn table_fields(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> Result<Json<Vec<FieldInfo>>, ApiError> {
    let columns = introspect::table_columns(pool(&state)?, &state.schema, &table).await?;
    let fields = columns
        .into_iter()
        .map(|c| FieldInfo {
            default_readonly: c.default_readonly(),
            field_name: c.name,
            data_type: c.data_type,
            nullable: c.nullable,
        })
        .collect();
    Ok(Json(fields))
}
