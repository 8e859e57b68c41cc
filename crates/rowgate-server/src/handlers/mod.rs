pub mod admin;
pub mod policy;
pub mod schema;

use axum::Json;
use serde_json::json;

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "service": "rowgate-server" }))
}
