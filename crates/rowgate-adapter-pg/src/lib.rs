//! Postgres adapter for Rowgate.
//!
//! - [`PgPolicyStore`]: policy rows, administration writes, and the user
//!   directory, all on one pool
//! - [`PgBackend`]: permission-aware sessions dispatch here; every statement
//!   uses bound parameters
//! - [`introspect`]: table and column listings for administration

use rowgate_core::DatabaseConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

mod backend;
pub mod introspect;
pub mod sql;
mod store;

pub use backend::PgBackend;
pub use introspect::{ColumnInfo, TableInfo};
pub use store::PgPolicyStore;

/// Open a pool for `config`.
pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;
    tracing::info!(
        max_connections = config.max_connections,
        "Connected to Postgres"
    );
    Ok(pool)
}

/// Create the policy tables if they do not exist.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
