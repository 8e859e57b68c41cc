use async_trait::async_trait;
use dashmap::DashMap;
use rowgate_interceptor::{Backend, BackendError, Query, Row};
use rowgate_policy::{Predicate, SqlRenderer};
use sqlx::{PgPool, Row as _};
use std::sync::Arc;

use crate::introspect::{self, ColumnInfo};
use crate::sql::{self, Statement};

/// [`Backend`] over a Postgres pool.
///
/// Predicates are rendered with the same [`SqlRenderer`] the policy engine
/// uses for previews. Column types are looked up once per table and drive
/// how row values are bound on insert and update.
pub struct PgBackend {
    pool: PgPool,
    renderer: SqlRenderer,
    schema: String,
    columns: DashMap<String, Arc<Vec<ColumnInfo>>>,
}

impl PgBackend {
    pub fn new(pool: PgPool, renderer: SqlRenderer) -> Self {
        Self {
            pool,
            renderer,
            schema: "public".to_string(),
            columns: DashMap::new(),
        }
    }

    /// Schema for unqualified table names.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `table` qualified with the configured schema unless it already is.
    fn qualified(&self, table: &str) -> String {
        qualify(&self.schema, table)
    }

    async fn columns(&self, table: &str) -> Result<Arc<Vec<ColumnInfo>>, BackendError> {
        if let Some(hit) = self.columns.get(table) {
            return Ok(hit.value().clone());
        }
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (schema, name),
            None => (self.schema.as_str(), table),
        };
        let columns = introspect::table_columns(&self.pool, schema, name).await?;
        if columns.is_empty() {
            return Err(BackendError::UnknownTable(table.to_string()));
        }
        let columns = Arc::new(columns);
        self.columns.insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    async fn fetch_rows(&self, table: &str, stmt: Statement) -> Result<Vec<Row>, BackendError> {
        tracing::debug!(table = %table, sql = %stmt.sql, params = stmt.binds.len(), "Fetching rows");
        let recs = sqlx::query_with(&stmt.sql, stmt.arguments()?)
            .fetch_all(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        recs.into_iter()
            .map(|r| {
                let value: serde_json::Value = r.try_get("row").map_err(anyhow::Error::from)?;
                into_row(table, value)
            })
            .collect()
    }

    async fn execute(&self, table: &str, stmt: Statement) -> Result<u64, BackendError> {
        tracing::debug!(table = %table, sql = %stmt.sql, params = stmt.binds.len(), "Executing statement");
        let done = sqlx::query_with(&stmt.sql, stmt.arguments()?)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(done.rows_affected())
    }
}

fn qualify(schema: &str, table: &str) -> String {
    if table.contains('.') {
        table.to_string()
    } else {
        format!("{schema}.{table}")
    }
}

fn into_row(table: &str, value: serde_json::Value) -> Result<Row, BackendError> {
    match value {
        serde_json::Value::Object(row) => Ok(row),
        other => Err(BackendError::InvalidRow {
            table: table.to_string(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn fetch(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        let stmt = sql::select(&self.renderer, &self.qualified(table), query)?;
        self.fetch_rows(table, stmt).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let columns = self.columns(table).await?;
        let stmt = sql::insert(&self.qualified(table), &columns, &row)?;
        self.fetch_rows(table, stmt)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidRow {
                table: table.to_string(),
                reason: "insert returned no row".into(),
            })
    }

    async fn update(&self, table: &str, filter: &Predicate, changes: Row) -> Result<u64, BackendError> {
        let columns = self.columns(table).await?;
        let stmt = sql::update(&self.renderer, &self.qualified(table), &columns, filter, &changes)?;
        self.execute(table, stmt).await
    }

    async fn delete(&self, table: &str, filter: &Predicate) -> Result<u64, BackendError> {
        let stmt = sql::delete(&self.renderer, &self.qualified(table), filter)?;
        self.execute(table, stmt).await
    }

    async fn count(&self, table: &str, filter: &Predicate) -> Result<u64, BackendError> {
        let stmt = sql::count(&self.renderer, &self.qualified(table), filter)?;
        tracing::debug!(table = %table, sql = %stmt.sql, params = stmt.binds.len(), "Counting rows");
        let rec = sqlx::query_with(&stmt.sql, stmt.arguments()?)
            .fetch_one(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        let n: i64 = rec.try_get("n").map_err(anyhow::Error::from)?;
        Ok(n.max(0) as u64)
    }
}
