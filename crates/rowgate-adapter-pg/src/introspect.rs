//! Schema lookups used by the backend and by policy administration.

use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashSet;

/// A base table available for control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// `information_schema.columns.data_type`.
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
    pub primary_key: bool,
}

impl ColumnInfo {
    /// Whether an administrator would normally leave this column read-only:
    /// keys, foreign-key looking columns and timestamps.
    pub fn default_readonly(&self) -> bool {
        self.primary_key
            || self.name.contains("_id")
            || matches!(
                self.name.as_str(),
                "created_at" | "updated_at" | "deleted_at"
            )
    }
}

/// Base tables of `schema`, by name.
pub async fn list_tables(pool: &PgPool, schema: &str) -> anyhow::Result<Vec<TableInfo>> {
    let rows = sqlx::query(
        r#"
        select table_schema, table_name
        from information_schema.tables
        where table_type = 'BASE TABLE'
          and table_schema = $1
        order by table_name
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| TableInfo {
            schema: r.get("table_schema"),
            name: r.get("table_name"),
        })
        .collect())
}

/// Columns of `schema.table` in declaration order. Empty when the table does
/// not exist.
pub async fn table_columns(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> anyhow::Result<Vec<ColumnInfo>> {
    let pk_rows = sqlx::query(
        r#"
        select kcu.column_name
        from information_schema.table_constraints tc
        join information_schema.key_column_usage kcu
          on tc.constraint_name = kcu.constraint_name
         and tc.table_schema = kcu.table_schema
        where tc.constraint_type = 'PRIMARY KEY'
          and tc.table_schema = $1
          and tc.table_name = $2
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await?;
    let primary_key: HashSet<String> = pk_rows
        .into_iter()
        .map(|r| r.get::<String, _>("column_name"))
        .collect();

    let col_rows = sqlx::query(
        r#"
        select column_name, data_type, is_nullable, column_default
        from information_schema.columns
        where table_schema = $1 and table_name = $2
        order by ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut columns = Vec::with_capacity(col_rows.len());
    for c in col_rows {
        let name: String = c.get("column_name");
        let is_nullable: String = c.get("is_nullable");
        let column_default: Option<String> = c.get("column_default");
        columns.push(ColumnInfo {
            primary_key: primary_key.contains(&name),
            name,
            data_type: c.get("data_type"),
            nullable: is_nullable == "YES",
            has_default: column_default.is_some(),
        });
    }
    Ok(columns)
}
