//! Statement building for [`PgBackend`](crate::PgBackend).
//!
//! Statements are assembled as text plus an ordered bind list and only turned
//! into [`PgArguments`] at execution time, so rendering can be checked
//! without a database.

use rowgate_interceptor::{BackendError, Query, Row};
use rowgate_policy::{Ident, Param, Predicate, SqlRenderer};
use serde_json::Value;
use sqlx::Arguments;
use sqlx::postgres::PgArguments;

use crate::introspect::ColumnInfo;

pub(crate) fn args_add<T>(args: &mut PgArguments, v: T) -> anyhow::Result<()>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| anyhow::anyhow!(e))
}

/// A value waiting to be bound.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    /// Predicate, limit or offset parameter.
    Param(Param),
    /// Row value, bound according to the column's declared type.
    Column { data_type: String, value: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

impl Statement {
    /// Append `bind` and return its placeholder.
    fn push(&mut self, bind: Bind) -> String {
        let cast = match &bind {
            Bind::Column { data_type, .. } => cast_for_pg_type(data_type)
                .map(|c| format!("::{c}"))
                .unwrap_or_default(),
            Bind::Param(_) => String::new(),
        };
        self.binds.push(bind);
        format!("${}{}", self.binds.len(), cast)
    }

    /// Append the rendered `predicate`, numbering after the binds so far.
    fn push_predicate(&mut self, renderer: &SqlRenderer, predicate: &Predicate) {
        let rendered = renderer.render(predicate, self.binds.len());
        self.sql.push_str(&rendered.sql);
        self.binds
            .extend(rendered.params.into_iter().map(Bind::Param));
    }

    pub fn arguments(&self) -> anyhow::Result<PgArguments> {
        let mut args = PgArguments::default();
        for bind in &self.binds {
            match bind {
                Bind::Param(param) => add_param(&mut args, param)?,
                Bind::Column { data_type, value } => add_value(&mut args, data_type, value)?,
            }
        }
        Ok(args)
    }
}

fn cast_for_pg_type(data_type: &str) -> Option<&'static str> {
    match data_type {
        "numeric" | "real" | "double precision" | "decimal" => Some("numeric"),
        "date" => Some("date"),
        "timestamp with time zone" => Some("timestamptz"),
        "timestamp without time zone" => Some("timestamp"),
        "time without time zone" => Some("time"),
        "uuid" => Some("uuid"),
        _ => None,
    }
}

fn add_param(args: &mut PgArguments, param: &Param) -> anyhow::Result<()> {
    match param {
        Param::Int(n) => args_add(args, *n),
        Param::Text(s) => args_add(args, s.clone()),
        Param::Bool(b) => args_add(args, *b),
        Param::Null => args_add(args, Option::<String>::None),
    }
}

fn add_value(args: &mut PgArguments, data_type: &str, v: &Value) -> anyhow::Result<()> {
    if v.is_null() {
        return match data_type {
            "boolean" => args_add(args, Option::<bool>::None),
            "integer" | "bigint" | "smallint" => args_add(args, Option::<i64>::None),
            "json" | "jsonb" => args_add(args, Option::<sqlx::types::Json<Value>>::None),
            _ => args_add(args, Option::<String>::None),
        };
    }

    match data_type {
        "boolean" => {
            let b = v
                .as_bool()
                .ok_or_else(|| anyhow::anyhow!("expected boolean, got {v}"))?;
            args_add(args, b)
        }
        "integer" | "bigint" | "smallint" => {
            let n = v
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("expected integer, got {v}"))?;
            args_add(args, n)
        }
        "json" | "jsonb" => args_add(args, sqlx::types::Json(v.clone())),
        // Bound as text; the placeholder carries the cast.
        _ => {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            args_add(args, s)
        }
    }
}

// =============================================================================
// STATEMENTS
// =============================================================================

/// Quoted, optionally schema-qualified table reference.
pub(crate) fn table_ref(table: &str) -> Result<String, BackendError> {
    Ident::new(table)
        .map(|ident| ident.quoted())
        .map_err(|_| BackendError::UnknownTable(table.to_string()))
}

pub fn select(renderer: &SqlRenderer, table: &str, query: &Query) -> Result<Statement, BackendError> {
    let mut stmt = Statement {
        sql: format!("SELECT to_jsonb(t) AS row FROM {} AS t WHERE ", table_ref(table)?),
        binds: Vec::new(),
    };
    stmt.push_predicate(renderer, &query.filter);

    if !query.order_by.is_empty() {
        let order: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                let dir = if o.descending { "DESC" } else { "ASC" };
                format!("{} {}", o.column.quoted(), dir)
            })
            .collect();
        stmt.sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    if let Some(limit) = query.limit {
        let ph = stmt.push(Bind::Param(Param::Int(clamp(limit))));
        stmt.sql.push_str(&format!(" LIMIT {ph}"));
    }
    if let Some(offset) = query.offset {
        let ph = stmt.push(Bind::Param(Param::Int(clamp(offset))));
        stmt.sql.push_str(&format!(" OFFSET {ph}"));
    }
    Ok(stmt)
}

pub fn count(
    renderer: &SqlRenderer,
    table: &str,
    filter: &Predicate,
) -> Result<Statement, BackendError> {
    let mut stmt = Statement {
        sql: format!("SELECT COUNT(*) AS n FROM {} AS t WHERE ", table_ref(table)?),
        binds: Vec::new(),
    };
    stmt.push_predicate(renderer, filter);
    Ok(stmt)
}

pub fn insert(table: &str, columns: &[ColumnInfo], row: &Row) -> Result<Statement, BackendError> {
    let target = table_ref(table)?;
    if row.is_empty() {
        return Ok(Statement {
            sql: format!("INSERT INTO {target} AS t DEFAULT VALUES RETURNING to_jsonb(t) AS row"),
            binds: Vec::new(),
        });
    }

    let mut stmt = Statement::default();
    let mut names = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    for (key, value) in row {
        let column = column_for(table, columns, key)?;
        names.push(quote_column(table, key)?);
        placeholders.push(stmt.push(Bind::Column {
            data_type: column.data_type.clone(),
            value: value.clone(),
        }));
    }
    stmt.sql = format!(
        "INSERT INTO {target} AS t ({}) VALUES ({}) RETURNING to_jsonb(t) AS row",
        names.join(", "),
        placeholders.join(", ")
    );
    Ok(stmt)
}

pub fn update(
    renderer: &SqlRenderer,
    table: &str,
    columns: &[ColumnInfo],
    filter: &Predicate,
    changes: &Row,
) -> Result<Statement, BackendError> {
    let target = table_ref(table)?;
    if changes.is_empty() {
        return Err(BackendError::InvalidRow {
            table: table.to_string(),
            reason: "no columns to update".into(),
        });
    }

    let mut stmt = Statement::default();
    let mut sets = Vec::with_capacity(changes.len());
    for (key, value) in changes {
        let column = column_for(table, columns, key)?;
        let ph = stmt.push(Bind::Column {
            data_type: column.data_type.clone(),
            value: value.clone(),
        });
        sets.push(format!("{} = {}", quote_column(table, key)?, ph));
    }
    stmt.sql = format!("UPDATE {target} AS t SET {} WHERE ", sets.join(", "));
    stmt.push_predicate(renderer, filter);
    Ok(stmt)
}

pub fn delete(
    renderer: &SqlRenderer,
    table: &str,
    filter: &Predicate,
) -> Result<Statement, BackendError> {
    let mut stmt = Statement {
        sql: format!("DELETE FROM {} AS t WHERE ", table_ref(table)?),
        binds: Vec::new(),
    };
    stmt.push_predicate(renderer, filter);
    Ok(stmt)
}

fn column_for<'a>(
    table: &str,
    columns: &'a [ColumnInfo],
    key: &str,
) -> Result<&'a ColumnInfo, BackendError> {
    columns
        .iter()
        .find(|c| c.name == key)
        .ok_or_else(|| BackendError::InvalidRow {
            table: table.to_string(),
            reason: format!("unknown column '{key}'"),
        })
}

fn quote_column(table: &str, key: &str) -> Result<String, BackendError> {
    match Ident::new(key) {
        Ok(ident) if !ident.as_str().contains('.') => Ok(ident.quoted()),
        _ => Err(BackendError::InvalidRow {
            table: table.to_string(),
            reason: format!("invalid column name '{key}'"),
        }),
    }
}

fn clamp(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn col(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            has_default: false,
            primary_key: name == "id",
        }
    }

    fn columns() -> Vec<ColumnInfo> {
        vec![
            col("id", "bigint"),
            col("name", "text"),
            col("total", "numeric"),
            col("created_by", "bigint"),
        ]
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn own(user: i64) -> Predicate {
        Predicate::eq(Ident::new("created_by").unwrap(), user)
    }

    #[test]
    fn test_select_numbers_paging_after_predicate() {
        let query = Query::matching(own(7))
            .order_by("name", true)
            .unwrap()
            .limit(10)
            .offset(20);
        let stmt = select(&SqlRenderer::default(), "orders", &query).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT to_jsonb(t) AS row FROM \"orders\" AS t WHERE \"created_by\" = $1 \
             ORDER BY \"name\" DESC LIMIT $2 OFFSET $3"
        );
        assert_eq!(
            stmt.binds,
            vec![
                Bind::Param(Param::Int(7)),
                Bind::Param(Param::Int(10)),
                Bind::Param(Param::Int(20)),
            ]
        );
    }

    #[test]
    fn test_update_binds_values_before_predicate() {
        let stmt = update(
            &SqlRenderer::default(),
            "orders",
            &columns(),
            &own(7),
            &row(json!({"name": "a", "total": 9.5})),
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"orders\" AS t SET \"name\" = $1, \"total\" = $2::numeric \
             WHERE \"created_by\" = $3"
        );
        assert_eq!(stmt.binds.len(), 3);
        assert_eq!(stmt.binds[2], Bind::Param(Param::Int(7)));
    }

    #[test]
    fn test_insert_rejects_unknown_columns() {
        let stmt = insert("orders", &columns(), &row(json!({"name": "a", "created_by": 7})));
        assert_eq!(
            stmt.unwrap().sql,
            "INSERT INTO \"orders\" AS t (\"created_by\", \"name\") VALUES ($1, $2) \
             RETURNING to_jsonb(t) AS row"
        );

        let err = insert("orders", &columns(), &row(json!({"secret": 1}))).unwrap_err();
        assert!(matches!(err, BackendError::InvalidRow { .. }));
    }

    #[test]
    fn test_schema_qualified_table_and_injection() {
        let stmt = count(&SqlRenderer::default(), "app.orders", &Predicate::True).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS n FROM \"app\".\"orders\" AS t WHERE TRUE"
        );
        assert!(matches!(
            delete(&SqlRenderer::default(), "orders; drop table x", &Predicate::True),
            Err(BackendError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_arguments_accept_every_bind_kind() {
        let stmt = Statement {
            sql: String::new(),
            binds: vec![
                Bind::Param(Param::Text("x".into())),
                Bind::Param(Param::Null),
                Bind::Column {
                    data_type: "jsonb".into(),
                    value: json!({"a": 1}),
                },
                Bind::Column {
                    data_type: "integer".into(),
                    value: Value::Null,
                },
            ],
        };
        assert!(stmt.arguments().is_ok());

        let bad = Statement {
            sql: String::new(),
            binds: vec![Bind::Column {
                data_type: "bigint".into(),
                value: json!("seven"),
            }],
        };
        assert!(bad.arguments().is_err());
    }
}
