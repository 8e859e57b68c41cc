use async_trait::async_trait;
use rowgate_core::{OrgSchemaConfig, UserId};
use rowgate_policy::Predicate;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::BackendError;
use crate::operation::{OrderBy, Query};
use crate::record::Row;

/// Persistence engine the session dispatches to.
///
/// Filters arrive fully rewritten: the caller's filter and any permission
/// predicate are already combined.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Rows of `table` matching `query`, ordered and paged.
    async fn fetch(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError>;

    /// Insert `row` and return it as stored, generated keys included.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError>;

    /// Apply `changes` to every row matching `filter`. Returns the affected count.
    async fn update(&self, table: &str, filter: &Predicate, changes: Row)
    -> Result<u64, BackendError>;

    /// Delete every row matching `filter`. Returns the affected count.
    async fn delete(&self, table: &str, filter: &Predicate) -> Result<u64, BackendError>;

    async fn count(&self, table: &str, filter: &Predicate) -> Result<u64, BackendError>;
}

// =============================================================================
// IN-MEMORY BACKEND
// =============================================================================

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<Row>,
    /// Highest id stored so far.
    last_id: i64,
}

impl MemoryTable {
    fn push(&mut self, table: &str, mut row: Row) -> Result<Row, BackendError> {
        match row.get("id").and_then(Value::as_i64) {
            Some(id) => self.last_id = self.last_id.max(id),
            None => {
                let id = self.last_id.checked_add(1).ok_or_else(|| BackendError::InvalidRow {
                    table: table.to_string(),
                    reason: "id space exhausted".into(),
                })?;
                row.insert("id".into(), Value::from(id));
                self.last_id = id;
            }
        }
        self.rows.push(row.clone());
        Ok(row)
    }
}

/// Tables held in memory.
///
/// Department predicates are evaluated against the organization tables
/// named by the [`OrgSchemaConfig`], which are ordinary tables of this
/// backend. Custom conditions are SQL text and are not supported.
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
    org: OrgSchemaConfig,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_org(OrgSchemaConfig::default())
    }

    pub fn with_org(org: OrgSchemaConfig) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            org,
        }
    }

    /// Create `table` if needed and append `rows`. Rows without an `id` get one.
    pub async fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Err(err) = entry.push(table, row) {
                tracing::warn!(table, error = %err, "Seed row skipped");
            }
        }
    }

    /// Every row of `table`, unfiltered.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn fetch(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        let tables = self.tables.read().await;
        let eval = Evaluator {
            tables: &tables,
            org: &self.org,
        };
        let mut rows = Vec::new();
        for row in &lookup(&tables, table)?.rows {
            if eval.matches(&query.filter, row)? {
                rows.push(row.clone());
            }
        }

        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &query.order_by));
        }
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;
        entry.push(table, row)
    }

    async fn update(
        &self,
        table: &str,
        filter: &Predicate,
        changes: Row,
    ) -> Result<u64, BackendError> {
        let mut tables = self.tables.write().await;
        let hits = matching_indices(&tables, &self.org, table, filter)?;
        if let Some(entry) = tables.get_mut(table) {
            for index in &hits {
                for (column, value) in &changes {
                    entry.rows[*index].insert(column.clone(), value.clone());
                }
            }
        }
        Ok(hits.len() as u64)
    }

    async fn delete(&self, table: &str, filter: &Predicate) -> Result<u64, BackendError> {
        let mut tables = self.tables.write().await;
        let hits = matching_indices(&tables, &self.org, table, filter)?;
        if let Some(entry) = tables.get_mut(table) {
            let mut index = 0;
            entry.rows.retain(|_| {
                let keep = !hits.contains(&index);
                index += 1;
                keep
            });
        }
        Ok(hits.len() as u64)
    }

    async fn count(&self, table: &str, filter: &Predicate) -> Result<u64, BackendError> {
        let tables = self.tables.read().await;
        Ok(matching_indices(&tables, &self.org, table, filter)?.len() as u64)
    }
}

fn lookup<'a>(
    tables: &'a BTreeMap<String, MemoryTable>,
    table: &str,
) -> Result<&'a MemoryTable, BackendError> {
    tables
        .get(table)
        .ok_or_else(|| BackendError::UnknownTable(table.to_string()))
}

fn matching_indices(
    tables: &BTreeMap<String, MemoryTable>,
    org: &OrgSchemaConfig,
    table: &str,
    filter: &Predicate,
) -> Result<Vec<usize>, BackendError> {
    let eval = Evaluator { tables, org };
    let mut hits = Vec::new();
    for (index, row) in lookup(tables, table)?.rows.iter().enumerate() {
        if eval.matches(filter, row)? {
            hits.push(index);
        }
    }
    Ok(hits)
}

struct Evaluator<'a> {
    tables: &'a BTreeMap<String, MemoryTable>,
    org: &'a OrgSchemaConfig,
}

impl Evaluator<'_> {
    fn matches(&self, predicate: &Predicate, row: &Row) -> Result<bool, BackendError> {
        let cell = |column: &rowgate_policy::Ident| row.get(column.column()).unwrap_or(&Value::Null);
        Ok(match predicate {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Eq { column, value } => values_equal(cell(column), &value.to_json()),
            Predicate::In { column, values } => values
                .iter()
                .any(|value| values_equal(cell(column), &value.to_json())),
            Predicate::DeptOfUser { column, user } => match self.department_of(*user)? {
                Some(dept) => values_equal(cell(column), &dept),
                None => false,
            },
            Predicate::DeptTreeOfUser { column, user } => match self.department_of(*user)? {
                Some(dept) => self
                    .department_tree(dept)?
                    .iter()
                    .any(|d| values_equal(cell(column), d)),
                None => false,
            },
            Predicate::Custom { .. } => {
                return Err(BackendError::Unsupported(
                    "custom conditions need a SQL backend".into(),
                ));
            }
            Predicate::Or(items) => {
                for item in items {
                    if self.matches(item, row)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::And(items) => {
                for item in items {
                    if !self.matches(item, row)? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    fn department_of(&self, user: UserId) -> Result<Option<Value>, BackendError> {
        let users = lookup(self.tables, &self.org.users_table)?;
        let user = Value::from(user);
        Ok(users
            .rows
            .iter()
            .find(|row| {
                row.get(&self.org.user_id_column)
                    .is_some_and(|id| values_equal(id, &user))
            })
            .and_then(|row| row.get(&self.org.user_dept_column))
            .filter(|dept| !dept.is_null())
            .cloned())
    }

    /// `root` and every department below it.
    fn department_tree(&self, root: Value) -> Result<Vec<Value>, BackendError> {
        let depts = lookup(self.tables, &self.org.dept_table)?;
        let mut tree = vec![root];
        let mut frontier = 0;
        while frontier < tree.len() {
            let parent = tree[frontier].clone();
            for row in &depts.rows {
                let (Some(id), Some(row_parent)) = (
                    row.get(&self.org.dept_id_column),
                    row.get(&self.org.dept_parent_column),
                ) else {
                    continue;
                };
                if values_equal(row_parent, &parent) && !tree.iter().any(|d| values_equal(d, id)) {
                    tree.push(id.clone());
                }
            }
            frontier += 1;
        }
        Ok(tree)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_rows(a: &Row, b: &Row, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let column = order.column.column();
        let ordering = compare_values(
            a.get(column).unwrap_or(&Value::Null),
            b.get(column).unwrap_or(&Value::Null),
        );
        let ordering = if order.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rowgate_policy::{CustomCondition, Ident};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(row) => row,
            _ => panic!("expected an object"),
        }
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    fn col(name: &str) -> Ident {
        Ident::new(name).unwrap()
    }

    async fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .seed(
                "sys_dept",
                [
                    row(json!({"id": 1, "parent_id": 0})),
                    row(json!({"id": 2, "parent_id": 1})),
                    row(json!({"id": 3, "parent_id": 2})),
                    row(json!({"id": 4, "parent_id": 0})),
                ],
            )
            .await;
        backend
            .seed(
                "sys_users",
                [
                    row(json!({"id": 10, "dept_id": 1})),
                    row(json!({"id": 11, "dept_id": 2})),
                    row(json!({"id": 12, "dept_id": null})),
                ],
            )
            .await;
        backend
            .seed(
                "orders",
                [
                    row(json!({"total": 30, "dept_id": 1, "created_by": 10})),
                    row(json!({"total": 10, "dept_id": 2, "created_by": 11})),
                    row(json!({"total": 20, "dept_id": 3, "created_by": 11})),
                    row(json!({"total": 40, "dept_id": 4, "created_by": 12})),
                ],
            )
            .await;
        backend
    }

    #[tokio::test]
    async fn test_seed_assigns_ids() {
        let backend = backend().await;
        assert_eq!(ids(&backend.rows("orders").await), vec![1, 2, 3, 4]);
        let stored = backend
            .insert("orders", row(json!({"total": 5})))
            .await
            .unwrap();
        assert_eq!(stored["id"], json!(5));
    }

    #[tokio::test]
    async fn test_insert_fails_when_ids_run_out() {
        let backend = MemoryBackend::new();
        backend
            .seed("orders", [row(json!({"id": i64::MAX, "total": 1}))])
            .await;

        let err = backend
            .insert("orders", row(json!({"total": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidRow { ref table, .. } if table == "orders"));
        assert_eq!(ids(&backend.rows("orders").await), vec![i64::MAX]);
    }

    #[tokio::test]
    async fn test_fetch_filters_orders_and_pages() {
        let backend = backend().await;
        let query = Query::matching(Predicate::In {
            column: col("created_by"),
            values: vec![11.into(), 12.into()],
        })
        .order_by("total", true)
        .unwrap()
        .limit(2);
        let rows = backend.fetch("orders", &query).await.unwrap();
        assert_eq!(ids(&rows), vec![4, 3]);

        let rows = backend.fetch("orders", &query.offset(2)).await.unwrap();
        assert_eq!(ids(&rows), vec![2]);
    }

    #[tokio::test]
    async fn test_department_predicates() {
        let backend = backend().await;
        let dept = Predicate::DeptOfUser {
            column: col("dept_id"),
            user: 11,
        };
        let tree = Predicate::DeptTreeOfUser {
            column: col("dept_id"),
            user: 10,
        };
        let rows = backend.fetch("orders", &Query::matching(dept)).await.unwrap();
        assert_eq!(ids(&rows), vec![2]);
        let rows = backend.fetch("orders", &Query::matching(tree)).await.unwrap();
        assert_eq!(ids(&rows), vec![1, 2, 3]);

        let no_dept = Predicate::DeptOfUser {
            column: col("dept_id"),
            user: 12,
        };
        assert_eq!(backend.count("orders", &no_dept).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_respect_filter() {
        let backend = backend().await;
        let own = Predicate::eq(col("created_by"), 11);
        let changed = backend
            .update("orders", &own, row(json!({"total": 0})))
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(
            backend.count("orders", &Predicate::eq(col("total"), 0)).await.unwrap(),
            2
        );

        assert_eq!(backend.delete("orders", &own).await.unwrap(), 2);
        assert_eq!(ids(&backend.rows("orders").await), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_custom_conditions_unsupported() {
        let backend = backend().await;
        let custom = Predicate::Custom {
            condition: CustomCondition::parse("total > 10", true).unwrap(),
            user: 10,
        };
        assert!(matches!(
            backend.count("orders", &custom).await,
            Err(BackendError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.insert("nope", Row::new()).await,
            Err(BackendError::UnknownTable(_))
        ));
    }
}
