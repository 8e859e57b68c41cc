//! Per-request persistence session.
//!
//! A [`Session`] pairs a [`Backend`] with the hooks registered for one
//! request. Every operation is built into an [`Operation`], passed through
//! the before-hooks, dispatched, and for reads passed through the after-read
//! hooks before the caller sees the records.

use rowgate_policy::Predicate;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::InterceptError;
use crate::hook::OperationHook;
use crate::operation::{
    Operation, OperationContext, OperationKind, OperationState, Payload, Query,
};
use crate::record::{Describable, RecordFields, Row};

#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn Backend>,
    hooks: Vec<Arc<dyn OperationHook>>,
    skip_permission: bool,
    system_operation: bool,
    table_override: Option<String>,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            hooks: Vec::new(),
            skip_permission: false,
            system_operation: false,
            table_override: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn OperationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// A copy of this session with permission rewriting disabled.
    ///
    /// Only trusted call sites may use this; it must never be derived from
    /// request input.
    pub fn skip_permission(&self) -> Self {
        let mut session = self.clone();
        session.skip_permission = true;
        session
    }

    /// Like [`Session::skip_permission`], labelled for internal and
    /// background jobs.
    pub fn system_operation(&self) -> Self {
        let mut session = self.clone();
        session.system_operation = true;
        session
    }

    /// A copy of this session whose operations target `table`, for record
    /// types that do not map one-to-one to a table.
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        let mut session = self.clone();
        session.table_override = Some(table.into());
        session
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn find(&self, table: &str, query: Query) -> Result<Vec<Row>, InterceptError> {
        let mut op = self.operation(OperationKind::Read, table).with_query(query);
        let mut rows = self.fetch(&mut op).await?;
        let mut records: Vec<&mut dyn RecordFields> = rows
            .iter_mut()
            .map(|row| row as &mut dyn RecordFields)
            .collect();
        self.run_after_read(&mut op, &mut records).await?;
        Ok(rows)
    }

    /// Typed read. The table comes from `T`'s shape unless pinned with
    /// [`Session::with_table`].
    pub async fn find_as<T: Describable>(&self, query: Query) -> Result<Vec<T>, InterceptError> {
        let shape = T::shape();
        let mut op = self
            .operation(OperationKind::Read, shape.table())
            .with_query(query);
        let rows = self.fetch(&mut op).await?;
        let mut typed = Vec::with_capacity(rows.len());
        for row in rows {
            match shape.from_row(row) {
                Ok(record) => typed.push(record),
                Err(err) => {
                    let err = InterceptError::record(&op.table, err);
                    return Err(fail(&mut op, err));
                }
            }
        }
        let mut records: Vec<&mut dyn RecordFields> = typed
            .iter_mut()
            .map(|record| record as &mut dyn RecordFields)
            .collect();
        self.run_after_read(&mut op, &mut records).await?;
        Ok(typed)
    }

    pub async fn first_as<T: Describable>(&self, query: Query) -> Result<Option<T>, InterceptError> {
        Ok(self.find_as(query.limit(1)).await?.into_iter().next())
    }

    pub async fn count(&self, table: &str, filter: Predicate) -> Result<u64, InterceptError> {
        let mut op = self
            .operation(OperationKind::Read, table)
            .with_query(Query::matching(filter));
        self.run_before(&mut op).await?;
        let count = self
            .backend
            .count(&op.table, &op.effective_filter())
            .await
            .map_err(|err| fail(&mut op, err.into()))?;
        op.context.advance(OperationState::ResultFiltered);
        Ok(count)
    }

    pub async fn exists(&self, table: &str, filter: Predicate) -> Result<bool, InterceptError> {
        Ok(self.count(table, filter).await? > 0)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert `row` and return it as stored.
    pub async fn create(&self, table: &str, row: Row) -> Result<Row, InterceptError> {
        let op = self
            .operation(OperationKind::Create, table)
            .with_payload(Payload::Map(row));
        self.insert(op).await
    }

    /// Typed insert. The stored record, generated keys included, is returned.
    pub async fn create_record<T: Describable>(&self, record: T) -> Result<T, InterceptError> {
        let shape = T::shape();
        let op = self
            .operation(OperationKind::Create, shape.table())
            .with_payload(Payload::Record(Box::new(record)));
        let table = op.table.clone();
        let stored = self.insert(op).await?;
        shape
            .from_row(stored)
            .map_err(|err| InterceptError::record(table, err))
    }

    /// Apply `changes` to the rows of `table` matching `filter`.
    pub async fn update(
        &self,
        table: &str,
        filter: Predicate,
        changes: Row,
    ) -> Result<u64, InterceptError> {
        let mut op = self
            .operation(OperationKind::Update, table)
            .with_query(Query::matching(filter))
            .with_payload(Payload::Map(changes));
        self.run_before(&mut op).await?;

        let changes = payload_row(&mut op)?;
        if changes.is_empty() {
            tracing::debug!(table = %op.table, "No writable columns left, update skipped");
            op.context.advance(OperationState::ResultFiltered);
            return Ok(0);
        }
        let affected = self
            .backend
            .update(&op.table, &op.effective_filter(), changes)
            .await
            .map_err(|err| fail(&mut op, err.into()))?;
        op.context.advance(OperationState::ResultFiltered);
        Ok(affected)
    }

    pub async fn delete(&self, table: &str, filter: Predicate) -> Result<u64, InterceptError> {
        let mut op = self
            .operation(OperationKind::Delete, table)
            .with_query(Query::matching(filter));
        self.run_before(&mut op).await?;
        let affected = self
            .backend
            .delete(&op.table, &op.effective_filter())
            .await
            .map_err(|err| fail(&mut op, err.into()))?;
        op.context.advance(OperationState::ResultFiltered);
        Ok(affected)
    }

    // =========================================================================
    // Hook chain
    // =========================================================================

    fn operation(&self, kind: OperationKind, table: &str) -> Operation {
        let target = self.table_override.as_deref().unwrap_or(table);
        Operation::new(kind, target).with_context(OperationContext {
            skip_permission: self.skip_permission,
            system_operation: self.system_operation,
            table_override: self.table_override.clone(),
            ..OperationContext::default()
        })
    }

    async fn fetch(&self, op: &mut Operation) -> Result<Vec<Row>, InterceptError> {
        self.run_before(op).await?;
        let query = Query {
            filter: op.effective_filter(),
            ..op.query.clone()
        };
        self.backend
            .fetch(&op.table, &query)
            .await
            .map_err(|err| fail(op, err.into()))
    }

    async fn insert(&self, mut op: Operation) -> Result<Row, InterceptError> {
        self.run_before(&mut op).await?;
        let row = payload_row(&mut op)?;
        let stored = self
            .backend
            .insert(&op.table, row)
            .await
            .map_err(|err| fail(&mut op, err.into()))?;
        op.context.advance(OperationState::ResultFiltered);
        Ok(stored)
    }

    async fn run_before(&self, op: &mut Operation) -> Result<(), InterceptError> {
        for hook in &self.hooks {
            let result = match op.kind {
                OperationKind::Read => hook.before_read(op).await,
                OperationKind::Create => hook.before_create(op).await,
                OperationKind::Update => hook.before_update(op).await,
                OperationKind::Delete => hook.before_delete(op).await,
            };
            if let Err(err) = result {
                tracing::debug!(
                    hook = hook.name(),
                    table = %op.table,
                    kind = %op.kind,
                    error = %err,
                    "Operation rejected by hook"
                );
                return Err(fail(op, err));
            }
        }
        Ok(())
    }

    async fn run_after_read(
        &self,
        op: &mut Operation,
        records: &mut [&mut dyn RecordFields],
    ) -> Result<(), InterceptError> {
        for hook in &self.hooks {
            if let Err(err) = hook.after_read(op, records).await {
                tracing::debug!(
                    hook = hook.name(),
                    table = %op.table,
                    error = %err,
                    "Read result rejected by hook"
                );
                return Err(fail(op, err));
            }
        }
        op.context.advance(OperationState::ResultFiltered);
        Ok(())
    }
}

fn fail(op: &mut Operation, err: InterceptError) -> InterceptError {
    op.context.reject(&err);
    err
}

fn payload_row(op: &mut Operation) -> Result<Row, InterceptError> {
    let result = match &op.payload {
        Some(payload) => payload
            .to_row()
            .map_err(|err| InterceptError::record(&op.table, err)),
        None => Err(InterceptError::MissingPayload {
            kind: op.kind,
            table: op.table.clone(),
        }),
    };
    result.map_err(|err| fail(op, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rowgate_policy::{Ident, PolicyError};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(row) => row,
            _ => panic!("expected an object"),
        }
    }

    /// Records what it saw and optionally refuses deletes.
    struct RecordingHook {
        seen: Mutex<Vec<(OperationKind, String, bool)>>,
        refuse_delete: bool,
    }

    impl RecordingHook {
        fn new(refuse_delete: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                refuse_delete,
            })
        }

        fn record(&self, op: &Operation) {
            self.seen.lock().unwrap().push((
                op.kind,
                op.table.clone(),
                op.context.bypasses_permission(),
            ));
        }
    }

    #[async_trait]
    impl OperationHook for RecordingHook {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn before_read(&self, op: &mut Operation) -> Result<(), InterceptError> {
            self.record(op);
            op.permission = Some(Predicate::eq(Ident::new("owner").unwrap(), 1));
            Ok(())
        }

        async fn before_delete(&self, op: &mut Operation) -> Result<(), InterceptError> {
            self.record(op);
            if self.refuse_delete {
                return Err(PolicyError::denied(&op.table, "recorder").into());
            }
            Ok(())
        }

        async fn after_read(
            &self,
            _op: &mut Operation,
            records: &mut [&mut dyn RecordFields],
        ) -> Result<(), InterceptError> {
            for record in records.iter_mut() {
                record.reset("secret");
            }
            Ok(())
        }
    }

    async fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed(
                "notes",
                [
                    row(json!({"owner": 1, "secret": "a"})),
                    row(json!({"owner": 2, "secret": "b"})),
                ],
            )
            .await;
        backend
    }

    #[tokio::test]
    async fn test_hooks_rewrite_and_mask_reads() {
        let recorder = RecordingHook::new(false);
        let session = Session::new(backend().await).with_hook(recorder.clone());
        let rows = session.find("notes", Query::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["secret"], json!(""));
        assert_eq!(session.count("notes", Predicate::True).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hook_error_aborts_dispatch() {
        let backend = backend().await;
        let session = Session::new(backend.clone()).with_hook(RecordingHook::new(true));
        let err = session.delete("notes", Predicate::True).await.unwrap_err();
        assert!(err.is_denied());
        assert_eq!(backend.rows("notes").await.len(), 2);
    }

    #[tokio::test]
    async fn test_escape_hatches_and_table_pin_reach_hooks() {
        let recorder = RecordingHook::new(false);
        let session = Session::new(backend().await).with_hook(recorder.clone());
        session.system_operation().delete("notes", Predicate::False).await.unwrap();
        session
            .with_table("notes")
            .skip_permission()
            .delete("ignored", Predicate::False)
            .await
            .unwrap();
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (OperationKind::Delete, "notes".to_string(), true),
                (OperationKind::Delete, "notes".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_with_empty_changes_is_skipped() {
        let backend = backend().await;
        let session = Session::new(backend.clone());
        let affected = session
            .update("notes", Predicate::True, Row::new())
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }
}
