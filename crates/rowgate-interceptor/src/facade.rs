//! Convenience operations over the request's permission-aware session.
//!
//! Every helper delegates to the [`Session`] or to the interceptor's field
//! rules; none of them makes a permission decision of its own.

use rowgate_core::{FieldAxis, Principal};
use rowgate_policy::{DataScopeRule, Ident, Param, Predicate, Resolution};
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::InterceptError;
use crate::interceptor::PermissionInterceptor;
use crate::operation::Query;
use crate::record::{RecordFields, Row};
use crate::session::Session;

#[derive(Clone)]
pub struct PermissionHelper {
    interceptor: Arc<PermissionInterceptor>,
    session: Session,
}

impl PermissionHelper {
    pub fn new(interceptor: Arc<PermissionInterceptor>, backend: Arc<dyn Backend>) -> Self {
        let session = interceptor.session(backend);
        Self {
            interceptor,
            session,
        }
    }

    pub fn interceptor(&self) -> &Arc<PermissionInterceptor> {
        &self.interceptor
    }

    pub fn principal(&self) -> &Principal {
        self.interceptor.principal()
    }

    /// The request's session.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// The request's session pinned to `table`.
    pub fn session_for_table(&self, table: impl Into<String>) -> Session {
        self.session.with_table(table)
    }

    pub async fn query(&self, table: &str, query: Query) -> Result<Vec<Row>, InterceptError> {
        self.session.find(table, query).await
    }

    pub async fn query_one(&self, table: &str, query: Query) -> Result<Option<Row>, InterceptError> {
        Ok(self.session.find(table, query.limit(1)).await?.into_iter().next())
    }

    pub async fn create(&self, table: &str, row: Row) -> Result<Row, InterceptError> {
        self.session.create(table, row).await
    }

    pub async fn update(
        &self,
        table: &str,
        filter: Predicate,
        changes: Row,
    ) -> Result<u64, InterceptError> {
        self.session.update(table, filter, changes).await
    }

    pub async fn delete(&self, table: &str, filter: Predicate) -> Result<u64, InterceptError> {
        self.session.delete(table, filter).await
    }

    pub async fn count(&self, table: &str) -> Result<u64, InterceptError> {
        self.session.count(table, Predicate::True).await
    }

    pub async fn count_where(&self, table: &str, filter: Predicate) -> Result<u64, InterceptError> {
        self.session.count(table, filter).await
    }

    pub async fn exists(&self, table: &str, filter: Predicate) -> Result<bool, InterceptError> {
        self.session.exists(table, filter).await
    }

    // =========================================================================
    // Field rules
    // =========================================================================

    pub async fn check_field(
        &self,
        table: &str,
        field: &str,
        axis: FieldAxis,
    ) -> Result<bool, InterceptError> {
        Ok(self.interceptor.field_policy(table).await?.allows(field, axis))
    }

    /// The members of `columns` the principal may see.
    pub async fn visible_fields(
        &self,
        table: &str,
        columns: &[&str],
    ) -> Result<Vec<String>, InterceptError> {
        self.allowed(table, columns, FieldAxis::Visible).await
    }

    /// The members of `columns` the principal may write.
    pub async fn editable_fields(
        &self,
        table: &str,
        columns: &[&str],
    ) -> Result<Vec<String>, InterceptError> {
        self.allowed(table, columns, FieldAxis::Editable).await
    }

    /// The members of `columns` the principal may export.
    pub async fn filter_exportable(
        &self,
        table: &str,
        columns: &[&str],
    ) -> Result<Vec<String>, InterceptError> {
        self.allowed(table, columns, FieldAxis::Exportable).await
    }

    /// The members of `columns` the principal may filter on.
    pub async fn filter_queryable(
        &self,
        table: &str,
        columns: &[&str],
    ) -> Result<Vec<String>, InterceptError> {
        self.allowed(table, columns, FieldAxis::Queryable).await
    }

    /// `row` without the columns the principal may not write.
    pub async fn filter_editable(&self, table: &str, row: Row) -> Result<Row, InterceptError> {
        self.filter_row(table, row, FieldAxis::Editable).await
    }

    /// Removes every column of `row` the principal is denied on `axis`.
    pub async fn filter_row(
        &self,
        table: &str,
        mut row: Row,
        axis: FieldAxis,
    ) -> Result<Row, InterceptError> {
        let policy = self.interceptor.field_policy(table).await?;
        for column in policy.blocked(axis) {
            row.strip(&column);
        }
        Ok(row)
    }

    /// The data-scope rule of the principal's primary role on `table`.
    /// `None` when the table is not controlled or the principal has no role.
    pub async fn data_scope(&self, table: &str) -> Result<Option<DataScopeRule>, InterceptError> {
        let Some(role_id) = self.principal().effective_roles().first().copied() else {
            return Ok(None);
        };
        match self.interceptor.engine().resolver().resolve(table, role_id).await? {
            Resolution::Unrestricted => Ok(None),
            Resolution::Controlled(policy) => Ok(Some(policy.rule)),
        }
    }

    /// Whether the record with primary key `id` is within the principal's
    /// row scope.
    pub async fn validate_data_access(
        &self,
        table: &str,
        id: impl Into<Param>,
    ) -> Result<bool, InterceptError> {
        let filter = Predicate::eq(Ident::new("id")?, id);
        self.session.exists(table, filter).await
    }

    async fn allowed(
        &self,
        table: &str,
        columns: &[&str],
        axis: FieldAxis,
    ) -> Result<Vec<String>, InterceptError> {
        let policy = self.interceptor.field_policy(table).await?;
        Ok(columns
            .iter()
            .filter(|column| policy.allows(column, axis))
            .map(|column| column.to_string())
            .collect())
    }
}
