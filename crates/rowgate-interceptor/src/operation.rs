//! Data operations and their typed per-operation context.

use rowgate_policy::{Ident, Param, Predicate};
use serde::Serialize;
use std::fmt;

use crate::error::InterceptError;
use crate::record::{RecordFields, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one operation.
///
/// `Idle -> PolicyResolved -> PredicateApplied -> ResultFiltered | Rejected`.
/// `ResultFiltered` is the successful terminal state of every kind; for reads
/// it also means the returned records were masked. Operations that bypass
/// permission go straight from `Idle` to a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    PolicyResolved,
    PredicateApplied,
    ResultFiltered,
    Rejected,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::ResultFiltered | OperationState::Rejected)
    }

    fn rank(&self) -> u8 {
        match self {
            OperationState::Idle => 0,
            OperationState::PolicyResolved => 1,
            OperationState::PredicateApplied => 2,
            OperationState::ResultFiltered | OperationState::Rejected => 3,
        }
    }
}

/// Typed flags carried through the hook chain for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    /// Disable every rewrite for this operation.
    pub skip_permission: bool,
    /// Same effect as `skip_permission`, for internal and background jobs.
    pub system_operation: bool,
    /// Table name pinned by the caller in place of the record's own.
    pub table_override: Option<String>,
    /// Set once a permission rewrite has been applied.
    pub permission_applied: bool,
    /// Columns masked after a read.
    pub hidden_fields: Vec<String>,
    /// Columns stripped from a write.
    pub readonly_fields: Vec<String>,
    pub state: OperationState,
    /// Message of the hook error that rejected the operation.
    pub error: Option<String>,
}

impl OperationContext {
    pub fn bypasses_permission(&self) -> bool {
        self.skip_permission || self.system_operation
    }

    /// Move forward to `next`. Backward moves and moves out of a terminal
    /// state are ignored; returns whether the state changed.
    pub fn advance(&mut self, next: OperationState) -> bool {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    /// Record a hook failure.
    pub fn reject(&mut self, error: &InterceptError) {
        if !self.state.is_terminal() {
            self.state = OperationState::Rejected;
        }
        self.error = Some(error.to_string());
    }
}

/// Outgoing write payload.
pub enum Payload {
    Map(Row),
    Record(Box<dyn RecordFields>),
}

impl Payload {
    pub fn fields_mut(&mut self) -> &mut dyn RecordFields {
        match self {
            Payload::Map(row) => row,
            Payload::Record(record) => record.as_mut(),
        }
    }

    pub fn fields(&self) -> &dyn RecordFields {
        match self {
            Payload::Map(row) => row,
            Payload::Record(record) => record.as_ref(),
        }
    }

    pub fn to_row(&self) -> Result<Row, serde_json::Error> {
        self.fields().to_row()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Map(row) => f.debug_tuple("Map").field(row).finish(),
            Payload::Record(record) => f
                .debug_tuple("Record")
                .field(&record.columns())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: Ident,
    pub descending: bool,
}

/// Caller-side selection: filter, ordering and paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub filter: Predicate,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filter: Predicate::True,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(predicate: Predicate) -> Self {
        Self {
            filter: predicate,
            ..Self::default()
        }
    }

    /// AND `predicate` into the filter.
    pub fn and_where(mut self, predicate: Predicate) -> Self {
        self.filter = self.filter.and(predicate);
        self
    }

    /// AND `column = value` into the filter.
    pub fn where_eq(self, column: &str, value: impl Into<Param>) -> Result<Self, InterceptError> {
        let column = Ident::new(column)?;
        Ok(self.and_where(Predicate::eq(column, value)))
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Result<Self, InterceptError> {
        self.order_by.push(OrderBy {
            column: Ident::new(column)?,
            descending,
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// One data operation as it passes through the hook chain.
#[derive(Debug)]
pub struct Operation {
    pub kind: OperationKind,
    /// Target table, after any override.
    pub table: String,
    pub query: Query,
    /// Row predicate injected by the permission layer.
    pub permission: Option<Predicate>,
    pub payload: Option<Payload>,
    pub context: OperationContext,
}

impl Operation {
    pub fn new(kind: OperationKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            query: Query::default(),
            permission: None,
            payload: None,
            context: OperationContext::default(),
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    /// Caller filter AND the injected permission predicate.
    pub fn effective_filter(&self) -> Predicate {
        match &self.permission {
            Some(permission) => self.query.filter.clone().and(permission.clone()),
            None => self.query.filter.clone(),
        }
    }
}
