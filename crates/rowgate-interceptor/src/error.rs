use rowgate_policy::PolicyError;
use thiserror::Error;

use crate::operation::OperationKind;

/// Errors raised by a persistence backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Unsupported by this backend: {0}")]
    Unsupported(String),

    #[error("Invalid row for '{table}': {reason}")]
    InvalidRow { table: String, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Errors surfaced by a permission-aware session.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Record mapping failed for '{table}': {source}")]
    Record {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} on '{table}' requires a payload")]
    MissingPayload { kind: OperationKind, table: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl InterceptError {
    pub fn record(table: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Record {
            table: table.into(),
            source,
        }
    }

    /// Whether the operation was refused by policy.
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            InterceptError::Policy(PolicyError::AuthorizationDenied { .. })
        )
    }
}
