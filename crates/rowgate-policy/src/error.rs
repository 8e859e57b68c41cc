//! Error types for policy resolution and administration.

use thiserror::Error;

/// Errors produced while resolving, generating or administering policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A stored rule cannot produce a predicate: unknown scope, missing owner
    /// column, malformed custom condition.
    #[error("policy misconfigured for table {table}: {reason}")]
    Configuration { table: String, reason: String },

    /// The principal may not perform the operation.
    #[error("access denied on table {table}: {reason}")]
    AuthorizationDenied { table: String, reason: String },

    /// Reading policy rows failed.
    #[error("policy lookup failed for table {table}: {source}")]
    PolicyLookup {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    /// Identifier is not safe to place in generated SQL.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// Custom condition was rejected.
    #[error("invalid custom condition: {0}")]
    InvalidCondition(String),

    /// Administrative input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A controlled table with this name already exists.
    #[error("controlled table {0} already exists")]
    DuplicateTable(String),

    /// Referenced controlled table does not exist.
    #[error("controlled table {0} not found")]
    TableNotFound(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PolicyError {
    pub fn configuration(table: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::Configuration {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn denied(table: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::AuthorizationDenied {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn lookup(table: impl Into<String>, source: anyhow::Error) -> Self {
        PolicyError::PolicyLookup {
            table: table.into(),
            source,
        }
    }

    /// True for errors caused by policy content rather than infrastructure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PolicyError::Configuration { .. }
                | PolicyError::InvalidIdentifier(_)
                | PolicyError::InvalidCondition(_)
        )
    }
}
