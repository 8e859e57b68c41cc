//! Rowgate request interception.
//!
//! Sits between application code and the data backend. Every read, update
//! and delete issued through a [`Session`] gets the principal's row
//! predicate ANDed into its filter; creates are checked and stamped with
//! owner columns; results have hidden fields reset.
//!
//! - [`record`]: untyped rows and typed records behind one field interface
//! - [`operation`]: the operation, its query and its per-operation context
//! - [`backend`]: storage trait plus an in-memory implementation
//! - [`hook`]: before/after callbacks run by the session
//! - [`interceptor`]: the permission hook
//! - [`facade`]: helper operations for request handlers
//! - [`middleware`]: axum integration

pub mod backend;
pub mod error;
pub mod facade;
pub mod hook;
pub mod interceptor;
pub mod middleware;
pub mod operation;
pub mod record;
pub mod session;

pub use backend::{Backend, MemoryBackend};
pub use error::{BackendError, InterceptError};
pub use facade::PermissionHelper;
pub use hook::OperationHook;
pub use interceptor::{InterceptorSettings, PermissionInterceptor};
pub use middleware::{RequestSession, SessionFactory, attach_session};
pub use operation::{
    Operation, OperationContext, OperationKind, OperationState, OrderBy, Payload, Query,
};
pub use record::{Describable, FieldSlot, RecordFields, RecordShape, Row, column_name};
pub use session::Session;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
