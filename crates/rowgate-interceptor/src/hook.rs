use async_trait::async_trait;

use crate::error::InterceptError;
use crate::operation::Operation;
use crate::record::RecordFields;

/// Callbacks run by a [`Session`](crate::session::Session) around each
/// operation.
///
/// Before-hooks run in registration order ahead of dispatch; the after-read
/// hook runs once the backend has returned. An error from any hook rejects
/// the operation: later hooks and the dispatch are skipped.
#[async_trait]
pub trait OperationHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_read(&self, _op: &mut Operation) -> Result<(), InterceptError> {
        Ok(())
    }

    async fn before_create(&self, _op: &mut Operation) -> Result<(), InterceptError> {
        Ok(())
    }

    async fn before_update(&self, _op: &mut Operation) -> Result<(), InterceptError> {
        Ok(())
    }

    async fn before_delete(&self, _op: &mut Operation) -> Result<(), InterceptError> {
        Ok(())
    }

    async fn after_read(
        &self,
        _op: &mut Operation,
        _records: &mut [&mut dyn RecordFields],
    ) -> Result<(), InterceptError> {
        Ok(())
    }
}
