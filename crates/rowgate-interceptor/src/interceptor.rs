//! The permission interceptor.
//!
//! One [`PermissionInterceptor`] is built per request for the request's
//! principal and registered as a hook on that request's [`Session`]. For each
//! operation it resolves the effective policy, injects the row predicate,
//! fills owner columns on create, strips non-editable columns from writes,
//! and masks non-visible columns in read results.
//!
//! Failure handling:
//!
//! - reads fall back to the caller's own rows when the policy cannot be
//!   looked up, never to every row
//! - writes are refused when the policy cannot be looked up
//! - anonymous principals are not rewritten at all

use async_trait::async_trait;
use dashmap::DashMap;
use rowgate_core::{ControlledTable, FieldAxis, Principal, RowgateConfig};
use rowgate_policy::{
    CreateDecision, Directory, EffectivePolicy, FieldPolicy, PolicyEngine, PolicyError,
};
use serde_json::Value;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::InterceptError;
use crate::hook::OperationHook;
use crate::operation::{Operation, OperationState};
use crate::record::RecordFields;
use crate::session::Session;

/// Switches taken from [`RowgateConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptorSettings {
    /// Master switch. When off every operation passes through untouched.
    pub enabled: bool,
    pub field_permission_enabled: bool,
    /// Reject reads filtering on non-queryable columns instead of warning.
    pub enforce_queryable: bool,
    /// Log rendered predicates at info level.
    pub log_predicates: bool,
}

impl InterceptorSettings {
    pub fn from_config(config: &RowgateConfig) -> Self {
        Self {
            enabled: config.enabled,
            field_permission_enabled: config.field_permission_enabled,
            enforce_queryable: config.enforce_queryable,
            log_predicates: config.log.log_predicates,
        }
    }
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self::from_config(&RowgateConfig::default())
    }
}

pub struct PermissionInterceptor {
    engine: PolicyEngine,
    principal: Principal,
    directory: Option<Arc<dyn Directory>>,
    settings: InterceptorSettings,
    /// Effective policies already computed for this request, by table.
    policies: DashMap<String, Arc<EffectivePolicy>>,
}

impl PermissionInterceptor {
    pub fn new(engine: PolicyEngine, principal: Principal, settings: InterceptorSettings) -> Self {
        Self {
            engine,
            principal,
            directory: None,
            settings,
            policies: DashMap::new(),
        }
    }

    /// Directory used to fill the owner-department column on create.
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn settings(&self) -> &InterceptorSettings {
        &self.settings
    }

    /// A session on `backend` with this interceptor registered.
    pub fn session(self: &Arc<Self>, backend: Arc<dyn Backend>) -> Session {
        Session::new(backend).with_hook(self.clone())
    }

    /// Effective policy of the request's principal on `table`, computed once
    /// per request. Lookup failures are returned, not memoized.
    pub async fn policy(&self, table: &str) -> Result<Arc<EffectivePolicy>, PolicyError> {
        if let Some(hit) = self.policies.get(table) {
            return Ok(hit.value().clone());
        }
        let policy = Arc::new(self.engine.effective_policy(&self.principal, table).await?);
        self.policies.insert(table.to_string(), policy.clone());
        Ok(policy)
    }

    /// Merged field rules of the principal on `table`. Empty when field rules
    /// do not apply to this request.
    pub async fn field_policy(&self, table: &str) -> Result<FieldPolicy, InterceptError> {
        if !self.settings.enabled
            || !self.settings.field_permission_enabled
            || self.principal.is_anonymous()
        {
            return Ok(FieldPolicy::default());
        }
        Ok(self.policy(table).await?.fields.clone())
    }

    /// Policy for a read. A lookup failure degrades to the caller's own rows;
    /// the read fails when not even the field rules can be loaded.
    async fn read_policy(&self, op: &Operation) -> Result<Arc<EffectivePolicy>, InterceptError> {
        let err = match self.policy(&op.table).await {
            Ok(policy) => return Ok(policy),
            Err(err) => err,
        };
        tracing::error!(
            table = %op.table,
            user_id = ?self.principal.user_id,
            error = %err,
            "Policy lookup failed on read, restricting to own rows"
        );
        let fallback = self
            .engine
            .fallback_self_policy(&self.principal, &op.table)
            .await
            .map_err(|fallback_err| {
                tracing::error!(
                    table = %op.table,
                    error = %fallback_err,
                    "Field rules unavailable, refusing read"
                );
                InterceptError::from(fallback_err)
            })?;
        Ok(Arc::new(fallback))
    }

    /// Policy for a write. A lookup failure refuses the write.
    async fn write_policy(&self, op: &Operation) -> Result<Arc<EffectivePolicy>, InterceptError> {
        self.policy(&op.table).await.map_err(|err| {
            tracing::error!(
                table = %op.table,
                kind = %op.kind,
                user_id = ?self.principal.user_id,
                error = %err,
                "Policy lookup failed, refusing write"
            );
            InterceptError::from(err)
        })
    }

    fn bypass(&self, op: &Operation) -> bool {
        if !self.settings.enabled {
            return true;
        }
        if op.context.bypasses_permission() {
            tracing::debug!(
                table = %op.table,
                kind = %op.kind,
                system = op.context.system_operation,
                "Permission skipped by escape hatch"
            );
            return true;
        }
        if self.principal.is_anonymous() {
            tracing::warn!(
                table = %op.table,
                kind = %op.kind,
                "Anonymous request, permission rewriting skipped"
            );
            return true;
        }
        if op.context.permission_applied {
            tracing::debug!(table = %op.table, kind = %op.kind, "Permission already applied");
            return true;
        }
        false
    }

    fn inject(&self, op: &mut Operation, policy: &EffectivePolicy) {
        op.permission = Some(policy.predicate.clone());
        op.context.permission_applied = true;
        op.context.advance(OperationState::PredicateApplied);

        if !policy.is_controlled() {
            return;
        }
        tracing::debug!(
            table = %op.table,
            kind = %op.kind,
            user_id = ?self.principal.user_id,
            predicate = %policy.predicate,
            "Injected row predicate"
        );
        if self.settings.log_predicates {
            let rendered = self.engine.renderer().render(&policy.predicate, 0);
            tracing::info!(
                table = %op.table,
                kind = %op.kind,
                sql = %rendered.sql,
                params = rendered.params.len(),
                "Row predicate"
            );
        }
    }

    fn check_queryable(&self, op: &Operation, policy: &EffectivePolicy) -> Result<(), InterceptError> {
        if !self.settings.field_permission_enabled {
            return Ok(());
        }
        let blocked = policy.fields.blocked(FieldAxis::Queryable);
        if blocked.is_empty() {
            return Ok(());
        }

        let mut used = op.query.filter.columns();
        used.extend(op.query.order_by.iter().map(|o| o.column.column().to_string()));
        let offending: Vec<String> = blocked.into_iter().filter(|c| used.contains(c)).collect();
        if offending.is_empty() {
            return Ok(());
        }

        if self.settings.enforce_queryable {
            return Err(PolicyError::denied(
                &op.table,
                format!("query uses non-queryable columns: {}", offending.join(", ")),
            )
            .into());
        }
        tracing::warn!(
            table = %op.table,
            columns = ?offending,
            "Query uses non-queryable columns"
        );
        Ok(())
    }

    fn strip_readonly(&self, op: &mut Operation, policy: &EffectivePolicy) {
        if !self.settings.field_permission_enabled {
            return;
        }
        let readonly = policy.fields.blocked(FieldAxis::Editable);
        if readonly.is_empty() {
            return;
        }
        if let Some(payload) = op.payload.as_mut() {
            let fields = payload.fields_mut();
            let stripped: Vec<&str> = readonly
                .iter()
                .filter(|column| fields.strip(column))
                .map(String::as_str)
                .collect();
            if !stripped.is_empty() {
                tracing::debug!(
                    table = %op.table,
                    kind = %op.kind,
                    columns = ?stripped,
                    "Stripped non-editable columns"
                );
            }
        }
        op.context.readonly_fields = readonly;
    }

    /// Overwrite the owner columns of a create payload with the principal's
    /// identity.
    async fn fill_owner(&self, op: &mut Operation, table: &ControlledTable) -> Result<(), InterceptError> {
        let Some(user_id) = self.principal.user_id else {
            return Ok(());
        };

        let dept = match (table.dept_column(), &self.directory) {
            (Some(_), Some(directory)) => Some(
                directory
                    .department_of(user_id)
                    .await
                    .map_err(|err| PolicyError::lookup(&op.table, err))?,
            ),
            _ => None,
        };

        let Some(payload) = op.payload.as_mut() else {
            return Err(InterceptError::MissingPayload {
                kind: op.kind,
                table: op.table.clone(),
            });
        };
        let fields = payload.fields_mut();

        if let Some(column) = table.user_column() {
            let assigned = fields
                .assign(column, Value::from(user_id))
                .map_err(|err| InterceptError::record(&op.table, err))?;
            if !assigned {
                tracing::warn!(table = %op.table, column, "Record has no owner-user column");
            }
        }

        if let Some(column) = table.dept_column() {
            match dept {
                Some(Some(dept_id)) => {
                    fields
                        .assign(column, Value::from(dept_id))
                        .map_err(|err| InterceptError::record(&op.table, err))?;
                }
                Some(None) => {
                    fields.strip(column);
                    tracing::debug!(
                        table = %op.table,
                        column,
                        user_id,
                        "User has no department, owner-department left unset"
                    );
                }
                None => {
                    tracing::debug!(
                        table = %op.table,
                        column,
                        "No directory configured, owner-department not filled"
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OperationHook for PermissionInterceptor {
    fn name(&self) -> &str {
        "permission"
    }

    async fn before_read(&self, op: &mut Operation) -> Result<(), InterceptError> {
        if self.bypass(op) {
            return Ok(());
        }
        let policy = self.read_policy(op).await?;
        op.context.advance(OperationState::PolicyResolved);

        self.check_queryable(op, &policy)?;
        self.inject(op, &policy);
        if self.settings.field_permission_enabled {
            op.context.hidden_fields = policy.fields.blocked(FieldAxis::Visible);
        }
        Ok(())
    }

    async fn before_create(&self, op: &mut Operation) -> Result<(), InterceptError> {
        if self.bypass(op) {
            return Ok(());
        }
        let decision = self
            .engine
            .can_create(&self.principal, &op.table)
            .await
            .map_err(|err| {
                tracing::error!(
                    table = %op.table,
                    user_id = ?self.principal.user_id,
                    error = %err,
                    "Policy lookup failed, refusing create"
                );
                InterceptError::from(err)
            })?;
        op.context.advance(OperationState::PolicyResolved);

        let table = match decision {
            CreateDecision::Unrestricted => {
                op.context.permission_applied = true;
                op.context.advance(OperationState::PredicateApplied);
                return Ok(());
            }
            CreateDecision::Denied(_) => {
                tracing::warn!(
                    table = %op.table,
                    user_id = ?self.principal.user_id,
                    roles = ?self.principal.effective_roles(),
                    "Create denied"
                );
                return Err(PolicyError::denied(
                    &op.table,
                    "no role of the principal holds a data rule on this table",
                )
                .into());
            }
            CreateDecision::Allowed(table) => table,
        };

        if self.settings.field_permission_enabled {
            let policy = self.write_policy(op).await?;
            self.strip_readonly(op, &policy);
        }
        self.fill_owner(op, &table).await?;

        op.context.permission_applied = true;
        op.context.advance(OperationState::PredicateApplied);
        Ok(())
    }

    async fn before_update(&self, op: &mut Operation) -> Result<(), InterceptError> {
        if self.bypass(op) {
            return Ok(());
        }
        let policy = self.write_policy(op).await?;
        op.context.advance(OperationState::PolicyResolved);
        self.inject(op, &policy);
        self.strip_readonly(op, &policy);
        Ok(())
    }

    async fn before_delete(&self, op: &mut Operation) -> Result<(), InterceptError> {
        if self.bypass(op) {
            return Ok(());
        }
        let policy = self.write_policy(op).await?;
        op.context.advance(OperationState::PolicyResolved);
        self.inject(op, &policy);
        Ok(())
    }

    async fn after_read(
        &self,
        op: &mut Operation,
        records: &mut [&mut dyn RecordFields],
    ) -> Result<(), InterceptError> {
        if op.context.hidden_fields.is_empty() {
            return Ok(());
        }
        for record in records.iter_mut() {
            for column in &op.context.hidden_fields {
                record.reset(column);
            }
        }
        tracing::debug!(
            table = %op.table,
            columns = ?op.context.hidden_fields,
            records = records.len(),
            "Masked hidden columns"
        );
        Ok(())
    }
}
