//! The resolve -> generate -> merge pipeline.

use rowgate_core::{
    ControlledTable, DataScope, FieldAxis, MisconfigurationMode, Principal, RoleId, RowgateConfig,
    UserId,
};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::PolicyCache;
use crate::error::PolicyError;
use crate::expr::{Ident, Param, Predicate, SqlRenderer};
use crate::generator::PredicateGenerator;
use crate::merger::{FieldPolicy, merge_field_rules, merge_predicates};
use crate::resolver::{ControlledPolicy, FieldRuleMap, PolicyResolver, Resolution, RuleOrigin};
use crate::store::PolicyStore;

/// Policy in force for one principal on one table.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub table: String,
    /// The controlled-table record, `None` when the table is unrestricted.
    pub controlled: Option<ControlledTable>,
    pub predicate: Predicate,
    pub fields: FieldPolicy,
}

impl EffectivePolicy {
    pub fn unrestricted(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            controlled: None,
            predicate: Predicate::True,
            fields: FieldPolicy::default(),
        }
    }

    /// A policy that admits nothing.
    pub fn deny_all(table: impl Into<String>, controlled: Option<ControlledTable>) -> Self {
        Self {
            table: table.into(),
            controlled,
            predicate: Predicate::False,
            fields: FieldPolicy::default(),
        }
    }

    pub fn is_controlled(&self) -> bool {
        self.controlled.is_some()
    }
}

/// Outcome of a create permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateDecision {
    /// The table is not controlled.
    Unrestricted,
    Allowed(ControlledTable),
    Denied(ControlledTable),
}

/// What a role would get on a table, without running a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyPreview {
    pub table: String,
    pub role_id: RoleId,
    pub user_id: UserId,
    pub controlled: bool,
    pub data_scope: Option<DataScope>,
    pub custom_condition: Option<String>,
    pub origin: Option<RuleOrigin>,
    pub field_permissions: FieldRuleMap,
    pub sql_condition: String,
    pub params: Vec<Param>,
    /// Set when the stored rule is misconfigured.
    pub error: Option<String>,
}

/// Computes effective policies.
///
/// Cheap to clone; clones share the store and cache.
#[derive(Clone)]
pub struct PolicyEngine {
    resolver: PolicyResolver,
    generator: PredicateGenerator,
    renderer: SqlRenderer,
    cache: Option<Arc<PolicyCache>>,
    on_misconfiguration: MisconfigurationMode,
}

impl PolicyEngine {
    /// Engine with the cache described by `config.cache`.
    pub fn new(store: Arc<dyn PolicyStore>, config: &RowgateConfig) -> Self {
        let cache = PolicyCache::from_config(&config.cache).map(Arc::new);
        Self::with_cache(store, cache, config)
    }

    pub fn with_cache(
        store: Arc<dyn PolicyStore>,
        cache: Option<Arc<PolicyCache>>,
        config: &RowgateConfig,
    ) -> Self {
        Self {
            resolver: PolicyResolver::new(store, cache.clone(), config.field_permission_enabled),
            generator: PredicateGenerator::new(config.custom_condition_check),
            renderer: SqlRenderer::new(config.org.clone()),
            cache,
            on_misconfiguration: config.on_misconfiguration,
        }
    }

    pub fn cache(&self) -> Option<Arc<PolicyCache>> {
        self.cache.clone()
    }

    pub fn renderer(&self) -> &SqlRenderer {
        &self.renderer
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Merge every effective role of `principal` on `table_name`.
    ///
    /// Lookup failures propagate; callers choose the fallback.
    pub async fn effective_policy(
        &self,
        principal: &Principal,
        table_name: &str,
    ) -> Result<EffectivePolicy, PolicyError> {
        let Some(table) = self.resolver.controlled_table(table_name).await? else {
            return Ok(EffectivePolicy::unrestricted(table_name));
        };
        let Some(user_id) = principal.user_id else {
            tracing::debug!(table = %table_name, "Anonymous principal on controlled table");
            return Ok(EffectivePolicy::deny_all(table_name, Some(table)));
        };

        let roles = principal.effective_roles();
        let mut predicates = Vec::with_capacity(roles.len());
        let mut field_maps = Vec::with_capacity(roles.len());
        let mut universal = false;

        for role_id in roles {
            let policy = self.resolver.resolve_for_table(&table, role_id).await?;
            // Once a role sees every row the remaining predicates are moot,
            // but their field rules still merge.
            if !universal {
                let predicate = self.role_predicate(&policy, role_id, user_id);
                universal = predicate.is_true();
                predicates.push(predicate);
            }
            field_maps.push(policy.fields);
        }

        let predicate = merge_predicates(predicates);
        let fields = merge_field_rules(field_maps.iter());

        tracing::debug!(
            table = %table_name,
            user_id,
            roles = ?principal.effective_roles(),
            predicate = %predicate,
            "Resolved effective policy"
        );

        Ok(EffectivePolicy {
            table: table_name.to_string(),
            controlled: Some(table),
            predicate,
            fields,
        })
    }

    /// Self-scope-only policy used by the read path after a lookup failure.
    ///
    /// Never broader than the caller's own rows; anything that cannot be
    /// established degrades to no rows. Field rules are loaded on their own
    /// and an error is returned when they cannot be, since rows without their
    /// masks would expose hidden columns.
    pub async fn fallback_self_policy(
        &self,
        principal: &Principal,
        table_name: &str,
    ) -> Result<EffectivePolicy, PolicyError> {
        let table = match self.resolver.controlled_table(table_name).await {
            Ok(Some(table)) => table,
            Ok(None) | Err(_) => return Ok(EffectivePolicy::deny_all(table_name, None)),
        };
        let column = table.user_column().and_then(|c| Ident::new(c).ok());
        let predicate = match (principal.user_id, column) {
            (Some(user_id), Some(column)) => Predicate::eq(column, user_id),
            _ => Predicate::False,
        };

        let mut field_maps = Vec::new();
        if !predicate.is_false() {
            for role_id in principal.effective_roles() {
                field_maps.push(self.resolver.field_rules(&table, role_id).await?);
            }
        }

        tracing::warn!(
            table = %table_name,
            predicate = %predicate,
            "Falling back to self scope after policy lookup failure"
        );
        Ok(EffectivePolicy {
            table: table_name.to_string(),
            controlled: Some(table),
            predicate,
            fields: merge_field_rules(field_maps.iter()),
        })
    }

    /// Whether `principal` may create rows in `table_name`.
    ///
    /// On a controlled table some effective role must hold an enabled data
    /// rule; the read-side `self` default does not grant create.
    pub async fn can_create(
        &self,
        principal: &Principal,
        table_name: &str,
    ) -> Result<CreateDecision, PolicyError> {
        let Some(table) = self.resolver.controlled_table(table_name).await? else {
            return Ok(CreateDecision::Unrestricted);
        };
        if principal.is_anonymous() {
            return Ok(CreateDecision::Denied(table));
        }
        if self
            .resolver
            .can_create(&table, &principal.effective_roles())
            .await?
        {
            Ok(CreateDecision::Allowed(table))
        } else {
            Ok(CreateDecision::Denied(table))
        }
    }

    /// Run the pipeline for one role and render the outcome.
    pub async fn preview(
        &self,
        role_id: RoleId,
        table_name: &str,
        user_id: UserId,
    ) -> Result<PolicyPreview, PolicyError> {
        let policy = match self.resolver.resolve(table_name, role_id).await? {
            Resolution::Unrestricted => {
                let rendered = self.renderer.render(&Predicate::True, 0);
                return Ok(PolicyPreview {
                    table: table_name.to_string(),
                    role_id,
                    user_id,
                    controlled: false,
                    data_scope: None,
                    custom_condition: None,
                    origin: None,
                    field_permissions: FieldRuleMap::new(),
                    sql_condition: rendered.sql,
                    params: rendered.params,
                    error: None,
                });
            }
            Resolution::Controlled(policy) => policy,
        };

        let (predicate, error) = match self.generator.generate(&policy.rule, &policy.table, user_id)
        {
            Ok(predicate) => (predicate, None),
            Err(err) => (self.misconfigured_predicate(), Some(err.to_string())),
        };
        let rendered = self.renderer.render(&predicate, 0);

        Ok(PolicyPreview {
            table: table_name.to_string(),
            role_id,
            user_id,
            controlled: true,
            data_scope: Some(policy.rule.scope),
            custom_condition: policy.rule.custom_condition,
            origin: Some(policy.rule.origin),
            field_permissions: policy.fields,
            sql_condition: rendered.sql,
            params: rendered.params,
            error,
        })
    }

    /// Whether `principal` may use `field` of `table_name` on `axis`.
    pub async fn field_allowed(
        &self,
        principal: &Principal,
        table_name: &str,
        field: &str,
        axis: FieldAxis,
    ) -> Result<bool, PolicyError> {
        let policy = self.effective_policy(principal, table_name).await?;
        Ok(policy.fields.allows(field, axis))
    }

    fn role_predicate(&self, policy: &ControlledPolicy, role_id: RoleId, user_id: UserId) -> Predicate {
        match self.generator.generate(&policy.rule, &policy.table, user_id) {
            Ok(predicate) => predicate,
            Err(err) => {
                match self.on_misconfiguration {
                    MisconfigurationMode::Deny => tracing::error!(
                        table = %policy.table.table_name,
                        role_id,
                        scope = %policy.rule.scope,
                        error = %err,
                        "Policy misconfigured, role contributes no rows"
                    ),
                    MisconfigurationMode::Allow => tracing::warn!(
                        table = %policy.table.table_name,
                        role_id,
                        scope = %policy.rule.scope,
                        error = %err,
                        "Policy misconfigured, role contributes every row (on_misconfiguration=allow)"
                    ),
                }
                self.misconfigured_predicate()
            }
        }
    }

    fn misconfigured_predicate(&self) -> Predicate {
        match self.on_misconfiguration {
            MisconfigurationMode::Deny => Predicate::False,
            MisconfigurationMode::Allow => Predicate::True,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPolicyStore;
    use pretty_assertions::assert_eq;
    use rowgate_core::{FieldFlags, NewControlledTable, RoleDataPermission, RoleFieldPermission};

    const ADMIN: RoleId = 1;
    const USER: RoleId = 2;
    const BROKEN: RoleId = 3;

    async fn store() -> Arc<MemoryPolicyStore> {
        let store = Arc::new(MemoryPolicyStore::new());
        let table = store
            .seed_table(NewControlledTable {
                table_name: "users".into(),
                enabled: true,
                user_field: Some("created_by".into()),
                ..Default::default()
            })
            .await;
        for (role_id, scope) in [
            (ADMIN, DataScope::All),
            (USER, DataScope::OwnOnly),
            (BROKEN, DataScope::parse("region")),
        ] {
            store
                .seed_data_permission(RoleDataPermission {
                    id: 0,
                    role_id,
                    controlled_table_id: table,
                    data_scope: scope,
                    custom_condition: None,
                    priority: 50,
                    enabled: true,
                    created_at: None,
                })
                .await;
        }
        store
            .seed_field_permission(RoleFieldPermission {
                id: 0,
                role_id: USER,
                controlled_table_id: table,
                field_name: "phone".into(),
                field_label: None,
                field_description: None,
                flags: FieldFlags::default().with(FieldAxis::Visible, false),
                enabled: true,
                created_at: None,
            })
            .await;
        store
    }

    fn engine(store: Arc<MemoryPolicyStore>, mode: MisconfigurationMode) -> PolicyEngine {
        let config = RowgateConfig {
            on_misconfiguration: mode,
            ..Default::default()
        };
        PolicyEngine::new(store, &config)
    }

    fn own(user_id: UserId) -> Predicate {
        Predicate::eq(Ident::new("created_by").unwrap(), user_id)
    }

    #[tokio::test]
    async fn test_all_plus_self_merges_to_all() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let principal = Principal::new(2, vec![USER, ADMIN]);
        let policy = engine.effective_policy(&principal, "users").await.unwrap();
        assert_eq!(policy.predicate, Predicate::True);
        // Admin has no opinion on phone; user hides it.
        assert!(!policy.fields.allows("phone", FieldAxis::Visible));
    }

    #[tokio::test]
    async fn test_unrestricted_table() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let policy = engine
            .effective_policy(&Principal::new(2, vec![USER]), "audit_log")
            .await
            .unwrap();
        assert_eq!(policy, EffectivePolicy::unrestricted("audit_log"));
    }

    #[tokio::test]
    async fn test_misconfigured_role_fails_closed_by_default() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let policy = engine
            .effective_policy(&Principal::new(4, vec![BROKEN, USER]), "users")
            .await
            .unwrap();
        assert_eq!(policy.predicate, own(4));
    }

    #[tokio::test]
    async fn test_misconfigured_role_fail_open_mode() {
        let engine = engine(store().await, MisconfigurationMode::Allow);
        let policy = engine
            .effective_policy(&Principal::new(4, vec![BROKEN]), "users")
            .await
            .unwrap();
        assert_eq!(policy.predicate, Predicate::True);
    }

    #[tokio::test]
    async fn test_role_without_rows_gets_self() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let policy = engine
            .effective_policy(&Principal::new(3, vec![42]), "users")
            .await
            .unwrap();
        assert_eq!(policy.predicate, own(3));
    }

    #[tokio::test]
    async fn test_can_create() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        assert!(matches!(
            engine.can_create(&Principal::new(1, vec![USER]), "users").await.unwrap(),
            CreateDecision::Allowed(_)
        ));
        assert!(matches!(
            engine.can_create(&Principal::new(1, vec![42]), "users").await.unwrap(),
            CreateDecision::Denied(_)
        ));
        assert_eq!(
            engine.can_create(&Principal::new(1, vec![42]), "audit_log").await.unwrap(),
            CreateDecision::Unrestricted
        );
    }

    #[tokio::test]
    async fn test_preview_renders_condition() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let preview = engine.preview(USER, "users", 7).await.unwrap();
        assert!(preview.controlled);
        assert_eq!(preview.data_scope, Some(DataScope::OwnOnly));
        assert_eq!(preview.sql_condition, "\"created_by\" = $1");
        assert_eq!(preview.params, vec![Param::Int(7)]);
        assert_eq!(preview.field_permissions["phone"].visible, Some(false));

        let broken = engine.preview(BROKEN, "users", 7).await.unwrap();
        assert_eq!(broken.sql_condition, "FALSE");
        assert!(broken.error.is_some());
    }

    #[tokio::test]
    async fn test_fallback_self_policy() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let principal = Principal::new(5, vec![ADMIN]);
        let policy = engine.fallback_self_policy(&principal, "users").await.unwrap();
        assert_eq!(policy.predicate, own(5));
        let unknown = engine
            .fallback_self_policy(&principal, "audit_log")
            .await
            .unwrap();
        assert_eq!(unknown.predicate, Predicate::False);

        let user = Principal::new(5, vec![USER]);
        let policy = engine.fallback_self_policy(&user, "users").await.unwrap();
        assert!(!policy.fields.allows("phone", FieldAxis::Visible));
    }

    #[tokio::test]
    async fn test_field_allowed() {
        let engine = engine(store().await, MisconfigurationMode::Deny);
        let user = Principal::new(1, vec![USER]);
        let admin = Principal::new(1, vec![ADMIN]);
        assert!(!engine.field_allowed(&user, "users", "phone", FieldAxis::Visible).await.unwrap());
        assert!(engine.field_allowed(&admin, "users", "phone", FieldAxis::Visible).await.unwrap());
        assert!(engine.field_allowed(&user, "users", "phone", FieldAxis::Editable).await.unwrap());
    }
}
