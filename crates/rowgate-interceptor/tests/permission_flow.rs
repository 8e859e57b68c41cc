//! End-to-end permission behavior through the helper facade.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rowgate_core::{
    DataPermissionConfig, DataScope, FieldAxis, FieldFlags, FieldPermissionItem,
    ControlledTable, NewControlledTable, Principal, RoleDataPermission, RoleFieldPermission,
    RoleId, RowgateConfig, TableId,
};
use rowgate_interceptor::{
    InterceptorSettings, MemoryBackend, PermissionHelper, PermissionInterceptor, Query, Row,
    describable,
};
use rowgate_policy::{
    Ident, MemoryDirectory, MemoryPolicyStore, PolicyAdmin, PolicyCache, PolicyEngine,
    PolicyStore, Predicate,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const ADMIN: i64 = 1;
const USER: i64 = 2;
const GUEST: i64 = 3;
const DEPT_MANAGER: i64 = 4;

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn data_rule(role_id: i64, table_id: i64, scope: DataScope) -> RoleDataPermission {
    RoleDataPermission {
        id: 0,
        role_id,
        controlled_table_id: table_id,
        data_scope: scope,
        custom_condition: None,
        priority: 50,
        enabled: true,
        created_at: None,
    }
}

struct Fixture {
    store: Arc<MemoryPolicyStore>,
    cache: Arc<PolicyCache>,
    engine: PolicyEngine,
    backend: Arc<MemoryBackend>,
}

impl Fixture {
    /// `users` owned through `created_by`: admin sees all, user sees own rows
    /// and cannot see or edit `phone`, guest has no rule. `orders` is scoped
    /// to the department tree for the department manager.
    async fn new() -> Self {
        let store = Arc::new(MemoryPolicyStore::new());
        let users = store
            .seed_table(NewControlledTable {
                table_name: "users".into(),
                enabled: true,
                user_field: Some("created_by".into()),
                ..Default::default()
            })
            .await;
        store.seed_data_permission(data_rule(ADMIN, users, DataScope::All)).await;
        store.seed_data_permission(data_rule(USER, users, DataScope::OwnOnly)).await;
        store
            .seed_field_permission(RoleFieldPermission {
                id: 0,
                role_id: USER,
                controlled_table_id: users,
                field_name: "phone".into(),
                field_label: Some("Phone".into()),
                field_description: None,
                flags: FieldFlags {
                    visible: Some(false),
                    editable: Some(false),
                    ..Default::default()
                },
                enabled: true,
                created_at: None,
            })
            .await;

        let orders = store
            .seed_table(NewControlledTable {
                table_name: "orders".into(),
                enabled: true,
                user_field: Some("created_by".into()),
                dept_field: Some("dept_id".into()),
                ..Default::default()
            })
            .await;
        store
            .seed_data_permission(data_rule(DEPT_MANAGER, orders, DataScope::DepartmentTree))
            .await;

        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed(
                "users",
                [(1, 1), (2, 1), (3, 2), (4, 3)].map(|(id, owner)| {
                    row(json!({
                        "id": id,
                        "name": format!("user-{id}"),
                        "phone": format!("555-000{id}"),
                        "created_by": owner,
                    }))
                }),
            )
            .await;
        backend
            .seed(
                "sys_dept",
                [
                    row(json!({"id": 10, "parent_id": null})),
                    row(json!({"id": 11, "parent_id": 10})),
                    row(json!({"id": 12, "parent_id": null})),
                ],
            )
            .await;
        backend
            .seed(
                "sys_users",
                [
                    row(json!({"id": 20, "dept_id": 10})),
                    row(json!({"id": 21, "dept_id": 11})),
                ],
            )
            .await;
        backend
            .seed(
                "orders",
                [(10, 20), (11, 21), (12, 22)].map(|(dept, owner)| {
                    row(json!({"dept_id": dept, "created_by": owner}))
                }),
            )
            .await;

        let cache = Arc::new(PolicyCache::new(Duration::from_secs(300), 1_000));
        let engine = PolicyEngine::with_cache(
            store.clone(),
            Some(cache.clone()),
            &RowgateConfig::default(),
        );
        Self {
            store,
            cache,
            engine,
            backend,
        }
    }

    fn interceptor(&self, principal: Principal) -> Arc<PermissionInterceptor> {
        let directory = MemoryDirectory::new().with_member(7, 11).with_member(20, 10);
        Arc::new(
            PermissionInterceptor::new(
                self.engine.clone(),
                principal,
                InterceptorSettings::default(),
            )
            .with_directory(Arc::new(directory)),
        )
    }

    fn helper(&self, principal: Principal) -> PermissionHelper {
        PermissionHelper::new(self.interceptor(principal), self.backend.clone())
    }

    /// Helper whose policy reads go through `store` without a cache.
    fn helper_over(&self, store: Arc<dyn PolicyStore>, principal: Principal) -> PermissionHelper {
        let engine = PolicyEngine::with_cache(store, None, &RowgateConfig::default());
        let interceptor =
            PermissionInterceptor::new(engine, principal, InterceptorSettings::default());
        PermissionHelper::new(Arc::new(interceptor), self.backend.clone())
    }

    fn admin(&self) -> PolicyAdmin {
        PolicyAdmin::new(self.store.clone(), Some(self.cache.clone()), true)
    }
}

/// Delegates to the fixture store, failing the selected lookups.
struct FailingStore {
    inner: Arc<MemoryPolicyStore>,
    fail_data: bool,
    fail_fields: bool,
}

#[async_trait]
impl PolicyStore for FailingStore {
    async fn controlled_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>> {
        self.inner.controlled_table(table_name).await
    }

    async fn data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>> {
        if self.fail_data {
            anyhow::bail!("policy database unavailable");
        }
        self.inner.data_permission(role_id, table_id).await
    }

    async fn field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>> {
        if self.fail_fields {
            anyhow::bail!("policy database unavailable");
        }
        self.inner.field_permissions(role_id, table_id).await
    }
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect()
}

// =============================================================================
// Row scope
// =============================================================================

#[tokio::test]
async fn test_admin_sees_every_row() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(1, vec![ADMIN]));
    let rows = helper.query("users", Query::new()).await.unwrap();
    assert_eq!(ids(&rows), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_user_sees_only_own_rows() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(2, vec![USER]));
    let rows = helper.query("users", Query::new()).await.unwrap();
    assert_eq!(ids(&rows), vec![3]);
    assert_eq!(helper.count("users").await.unwrap(), 1);
}

#[tokio::test]
async fn test_role_without_rule_falls_back_to_own_rows() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(3, vec![GUEST]));
    let rows = helper.query("users", Query::new()).await.unwrap();
    assert_eq!(ids(&rows), vec![4]);
}

#[tokio::test]
async fn test_multiple_roles_take_the_broadest_scope() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(2, vec![USER, ADMIN]));
    assert_eq!(helper.count("users").await.unwrap(), 4);
}

#[tokio::test]
async fn test_caller_filter_is_combined_with_scope() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(1, vec![USER]));
    let query = Query::new().where_eq("name", "user-2").unwrap();
    let rows = helper.query("users", query).await.unwrap();
    assert_eq!(ids(&rows), vec![2]);

    let query = Query::new().where_eq("name", "user-3").unwrap();
    assert!(helper.query_one("users", query).await.unwrap().is_none());
}

#[tokio::test]
async fn test_uncontrolled_table_is_untouched() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(2, vec![USER]));
    assert_eq!(helper.count("sys_dept").await.unwrap(), 3);
}

#[tokio::test]
async fn test_department_tree_scope() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(20, vec![DEPT_MANAGER]));
    let rows = helper.query("orders", Query::new()).await.unwrap();
    let depts: Vec<i64> = rows
        .iter()
        .filter_map(|r| r.get("dept_id").and_then(Value::as_i64))
        .collect();
    assert_eq!(depts, vec![10, 11]);
}

#[tokio::test]
async fn test_validate_data_access() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(2, vec![USER]));
    assert!(helper.validate_data_access("users", 3_i64).await.unwrap());
    assert!(!helper.validate_data_access("users", 1_i64).await.unwrap());
}

#[tokio::test]
async fn test_hook_registered_twice_applies_once() {
    let fx = Fixture::new().await;
    let interceptor = fx.interceptor(Principal::new(2, vec![USER]));
    let session = interceptor
        .session(fx.backend.clone())
        .with_hook(interceptor.clone());
    let rows = session.find("users", Query::new()).await.unwrap();
    assert_eq!(ids(&rows), vec![3]);
}

#[tokio::test]
async fn test_skip_permission_reads_everything() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(2, vec![USER]));
    let rows = helper
        .session()
        .skip_permission()
        .find("users", Query::new())
        .await
        .unwrap();
    assert_eq!(rows.len(), 4);
}

// =============================================================================
// Field rules
// =============================================================================

#[tokio::test]
async fn test_hidden_field_is_masked_for_restricted_role() {
    let fx = Fixture::new().await;

    let user = fx.helper(Principal::new(1, vec![USER]));
    let rows = user.query("users", Query::new()).await.unwrap();
    assert_eq!(rows.len(), 2);
    for r in &rows {
        assert_eq!(r["phone"], json!(""));
        assert!(r["name"].as_str().is_some_and(|n| n.starts_with("user-")));
    }

    let admin = fx.helper(Principal::new(1, vec![ADMIN]));
    let rows = admin.query("users", Query::new()).await.unwrap();
    assert_eq!(rows[0]["phone"], json!("555-0001"));
}

#[tokio::test]
async fn test_lookup_failure_on_read_keeps_hidden_fields_masked() {
    let fx = Fixture::new().await;
    let store = Arc::new(FailingStore {
        inner: fx.store.clone(),
        fail_data: true,
        fail_fields: false,
    });
    // ADMIN would see every row; the fallback narrows to own rows.
    let helper = fx.helper_over(store, Principal::new(2, vec![USER, ADMIN]));
    let rows = helper.query("users", Query::new()).await.unwrap();
    assert_eq!(ids(&rows), vec![3]);
    assert_eq!(rows[0]["phone"], json!(""));
}

#[tokio::test]
async fn test_read_fails_when_field_rules_cannot_be_loaded() {
    let fx = Fixture::new().await;
    let store = Arc::new(FailingStore {
        inner: fx.store.clone(),
        fail_data: false,
        fail_fields: true,
    });
    let helper = fx.helper_over(store, Principal::new(2, vec![USER]));
    assert!(helper.query("users", Query::new()).await.is_err());
}

#[tokio::test]
async fn test_field_helpers() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(1, vec![USER]));
    let columns = ["id", "name", "phone"];

    assert_eq!(
        helper.visible_fields("users", &columns).await.unwrap(),
        vec!["id", "name"]
    );
    assert_eq!(
        helper.editable_fields("users", &columns).await.unwrap(),
        vec!["id", "name"]
    );
    assert_eq!(
        helper.filter_exportable("users", &columns).await.unwrap(),
        vec!["id", "name", "phone"]
    );
    assert!(!helper.check_field("users", "phone", FieldAxis::Visible).await.unwrap());
    assert!(helper.check_field("users", "phone", FieldAxis::Queryable).await.unwrap());

    let cleaned = helper
        .filter_editable("users", row(json!({"name": "x", "phone": "y"})))
        .await
        .unwrap();
    assert_eq!(cleaned, row(json!({"name": "x"})));
}

#[tokio::test]
async fn test_filter_row_strips_per_axis() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(1, vec![USER]));
    let record = || row(json!({"id": 1, "name": "x", "phone": "y"}));

    let visible = helper
        .filter_row("users", record(), FieldAxis::Visible)
        .await
        .unwrap();
    assert_eq!(visible, row(json!({"id": 1, "name": "x"})));

    let exportable = helper
        .filter_row("users", record(), FieldAxis::Exportable)
        .await
        .unwrap();
    assert_eq!(exportable, record());
}

#[tokio::test]
async fn test_data_scope_reports_primary_role_rule() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(1, vec![USER, ADMIN]));
    let rule = helper.data_scope("users").await.unwrap().unwrap();
    assert_eq!(rule.scope, DataScope::OwnOnly);
    assert!(helper.data_scope("sys_dept").await.unwrap().is_none());
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_create_stamps_owner_columns() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(7, vec![USER]));
    let created = helper
        .create("users", row(json!({"name": "new", "created_by": 99})))
        .await
        .unwrap();
    assert_eq!(created["created_by"], json!(7));

    // The new row is now within the creator's scope.
    let rows = helper.query("users", Query::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("new"));
}

#[tokio::test]
async fn test_create_without_rule_is_denied() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(3, vec![GUEST]));
    let err = helper
        .create("users", row(json!({"name": "nope"})))
        .await
        .unwrap_err();
    assert!(err.is_denied());
    assert_eq!(fx.backend.rows("users").await.len(), 4);
}

#[tokio::test]
async fn test_create_fills_department_from_directory() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(20, vec![DEPT_MANAGER]));
    let created = helper
        .create("orders", row(json!({"total": 5})))
        .await
        .unwrap();
    assert_eq!(created["created_by"], json!(20));
    assert_eq!(created["dept_id"], json!(10));
}

#[tokio::test]
async fn test_update_is_scoped_and_strips_readonly() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(1, vec![USER]));
    let id = |n: i64| Predicate::eq(Ident::new("id").unwrap(), n);

    let changed = helper
        .update("users", id(1), row(json!({"name": "renamed", "phone": "999"})))
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let changed = helper
        .update("users", id(3), row(json!({"name": "stolen"})))
        .await
        .unwrap();
    assert_eq!(changed, 0);

    let stored = fx.backend.rows("users").await;
    assert_eq!(stored[0]["name"], json!("renamed"));
    assert_eq!(stored[0]["phone"], json!("555-0001"));
    assert_eq!(stored[2]["name"], json!("user-3"));
}

#[tokio::test]
async fn test_delete_is_scoped() {
    let fx = Fixture::new().await;
    let helper = fx.helper(Principal::new(2, vec![USER]));
    assert_eq!(helper.delete("users", Predicate::True).await.unwrap(), 1);
    assert_eq!(ids(&fx.backend.rows("users").await), vec![1, 2, 4]);
}

// =============================================================================
// Administration
// =============================================================================

#[tokio::test]
async fn test_saved_config_round_trips_and_takes_effect() {
    let fx = Fixture::new().await;

    // Warm the cache with the old rule.
    let before = fx.helper(Principal::new(2, vec![USER]));
    assert_eq!(before.count("users").await.unwrap(), 1);

    let config = DataPermissionConfig {
        role_id: USER,
        table_name: "users".into(),
        data_scope: DataScope::All,
        custom_condition: None,
        user_field: Some("created_by".into()),
        dept_field: None,
        fields: vec![FieldPermissionItem {
            field_name: "name".into(),
            field_label: None,
            field_description: None,
            flags: FieldFlags {
                editable: Some(false),
                ..Default::default()
            },
        }],
    };
    let admin = fx.admin();
    admin.save_config(config.clone()).await.unwrap();
    assert_eq!(admin.get_config(USER, "users").await.unwrap(), config);

    let after = fx.helper(Principal::new(2, vec![USER]));
    assert_eq!(after.count("users").await.unwrap(), 4);
    let rows = after.query("users", Query::new()).await.unwrap();
    assert_eq!(rows[0]["phone"], json!("555-0001"));
}

#[tokio::test]
async fn test_unsaved_config_defaults_to_self() {
    let fx = Fixture::new().await;
    let config = fx.admin().get_config(GUEST, "users").await.unwrap();
    assert_eq!(config.data_scope, DataScope::OwnOnly);
    assert!(config.fields.is_empty());
}

// =============================================================================
// Typed records
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
    phone: String,
    created_by: i64,
}

describable!(User => "users" { id, name, phone, created_by });

#[tokio::test]
async fn test_typed_records_are_scoped_and_masked() {
    let fx = Fixture::new().await;
    let session = fx.helper(Principal::new(2, vec![USER])).session();

    let users: Vec<User> = session.find_as(Query::new()).await.unwrap();
    assert_eq!(
        users,
        vec![User {
            id: 3,
            name: "user-3".into(),
            phone: String::new(),
            created_by: 2,
        }]
    );

    let created = session
        .create_record(User {
            name: "typed".into(),
            phone: "123".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.created_by, 2);
    assert_eq!(created.phone, "");
}
