//! Policy rows in Postgres.
//!
//! Schema: `migrations/0001_policy.sql`.

use async_trait::async_trait;
use rowgate_core::{
    ControlledTable, DEFAULT_PRIORITY, DataPermissionConfig, DataScope, DeptId, FieldFlags,
    NewControlledTable, OrgSchemaConfig, PolicyStatistics, RoleDataPermission,
    RoleFieldPermission, RoleId, TableId, UserId,
};
use rowgate_policy::{Directory, Ident, PolicyAdminStore, PolicyStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const TABLE_COLUMNS: &str =
    "id, table_name, description, enabled, data_scope, user_field, dept_field, created_at, updated_at";
const DATA_COLUMNS: &str =
    "id, role_id, controlled_table_id, data_scope, custom_condition, priority, enabled, created_at";
const FIELD_COLUMNS: &str = "id, role_id, controlled_table_id, field_name, field_label, \
     field_description, visible, editable, exportable, queryable, enabled, created_at";

/// [`PolicyStore`], [`PolicyAdminStore`] and [`Directory`] over one pool.
///
/// The directory reads the organization tables named by the
/// [`OrgSchemaConfig`].
#[derive(Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
    org: OrgSchemaConfig,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            org: OrgSchemaConfig::default(),
        }
    }

    pub fn with_org(mut self, org: OrgSchemaConfig) -> Self {
        self.org = org;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn table_from_row(r: &PgRow) -> Result<ControlledTable, sqlx::Error> {
    Ok(ControlledTable {
        id: r.try_get("id")?,
        table_name: r.try_get("table_name")?,
        description: r.try_get("description")?,
        enabled: r.try_get("enabled")?,
        data_scope: DataScope::parse(r.try_get::<&str, _>("data_scope")?),
        user_field: r.try_get("user_field")?,
        dept_field: r.try_get("dept_field")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn data_from_row(r: &PgRow) -> Result<RoleDataPermission, sqlx::Error> {
    Ok(RoleDataPermission {
        id: r.try_get("id")?,
        role_id: r.try_get("role_id")?,
        controlled_table_id: r.try_get("controlled_table_id")?,
        data_scope: DataScope::parse(r.try_get::<&str, _>("data_scope")?),
        custom_condition: r.try_get("custom_condition")?,
        priority: r.try_get("priority")?,
        enabled: r.try_get("enabled")?,
        created_at: r.try_get("created_at")?,
    })
}

fn field_from_row(r: &PgRow) -> Result<RoleFieldPermission, sqlx::Error> {
    Ok(RoleFieldPermission {
        id: r.try_get("id")?,
        role_id: r.try_get("role_id")?,
        controlled_table_id: r.try_get("controlled_table_id")?,
        field_name: r.try_get("field_name")?,
        field_label: r.try_get("field_label")?,
        field_description: r.try_get("field_description")?,
        flags: FieldFlags {
            visible: r.try_get("visible")?,
            editable: r.try_get("editable")?,
            exportable: r.try_get("exportable")?,
            queryable: r.try_get("queryable")?,
        },
        enabled: r.try_get("enabled")?,
        created_at: r.try_get("created_at")?,
    })
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn controlled_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>> {
        let sql = format!(
            "SELECT {TABLE_COLUMNS} FROM data_permission_controlled_tables \
             WHERE table_name = $1 AND enabled"
        );
        let rec = sqlx::query(&sql)
            .bind(table_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.as_ref().map(table_from_row).transpose()?)
    }

    async fn data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>> {
        let sql = format!(
            "SELECT {DATA_COLUMNS} FROM data_permission_role_data \
             WHERE role_id = $1 AND controlled_table_id = $2 AND enabled \
             ORDER BY priority DESC, id DESC LIMIT 1"
        );
        let rec = sqlx::query(&sql)
            .bind(role_id)
            .bind(table_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.as_ref().map(data_from_row).transpose()?)
    }

    async fn field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>> {
        let sql = format!(
            "SELECT {FIELD_COLUMNS} FROM data_permission_role_fields \
             WHERE role_id = $1 AND controlled_table_id = $2 AND enabled ORDER BY id"
        );
        let recs = sqlx::query(&sql)
            .bind(role_id)
            .bind(table_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(recs
            .iter()
            .map(field_from_row)
            .collect::<Result<_, _>>()?)
    }
}

#[async_trait]
impl PolicyAdminStore for PgPolicyStore {
    async fn find_table(&self, table_name: &str) -> anyhow::Result<Option<ControlledTable>> {
        let sql = format!(
            "SELECT {TABLE_COLUMNS} FROM data_permission_controlled_tables WHERE table_name = $1"
        );
        let rec = sqlx::query(&sql)
            .bind(table_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.as_ref().map(table_from_row).transpose()?)
    }

    async fn table_by_id(&self, id: TableId) -> anyhow::Result<Option<ControlledTable>> {
        let sql = format!("SELECT {TABLE_COLUMNS} FROM data_permission_controlled_tables WHERE id = $1");
        let rec = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.as_ref().map(table_from_row).transpose()?)
    }

    async fn list_tables(&self) -> anyhow::Result<Vec<ControlledTable>> {
        let sql = format!("SELECT {TABLE_COLUMNS} FROM data_permission_controlled_tables ORDER BY id");
        let recs = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(recs
            .iter()
            .map(table_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn insert_table(&self, table: NewControlledTable) -> anyhow::Result<ControlledTable> {
        let sql = format!(
            "INSERT INTO data_permission_controlled_tables \
             (table_name, description, enabled, data_scope, user_field, dept_field) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {TABLE_COLUMNS}"
        );
        let rec = sqlx::query(&sql)
            .bind(&table.table_name)
            .bind(&table.description)
            .bind(table.enabled)
            .bind(table.data_scope.as_str())
            .bind(&table.user_field)
            .bind(&table.dept_field)
            .fetch_one(&self.pool)
            .await?;
        Ok(table_from_row(&rec)?)
    }

    async fn update_table(&self, table: ControlledTable) -> anyhow::Result<ControlledTable> {
        let sql = format!(
            "UPDATE data_permission_controlled_tables SET \
             table_name = $1, description = $2, enabled = $3, data_scope = $4, \
             user_field = $5, dept_field = $6, updated_at = now() \
             WHERE id = $7 RETURNING {TABLE_COLUMNS}"
        );
        let rec = sqlx::query(&sql)
            .bind(&table.table_name)
            .bind(&table.description)
            .bind(table.enabled)
            .bind(table.data_scope.as_str())
            .bind(&table.user_field)
            .bind(&table.dept_field)
            .bind(table.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("controlled table {} not found", table.id))?;
        Ok(table_from_row(&rec)?)
    }

    async fn delete_table(&self, id: TableId) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM data_permission_role_data WHERE controlled_table_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM data_permission_role_fields WHERE controlled_table_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let done = sqlx::query("DELETE FROM data_permission_controlled_tables WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(done.rows_affected() > 0)
    }

    async fn replace_role_config(
        &self,
        table_id: TableId,
        config: &DataPermissionConfig,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM data_permission_role_data WHERE role_id = $1 AND controlled_table_id = $2",
        )
        .bind(config.role_id)
        .bind(table_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM data_permission_role_fields WHERE role_id = $1 AND controlled_table_id = $2",
        )
        .bind(config.role_id)
        .bind(table_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO data_permission_role_data \
             (role_id, controlled_table_id, data_scope, custom_condition, priority, enabled) \
             VALUES ($1, $2, $3, $4, $5, TRUE)",
        )
        .bind(config.role_id)
        .bind(table_id)
        .bind(config.data_scope.as_str())
        .bind(&config.custom_condition)
        .bind(DEFAULT_PRIORITY)
        .execute(&mut *tx)
        .await?;

        for item in &config.fields {
            sqlx::query(
                "INSERT INTO data_permission_role_fields \
                 (role_id, controlled_table_id, field_name, field_label, field_description, \
                  visible, editable, exportable, queryable, enabled) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)",
            )
            .bind(config.role_id)
            .bind(table_id)
            .bind(&item.field_name)
            .bind(&item.field_label)
            .bind(&item.field_description)
            .bind(item.flags.visible)
            .bind(item.flags.editable)
            .bind(item.flags.exportable)
            .bind(item.flags.queryable)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn stored_data_permission(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Option<RoleDataPermission>> {
        let sql = format!(
            "SELECT {DATA_COLUMNS} FROM data_permission_role_data \
             WHERE role_id = $1 AND controlled_table_id = $2 \
             ORDER BY enabled DESC, priority DESC, id DESC LIMIT 1"
        );
        let rec = sqlx::query(&sql)
            .bind(role_id)
            .bind(table_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.as_ref().map(data_from_row).transpose()?)
    }

    async fn stored_field_permissions(
        &self,
        role_id: RoleId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<RoleFieldPermission>> {
        let sql = format!(
            "SELECT {FIELD_COLUMNS} FROM data_permission_role_fields \
             WHERE role_id = $1 AND controlled_table_id = $2 ORDER BY id"
        );
        let recs = sqlx::query(&sql)
            .bind(role_id)
            .bind(table_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(recs
            .iter()
            .map(field_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn statistics(&self) -> anyhow::Result<PolicyStatistics> {
        let rec = sqlx::query(
            r#"
            select
              (select count(*) from data_permission_controlled_tables) as controlled_tables,
              (select count(*) from data_permission_role_data) as data_permissions,
              (select count(*) from data_permission_role_fields) as field_permissions,
              (select count(distinct role_id) from data_permission_role_data) as active_roles
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let count = |name: &str| -> anyhow::Result<u64> {
            Ok(rec.try_get::<i64, _>(name)?.max(0) as u64)
        };
        Ok(PolicyStatistics {
            controlled_tables: count("controlled_tables")?,
            data_permissions: count("data_permissions")?,
            field_permissions: count("field_permissions")?,
            active_roles: count("active_roles")?,
        })
    }
}

/// `SELECT <dept column> FROM <users table> WHERE <id column> = $1`, quoted.
fn department_query(org: &OrgSchemaConfig) -> anyhow::Result<String> {
    let quoted = |raw: &str| -> anyhow::Result<String> { Ok(Ident::new(raw)?.quoted()) };
    Ok(format!(
        "SELECT {}::bigint AS dept FROM {} WHERE {} = $1",
        quoted(&org.user_dept_column)?,
        quoted(&org.users_table)?,
        quoted(&org.user_id_column)?
    ))
}

#[async_trait]
impl Directory for PgPolicyStore {
    async fn department_of(&self, user_id: UserId) -> anyhow::Result<Option<DeptId>> {
        let sql = department_query(&self.org)?;
        let rec = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match rec {
            Some(r) => r.try_get::<Option<i64>, _>("dept")?,
            None => None,
        })
    }
}
