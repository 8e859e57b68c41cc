// Configuration types shared across all Rowgate crates
pub mod config;

// Persisted policy records and the request principal
pub mod model;
pub mod principal;

pub use config::{
    CacheConfig, ConfigError, DatabaseConfig, LogConfig, MisconfigurationMode, OrgSchemaConfig,
    RowgateConfig, ServerConfig,
};
pub use model::{
    ControlledTable, DEFAULT_PRIORITY, DataPermissionConfig, DataScope, DeptId, FieldAxis,
    FieldFlags, FieldPermissionItem, NewControlledTable, PolicyStatistics, RoleDataPermission,
    RoleFieldPermission, RoleId, TableId, UserId,
};
pub use principal::Principal;
