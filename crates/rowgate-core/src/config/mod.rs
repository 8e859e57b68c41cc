//! Configuration types for Rowgate.
//!
//! A single YAML file (`rowgate.yaml`) carries the interceptor switches, the
//! policy cache, the organization schema used by department scopes, the
//! database connection, the HTTP server, and logging. Every section is
//! optional; an empty document yields the defaults.

pub mod cache;
pub mod database;
pub mod org;

use serde::{Deserialize, Serialize};
use std::fs;

use crate::model::RoleId;
use std::path::Path;

pub use cache::CacheConfig;
pub use database::DatabaseConfig;
pub use org::OrgSchemaConfig;

/// Complete Rowgate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowgateConfig {
    /// Master switch. When false the interceptor rewrites nothing.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// When false, field rules are neither resolved nor applied.
    #[serde(default = "default_true")]
    pub field_permission_enabled: bool,

    /// What a misconfigured role rule contributes to the merged predicate.
    #[serde(default)]
    pub on_misconfiguration: MisconfigurationMode,

    /// Reject reads whose filter references a non-queryable column instead of
    /// only logging them.
    #[serde(default)]
    pub enforce_queryable: bool,

    /// Reject custom conditions carrying statement separators or comments.
    #[serde(default = "default_true")]
    pub custom_condition_check: bool,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub org: OrgSchemaConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Default for RowgateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            field_permission_enabled: true,
            on_misconfiguration: MisconfigurationMode::default(),
            enforce_queryable: false,
            custom_condition_check: true,
            cache: CacheConfig::default(),
            org: OrgSchemaConfig::default(),
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Handling of a role rule that cannot produce a predicate (unknown scope,
/// missing owner column, rejected custom condition).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisconfigurationMode {
    /// The role contributes no rows.
    #[default]
    Deny,
    /// The role contributes every row. Logged as a warning on each use.
    Allow,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Roles allowed on the `/admin` routes. Empty locks them for everyone.
    #[serde(default)]
    pub admin_role_ids: Vec<RoleId>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_role_ids: Vec::new(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit each injected predicate (SQL text and parameter count).
    #[serde(default)]
    pub log_predicates: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_predicates: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RowgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the interceptor behave unpredictably.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Config(
                "cache.max_entries must be greater than zero when the cache is enabled".into(),
            ));
        }
        let org = &self.org;
        for (key, value) in [
            ("org.users_table", &org.users_table),
            ("org.user_id_column", &org.user_id_column),
            ("org.user_dept_column", &org.user_dept_column),
            ("org.dept_table", &org.dept_table),
            ("org.dept_id_column", &org.dept_id_column),
            ("org.dept_parent_column", &org.dept_parent_column),
        ] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ConfigError::Config(format!(
                    "{key} must be a plain identifier, got '{value}'"
                )));
            }
        }
        Ok(())
    }
}
