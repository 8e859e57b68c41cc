//! Rowgate policy layer.
//!
//! Resolves which rules apply to a principal on a table and turns them into a
//! row predicate plus merged field rules:
//!
//! - [`store`]: policy persistence traits and the in-memory store
//! - [`resolver`]: table + role -> stored rules, `self` fallback
//! - [`generator`]: data-scope rule -> [`Predicate`]
//! - [`merger`]: least-restrictive multi-role merge
//! - [`engine`]: the full pipeline, preview, create checks
//! - [`admin`]: configuration writes with cache invalidation

pub mod admin;
pub mod cache;
pub mod directory;
pub mod engine;
pub mod error;
pub mod expr;
pub mod generator;
pub mod merger;
pub mod resolver;
pub mod store;

pub use admin::PolicyAdmin;
pub use cache::{PolicyCache, RoleRules};
pub use directory::{Directory, MemoryDirectory};
pub use engine::{CreateDecision, EffectivePolicy, PolicyEngine, PolicyPreview};
pub use error::PolicyError;
pub use expr::{CustomCondition, Ident, Param, Predicate, RenderedSql, SqlRenderer};
pub use generator::PredicateGenerator;
pub use merger::{FieldPolicy, merge_field_rules, merge_predicates};
pub use resolver::{
    ControlledPolicy, DataScopeRule, FieldRuleMap, PolicyResolver, Resolution, RuleOrigin,
};
pub use store::{MemoryPolicyStore, PolicyAdminStore, PolicyStore};
