//! Parameterized predicate expressions.
//!
//! Row-scope predicates are built as a small AST and rendered to SQL with
//! bound parameters. User ids, including the one substituted into
//! administrator-supplied custom conditions, never reach the SQL text.

use rowgate_core::{OrgSchemaConfig, UserId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::PolicyError;

/// Placeholder for the requesting user's id inside a custom condition.
pub const USER_ID_PLACEHOLDER: &str = "${USER_ID}";

// =============================================================================
// IDENTIFIERS AND PARAMETERS
// =============================================================================

/// A column reference, optionally qualified (`table.column`).
///
/// Only ASCII alphanumerics and underscores are accepted in each segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Ident(String);

impl Ident {
    pub fn new(raw: &str) -> Result<Self, PolicyError> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() > 2 || !segments.iter().all(|s| is_plain_identifier(s)) {
            return Err(PolicyError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The unqualified column name.
    pub fn column(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Double-quoted form for SQL.
    pub fn quoted(&self) -> String {
        self.0
            .split('.')
            .map(quote)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `s` is a non-empty run of `[A-Za-z0-9_]`.
pub fn is_plain_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote(segment: &str) -> String {
    format!("\"{}\"", segment.replace('"', "\"\""))
}

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Param {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl Param {
    /// Convert a JSON scalar. Floats, arrays and objects have no parameter form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Param::Null),
            serde_json::Value::Bool(b) => Some(Param::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Param::Int),
            serde_json::Value::String(s) => Some(Param::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Param::Int(n) => serde_json::Value::from(*n),
            Param::Text(s) => serde_json::Value::from(s.as_str()),
            Param::Bool(b) => serde_json::Value::from(*b),
            Param::Null => serde_json::Value::Null,
        }
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Int(n) => write!(f, "{n}"),
            Param::Text(s) => write!(f, "'{s}'"),
            Param::Bool(b) => write!(f, "{b}"),
            Param::Null => f.write_str("NULL"),
        }
    }
}

// =============================================================================
// CUSTOM CONDITIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Sql(String),
    /// Bound as an integer.
    UserId,
    /// A placeholder written inside a string literal; bound as text.
    UserIdText,
}

/// Administrator-supplied condition text, split on [`USER_ID_PLACEHOLDER`].
///
/// The placeholder becomes a bound parameter at render time. Inside a string
/// literal it is bound as text: `'${USER_ID}'` becomes a single parameter and
/// `'u-${USER_ID}'` a concatenation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomCondition {
    source: String,
    segments: Vec<Segment>,
}

impl CustomCondition {
    /// Parse condition text.
    ///
    /// With `check` on, statement separators and comment markers are rejected.
    /// A `$` outside quotes is rejected unless it starts the placeholder,
    /// since it would collide with bound parameters.
    pub fn parse(text: &str, check: bool) -> Result<Self, PolicyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PolicyError::InvalidCondition(
                "custom condition is empty".into(),
            ));
        }
        if check {
            for marker in [";", "--", "/*", "*/"] {
                if text.contains(marker) {
                    return Err(PolicyError::InvalidCondition(format!(
                        "custom condition may not contain '{marker}'"
                    )));
                }
            }
        }

        let mut segments = Vec::new();
        let mut sql = String::new();
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            match c {
                '\'' => {
                    let (content, after) = split_quoted(rest, '\'')?;
                    push_literal(&mut segments, &mut sql, content);
                    rest = after;
                }
                '"' => {
                    let (content, after) = split_quoted(rest, '"')?;
                    sql.push('"');
                    sql.push_str(content);
                    sql.push('"');
                    rest = after;
                }
                '$' => {
                    let Some(after) = rest.strip_prefix(USER_ID_PLACEHOLDER) else {
                        return Err(PolicyError::InvalidCondition(format!(
                            "custom condition may only use {USER_ID_PLACEHOLDER} as a placeholder"
                        )));
                    };
                    flush(&mut segments, &mut sql);
                    segments.push(Segment::UserId);
                    rest = after;
                }
                _ => {
                    sql.push(c);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        flush(&mut segments, &mut sql);

        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    /// The condition text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn references_user(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::UserId | Segment::UserIdText))
    }
}

fn flush(segments: &mut Vec<Segment>, sql: &mut String) {
    if !sql.is_empty() {
        segments.push(Segment::Sql(std::mem::take(sql)));
    }
}

/// Split the quoted token at the start of `text` into its raw content and the
/// text after the closing quote. A doubled quote is an escape and stays in
/// the content.
fn split_quoted(text: &str, quote: char) -> Result<(&str, &str), PolicyError> {
    let body = &text[quote.len_utf8()..];
    let mut from = 0;
    while let Some(i) = body[from..].find(quote) {
        let end = from + i;
        let after = &body[end + quote.len_utf8()..];
        if after.starts_with(quote) {
            from = end + 2 * quote.len_utf8();
            continue;
        }
        return Ok((&body[..end], after));
    }
    Err(PolicyError::InvalidCondition(format!(
        "custom condition has an unterminated {quote} quote"
    )))
}

/// Append a string literal, turning placeholders inside it into text binds.
fn push_literal(segments: &mut Vec<Segment>, sql: &mut String, content: &str) {
    if !content.contains(USER_ID_PLACEHOLDER) {
        sql.push('\'');
        sql.push_str(content);
        sql.push('\'');
        return;
    }
    if content == USER_ID_PLACEHOLDER {
        flush(segments, sql);
        segments.push(Segment::UserIdText);
        return;
    }

    sql.push('(');
    let mut first = true;
    for (i, part) in content.split(USER_ID_PLACEHOLDER).enumerate() {
        if i > 0 {
            if !first {
                sql.push_str(" || ");
            }
            flush(segments, sql);
            segments.push(Segment::UserIdText);
            first = false;
        }
        if !part.is_empty() {
            if !first {
                sql.push_str(" || ");
            }
            sql.push('\'');
            sql.push_str(part);
            sql.push('\'');
            first = false;
        }
    }
    sql.push(')');
}

// =============================================================================
// PREDICATES
// =============================================================================

/// Row-visibility predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// Every row.
    True,
    /// No row.
    False,
    /// `column = value`.
    Eq { column: Ident, value: Param },
    /// `column IN (values)`.
    In { column: Ident, values: Vec<Param> },
    /// `column` equals the department of `user`.
    DeptOfUser { column: Ident, user: UserId },
    /// `column` is the department of `user` or one of its descendants.
    DeptTreeOfUser { column: Ident, user: UserId },
    /// Administrator condition evaluated for `user`.
    Custom {
        condition: CustomCondition,
        user: UserId,
    },
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: Ident, value: impl Into<Param>) -> Self {
        Predicate::Eq {
            column,
            value: value.into(),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Predicate::False)
    }

    /// Disjunction of `predicates`.
    ///
    /// Nested disjunctions are flattened and duplicates dropped. Any `True`
    /// short-circuits to `True`; `False` members are dropped; an empty input
    /// yields `False`.
    pub fn or_all(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
        let mut members = Vec::new();
        for predicate in predicates {
            if collect_disjuncts(predicate, &mut members) {
                return Predicate::True;
            }
        }
        match members.len() {
            0 => Predicate::False,
            1 => members.remove(0),
            _ => Predicate::Or(members),
        }
    }

    /// Conjunction of `predicates`, mirroring [`Predicate::or_all`].
    pub fn and_all(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
        let mut members = Vec::new();
        for predicate in predicates {
            if collect_conjuncts(predicate, &mut members) {
                return Predicate::False;
            }
        }
        match members.len() {
            0 => Predicate::True,
            1 => members.remove(0),
            _ => Predicate::And(members),
        }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::and_all([self, other])
    }

    /// Column names referenced by structured members, without table prefix.
    /// Custom conditions are opaque and contribute nothing.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::In { column, .. }
            | Predicate::DeptOfUser { column, .. }
            | Predicate::DeptTreeOfUser { column, .. } => {
                out.insert(column.column().to_string());
            }
            Predicate::Or(items) | Predicate::And(items) => {
                items.iter().for_each(|p| p.collect_columns(out));
            }
            Predicate::True | Predicate::False | Predicate::Custom { .. } => {}
        }
    }
}

/// Flatten `predicate` into `members`. Returns true on a universal-true member.
fn collect_disjuncts(predicate: Predicate, members: &mut Vec<Predicate>) -> bool {
    match predicate {
        Predicate::True => true,
        Predicate::False => false,
        Predicate::Or(inner) => inner
            .into_iter()
            .any(|p| collect_disjuncts(p, members)),
        other => {
            if !members.contains(&other) {
                members.push(other);
            }
            false
        }
    }
}

/// Flatten `predicate` into `members`. Returns true on a universal-false member.
fn collect_conjuncts(predicate: Predicate, members: &mut Vec<Predicate>) -> bool {
    match predicate {
        Predicate::False => true,
        Predicate::True => false,
        Predicate::And(inner) => inner
            .into_iter()
            .any(|p| collect_conjuncts(p, members)),
        other => {
            if !members.contains(&other) {
                members.push(other);
            }
            false
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::False => f.write_str("FALSE"),
            Predicate::Eq { column, value } => write!(f, "{column} = {value}"),
            Predicate::In { column, values } => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{column} IN ({})", list.join(", "))
            }
            Predicate::DeptOfUser { column, user } => {
                write!(f, "{column} = dept_of(user {user})")
            }
            Predicate::DeptTreeOfUser { column, user } => {
                write!(f, "{column} IN dept_tree_of(user {user})")
            }
            Predicate::Custom { condition, user } => {
                write!(f, "({}) [user {user}]", condition.source())
            }
            Predicate::Or(items) => write_joined(f, items, " OR "),
            Predicate::And(items) => write_joined(f, items, " AND "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Predicate], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "({item})")?;
    }
    Ok(())
}

// =============================================================================
// SQL RENDERING
// =============================================================================

/// SQL text with its bound parameters, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Renders predicates to Postgres SQL with `$n` placeholders.
#[derive(Debug, Clone, Default)]
pub struct SqlRenderer {
    org: OrgSchemaConfig,
}

impl SqlRenderer {
    pub fn new(org: OrgSchemaConfig) -> Self {
        Self { org }
    }

    pub fn org(&self) -> &OrgSchemaConfig {
        &self.org
    }

    /// Render `predicate`. Placeholders are numbered from `offset + 1` so the
    /// fragment can follow parameters the caller already bound.
    pub fn render(&self, predicate: &Predicate, offset: usize) -> RenderedSql {
        let mut out = RenderedSql::default();
        self.write(predicate, offset, &mut out);
        out
    }

    fn write(&self, predicate: &Predicate, offset: usize, out: &mut RenderedSql) {
        match predicate {
            Predicate::True => out.sql.push_str("TRUE"),
            Predicate::False => out.sql.push_str("FALSE"),
            Predicate::Eq {
                column,
                value: Param::Null,
            } => {
                out.sql.push_str(&format!("{} IS NULL", column.quoted()));
            }
            Predicate::Eq { column, value } => {
                let ph = bind(out, offset, value.clone());
                out.sql.push_str(&format!("{} = {}", column.quoted(), ph));
            }
            Predicate::In { values, .. } if values.is_empty() => out.sql.push_str("FALSE"),
            Predicate::In { column, values } => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| bind(out, offset, v.clone()))
                    .collect();
                out.sql.push_str(&format!(
                    "{} IN ({})",
                    column.quoted(),
                    placeholders.join(", ")
                ));
            }
            Predicate::DeptOfUser { column, user } => {
                let ph = bind(out, offset, Param::Int(*user));
                out.sql.push_str(&format!(
                    "{} = ({})",
                    column.quoted(),
                    self.user_dept_subquery(&ph)
                ));
            }
            Predicate::DeptTreeOfUser { column, user } => {
                let ph = bind(out, offset, Param::Int(*user));
                let org = &self.org;
                let id = quote(&org.dept_id_column);
                let dept = quote(&org.dept_table);
                let parent = quote(&org.dept_parent_column);
                out.sql.push_str(&format!(
                    "{col} IN (WITH RECURSIVE dept_tree AS (\
                     SELECT {id} FROM {dept} WHERE {id} = ({sub}) \
                     UNION ALL \
                     SELECT d.{id} FROM {dept} d JOIN dept_tree ON d.{parent} = dept_tree.{id}\
                     ) SELECT {id} FROM dept_tree)",
                    col = column.quoted(),
                    sub = self.user_dept_subquery(&ph),
                ));
            }
            Predicate::Custom { condition, user } => {
                out.sql.push('(');
                for segment in &condition.segments {
                    match segment {
                        Segment::Sql(sql) => out.sql.push_str(sql),
                        Segment::UserId => {
                            let ph = bind(out, offset, Param::Int(*user));
                            out.sql.push_str(&ph);
                        }
                        Segment::UserIdText => {
                            let ph = bind(out, offset, Param::Text(user.to_string()));
                            out.sql.push_str(&ph);
                        }
                    }
                }
                out.sql.push(')');
            }
            Predicate::Or(items) => self.write_joined(items, " OR ", "FALSE", offset, out),
            Predicate::And(items) => self.write_joined(items, " AND ", "TRUE", offset, out),
        }
    }

    fn write_joined(
        &self,
        items: &[Predicate],
        sep: &str,
        empty: &str,
        offset: usize,
        out: &mut RenderedSql,
    ) {
        if items.is_empty() {
            out.sql.push_str(empty);
            return;
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(sep);
            }
            out.sql.push('(');
            self.write(item, offset, out);
            out.sql.push(')');
        }
    }

    fn user_dept_subquery(&self, placeholder: &str) -> String {
        let org = &self.org;
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            quote(&org.user_dept_column),
            quote(&org.users_table),
            quote(&org.user_id_column),
            placeholder
        )
    }
}

fn bind(out: &mut RenderedSql, offset: usize, param: Param) -> String {
    out.params.push(param);
    format!("${}", offset + out.params.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ident(s: &str) -> Ident {
        Ident::new(s).unwrap()
    }

    #[test]
    fn test_ident_rejects_injection() {
        assert!(Ident::new("created_by").is_ok());
        assert!(Ident::new("t.created_by").is_ok());
        assert!(Ident::new("created_by; drop table x").is_err());
        assert!(Ident::new("a.b.c").is_err());
        assert!(Ident::new("").is_err());
        assert_eq!(ident("t.created_by").column(), "created_by");
        assert_eq!(ident("t.created_by").quoted(), "\"t\".\"created_by\"");
    }

    #[test]
    fn test_or_all_deduplicates() {
        let a = Predicate::eq(ident("created_by"), 7);
        let merged = Predicate::or_all([a.clone(), a.clone()]);
        assert_eq!(merged, a);
    }

    #[test]
    fn test_or_all_true_short_circuits() {
        let a = Predicate::eq(ident("created_by"), 7);
        assert_eq!(Predicate::or_all([a, Predicate::True]), Predicate::True);
    }

    #[test]
    fn test_or_all_drops_false_and_empty_is_false() {
        let a = Predicate::eq(ident("created_by"), 7);
        assert_eq!(Predicate::or_all([Predicate::False, a.clone()]), a);
        assert_eq!(Predicate::or_all(Vec::new()), Predicate::False);
    }

    #[test]
    fn test_or_all_flattens_nested() {
        let a = Predicate::eq(ident("a"), 1);
        let b = Predicate::eq(ident("b"), 2);
        let nested = Predicate::Or(vec![a.clone(), b.clone()]);
        assert_eq!(
            Predicate::or_all([nested, a.clone()]),
            Predicate::Or(vec![a, b])
        );
    }

    #[test]
    fn test_and_all_identity_and_absorbing() {
        let a = Predicate::eq(ident("a"), 1);
        assert_eq!(Predicate::and_all([Predicate::True, a.clone()]), a.clone());
        assert_eq!(a.and(Predicate::False), Predicate::False);
    }

    #[test]
    fn test_custom_condition_placeholder_becomes_parameter() {
        let cond = CustomCondition::parse("owner_id = ${USER_ID} OR public = true", true).unwrap();
        assert!(cond.references_user());
        assert_eq!(cond.source(), "owner_id = ${USER_ID} OR public = true");

        let rendered = SqlRenderer::default().render(
            &Predicate::Custom {
                condition: cond,
                user: 9,
            },
            2,
        );
        assert_eq!(rendered.sql, "(owner_id = $3 OR public = true)");
        assert_eq!(rendered.params, vec![Param::Int(9)]);
    }

    #[test]
    fn test_custom_condition_check() {
        assert!(CustomCondition::parse("a = 1; drop table users", true).is_err());
        assert!(CustomCondition::parse("a = 1 -- x", true).is_err());
        assert!(CustomCondition::parse("a = 1 /* x */", true).is_err());
        assert!(CustomCondition::parse("a = 1 -- x", false).is_ok());
        assert!(CustomCondition::parse("   ", false).is_err());
        assert!(CustomCondition::parse("a = $1", false).is_err());
        assert!(CustomCondition::parse("a = 'open", false).is_err());
    }

    #[test]
    fn test_custom_condition_dollar_inside_literal() {
        let cond = CustomCondition::parse("code = 'A$1' AND tag = 'it''s'", true).unwrap();
        assert!(!cond.references_user());
        let rendered = SqlRenderer::default().render(
            &Predicate::Custom {
                condition: cond,
                user: 9,
            },
            0,
        );
        assert_eq!(rendered.sql, "(code = 'A$1' AND tag = 'it''s')");
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn test_custom_condition_quoted_placeholder_binds_text() {
        let render = |text: &str| {
            let condition = CustomCondition::parse(text, true).unwrap();
            SqlRenderer::default().render(&Predicate::Custom { condition, user: 9 }, 0)
        };

        let rendered = render("owner = '${USER_ID}'");
        assert_eq!(rendered.sql, "(owner = $1)");
        assert_eq!(rendered.params, vec![Param::Text("9".into())]);

        let rendered = render("login = 'u-${USER_ID}' OR id = ${USER_ID}");
        assert_eq!(rendered.sql, "(login = ('u-' || $1) OR id = $2)");
        assert_eq!(
            rendered.params,
            vec![Param::Text("9".into()), Param::Int(9)]
        );
    }

    #[test]
    fn test_render_or_with_offset() {
        let pred = Predicate::Or(vec![
            Predicate::eq(ident("created_by"), 2),
            Predicate::DeptOfUser {
                column: ident("dept_id"),
                user: 2,
            },
        ]);
        let rendered = SqlRenderer::default().render(&pred, 1);
        assert_eq!(
            rendered.sql,
            "(\"created_by\" = $2) OR (\"dept_id\" = (SELECT \"dept_id\" FROM \"sys_users\" WHERE \"id\" = $3))"
        );
        assert_eq!(rendered.params, vec![Param::Int(2), Param::Int(2)]);
    }

    #[test]
    fn test_render_dept_tree_uses_recursive_closure() {
        let pred = Predicate::DeptTreeOfUser {
            column: ident("dept_id"),
            user: 4,
        };
        let rendered = SqlRenderer::default().render(&pred, 0);
        assert!(rendered.sql.starts_with("\"dept_id\" IN (WITH RECURSIVE dept_tree AS ("));
        assert!(rendered.sql.contains("JOIN dept_tree ON d.\"parent_id\" = dept_tree.\"id\""));
        assert!(rendered.sql.contains("WHERE \"id\" = $1"));
        assert_eq!(rendered.params, vec![Param::Int(4)]);
    }

    #[test]
    fn test_render_constants() {
        let renderer = SqlRenderer::default();
        assert_eq!(renderer.render(&Predicate::True, 0).sql, "TRUE");
        assert_eq!(renderer.render(&Predicate::False, 0).sql, "FALSE");
        assert_eq!(
            renderer
                .render(
                    &Predicate::In {
                        column: ident("id"),
                        values: vec![]
                    },
                    0
                )
                .sql,
            "FALSE"
        );
    }

    #[test]
    fn test_columns_skip_custom_conditions() {
        let custom = CustomCondition::parse("owner_id = ${USER_ID}", true).unwrap();
        let predicate = Predicate::or_all([
            Predicate::eq(ident("t.created_by"), 1),
            Predicate::DeptOfUser {
                column: ident("dept_id"),
                user: 1,
            },
            Predicate::Custom {
                condition: custom,
                user: 1,
            },
        ]);
        let columns: Vec<String> = predicate.columns().into_iter().collect();
        assert_eq!(columns, vec!["created_by".to_string(), "dept_id".to_string()]);
    }
}
