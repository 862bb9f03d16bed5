//! SQL safety sanitizer.
//!
//! Every statement produced by the model passes through [`SqlSanitizer::sanitize`]
//! before it reaches a pool. The sanitizer strips comments, parses the text,
//! accepts exactly one read-only query and caps the row count.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{
    Dialect as SqlDialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

use crate::errors::{AppError, AppResult};
use crate::models::Dialect;

/// Row cap appended to queries that carry no `LIMIT` of their own.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

static BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment regex"));
static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("valid line comment regex"));
static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").expect("valid limit regex"));

/// Statement classification used by the safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Delete,
    Update,
    Insert,
    Drop,
    Truncate,
    Alter,
    Grant,
    Execute,
    Create,
    /// Anything else, labelled by its leading keyword.
    Other(String),
}

impl StatementKind {
    pub fn is_read_only(&self) -> bool {
        matches!(self, StatementKind::Select)
    }

    pub fn label(&self) -> &str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Delete => "DELETE",
            StatementKind::Update => "UPDATE",
            StatementKind::Insert => "INSERT",
            StatementKind::Drop => "DROP",
            StatementKind::Truncate => "TRUNCATE",
            StatementKind::Alter => "ALTER",
            StatementKind::Grant => "GRANT",
            StatementKind::Execute => "EXECUTE",
            StatementKind::Create => "CREATE",
            StatementKind::Other(keyword) => keyword,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validates and rewrites candidate SQL.
///
/// Stateless apart from the parsing dialect; safe to share across tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlSanitizer {
    dialect: Option<Dialect>,
}

impl SqlSanitizer {
    /// Sanitizer using the generic grammar.
    pub fn new() -> Self {
        Self { dialect: None }
    }

    /// Sanitizer that parses with the grammar of `dialect`.
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect: Some(dialect),
        }
    }

    /// Returns the statement to execute, or `UnsafeSql` naming why it was
    /// refused. The candidate text is never echoed in the error.
    pub fn sanitize(&self, raw_sql: &str) -> AppResult<String> {
        if raw_sql.trim().is_empty() {
            return Err(AppError::UnsafeSql("SQL statement is empty".into()));
        }

        let stripped = strip_comments(raw_sql);
        let stripped = stripped.trim();
        if stripped.is_empty() {
            return Err(AppError::UnsafeSql(
                "SQL statement is empty after removing comments".into(),
            ));
        }

        let kind = self.classify(stripped)?;
        if !kind.is_read_only() {
            tracing::warn!(kind = %kind, "Rejected non-read statement");
            return Err(AppError::UnsafeSql(format!(
                "only SELECT statements are allowed, got {kind}"
            )));
        }

        Ok(ensure_limit(stripped))
    }

    /// Parses comment-free text and classifies its single statement.
    pub fn classify(&self, sql: &str) -> AppResult<StatementKind> {
        let grammar = self.grammar();
        let statements = Parser::parse_sql(grammar.as_ref(), sql).map_err(|e| {
            tracing::debug!(error = %e, "SQL parse failed");
            AppError::UnsafeSql("SQL statement could not be parsed".into())
        })?;

        match statements.as_slice() {
            [statement] => Ok(classify_statement(statement, sql)),
            [] => Err(AppError::UnsafeSql("no SQL statement found".into())),
            _ => Err(AppError::UnsafeSql(format!(
                "multiple statements are not allowed ({} found)",
                statements.len()
            ))),
        }
    }

    fn grammar(&self) -> Box<dyn SqlDialect> {
        match self.dialect {
            Some(Dialect::MySql) => Box::new(MySqlDialect {}),
            Some(Dialect::PostgreSql) => Box::new(PostgreSqlDialect {}),
            Some(Dialect::Embedded) => Box::new(SQLiteDialect {}),
            None => Box::new(GenericDialect {}),
        }
    }
}

/// Removes `/* ... */` blocks (across lines) and then `-- ...` line comments.
///
/// Purely textual: a comment marker inside a string literal is removed as well.
pub fn strip_comments(sql: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(sql, " ");
    LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

/// Appends `LIMIT 100` unless a `LIMIT <n>` clause is already present.
/// An existing limit is never tightened.
pub fn ensure_limit(sql: &str) -> String {
    if LIMIT_CLAUSE.is_match(sql) {
        return sql.to_string();
    }
    let trimmed = sql.trim_end();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    format!("{trimmed} LIMIT {DEFAULT_ROW_LIMIT}")
}

fn classify_statement(statement: &Statement, sql: &str) -> StatementKind {
    match statement {
        Statement::Query(query) => classify_query(query, sql),
        Statement::Insert { .. } => StatementKind::Insert,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete { .. } => StatementKind::Delete,
        Statement::Drop { .. } => StatementKind::Drop,
        Statement::Truncate { .. } => StatementKind::Truncate,
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. } => StatementKind::Alter,
        Statement::Grant { .. } | Statement::Revoke { .. } => StatementKind::Grant,
        Statement::Execute { .. } => StatementKind::Execute,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. } => StatementKind::Create,
        _ => StatementKind::Other(leading_keyword(sql)),
    }
}

/// A query is read-only only if every part of it is: CTE bodies, set
/// operation branches and nested queries included.
fn classify_query(query: &Query, sql: &str) -> StatementKind {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let kind = classify_query(&cte.query, sql);
            if !kind.is_read_only() {
                return kind;
            }
        }
    }
    classify_set_expr(&query.body, sql)
}

fn classify_set_expr(body: &SetExpr, sql: &str) -> StatementKind {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                // SELECT ... INTO creates a table
                StatementKind::Create
            } else {
                StatementKind::Select
            }
        }
        SetExpr::Query(query) => classify_query(query, sql),
        SetExpr::SetOperation { left, right, .. } => {
            let left = classify_set_expr(left, sql);
            if !left.is_read_only() {
                return left;
            }
            classify_set_expr(right, sql)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => StatementKind::Select,
        SetExpr::Insert(statement) | SetExpr::Update(statement) | SetExpr::Delete(statement) => {
            classify_statement(statement, sql)
        }
        _ => StatementKind::Other(leading_keyword(sql)),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .to_uppercase()
        })
        .filter(|word| !word.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sanitize(sql: &str) -> AppResult<String> {
        SqlSanitizer::new().sanitize(sql)
    }

    fn rejected_message(sql: &str) -> String {
        match sanitize(sql) {
            Err(AppError::UnsafeSql(message)) => message,
            other => panic!("expected UnsafeSql for {sql:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_select_gets_default_limit() {
        assert_eq!(
            sanitize("SELECT * FROM users").unwrap(),
            "SELECT * FROM users LIMIT 100"
        );
    }

    #[test]
    fn test_existing_limit_is_untouched() {
        let sql = "SELECT id FROM orders ORDER BY id DESC LIMIT 5";
        assert_eq!(sanitize(sql).unwrap(), sql);
        assert_eq!(sanitize("select 1 limit 1000").unwrap(), "select 1 limit 1000");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let once = sanitize("SELECT name FROM users;").unwrap();
        assert_eq!(once, "SELECT name FROM users LIMIT 100");
        assert_eq!(sanitize(&once).unwrap(), once);
    }

    #[test]
    fn test_write_statements_are_rejected_by_kind() {
        let cases = [
            ("DELETE FROM users WHERE id = 1", "DELETE"),
            ("UPDATE users SET name = 'x'", "UPDATE"),
            ("INSERT INTO users (id) VALUES (1)", "INSERT"),
            ("DROP TABLE users", "DROP"),
            ("TRUNCATE TABLE users", "TRUNCATE"),
            ("ALTER TABLE users ADD COLUMN age INT", "ALTER"),
            ("GRANT SELECT ON users TO bob", "GRANT"),
            ("CREATE TABLE t (id INT)", "CREATE"),
            ("EXECUTE my_procedure", "EXECUTE"),
        ];
        for (sql, kind) in cases {
            let message = rejected_message(sql);
            assert!(message.contains(kind), "{sql}: {message}");
        }
    }

    #[test]
    fn test_comment_cannot_hide_keyword() {
        let message = rejected_message("DROP /* x */ TABLE t");
        assert!(message.contains("DROP"));

        let multi_line = "/* SELECT\n harmless */ DELETE FROM users";
        assert!(rejected_message(multi_line).contains("DELETE"));
    }

    #[test]
    fn test_comments_are_removed_from_output() {
        let sql = "SELECT id -- trailing note\nFROM users /* all */";
        let out = sanitize(sql).unwrap();
        assert!(!out.contains("--"));
        assert!(!out.contains("/*"));
        assert!(out.ends_with("LIMIT 100"));
    }

    #[test]
    fn test_blank_and_comment_only_input() {
        assert!(rejected_message("   ").contains("empty"));
        assert!(rejected_message("-- nothing here").contains("empty"));
        assert!(rejected_message("/* */").contains("empty"));
    }

    #[test]
    fn test_multiple_statements_are_rejected() {
        let message = rejected_message("SELECT 1; DROP TABLE users");
        assert!(message.contains("multiple"));
        assert!(sanitize("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn test_unparsable_sql_is_a_safety_error() {
        let message = rejected_message("SELEC * FORM users");
        assert!(!message.contains("FORM"));
    }

    #[test]
    fn test_cte_and_set_operations() {
        assert!(sanitize("WITH t AS (SELECT 1 AS a) SELECT a FROM t").is_ok());
        assert!(sanitize("SELECT 1 UNION ALL SELECT 2").is_ok());
        let message = rejected_message("SELECT 1 INTO new_table FROM users");
        assert!(message.contains("CREATE"));
    }

    #[test]
    fn test_data_modifying_cte_is_rejected_by_kind() {
        let pg = SqlSanitizer::for_dialect(Dialect::PostgreSql);
        let cases = [
            ("WITH d AS (DELETE FROM users RETURNING *) SELECT * FROM d", "DELETE"),
            (
                "WITH i AS (INSERT INTO users (id) VALUES (1) RETURNING id) SELECT * FROM i",
                "INSERT",
            ),
        ];
        for (sql, kind) in cases {
            match pg.sanitize(sql) {
                Err(AppError::UnsafeSql(message)) => assert!(message.contains(kind), "{sql}: {message}"),
                other => panic!("expected UnsafeSql for {sql:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_dialect_specific_grammar() {
        let pg = SqlSanitizer::for_dialect(Dialect::PostgreSql);
        assert!(pg.sanitize("SELECT now()::date").is_ok());

        let mysql = SqlSanitizer::for_dialect(Dialect::MySql);
        assert_eq!(
            mysql.sanitize("SELECT `name` FROM `users`").unwrap(),
            "SELECT `name` FROM `users` LIMIT 100"
        );

        let embedded = SqlSanitizer::for_dialect(Dialect::Embedded);
        assert!(embedded.sanitize("PRAGMA table_info(users)").is_err());
    }

    #[test]
    fn test_ensure_limit_strips_one_terminator() {
        assert_eq!(ensure_limit("SELECT 1 ;  "), "SELECT 1 LIMIT 100");
        assert_eq!(ensure_limit("SELECT 1"), "SELECT 1 LIMIT 100");
        assert_eq!(ensure_limit("SELECT 1 LIMIT 3"), "SELECT 1 LIMIT 3");
        // Only one terminator is stripped; the driver rejects what remains.
        assert_eq!(ensure_limit("SELECT 1;;"), "SELECT 1; LIMIT 100");
    }

    #[test]
    fn test_statement_kind_labels() {
        assert!(StatementKind::Select.is_read_only());
        assert!(!StatementKind::Other("SHOW".into()).is_read_only());
        assert_eq!(StatementKind::Other("SHOW".into()).to_string(), "SHOW");
        assert_eq!(leading_keyword("  pragma foo"), "PRAGMA");
    }
}
