//! Prompt construction for SQL generation.

use common::models::Dialect;

/// Stands in for the schema when a data source has none cached.
pub const NO_SCHEMA_PLACEHOLDER: &str = "-- No schema available";

/// Engine name as shown to the model, with date-math guidance where the
/// engine lacks `INTERVAL` arithmetic.
pub fn dialect_label(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => "MySQL",
        Dialect::PostgreSql => "PostgreSQL",
        Dialect::Embedded => {
            "SQLite (use date(), datetime() and julianday() for date math, not INTERVAL)"
        }
    }
}

/// System instruction: dialect constraints, schema, read-only rules and the
/// required `{"sql": ...}` answer shape.
pub fn build_system_prompt(dialect: Dialect, schema_ddl: Option<&str>) -> String {
    let label = dialect_label(dialect);
    let schema = schema_ddl
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(NO_SCHEMA_PLACEHOLDER);

    format!(
        r#"You are a SQL expert. The target database is **{label}**.
You MUST generate SQL that is fully compatible with {label} syntax only.
Do NOT use syntax from other databases (e.g., no PostgreSQL INTERVAL syntax for SQLite/MySQL, no MySQL backticks for PostgreSQL).

Here is the database schema:
{schema}

Rules:
1. Generate a single executable SQL query for the user's question.
2. Do NOT allow destructive actions (no DELETE, UPDATE, INSERT, DROP, ALTER, TRUNCATE).
3. Only generate SELECT statements.
4. Use ONLY functions and syntax supported by {label}.

Output ONLY a JSON object in this exact format, with no additional text:
{{"sql": "YOUR_SQL_QUERY_HERE"}}
"#
    )
}

pub fn build_user_prompt(question: &str) -> String {
    format!("Question: {question}")
}
