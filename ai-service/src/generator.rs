//! SQL generation.
//!
//! Turns a natural-language question into candidate SQL for one data source.
//! The candidate is untrusted: it must go through the sanitizer before it is
//! executed.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use common::errors::{AppError, AppResult};
use common::models::DataSourceDescriptor;

use crate::client::{CompletionClient, CompletionRequest};
use crate::prompt::{build_system_prompt, build_user_prompt};

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[a-zA-Z]*\n?").expect("valid fence regex"));
static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n?```$").expect("valid fence regex"));

pub struct SqlGenerator {
    client: Arc<dyn CompletionClient>,
}

impl SqlGenerator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Asks the model for a query answering `question` against `descriptor`.
    ///
    /// One round trip, never retried. Transport failures and unusable
    /// responses are both `Generation` errors.
    pub async fn generate(
        &self,
        question: &str,
        descriptor: &DataSourceDescriptor,
    ) -> AppResult<String> {
        let request = CompletionRequest {
            system_instruction: build_system_prompt(
                descriptor.dialect,
                descriptor.schema_ddl.as_deref(),
            ),
            user_text: build_user_prompt(question),
        };
        tracing::debug!(system_prompt = %request.system_instruction, "Prompt built");

        let started = Instant::now();
        let response = self.client.complete(request).await.map_err(|e| {
            tracing::error!(connection_id = descriptor.id, error = %e, "Completion call failed");
            AppError::Generation(format!(
                "could not generate SQL, please try rephrasing the question ({e})"
            ))
        })?;
        tracing::debug!(
            connection_id = descriptor.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            response = %response,
            "Completion received"
        );

        let sql = extract_sql_from_response(&response)?;
        tracing::debug!(connection_id = descriptor.id, candidate_sql = %sql, "Candidate SQL extracted");
        Ok(sql)
    }
}

/// Pulls the SQL out of a model response.
///
/// Accepts `{"sql": "..."}`, optionally wrapped in a code fence. When the text
/// is not such an object, it is taken as-is only if it starts with `SELECT`.
pub fn extract_sql_from_response(response: &str) -> AppResult<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(AppError::Generation("model returned an empty response".into()));
    }

    let cleaned = if trimmed.starts_with("```") {
        let opened = FENCE_OPEN.replace(trimmed, "");
        FENCE_CLOSE.replace(&opened, "").trim().to_string()
    } else {
        trimmed.to_string()
    };

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => {
            if let Some(sql) = value
                .get("sql")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
            {
                return Ok(sql.to_string());
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Model response is not JSON, trying raw extraction");
        }
    }

    let starts_with_select = cleaned
        .trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("SELECT"));
    if starts_with_select {
        return Ok(cleaned);
    }

    Err(AppError::Generation(
        "could not extract SQL from the model response, please try rephrasing the question".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::client::CompletionError;
    use common::models::Dialect;

    #[test]
    fn test_plain_json() {
        assert_eq!(
            extract_sql_from_response(r#"{"sql":"SELECT * FROM users"}"#).unwrap(),
            "SELECT * FROM users"
        );
    }

    #[test]
    fn test_fenced_json() {
        let response = "```sql\n{\"sql\":\"SELECT 1\"}\n```";
        assert_eq!(extract_sql_from_response(response).unwrap(), "SELECT 1");

        let bare_fence = "```\n{\"sql\": \"SELECT 2\"}\n```";
        assert_eq!(extract_sql_from_response(bare_fence).unwrap(), "SELECT 2");
    }

    #[test]
    fn test_raw_select_fallback() {
        assert_eq!(
            extract_sql_from_response("  select name from users  ").unwrap(),
            "select name from users"
        );
        assert_eq!(
            extract_sql_from_response("```sql\nSELECT 3\n```").unwrap(),
            "SELECT 3"
        );
    }

    #[test]
    fn test_unusable_responses() {
        for response in [
            "",
            "   \n ",
            "I cannot help with that.",
            r#"{"sql": "   "}"#,
            r#"{"query": "SELECT 1"}"#,
            "DROP TABLE users",
        ] {
            assert!(
                matches!(extract_sql_from_response(response), Err(AppError::Generation(_))),
                "{response:?}"
            );
        }
    }

    #[test]
    fn test_error_does_not_echo_response() {
        let err = extract_sql_from_response("DELETE FROM secrets").unwrap_err();
        assert!(!err.to_string().contains("secrets"));
    }

    struct Recording {
        reply: Result<String, ()>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionClient for Recording {
        async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone().map_err(|_| CompletionError::EmptyChoices)
        }
    }

    fn descriptor() -> DataSourceDescriptor {
        DataSourceDescriptor {
            id: 5,
            name: "shop".into(),
            dialect: Dialect::MySql,
            url: "mysql://db:3306/shop".into(),
            username: "reader".into(),
            encrypted_password: String::new(),
            schema_ddl: Some("CREATE TABLE users (\n  id int\n);".into()),
        }
    }

    #[tokio::test]
    async fn test_generate_sends_prompt_and_extracts_sql() {
        let client = Arc::new(Recording {
            reply: Ok(r#"{"sql":"SELECT * FROM users"}"#.into()),
            seen: Mutex::new(Vec::new()),
        });
        let generator = SqlGenerator::new(client.clone());

        let sql = generator.generate("Show me all users", &descriptor()).await.unwrap();
        assert_eq!(sql, "SELECT * FROM users");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].user_text, "Question: Show me all users");
        assert!(seen[0].system_instruction.contains("**MySQL**"));
        assert!(seen[0].system_instruction.contains("CREATE TABLE users"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_generation_error() {
        let generator = SqlGenerator::new(Arc::new(Recording {
            reply: Err(()),
            seen: Mutex::new(Vec::new()),
        }));
        let err = generator.generate("anything", &descriptor()).await.unwrap_err();
        assert!(matches!(err, AppError::Generation(_)));
    }
}
