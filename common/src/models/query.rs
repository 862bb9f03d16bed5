//! Natural-language query models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::connection::DataSourceId;

/// One result row: column name to value, in column order.
pub type ResultRow = serde_json::Map<String, serde_json::Value>;

/// Request body for asking a question against a data source.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AskRequest {
    /// ID of the data source to query.
    #[validate(range(min = 1, message = "Connection ID is required"))]
    pub connection_id: DataSourceId,

    /// Question in natural language.
    #[validate(length(min = 1, max = 2000, message = "Question must be 1-2000 characters"))]
    pub question: String,
}

/// Outcome of the safety check applied to a statement before execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub enum SafetyCheck {
    #[serde(rename = "PASSED")]
    Passed,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryOutcome {
    /// The statement that was actually executed.
    pub sql: String,

    /// Returned rows.
    #[schema(value_type = Vec<Object>)]
    pub result: Vec<ResultRow>,

    pub safety_check: SafetyCheck,
}

impl QueryOutcome {
    /// Builds the outcome for a statement that passed the sanitizer.
    pub fn passed(sql: String, result: Vec<ResultRow>) -> Self {
        Self {
            sql,
            result,
            safety_check: SafetyCheck::Passed,
        }
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.result.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serializes_status_and_column_order() {
        let mut row = ResultRow::new();
        row.insert("zeta".into(), json!(1));
        row.insert("alpha".into(), json!("a"));
        let outcome = QueryOutcome::passed("SELECT 1 LIMIT 100".into(), vec![row]);

        let text = serde_json::to_string(&outcome).unwrap();
        assert!(text.contains("\"safety_check\":\"PASSED\""));
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert_eq!(outcome.row_count(), 1);
    }
}
