//! Parsing of completion-service answers
//!
//! Generation and validation prompts ask for JSON objects, but answers may
//! arrive fenced, wrapped in prose, or not as JSON at all.

use crate::error::{ChatError, Result};
use crate::sql_text::{clean_sql, recover_sql};
use serde::{Deserialize, Serialize};

/// A candidate query produced by the completion service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedQuery {
    pub sql: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub tables_used: Vec<String>,
    #[serde(default)]
    pub expected_result_type: Option<String>,
}

impl GeneratedQuery {
    /// Parse a generation or correction answer. A JSON object must carry a
    /// non-empty `sql` string; other text falls back to SQL found in it.
    /// Anything without recognisable SQL is a generation failure.
    pub fn parse(response: &str) -> Result<Self> {
        if let Some(object) = json_object(response) {
            return Self::from_object(&object).ok_or_else(|| {
                ChatError::Generation(format!(
                    "Completion service returned no usable SQL in its JSON answer: {}",
                    preview(response)
                ))
            });
        }

        match recover_sql(response) {
            Some(sql) => Ok(GeneratedQuery {
                sql,
                ..Default::default()
            }),
            None => Err(ChatError::Generation(format!(
                "Completion service returned no usable SQL: {}",
                preview(response)
            ))),
        }
    }

    /// Read fields one at a time so a loosely typed optional field does not
    /// discard the SQL.
    fn from_object(object: &serde_json::Value) -> Option<Self> {
        let sql = clean_sql(object.get("sql")?.as_str()?);
        if sql.is_empty() {
            return None;
        }

        let tables_used = match object.get("tables_used") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str())
                .map(str::to_string)
                .collect(),
            Some(serde_json::Value::String(list)) => list
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Some(GeneratedQuery {
            sql,
            explanation: text_field(object, "explanation").unwrap_or_default(),
            tables_used,
            expected_result_type: text_field(object, "expected_result_type"),
        })
    }
}

fn text_field(object: &serde_json::Value, key: &str) -> Option<String> {
    match object.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// The validator's judgment on a candidate query. Advisory only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub explanation: String,
    #[serde(default)]
    pub suggested_improvements: Vec<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    is_valid: serde_json::Value,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    suggested_improvements: Vec<String>,
}

impl ValidationVerdict {
    pub fn valid(explanation: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            explanation: explanation.into(),
            suggested_improvements: Vec::new(),
        }
    }

    pub fn invalid(explanation: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            explanation: explanation.into(),
            suggested_improvements: Vec::new(),
        }
    }

    /// Parse a validation answer. Never fails: an answer that cannot be read
    /// counts as an invalid verdict carrying the reason.
    pub fn parse(response: &str) -> Self {
        if let Some(object) = json_object(response) {
            if let Ok(raw) = serde_json::from_value::<RawVerdict>(object) {
                if let Some(is_valid) = truthy(&raw.is_valid) {
                    return Self {
                        is_valid,
                        explanation: raw.explanation.unwrap_or_default(),
                        suggested_improvements: raw.suggested_improvements,
                    };
                }
            }
        }

        let lower = response.to_lowercase();
        if lower.contains("invalid") || lower.contains("not valid") || lower.contains("is_valid\": false") {
            return Self::invalid(response.trim());
        }
        if lower.trim_start().starts_with("valid") || lower.contains("is valid") {
            return Self::valid(response.trim());
        }

        Self::invalid(format!(
            "Validator response could not be interpreted: {}",
            preview(response)
        ))
    }

    /// Feedback for the next generation attempt.
    pub fn feedback(&self) -> String {
        let mut feedback = format!("Validation failed: {}", self.explanation);
        if !self.suggested_improvements.is_empty() {
            feedback.push_str("\nSuggested improvements:\n");
            for improvement in &self.suggested_improvements {
                feedback.push_str(&format!("- {}\n", improvement));
            }
        }
        feedback.trim_end().to_string()
    }
}

fn truthy(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "valid" => Some(true),
            "false" | "no" | "invalid" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Extract the outermost JSON object from a possibly fenced answer.
fn json_object(response: &str) -> Option<serde_json::Value> {
    let cleaned = clean_sql(response);
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(&cleaned) {
        return Some(value);
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&response[start..=end]) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > 120 {
        format!("{}…", trimmed.chars().take(120).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generated_json() {
        let response = r#"{"sql": "SELECT AVG(total_amount) FROM transactions;",
            "explanation": "Average basket", "tables_used": ["transactions"],
            "expected_result_type": "single_value"}"#;
        let query = GeneratedQuery::parse(response).unwrap();
        assert_eq!(query.sql, "SELECT AVG(total_amount) FROM transactions;");
        assert_eq!(query.tables_used, vec!["transactions"]);
        assert_eq!(query.expected_result_type.as_deref(), Some("single_value"));
    }

    #[test]
    fn test_parse_generated_fenced_json_with_fenced_sql() {
        let response = "```json\n{\"sql\": \"```sql\\nSELECT 1\\n```\", \"explanation\": \"x\"}\n```";
        let query = GeneratedQuery::parse(response).unwrap();
        assert_eq!(query.sql, "SELECT 1");
    }

    #[test]
    fn test_parse_generated_loose_field_types() {
        let response = r#"{"sql": "SELECT COUNT(*) FROM orders", "explanation": "count",
            "tables_used": "orders, customers", "expected_result_type": 1}"#;
        let query = GeneratedQuery::parse(response).unwrap();
        assert_eq!(query.sql, "SELECT COUNT(*) FROM orders");
        assert_eq!(query.explanation, "count");
        assert_eq!(query.tables_used, vec!["orders", "customers"]);
        assert_eq!(query.expected_result_type.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_generated_bare_sql() {
        let query = GeneratedQuery::parse("```sql\nSELECT COUNT(*) FROM orders\n```").unwrap();
        assert_eq!(query.sql, "SELECT COUNT(*) FROM orders");
        assert!(query.explanation.is_empty());
    }

    #[test]
    fn test_parse_generated_unusable() {
        let err = GeneratedQuery::parse("I cannot answer that question.").unwrap_err();
        assert!(matches!(err, ChatError::Generation(_)));
        let err = GeneratedQuery::parse(r#"{"sql": "", "explanation": "no idea"}"#).unwrap_err();
        assert!(matches!(err, ChatError::Generation(_)));
    }

    #[test]
    fn test_parse_verdict_json() {
        let verdict = ValidationVerdict::parse(
            r#"{"is_valid": false, "explanation": "column basket_size does not exist",
                "suggested_improvements": ["use total_amount"]}"#,
        );
        assert!(!verdict.is_valid);
        assert_eq!(
            verdict.feedback(),
            "Validation failed: column basket_size does not exist\nSuggested improvements:\n- use total_amount"
        );

        let verdict = ValidationVerdict::parse(r#"{"is_valid": "true", "explanation": "ok"}"#);
        assert!(verdict.is_valid);
    }

    #[test]
    fn test_parse_verdict_free_text() {
        assert!(ValidationVerdict::parse("Valid. The query answers the question.").is_valid);
        assert!(!ValidationVerdict::parse("The query is invalid because of the join.").is_valid);

        let verdict = ValidationVerdict::parse("¯\\_(ツ)_/¯");
        assert!(!verdict.is_valid);
        assert!(verdict.explanation.starts_with("Validator response could not be interpreted"));
    }
}
