//! Prompts - requests sent to the completion service
//!
//! Each builder returns a ready `CompletionRequest`; temperatures and token
//! limits follow the purpose (deterministic SQL work, looser prose).

use crate::execution_loop::response::GeneratedQuery;
use crate::llm::{ChatMessage, CompletionRequest, PromptKind};

const GENERATION_SYSTEM_PROMPT: &str = r#"You are an expert SQL query generator for a retail point-of-sale database. Given a user's question and the database schema, generate a SQL query that answers the question.

Return your response in the following JSON structure:
{
    "sql": "the SQL query",
    "explanation": "brief explanation of how the query answers the question",
    "tables_used": ["list", "of", "tables", "used"],
    "expected_result_type": "single_value|list|count|aggregate"
}

Guidelines for query generation:
1. Analyze the question and required tables carefully
2. Generate a precise SQL query that answers the question
3. Use appropriate JOINs and WHERE clauses
4. Keep the query efficient and focused
5. When asked to return a list of things, limit the number of results to 10 unless the user has indicated otherwise
6. When asked to return a count, return the count
7. When asked to return a single value, return the value
8. When a table references another table that adds meaningful information, perform the join and include the detail"#;

const GRAPH_CONTEXT_GUIDANCE: &str = r#"The graph context lists the columns most relevant to the question, found through column descriptions, business context, synonyms, foreign keys and semantic relations. Focus the query on those tables and columns."#;

const VALIDATION_SYSTEM_PROMPT: &str = r#"You are a SQL query validator. Given a user question, a generated SQL query with metadata, and the database schema:
1. Check if the query will answer the user's question correctly
2. Verify table relationships and joins are correct
3. Ensure every referenced table and column exists in the schema
4. Ensure all necessary conditions are included
5. Verify the expected result type matches the question intent
6. Ensure the query reasonably limits list results to fewer than 20 rows

Return your response in the following JSON structure:
{
    "is_valid": true,
    "explanation": "detailed explanation of the validation result",
    "suggested_improvements": ["only", "when", "not", "valid"]
}"#;

const CORRECTION_SYSTEM_PROMPT: &str = r#"You are an expert SQL query fixer. A generated SQL query failed when executed against the database. Using the schema, the original question, the failing query and the database error, write a corrected query.

Return your response in the following JSON structure:
{
    "sql": "the corrected SQL query",
    "explanation": "what was wrong and how the corrected query answers the question",
    "tables_used": ["list", "of", "tables", "used"],
    "expected_result_type": "single_value|list|count|aggregate"
}"#;

const SUMMARY_SYSTEM_PROMPT: &str = r#"You are a helpful database expert. Given the database description, provide a concise summary of:
1. The database's main purpose
2. Key entities/tables and their relationships
3. Types/examples of questions users can ask
Keep the response under 200 words and focus on practical usage."#;

const INTERPRETATION_SYSTEM_PROMPT: &str = r#"You are a business analyst helping to interpret query results. Given the question, the query explanation and a summary of the resulting data, provide a concise business-friendly interpretation. Highlight key findings, trends or notable data points. Keep the response under 100 words."#;

/// First or repeated generation. `feedback` carries the previous validator
/// verdict when regenerating.
pub fn generation_request(
    question: &str,
    schema: &str,
    dialect: &str,
    graph_context: Option<&str>,
    feedback: Option<&str>,
) -> CompletionRequest {
    let mut system = format!(
        "{}\n9. Ensure the SQL syntax is consistent with the {} dialect",
        GENERATION_SYSTEM_PROMPT, dialect
    );
    if graph_context.is_some() {
        system.push_str("\n\n");
        system.push_str(GRAPH_CONTEXT_GUIDANCE);
    }
    if let Some(feedback) = feedback {
        system.push_str(&format!(
            "\n\nPrevious attempt failed with error: {}\nPlease fix the query accordingly.",
            feedback
        ));
    }

    let mut user = format!("Database schema:\n{}\n", schema);
    if let Some(context) = graph_context {
        user.push_str(&format!("\nGraph analysis context:\n{}\n", context));
    }
    user.push_str(&format!("\nQuestion: {}", question));

    CompletionRequest::new(
        PromptKind::Generate,
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .temperature(0.1)
    .max_tokens(500)
    .json()
}

pub fn validation_request(question: &str, candidate: &GeneratedQuery, schema: &str) -> CompletionRequest {
    let candidate_json = serde_json::to_string(candidate).unwrap_or_else(|_| candidate.sql.clone());
    let user = format!(
        "Question: {}\nQuery Response: {}\nSchema:\n{}",
        question, candidate_json, schema
    );

    CompletionRequest::new(
        PromptKind::Validate,
        vec![
            ChatMessage::system(VALIDATION_SYSTEM_PROMPT),
            ChatMessage::user(user),
        ],
    )
    .temperature(0.1)
    .max_tokens(300)
    .json()
}

pub fn correction_request(
    question: &str,
    failed_sql: &str,
    driver_error: &str,
    hint: &str,
    schema: &str,
    dialect: &str,
) -> CompletionRequest {
    let system = format!(
        "{}\nThe corrected query must use the {} dialect.",
        CORRECTION_SYSTEM_PROMPT, dialect
    );
    let user = format!(
        "Database schema:\n{}\n\nQuestion: {}\n\nFailing query:\n{}\n\nDatabase error: {}\nHint: {}",
        schema, question, failed_sql, driver_error, hint
    );

    CompletionRequest::new(
        PromptKind::Correct,
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .temperature(0.1)
    .max_tokens(500)
    .json()
}

/// Database summary from the schema text (plain mode) or graph statistics
/// (graph mode).
pub fn summary_request(description: &str) -> CompletionRequest {
    CompletionRequest::new(
        PromptKind::Summarize,
        vec![
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(format!("Here is the database description:\n{}", description)),
        ],
    )
    .temperature(0.7)
    .max_tokens(300)
}

pub fn interpretation_request(context_json: &str) -> CompletionRequest {
    CompletionRequest::new(
        PromptKind::Interpret,
        vec![
            ChatMessage::system(INTERPRETATION_SYSTEM_PROMPT),
            ChatMessage::user(context_json),
        ],
    )
    .temperature(0.7)
    .max_tokens(150)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_request_includes_feedback_and_context() {
        let request = generation_request(
            "average transaction value",
            "CREATE TABLE transactions (total_amount REAL);",
            "SQLite",
            Some("{\"matches\": []}"),
            Some("Validation failed: missing table"),
        );
        assert_eq!(request.kind, PromptKind::Generate);
        assert!(request.json_response);
        let transcript = request.transcript();
        assert!(transcript.contains("SQLite dialect"));
        assert!(transcript.contains("Previous attempt failed with error: Validation failed: missing table"));
        assert!(transcript.contains("Graph analysis context:"));
        assert!(transcript.ends_with("Question: average transaction value"));
    }

    #[test]
    fn test_generation_request_without_extras() {
        let transcript = generation_request("q", "schema", "PostgreSQL", None, None).transcript();
        assert!(!transcript.contains("Previous attempt failed"));
        assert!(!transcript.contains("Graph analysis context"));
    }

    #[test]
    fn test_correction_request_carries_error() {
        let request = correction_request(
            "q",
            "SELECT basket_size FROM transactions",
            "no such column: basket_size",
            "Use only column names listed in the schema.",
            "schema",
            "SQLite",
        );
        assert_eq!(request.kind, PromptKind::Correct);
        let transcript = request.transcript();
        assert!(transcript.contains("Failing query:\nSELECT basket_size FROM transactions"));
        assert!(transcript.contains("Database error: no such column: basket_size"));
    }
}
