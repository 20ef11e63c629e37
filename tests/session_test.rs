mod common;

use common::{generated, retail_db, verdict, ScriptedCompletion, TRANSACTIONS_DDL};
use retail_chat::interpret::INTERPRETATION_FALLBACK;
use retail_chat::llm::PromptKind;
use retail_chat::metadata::{MetadataDocument, SchemaMetadata};
use retail_chat::visualization::ChartKind;
use retail_chat::{ChatError, ChatSession, ContextMode, TurnStatus};
use std::sync::Arc;

const TRANSACTIONS_JSON: &str = r#"{
    "database": "retail",
    "tables": [
        {
            "name": "transactions",
            "description": "One row per checkout",
            "primary_key": ["transaction_id"],
            "columns": [
                {"name": "transaction_id", "data_type": "INTEGER", "nullable": false},
                {"name": "store_id", "data_type": "TEXT", "nullable": false},
                {"name": "transaction_date", "data_type": "TEXT", "nullable": false},
                {"name": "total_amount", "data_type": "REAL", "nullable": false,
                 "description": "Basket value paid by the customer",
                 "synonyms": ["basket", "spend"]}
            ]
        }
    ]
}"#;

fn text_metadata() -> MetadataDocument {
    MetadataDocument::Text(TRANSACTIONS_DDL.to_string())
}

fn structured_metadata() -> MetadataDocument {
    MetadataDocument::Structured(SchemaMetadata::from_json(TRANSACTIONS_JSON).unwrap())
}

fn answering(sql: &str) -> ScriptedCompletion {
    ScriptedCompletion::new()
        .answer(PromptKind::Generate, &generated(sql))
        .answer(PromptKind::Validate, &verdict(true, "fine"))
}

#[tokio::test]
async fn test_summary_is_requested_once() {
    let llm = Arc::new(
        ScriptedCompletion::new().answer(PromptKind::Summarize, "  A retail point-of-sale database.  "),
    );
    let mut session = ChatSession::new(text_metadata(), ContextMode::Plain, llm.clone(), retail_db()).unwrap();

    assert_eq!(session.summary().await.unwrap(), "A retail point-of-sale database.");
    assert_eq!(session.summary().await.unwrap(), "A retail point-of-sale database.");
    assert_eq!(llm.calls(PromptKind::Summarize), 1);

    let request = &llm.requests_for(PromptKind::Summarize)[0];
    assert!(request.transcript().contains("CREATE TABLE transactions"));
}

#[tokio::test]
async fn test_graph_summary_uses_statistics() {
    let llm = Arc::new(ScriptedCompletion::new().answer(PromptKind::Summarize, "One table."));
    let mut session =
        ChatSession::new(structured_metadata(), ContextMode::Graph, llm.clone(), retail_db()).unwrap();

    session.summary().await.unwrap();
    let transcript = llm.requests_for(PromptKind::Summarize)[0].transcript();
    assert!(transcript.contains("\"table_count\":1"));
    assert!(transcript.contains("\"total_columns\":4"));
}

#[tokio::test]
async fn test_failed_summary_is_not_cached() {
    let llm = Arc::new(
        ScriptedCompletion::new()
            .fail(PromptKind::Summarize, ChatError::Llm("rate limited".to_string()))
            .answer(PromptKind::Summarize, "Retail data."),
    );
    let mut session = ChatSession::new(text_metadata(), ContextMode::Plain, llm.clone(), retail_db()).unwrap();

    assert!(session.summary().await.is_err());
    assert_eq!(session.summary().await.unwrap(), "Retail data.");
}

#[tokio::test]
async fn test_ask_records_turn_with_interpretation_and_visualization() {
    let llm = Arc::new(
        answering("SELECT AVG(total_amount) AS avg_value FROM transactions")
            .answer(PromptKind::Interpret, "The average basket is 20."),
    );
    let mut session = ChatSession::new(text_metadata(), ContextMode::Plain, llm.clone(), retail_db()).unwrap();

    let turn = session.ask("  average transaction value ").await;
    assert_eq!(turn.outcome.status, TurnStatus::Ok);
    assert_eq!(turn.outcome.question, "average transaction value");
    let interpretation = turn.interpretation.as_ref().unwrap();
    assert_eq!(interpretation.summary, "The average basket is 20.");
    assert!(interpretation.generated);
    assert_eq!(interpretation.columns, vec!["avg_value"]);
    assert_eq!(turn.visualization.as_ref().unwrap().kind, ChartKind::Value);

    assert_eq!(session.history().len(), 1);
    let context = llm.requests_for(PromptKind::Interpret)[0].transcript();
    assert!(context.contains("\"question\":\"average transaction value\""));
    assert!(context.contains("\"sample_data\":[{\"avg_value\":20.0}]"));
}

#[tokio::test]
async fn test_interpretation_failure_falls_back() {
    let llm = Arc::new(answering(
        "SELECT store_id, SUM(total_amount) AS revenue FROM transactions GROUP BY store_id ORDER BY store_id",
    ));
    let mut session = ChatSession::new(text_metadata(), ContextMode::Plain, llm.clone(), retail_db()).unwrap();

    let turn = session.ask("compare revenue by store").await;
    assert_eq!(turn.outcome.status, TurnStatus::Ok);
    let interpretation = turn.interpretation.as_ref().unwrap();
    assert_eq!(interpretation.summary, INTERPRETATION_FALLBACK);
    assert!(!interpretation.generated);

    let visualization = turn.visualization.as_ref().unwrap();
    assert_eq!(visualization.kind, ChartKind::Bar);
    assert_eq!(visualization.x.as_deref(), Some("store_id"));
    assert_eq!(visualization.y.as_deref(), Some("revenue"));
}

#[tokio::test]
async fn test_failed_and_empty_turns_skip_presentation() {
    let llm = Arc::new(
        answering("SELECT * FROM transactions WHERE total_amount > 1000")
            .fail(PromptKind::Generate, ChatError::Llm("timeout".to_string())),
    );
    let mut session = ChatSession::new(text_metadata(), ContextMode::Plain, llm.clone(), retail_db()).unwrap();

    let empty = session.ask("big baskets").await;
    assert_eq!(empty.outcome.status, TurnStatus::Ok);
    assert!(empty.outcome.result.as_ref().unwrap().is_empty());
    assert!(empty.interpretation.is_none());
    assert!(empty.visualization.is_none());

    let failed = session.ask("anything else").await;
    assert_eq!(failed.outcome.status, TurnStatus::Error);
    assert!(failed.interpretation.is_none());

    assert_eq!(session.history().len(), 2);
    assert_eq!(llm.calls(PromptKind::Interpret), 0);
}

#[tokio::test]
async fn test_graph_mode_adds_schema_context_to_generation() {
    let llm = Arc::new(
        answering("SELECT AVG(total_amount) FROM transactions").answer(PromptKind::Interpret, "About 20."),
    );
    let mut session =
        ChatSession::new(structured_metadata(), ContextMode::Graph, llm.clone(), retail_db()).unwrap();

    let turn = session.ask("average basket spend").await;
    assert_eq!(turn.outcome.status, TurnStatus::Ok);

    let generation = llm.requests_for(PromptKind::Generate)[0].transcript();
    assert!(generation.contains("Graph analysis context:"));
    assert!(generation.contains("\"column\": \"total_amount\""));
    assert!(generation.contains("CREATE TABLE transactions"));

    let interpretation = llm.requests_for(PromptKind::Interpret)[0].transcript();
    assert!(interpretation.contains("graph_context"));
}

#[tokio::test]
async fn test_plain_mode_sends_no_graph_context() {
    let llm = Arc::new(answering("SELECT AVG(total_amount) FROM transactions"));
    let mut session =
        ChatSession::new(structured_metadata(), ContextMode::Plain, llm.clone(), retail_db()).unwrap();

    session.ask("average basket spend").await;
    let generation = llm.requests_for(PromptKind::Generate)[0].transcript();
    assert!(!generation.contains("Graph analysis context"));
}

#[test]
fn test_graph_mode_requires_structured_metadata() {
    let llm = Arc::new(ScriptedCompletion::new());
    let err = ChatSession::new(text_metadata(), ContextMode::Graph, llm, retail_db())
        .err()
        .unwrap();
    assert!(matches!(err, ChatError::Config(_)));
}
