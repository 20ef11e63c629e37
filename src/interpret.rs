//! Database summaries and business interpretation of results

use crate::error::Result;
use crate::execution::result::ResultSet;
use crate::execution_loop::response::GeneratedQuery;
use crate::graph::{GraphContext, GraphStats};
use crate::llm::CompletionService;
use crate::prompts;
use serde::Serialize;
use tracing::{info, warn};

pub const INTERPRETATION_FALLBACK: &str = "Unable to generate data interpretation due to an error.";

const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Interpretation {
    pub summary: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// False when the fallback text is shown.
    pub generated: bool,
}

#[derive(Serialize)]
struct InterpretationContext<'a> {
    question: &'a str,
    row_count: usize,
    column_count: usize,
    columns: &'a [String],
    sample_data: Vec<serde_json::Map<String, serde_json::Value>>,
    sql_explanation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    graph_context: Option<&'a GraphContext>,
}

#[derive(Serialize)]
struct GraphOverview<'a> {
    overview: Overview,
    tables: &'a [crate::graph::TableStat],
    relationships: &'a std::collections::BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct Overview {
    table_count: usize,
    total_columns: usize,
    total_relationships: usize,
}

/// Ask for a short description of the database. `description` is the schema
/// prompt text in plain mode.
pub async fn summarize_database(llm: &dyn CompletionService, description: &str) -> Result<String> {
    info!("Generating database summary");
    let summary = llm.complete(&prompts::summary_request(description)).await?;
    Ok(summary.trim().to_string())
}

/// Graph mode: summarise from table, column and relationship counts.
pub async fn summarize_graph(llm: &dyn CompletionService, stats: &GraphStats) -> Result<String> {
    let overview = GraphOverview {
        overview: Overview {
            table_count: stats.table_count,
            total_columns: stats.total_columns,
            total_relationships: stats.total_relationships,
        },
        tables: &stats.tables,
        relationships: &stats.relationships,
    };
    summarize_database(llm, &serde_json::to_string(&overview)?).await
}

/// Business-facing reading of a result. Never fails: errors yield the
/// fallback text.
pub async fn interpret_result(
    llm: &dyn CompletionService,
    question: &str,
    query: &GeneratedQuery,
    result: &ResultSet,
    graph_context: Option<&GraphContext>,
) -> Interpretation {
    let context = InterpretationContext {
        question,
        row_count: result.row_count(),
        column_count: result.column_count(),
        columns: &result.columns,
        sample_data: result.sample_records(SAMPLE_ROWS),
        sql_explanation: &query.explanation,
        graph_context,
    };

    let answer = match serde_json::to_string(&context) {
        Ok(json) => llm.complete(&prompts::interpretation_request(&json)).await,
        Err(e) => Err(e.into()),
    };

    let (summary, generated) = match answer {
        Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), true),
        Ok(_) => {
            warn!("Interpretation came back empty");
            (INTERPRETATION_FALLBACK.to_string(), false)
        }
        Err(e) => {
            warn!("Error generating data interpretation: {}", e);
            (INTERPRETATION_FALLBACK.to_string(), false)
        }
    };

    Interpretation {
        summary,
        row_count: result.row_count(),
        columns: result.columns.clone(),
        generated,
    }
}
