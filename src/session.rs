//! Chat Session
//!
//! Per-conversation state: the metadata document and its prompt text, the
//! context mode, the cached database summary and the turn history.

use crate::db::SqlDatabase;
use crate::error::{ChatError, Result};
use crate::execution_loop::{QueryOrchestrator, TurnInput, TurnObserver, TurnOutcome};
use crate::graph::{GraphContext, SchemaGraph};
use crate::interpret::{self, Interpretation};
use crate::llm::CompletionService;
use crate::metadata::MetadataDocument;
use crate::visualization::{VisualizationConfig, VisualizationSelector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Columns kept in the graph context for one question.
pub const DEFAULT_TOP_K: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Plain,
    Graph,
}

impl FromStr for ContextMode {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Ok(ContextMode::Plain),
            "graph" => Ok(ContextMode::Graph),
            other => Err(ChatError::Config(format!(
                "Unknown context mode '{}': expected plain or graph",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub outcome: TurnOutcome,
    pub interpretation: Option<Interpretation>,
    pub visualization: Option<VisualizationConfig>,
    pub asked_at: DateTime<Utc>,
}

pub struct ChatSession {
    id: Uuid,
    metadata: MetadataDocument,
    schema_text: String,
    mode: ContextMode,
    graph: Option<SchemaGraph>,
    top_k: usize,
    llm: Arc<dyn CompletionService>,
    orchestrator: QueryOrchestrator,
    selector: VisualizationSelector,
    summary: Option<String>,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    /// Graph mode needs structured metadata.
    pub fn new(
        metadata: MetadataDocument,
        mode: ContextMode,
        llm: Arc<dyn CompletionService>,
        db: Arc<dyn SqlDatabase>,
    ) -> Result<Self> {
        let graph = match (mode, metadata.structured()) {
            (ContextMode::Graph, Some(structured)) => Some(SchemaGraph::build(structured)?),
            (ContextMode::Graph, None) => {
                return Err(ChatError::Config(
                    "Graph mode requires structured (.json) metadata".to_string(),
                ))
            }
            (ContextMode::Plain, _) => None,
        };

        let schema_text = metadata.prompt_text();
        let id = Uuid::new_v4();
        info!(session = %id, ?mode, backend = db.name(), "Chat session started");

        Ok(Self {
            id,
            metadata,
            schema_text,
            mode,
            graph,
            top_k: DEFAULT_TOP_K,
            orchestrator: QueryOrchestrator::new(Arc::clone(&llm), db),
            llm,
            selector: VisualizationSelector::new(),
            summary: None,
            history: Vec::new(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.orchestrator = self.orchestrator.with_observer(observer);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn metadata(&self) -> &MetadataDocument {
        &self.metadata
    }

    pub fn schema_text(&self) -> &str {
        &self.schema_text
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Database summary, asked for once and cached.
    pub async fn summary(&mut self) -> Result<String> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }

        let summary = match &self.graph {
            Some(graph) => interpret::summarize_graph(self.llm.as_ref(), &graph.stats()).await?,
            None => interpret::summarize_database(self.llm.as_ref(), &self.schema_text).await?,
        };
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// The graph context for a question, when in graph mode.
    pub fn graph_context(&self, question: &str) -> Option<GraphContext> {
        self.graph
            .as_ref()
            .map(|graph| graph.relevant_context(question, self.top_k))
    }

    /// Answer one question and record the turn.
    pub async fn ask(&mut self, question: &str) -> &ChatTurn {
        let question = question.trim();
        let graph_context = self.graph_context(question).filter(|c| !c.is_empty());
        let context_json = match graph_context.as_ref().map(GraphContext::to_prompt_json) {
            Some(Ok(json)) => Some(json),
            Some(Err(e)) => {
                warn!("Could not render graph context: {}", e);
                None
            }
            None => None,
        };

        let outcome = self
            .orchestrator
            .run_turn(&TurnInput {
                question,
                schema: &self.schema_text,
                graph_context: context_json.as_deref(),
            })
            .await;

        let (interpretation, visualization) = match (&outcome.result, &outcome.query) {
            (Some(result), Some(query)) if !result.is_empty() => {
                let visualization = self
                    .selector
                    .select(result, &format!("{}\n{}", question, query.sql));
                let interpretation = interpret::interpret_result(
                    self.llm.as_ref(),
                    question,
                    query,
                    result,
                    graph_context.as_ref(),
                )
                .await;
                (Some(interpretation), Some(visualization))
            }
            _ => (None, None),
        };

        self.history.push(ChatTurn {
            outcome,
            interpretation,
            visualization,
            asked_at: Utc::now(),
        });
        &self.history[self.history.len() - 1]
    }
}
