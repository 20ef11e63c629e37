#![allow(dead_code)]

use async_trait::async_trait;
use retail_chat::db::{SqlDatabase, SqliteDatabase};
use retail_chat::execution_loop::{TurnEvent, TurnObserver};
use retail_chat::llm::{CompletionRequest, CompletionService, PromptKind};
use retail_chat::{ChatError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Completion service that replays canned answers per prompt purpose and
/// records every request.
pub struct ScriptedCompletion {
    answers: Mutex<HashMap<PromptKind, VecDeque<Result<String>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            answers: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(self, kind: PromptKind, text: &str) -> Self {
        self.push(kind, Ok(text.to_string()))
    }

    pub fn fail(self, kind: PromptKind, error: ChatError) -> Self {
        self.push(kind, Err(error))
    }

    fn push(self, kind: PromptKind, answer: Result<String>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(answer);
        self
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.requests_for(kind).len()
    }

    pub fn requests_for(&self, kind: PromptKind) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .lock()
            .unwrap()
            .get_mut(&request.kind)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(ChatError::Llm(format!("no scripted answer for {:?}", request.kind))))
    }
}

/// Observer that keeps every event.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<TurnEvent>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<TurnEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event names in order, e.g. `generating(1)`, `executing(corrected)`.
    pub fn labels(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| match event {
                TurnEvent::Generating { attempt } => format!("generating({})", attempt),
                TurnEvent::Validated { is_valid, .. } => format!("validated({})", is_valid),
                TurnEvent::ProceedingDespiteWarning { .. } => "proceeding_despite_warning".to_string(),
                TurnEvent::Executing { corrected: false, .. } => "executing".to_string(),
                TurnEvent::Executing { corrected: true, .. } => "executing(corrected)".to_string(),
                TurnEvent::ExecutionFailed { .. } => "execution_failed".to_string(),
                TurnEvent::Correcting => "correcting".to_string(),
                TurnEvent::Finished { status } => format!("finished({})", status),
            })
            .collect()
    }
}

impl TurnObserver for EventRecorder {
    fn on_event(&self, event: &TurnEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub const TRANSACTIONS_DDL: &str = "CREATE TABLE transactions (
    transaction_id INTEGER PRIMARY KEY,
    store_id TEXT NOT NULL,
    transaction_date TEXT NOT NULL,
    total_amount REAL NOT NULL
);";

/// In-memory store with three transactions averaging 20.0.
pub fn retail_db() -> Arc<dyn SqlDatabase> {
    let db = SqliteDatabase::open_in_memory().unwrap();
    db.execute_batch(&format!(
        "{}
         INSERT INTO transactions VALUES (1, 'S1', '2024-01-05', 10.0);
         INSERT INTO transactions VALUES (2, 'S1', '2024-01-06', 20.0);
         INSERT INTO transactions VALUES (3, 'S2', '2024-02-01', 30.0);",
        TRANSACTIONS_DDL
    ))
    .unwrap();
    Arc::new(db)
}

pub fn generated(sql: &str) -> String {
    serde_json::json!({
        "sql": sql,
        "explanation": "Averages the transaction totals",
        "tables_used": ["transactions"],
        "expected_result_type": "single_value"
    })
    .to_string()
}

pub fn verdict(is_valid: bool, explanation: &str) -> String {
    let improvements: Vec<&str> = if is_valid { vec![] } else { vec!["use total_amount"] };
    serde_json::json!({
        "is_valid": is_valid,
        "explanation": explanation,
        "suggested_improvements": improvements
    })
    .to_string()
}
