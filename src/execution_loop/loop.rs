//! Query Orchestrator
//!
//! Bounded generate / validate / execute / correct state machine for one chat
//! turn. Validation is advisory: the final candidate is always executed. A
//! driver error buys exactly one corrected query.

use crate::db::SqlDatabase;
use crate::error::{ChatError, Result};
use crate::execution::result::ResultSet;
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::execution_loop::response::{GeneratedQuery, ValidationVerdict};
use crate::llm::CompletionService;
use crate::prompts;
use crate::sql_text::clean_sql;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Regenerations allowed after an invalid verdict (three generations total).
pub const MAX_VALIDATION_RETRIES: u8 = 2;

/// Corrected queries allowed after a driver error.
pub const MAX_CORRECTION_ATTEMPTS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    Warning,
    Error,
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnStatus::Ok => write!(f, "ok"),
            TurnStatus::Warning => write!(f, "warning"),
            TurnStatus::Error => write!(f, "error"),
        }
    }
}

/// One generation and its verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAttempt {
    pub attempt: u8,
    pub question: String,
    pub query: GeneratedQuery,
    pub verdict: Option<ValidationVerdict>,
}

/// Progress notifications, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Generating { attempt: u8 },
    Validated { attempt: u8, is_valid: bool, explanation: String },
    ProceedingDespiteWarning { explanation: String },
    Executing { sql: String, corrected: bool },
    ExecutionFailed { error: String, class: SqlErrorClass },
    Correcting,
    Finished { status: TurnStatus },
}

pub trait TurnObserver: Send + Sync {
    fn on_event(&self, event: &TurnEvent);
}

/// What the loop needs besides its collaborators.
#[derive(Debug, Clone, Copy)]
pub struct TurnInput<'a> {
    pub question: &'a str,
    pub schema: &'a str,
    pub graph_context: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub question: String,
    pub status: TurnStatus,
    /// Last SQL sent to the database, if any.
    pub sql: Option<String>,
    pub query: Option<GeneratedQuery>,
    pub corrected: bool,
    /// Final validation verdict.
    pub verdict: Option<ValidationVerdict>,
    pub attempts: Vec<QueryAttempt>,
    pub result: Option<ResultSet>,
    pub message: String,
    pub generation_calls: u8,
    pub correction_calls: u8,
    pub execution_calls: u8,
}

impl TurnOutcome {
    /// Status as shown before execution: a failed validation is a warning.
    pub fn validation_status(&self) -> TurnStatus {
        match &self.verdict {
            Some(v) if v.is_valid => TurnStatus::Ok,
            Some(_) => TurnStatus::Warning,
            None => TurnStatus::Error,
        }
    }
}

enum TurnState {
    Generating { feedback: Option<String> },
    Validating { candidate: GeneratedQuery },
    Executing { candidate: GeneratedQuery, corrected: bool },
    Correcting { failed: GeneratedQuery, error: String },
    Done,
}

/// Mutable record of a turn in progress; survives a fatal error so the
/// outcome still shows what was attempted.
struct TurnTrace {
    outcome: TurnOutcome,
    first_execution_error: Option<String>,
}

impl TurnTrace {
    fn new(question: &str) -> Self {
        Self {
            outcome: TurnOutcome {
                turn_id: Uuid::new_v4(),
                question: question.to_string(),
                status: TurnStatus::Error,
                sql: None,
                query: None,
                corrected: false,
                verdict: None,
                attempts: Vec::new(),
                result: None,
                message: String::new(),
                generation_calls: 0,
                correction_calls: 0,
                execution_calls: 0,
            },
            first_execution_error: None,
        }
    }

    fn succeeded(&mut self, query: GeneratedQuery, sql: String, corrected: bool, result: ResultSet) {
        let validated = self.outcome.verdict.as_ref().map_or(false, |v| v.is_valid);
        let mut notes = Vec::new();
        if !validated {
            let reason = self
                .outcome
                .verdict
                .as_ref()
                .map(|v| v.explanation.clone())
                .unwrap_or_default();
            notes.push(format!("Query validation failed, but it was run anyway: {}", reason));
        }
        if corrected {
            notes.push(format!(
                "The first query failed ({}); a corrected query was run instead.",
                self.first_execution_error.as_deref().unwrap_or("unknown error")
            ));
        }

        self.outcome.status = if validated && !corrected {
            TurnStatus::Ok
        } else {
            TurnStatus::Warning
        };
        self.outcome.message = if notes.is_empty() {
            format!("Query executed successfully, returned {} rows", result.row_count())
        } else {
            notes.join(" ")
        };
        self.outcome.query = Some(query);
        self.outcome.sql = Some(sql);
        self.outcome.corrected = corrected;
        self.outcome.result = Some(result);
    }

    fn execution_failed(&mut self, query: GeneratedQuery, sql: String, corrected: bool, error: String) {
        self.outcome.status = TurnStatus::Error;
        self.outcome.message = format!("Query execution failed: {}", error);
        self.outcome.query = Some(query);
        self.outcome.sql = Some(sql);
        self.outcome.corrected = corrected;
    }

    fn aborted(&mut self, error: &ChatError) {
        let stage = if error.is_completion_failure() {
            "Could not get a usable query"
        } else {
            "Could not complete the request"
        };
        self.outcome.status = TurnStatus::Error;
        self.outcome.message = format!("{}: {}", stage, error);
    }
}

pub struct QueryOrchestrator {
    llm: Arc<dyn CompletionService>,
    db: Arc<dyn SqlDatabase>,
    error_classifier: ErrorClassifier,
    observer: Option<Arc<dyn TurnObserver>>,
}

impl QueryOrchestrator {
    pub fn new(llm: Arc<dyn CompletionService>, db: Arc<dyn SqlDatabase>) -> Self {
        Self {
            llm,
            db,
            error_classifier: ErrorClassifier::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn dialect(&self) -> &'static str {
        self.db.dialect()
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    /// Run one chat turn. Never fails: completion-service errors end the turn
    /// with an error status.
    pub async fn run_turn(&self, input: &TurnInput<'_>) -> TurnOutcome {
        let mut trace = TurnTrace::new(input.question);

        if let Err(e) = self.drive(input, &mut trace).await {
            warn!("Turn aborted: {}", e);
            trace.aborted(&e);
        }

        let outcome = trace.outcome;
        info!(
            status = %outcome.status,
            generations = outcome.generation_calls,
            corrections = outcome.correction_calls,
            executions = outcome.execution_calls,
            "Turn finished"
        );
        self.emit(TurnEvent::Finished {
            status: outcome.status,
        });
        outcome
    }

    async fn drive(&self, input: &TurnInput<'_>, trace: &mut TurnTrace) -> Result<()> {
        let mut state = TurnState::Generating { feedback: None };

        loop {
            state = match state {
                TurnState::Generating { feedback } => {
                    trace.outcome.generation_calls += 1;
                    let attempt = trace.outcome.generation_calls;
                    info!(
                        "Generation attempt {} of {}",
                        attempt,
                        MAX_VALIDATION_RETRIES + 1
                    );
                    self.emit(TurnEvent::Generating { attempt });

                    let request = prompts::generation_request(
                        input.question,
                        input.schema,
                        self.dialect(),
                        input.graph_context,
                        feedback.as_deref(),
                    );
                    let response = self.llm.complete(&request).await?;
                    let candidate = GeneratedQuery::parse(&response)?;
                    debug!("Generated SQL: {}", candidate.sql);

                    trace.outcome.attempts.push(QueryAttempt {
                        attempt,
                        question: input.question.to_string(),
                        query: candidate.clone(),
                        verdict: None,
                    });
                    TurnState::Validating { candidate }
                }

                TurnState::Validating { candidate } => {
                    let attempt = trace.outcome.generation_calls;
                    let request = prompts::validation_request(input.question, &candidate, input.schema);
                    let response = self.llm.complete(&request).await?;
                    let verdict = ValidationVerdict::parse(&response);

                    self.emit(TurnEvent::Validated {
                        attempt,
                        is_valid: verdict.is_valid,
                        explanation: verdict.explanation.clone(),
                    });
                    if let Some(last) = trace.outcome.attempts.last_mut() {
                        last.verdict = Some(verdict.clone());
                    }
                    trace.outcome.verdict = Some(verdict.clone());

                    let retries_used = attempt - 1;
                    if verdict.is_valid {
                        info!("Query validation successful on attempt {}", attempt);
                        TurnState::Executing {
                            candidate,
                            corrected: false,
                        }
                    } else if retries_used < MAX_VALIDATION_RETRIES {
                        warn!(
                            "Query validation failed on attempt {}: {}",
                            attempt, verdict.explanation
                        );
                        TurnState::Generating {
                            feedback: Some(verdict.feedback()),
                        }
                    } else {
                        warn!(
                            "Query validation failed after {} retries, running it anyway",
                            MAX_VALIDATION_RETRIES
                        );
                        self.emit(TurnEvent::ProceedingDespiteWarning {
                            explanation: verdict.explanation.clone(),
                        });
                        TurnState::Executing {
                            candidate,
                            corrected: false,
                        }
                    }
                }

                TurnState::Executing {
                    candidate,
                    corrected,
                } => {
                    let sql = clean_sql(&candidate.sql);
                    trace.outcome.execution_calls += 1;
                    self.emit(TurnEvent::Executing {
                        sql: sql.clone(),
                        corrected,
                    });

                    match self.db.execute(&sql).await {
                        Ok(result) => {
                            info!(
                                "Query executed successfully, returned {} rows in {}ms",
                                result.row_count(),
                                result.execution_time_ms
                            );
                            trace.succeeded(candidate, sql, corrected, result);
                            TurnState::Done
                        }
                        Err(e) => {
                            let error = match e {
                                ChatError::Execution(message) => message,
                                other => other.to_string(),
                            };
                            let class = self.error_classifier.classify(&error);
                            warn!("Query execution failed ({}): {}", class, error);
                            self.emit(TurnEvent::ExecutionFailed {
                                error: error.clone(),
                                class,
                            });

                            if !corrected && trace.outcome.correction_calls < MAX_CORRECTION_ATTEMPTS {
                                trace.first_execution_error = Some(error.clone());
                                TurnState::Correcting {
                                    failed: candidate,
                                    error,
                                }
                            } else {
                                trace.execution_failed(candidate, sql, corrected, error);
                                TurnState::Done
                            }
                        }
                    }
                }

                TurnState::Correcting { failed, error } => {
                    trace.outcome.correction_calls += 1;
                    self.emit(TurnEvent::Correcting);
                    info!("Requesting a corrected query");

                    let class = self.error_classifier.classify(&error);
                    let request = prompts::correction_request(
                        input.question,
                        &failed.sql,
                        &error,
                        class.hint(),
                        input.schema,
                        self.dialect(),
                    );
                    // Keep the failing query visible if the correction itself fails
                    trace.outcome.sql = Some(clean_sql(&failed.sql));
                    trace.outcome.query = Some(failed);

                    let response = self.llm.complete(&request).await?;
                    let candidate = GeneratedQuery::parse(&response)?;
                    debug!("Corrected SQL: {}", candidate.sql);
                    TurnState::Executing {
                        candidate,
                        corrected: true,
                    }
                }

                TurnState::Done => return Ok(()),
            };
        }
    }
}
