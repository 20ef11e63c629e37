pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod graph;
pub mod interpret;
pub mod llm;
pub mod logging;
pub mod metadata;
pub mod prompts;
pub mod session;
pub mod sql_text;
pub mod visualization;

pub use config::AppConfig;
pub use error::{ChatError, Result};
pub use execution_loop::{QueryOrchestrator, TurnEvent, TurnObserver, TurnOutcome, TurnStatus};
pub use session::{ChatSession, ChatTurn, ContextMode};
