use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retail_chat::execution_loop::{TurnEvent, TurnObserver, TurnStatus};
use retail_chat::llm::{CompletionService, LlmClient};
use retail_chat::metadata::MetadataDocument;
use retail_chat::{db, logging, AppConfig, ChatSession, ChatTurn, ContextMode};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "retail-chat")]
#[command(about = "Ask questions about a retail database in plain English")]
struct Cli {
    /// Database URL: postgres://..., sqlite:path or a .db file (or set DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Metadata document: .json for structured metadata, anything else is free text
    #[arg(short, long, global = true)]
    metadata: Option<PathBuf>,

    /// Context mode: plain or graph
    #[arg(long, global = true)]
    mode: Option<ContextMode>,

    /// Model used for SQL work (or set RETAIL_CHAT_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question
    Ask {
        question: Vec<String>,

        /// Print the turn as JSON
        #[arg(long)]
        json: bool,

        #[arg(long, default_value_t = 20)]
        max_rows: usize,
    },
    /// Interactive chat on stdin
    Chat {
        #[arg(long, default_value_t = 20)]
        max_rows: usize,
    },
    /// Describe the database
    Summary,
}

/// Prints orchestrator progress to stderr.
struct ProgressPrinter;

impl TurnObserver for ProgressPrinter {
    fn on_event(&self, event: &TurnEvent) {
        match event {
            TurnEvent::Generating { attempt } if *attempt > 1 => {
                eprintln!("  … regenerating the query (attempt {})", attempt)
            }
            TurnEvent::Generating { .. } => eprintln!("  … generating SQL"),
            TurnEvent::Validated { is_valid: false, explanation, .. } => {
                eprintln!("  ! validation failed: {}", explanation)
            }
            TurnEvent::ProceedingDespiteWarning { .. } => {
                eprintln!("  ! running the query despite the validation warning")
            }
            TurnEvent::ExecutionFailed { class, .. } => eprintln!("  ! query failed ({})", class),
            TurnEvent::Correcting => eprintln!("  … asking for a corrected query"),
            _ => {}
        }
    }
}

fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(path) = &cli.metadata {
        config.metadata_path = path.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(key) = &cli.api_key {
        config.api_key = Some(key.clone());
    }
    if let Some(log_file) = &cli.log_file {
        config.log_file = Some(log_file.clone());
    }
}

async fn open_session(config: &AppConfig) -> Result<ChatSession> {
    let metadata = MetadataDocument::load(&config.metadata_path)
        .with_context(|| format!("loading metadata from {}", config.metadata_path.display()))?;

    let llm: Arc<dyn CompletionService> = Arc::new(
        LlmClient::new(
            config.require_api_key()?.to_string(),
            config.model.clone(),
            config.base_url.clone(),
        )
        .with_summary_model(config.summary_model.clone()),
    );

    let database = db::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;

    let session = ChatSession::new(metadata, config.mode, llm, database)?
        .with_observer(Arc::new(ProgressPrinter));
    Ok(session)
}

fn print_turn(turn: &ChatTurn, max_rows: usize) {
    let outcome = &turn.outcome;
    println!();
    if let Some(sql) = &outcome.sql {
        let label = if outcome.corrected { "SQL (corrected)" } else { "SQL" };
        println!("{}:\n{}\n", label, sql);
    }

    match outcome.status {
        TurnStatus::Ok => {}
        TurnStatus::Warning => println!("Warning: {}\n", outcome.message),
        TurnStatus::Error => {
            println!("Error: {}", outcome.message);
            return;
        }
    }

    if let Some(result) = &outcome.result {
        if result.is_empty() {
            println!("The query returned no rows.");
        } else {
            println!("{}", result.render_table(max_rows));
        }
    }
    if let Some(visualization) = &turn.visualization {
        println!("\nSuggested visualization: {}", visualization.describe());
    }
    if let Some(interpretation) = &turn.interpretation {
        println!("\nInterpretation: {}", interpretation.summary);
    }
}

async fn run_chat(mut session: ChatSession, max_rows: usize) -> Result<()> {
    println!("Retail chat. Ask a question, or type 'summary', 'history' or 'exit'.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "summary" => match session.summary().await {
                Ok(summary) => println!("{}", summary),
                Err(e) => println!("Error loading database summary: {}", e),
            },
            "history" => {
                for (i, turn) in session.history().iter().enumerate() {
                    println!(
                        "{:>3}. [{}] {} {}",
                        i + 1,
                        turn.outcome.status,
                        turn.asked_at.format("%H:%M:%S"),
                        turn.outcome.question
                    );
                }
            }
            question => {
                let turn = session.ask(question).await;
                print_turn(turn, max_rows);
            }
        }
    }
    Ok(())
}

/// Join the words of an `ask` question, rejecting an empty one before any
/// connection is opened.
fn question_text(words: &[String]) -> Result<String> {
    let question = words.join(" ");
    anyhow::ensure!(!question.trim().is_empty(), "no question given");
    Ok(question)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    apply_overrides(&cli, &mut config);

    logging::init_logging(&cli.log_level, config.log_file.as_deref())?;
    info!(
        database = %config.database_url,
        metadata = %config.metadata_path.display(),
        mode = ?config.mode,
        "Retail chat starting"
    );

    let question = match &cli.command {
        Command::Ask { question, .. } => Some(question_text(question)?),
        _ => None,
    };

    let mut session = open_session(&config).await?;

    match cli.command {
        Command::Ask { json, max_rows, .. } => {
            let turn = session.ask(question.as_deref().unwrap_or_default()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(turn)?);
            } else {
                print_turn(turn, max_rows);
            }
            if turn.outcome.status == TurnStatus::Error {
                std::process::exit(1);
            }
        }
        Command::Chat { max_rows } => run_chat(session, max_rows).await?,
        Command::Summary => println!("{}", session.summary().await?),
    }

    Ok(())
}
