//! Application configuration from the environment (and `.env`).

use crate::error::{ChatError, Result};
use crate::session::ContextMode;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/retail.db";
pub const DEFAULT_METADATA_PATH: &str = "data/metadata.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub summary_model: String,
    pub database_url: String,
    pub metadata_path: PathBuf,
    pub mode: ContextMode,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    /// Read `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = match get("RETAIL_CHAT_MODE") {
            Some(mode) => mode.parse()?,
            None => ContextMode::default(),
        };

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: get("RETAIL_CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            summary_model: get("RETAIL_CHAT_SUMMARY_MODEL")
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            metadata_path: get("RETAIL_CHAT_METADATA")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_METADATA_PATH)),
            mode,
            log_file: get("RETAIL_CHAT_LOG_FILE").map(PathBuf::from),
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ChatError::Config("OPENAI_API_KEY is not set (environment, .env or --api-key)".to_string())
        })
    }
}
