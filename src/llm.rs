use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What a completion request is for. Clients may route purposes to different
/// models, and test doubles script their answers per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Generate,
    Validate,
    Correct,
    Summarize,
    Interpret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub kind: PromptKind,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Ask the service for a JSON object response.
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(kind: PromptKind, messages: Vec<ChatMessage>) -> Self {
        Self {
            kind,
            messages,
            temperature: 0.1,
            max_tokens: 500,
            json_response: false,
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    /// Concatenated message contents, handy for logging and assertions.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}] {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A text-completion service. Answers are free-form text; callers must
/// tolerate malformed or off-format responses.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    summary_model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            summary_model: model.clone(),
            model,
        }
    }

    /// Use a separate (usually cheaper) model for database summaries.
    pub fn with_summary_model(mut self, summary_model: String) -> Self {
        self.summary_model = summary_model;
        self
    }

    pub fn model_for(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Summarize => &self.summary_model,
            _ => &self.model,
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let model = self.model_for(request.kind);
        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        // Reasoning models spend tokens before answering and take the newer limit field
        if model.starts_with("gpt-5") || model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens.max(2000));
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        if request.json_response {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.build_body(request);
        debug!(kind = ?request.kind, "Calling completion service");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&response_json)
    }
}

/// Pull the first choice's message content out of a chat completions body.
fn extract_content(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(ChatError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ChatError::Llm("No choices array in LLM response".to_string()))?;

    let first = choices
        .first()
        .ok_or_else(|| ChatError::Llm("Empty choices array in LLM response".to_string()))?;

    match first.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(ChatError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = first["message"]["content"]
        .as_str()
        .ok_or_else(|| ChatError::Llm("No content in LLM response".to_string()))?;

    if content.trim().is_empty() {
        return Err(ChatError::Llm("Empty content in LLM response".to_string()));
    }

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LlmClient {
        LlmClient::new(
            "key".to_string(),
            "gpt-4o".to_string(),
            "http://localhost".to_string(),
        )
        .with_summary_model("gpt-4o-mini".to_string())
    }

    #[test]
    fn test_summary_requests_use_summary_model() {
        let client = client();
        assert_eq!(client.model_for(PromptKind::Summarize), "gpt-4o-mini");
        assert_eq!(client.model_for(PromptKind::Generate), "gpt-4o");
    }

    #[test]
    fn test_body_requests_json_object() {
        let request = CompletionRequest::new(PromptKind::Validate, vec![ChatMessage::user("hi")])
            .max_tokens(300)
            .json();
        let body = client().build_body(&request);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_extract_content() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "SELECT 1"}, "finish_reason": "stop"}]
        });
        assert_eq!(extract_content(&body).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_extract_content_errors() {
        let error_body = serde_json::json!({"error": {"message": "bad key"}});
        assert!(matches!(extract_content(&error_body), Err(ChatError::Llm(_))));

        let empty = serde_json::json!({"choices": []});
        assert!(extract_content(&empty).is_err());

        let filtered = serde_json::json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]
        });
        assert!(extract_content(&filtered).is_err());

        let blank = serde_json::json!({"choices": [{"message": {"content": "  "}}]});
        assert!(extract_content(&blank).is_err());
    }
}
