//! External inference boundary.
//!
//! The insight stage may ask a language model for a free-text annotation.
//! The answer is attached to the context as-is and never parsed, so any
//! backend that turns a prompt plus a JSON context into text will do.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Produces free text for a prompt and a structured context.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(&self, prompt: &str, context: &Value) -> Result<String>;
}

/// Settings for the Ollama backend.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// [`Inference`] backed by a local Ollama server.
pub struct OllamaInference {
    config: InferenceConfig,
    http_client: reqwest::Client,
}

impl OllamaInference {
    pub fn new(config: InferenceConfig) -> Result<Self> {
        info!(
            "Using Ollama model {} at {}",
            config.model_name, config.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn build_request(&self, prompt: &str, context: &Value) -> OllamaChatRequest {
        let mut user = String::new();
        user.push_str(prompt);
        user.push_str("\n\n=== ANALYSIS CONTEXT ===\n");
        user.push_str(&serde_json::to_string_pretty(context).unwrap_or_default());
        user.push_str("\n=== END OF CONTEXT ===\n");

        OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: ANNOTATION_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        }
    }
}

#[async_trait]
impl Inference for OllamaInference {
    async fn infer(&self, prompt: &str, context: &Value) -> Result<String> {
        let url = format!("{}/api/chat", self.config.ollama_url);
        let request = self.build_request(prompt, context);

        debug!("Sending annotation request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.ollama_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

/// System prompt for the annotation request.
const ANNOTATION_SYSTEM_PROMPT: &str = r#"You are a business data analyst.
You receive pre-computed statistics about a dataset as JSON.
Write a short commentary (at most five sentences) on what the numbers suggest.
Do not repeat the raw numbers and do not invent figures that are not in the context."#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inference_config_default() {
        let config = InferenceConfig::default();
        assert_eq!(config.model_name, "llama3.2:latest");
        assert_eq!(config.timeout_seconds, 120);
    }

    #[test]
    fn test_request_embeds_context() {
        let backend = OllamaInference::new(InferenceConfig::default()).unwrap();
        let request = backend.build_request("Summarize", &json!({"trend": "increasing"}));

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[1].content.starts_with("Summarize"));
        assert!(request.messages[1].content.contains("\"trend\": \"increasing\""));
        assert!(!request.stream);
    }
}
