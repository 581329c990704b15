use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::{
    generation::{completion::request::GenerationRequest, options::GenerationOptions},
    Ollama,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::external::error::ExternalError;

#[cfg(test)]
use mockall::automock;

/// Shape the model is asked to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// A single prompt sent to a language model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub format: ResponseFormat,
}

impl CompletionRequest {
    pub fn text(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            format: ResponseFormat::Text,
        }
    }

    pub fn json(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            format: ResponseFormat::Json,
        }
    }
}

/// Request/response boundary to whatever model serves extraction and answers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub model: String,
    pub host: String,
    pub port: u16,
    pub temperature: f32,
    pub top_p: f32,
    /// Upper bound for a single model call
    pub timeout_secs: u64,
    /// Attempts per extraction call, including the first one
    pub max_attempts: usize,
}

impl LLMConfig {
    /// Get the full URL for the Ollama service
    pub fn get_url(&self) -> Result<String, ExternalError> {
        let url = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        };

        Url::parse(&url).map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;

        Ok(url)
    }

    /// Point the config at a full endpoint such as `http://gpu-box:11434`
    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<(), ExternalError> {
        let url = Url::parse(endpoint)
            .map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ExternalError::ConfigError(format!("No host in {}", endpoint)))?;

        self.host = format!("{}://{}", url.scheme(), host);
        self.port = url.port_or_known_default().unwrap_or(self.port);
        Ok(())
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            model: "mistral".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            temperature: 0.0,
            top_p: 0.9,
            timeout_secs: 120,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Ollama-backed model: plain completions go through `ollama-rs`, JSON-mode
/// requests through the chat endpoint so the server enforces the format.
pub struct OllamaModel {
    client: Ollama,
    http: Client,
    endpoint: String,
    config: LLMConfig,
}

impl OllamaModel {
    pub fn new(config: LLMConfig) -> Result<Self, ExternalError> {
        let endpoint = config.get_url()?;
        let url = Url::parse(&endpoint)
            .map_err(|e| ExternalError::ConfigError(format!("Invalid URL: {}", e)))?;

        let client = Ollama::new(
            format!("{}://{}", url.scheme(), url.host_str().unwrap_or("localhost")),
            config.port,
        );

        Ok(Self {
            client,
            http: Client::new(),
            endpoint,
            config,
        })
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    async fn generate_text(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        let prompt = if request.system.is_empty() {
            request.prompt.clone()
        } else {
            format!("{}\n\n{}", request.system, request.prompt)
        };
        let mut generation = GenerationRequest::new(self.config.model.clone(), prompt);

        let options = GenerationOptions::default()
            .temperature(self.config.temperature)
            .top_p(self.config.top_p);

        generation.options = Some(options);

        let response = self
            .client
            .generate(generation)
            .await
            .map_err(|e| ExternalError::OllamaError(e.to_string()))?;

        Ok(response.response)
    }

    async fn chat_json(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        let response = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .json(&serde_json::json!({
                "model": &self.config.model,
                "messages": [
                    { "role": "system", "content": &request.system },
                    { "role": "user", "content": &request.prompt }
                ],
                "stream": false,
                "format": "json",
                "options": {
                    "temperature": self.config.temperature,
                    "top_p": self.config.top_p
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::OllamaError(format!("{}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::InvalidResponse(e.to_string()))?;
        Ok(chat.message.content)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        debug!(
            model = %self.config.model,
            format = ?request.format,
            prompt_chars = request.prompt.len(),
            "sending completion request"
        );
        let call = async {
            match request.format {
                ResponseFormat::Text => self.generate_text(request).await,
                ResponseFormat::Json => self.chat_json(request).await,
            }
        };

        tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), call)
            .await
            .map_err(|_| ExternalError::Timeout(self.config.timeout_secs))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_generation() {
        // Test with plain hostname
        let config = LLMConfig {
            host: "localhost".to_string(),
            ..LLMConfig::default()
        };
        assert_eq!(config.get_url().unwrap(), "http://localhost:11434");

        // Test with https:// prefix
        let config = LLMConfig {
            host: "https://example.com/".to_string(),
            port: 8443,
            ..LLMConfig::default()
        };
        assert_eq!(config.get_url().unwrap(), "https://example.com:8443");
    }

    #[test]
    fn test_set_endpoint() {
        let mut config = LLMConfig::default();
        config.set_endpoint("http://gpu-box:9999").unwrap();
        assert_eq!(config.host, "http://gpu-box");
        assert_eq!(config.port, 9999);
        assert_eq!(config.get_url().unwrap(), "http://gpu-box:9999");

        assert!(config.set_endpoint("not a url").is_err());
    }

    #[test]
    fn test_transient_errors() {
        assert!(ExternalError::Timeout(5).is_transient());
        assert!(ExternalError::ConnectionError("refused".into()).is_transient());
        assert!(!ExternalError::ConfigError("bad".into()).is_transient());
    }

    #[tokio::test]
    async fn test_mocked_completion() {
        let mut mock = MockLanguageModel::new();
        mock.expect_complete()
            .withf(|req| req.format == ResponseFormat::Json)
            .times(1)
            .returning(|_| Ok(r#"{"entities": []}"#.to_string()));

        let request = CompletionRequest::json("system", "prompt");
        let response = mock.complete(&request).await.unwrap();
        assert_eq!(response, r#"{"entities": []}"#);
    }
}
