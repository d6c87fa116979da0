//! OpenAI-compatible chat completions client (DeepSeek by default).

use crate::config::env_opt;
use crate::error::{RagError, Result};
use crate::summarizer::{CompletionRequest, CompletionService};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_CHAT_MODEL: &str = "deepseek-chat";

/// Configuration for the chat completions endpoint
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl ChatConfig {
    /// Create a new configuration from environment variables
    pub fn from_env(timeout: Duration) -> Self {
        ChatConfig {
            api_key: env_opt("DEEPSEEK_API_KEY"),
            base_url: env_opt("DEEPSEEK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CHAT_BASE_URL.to_string()),
            model: env_opt("DEEPSEEK_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            timeout,
        }
    }
}

#[derive(Clone)]
pub struct ChatClient {
    config: ChatConfig,
    endpoint: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(ChatClient {
            config,
            endpoint,
            client,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::CredentialsMissing("DEEPSEEK_API_KEY".to_string()))?;
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RagError::CredentialsMissing("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

impl CompletionService for ChatClient {
    fn credentials_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: request.user_prompt,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::Upstream(format!(
                "chat completions returned {}: {}",
                status, text
            )));
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RagError::Upstream("chat completions returned no choices".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> ChatConfig {
        ChatConfig {
            api_key: api_key.map(str::to_string),
            base_url: "https://api.deepseek.com/".to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_endpoint_and_credentials() {
        let client = ChatClient::new(config(Some("sk-test"))).unwrap();
        assert_eq!(client.endpoint, "https://api.deepseek.com/chat/completions");
        assert!(client.credentials_configured());
        let headers = client.headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");

        let client = ChatClient::new(config(None)).unwrap();
        assert!(!client.credentials_configured());
        assert!(matches!(
            client.headers(),
            Err(RagError::CredentialsMissing(_))
        ));
    }

    #[test]
    fn test_response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Revenue grew."}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.choices[0].message.content, "Revenue grew.");
    }
}
