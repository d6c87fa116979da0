use crate::config::env_opt;
use crate::embeddings::{EmbeddingBackend, ModelLoader};
use crate::error::{RagError, Result};
use crate::summarizer::{CompletionRequest, CompletionService};
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_EMBEDDING_MODEL: &str = "models/text-embedding-004";
pub const DEFAULT_GEMINI_GENERATE_MODEL: &str = "models/gemini-2.0-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Configuration for Gemini API
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub generate_model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables.
    /// A missing `GEMINI_API_KEY` is reported when the client is first used.
    pub fn from_env(timeout: Duration) -> Self {
        GeminiConfig {
            api_key: env_opt("GEMINI_API_KEY"),
            base_url: env_opt("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            embedding_model: env_opt("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_EMBEDDING_MODEL.to_string()),
            generate_model: env_opt("GEMINI_GENERATE_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_GENERATE_MODEL.to_string()),
            timeout,
        }
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(GeminiClient { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Auth headers; the key is never put in the URL
    fn headers(&self) -> Result<HeaderMap> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| RagError::CredentialsMissing("GEMINI_API_KEY".to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| RagError::CredentialsMissing("invalid GEMINI_API_KEY".to_string()))?,
        );
        Ok(headers)
    }

    /// Check that a model exists and is reachable
    pub async fn get_model(&self, model: &str) -> Result<ModelInfo> {
        let response = self
            .client
            .get(self.url(model))
            .headers(self.headers()?)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Generate embeddings for a batch of texts
    pub async fn batch_embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = self.config.embedding_model.as_str();
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model,
                    content: Content {
                        parts: vec![Part { text }],
                        role: None,
                    },
                })
                .collect(),
        };

        let url = self.url(&format!("{}:batchEmbedContents", model));
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let response_data: BatchEmbedResponse = response.json().await?;
        Ok(response_data
            .embeddings
            .into_iter()
            .map(|e| e.values)
            .collect())
    }

    /// Generate text with a system instruction using the configured model
    pub async fn generate_text(
        &self,
        system_prompt: &str,
        prompt: &str,
        temperature: f32,
        max_output_tokens: i32,
    ) -> Result<String> {
        let model = self.config.generate_model.as_str();
        let request = GenerateRequest {
            system_instruction: Content {
                parts: vec![Part {
                    text: system_prompt,
                }],
                role: None,
            },
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
                role: Some("user"),
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens,
            },
        };

        let url = self.url(&format!("{}:generateContent", model));
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let response_data: GenerateResponse = response.json().await?;

        response_data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| RagError::Upstream("Gemini returned no candidates".to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(RagError::Upstream(format!(
        "API request failed: {} {}",
        status, error_text
    )))
}

/// Gemini embedding model, verified reachable at load time
pub struct GeminiEmbeddingModel {
    client: GeminiClient,
    model_id: String,
}

impl EmbeddingBackend for GeminiEmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.client.batch_embed(texts).await
    }
}

impl ModelLoader for GeminiConfig {
    type Model = GeminiEmbeddingModel;

    async fn load(&self) -> Result<GeminiEmbeddingModel> {
        if self.api_key.is_none() {
            return Err(RagError::ModelUnavailable(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }
        let client = GeminiClient::new(self.clone())?;
        let info = client
            .get_model(&self.embedding_model)
            .await
            .map_err(|e| RagError::ModelUnavailable(format!("{}: {}", self.embedding_model, e)))?;
        info!("Using Gemini embedding model {}", info.name);
        debug!("Model details: {:?}", info);

        Ok(GeminiEmbeddingModel {
            client,
            model_id: self.embedding_model.clone(),
        })
    }
}

impl CompletionService for GeminiClient {
    fn credentials_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        self.generate_text(
            request.system_prompt,
            request.user_prompt,
            request.temperature,
            request.max_tokens as i32,
        )
        .await
    }
}

/// Metadata returned by `GET models/{model}`
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub input_token_limit: Option<u32>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: i32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> GeminiConfig {
        GeminiConfig {
            api_key: api_key.map(str::to_string),
            base_url: "http://127.0.0.1:9/v1beta/".to_string(),
            embedding_model: DEFAULT_GEMINI_EMBEDDING_MODEL.to_string(),
            generate_model: DEFAULT_GEMINI_GENERATE_MODEL.to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_key_sent_as_header() {
        let client = GeminiClient::new(config(None)).unwrap();
        assert!(matches!(
            client.headers(),
            Err(RagError::CredentialsMissing(_))
        ));
        assert!(!client.credentials_configured());

        let client = GeminiClient::new(config(Some("k"))).unwrap();
        assert_eq!(
            client.url("models/x:generateContent"),
            "http://127.0.0.1:9/v1beta/models/x:generateContent"
        );
        assert_eq!(client.headers().unwrap()[API_KEY_HEADER], "k");
    }

    #[tokio::test]
    async fn test_transport_errors_do_not_contain_key() {
        let client = GeminiClient::new(config(Some("SECRETKEY123"))).unwrap();

        let err = client.batch_embed(&["x"]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!err.to_string().contains("SECRETKEY123"), "{}", err);

        let err = client.generate_text("sys", "body", 0.2, 16).await.unwrap_err();
        assert!(!err.to_string().contains("SECRETKEY123"), "{}", err);

        let err = config(Some("SECRETKEY123")).load().await.err().unwrap();
        assert!(matches!(err, RagError::ModelUnavailable(_)));
        assert!(!err.to_string().contains("SECRETKEY123"), "{}", err);
    }

    #[tokio::test]
    async fn test_load_without_key_is_model_unavailable() {
        let err = config(None).load().await.err().unwrap();
        assert!(matches!(err, RagError::ModelUnavailable(_)));
    }

    #[test]
    fn test_generate_request_shape() {
        let request = GenerateRequest {
            system_instruction: Content {
                parts: vec![Part { text: "sys" }],
                role: None,
            },
            contents: vec![Content {
                parts: vec![Part { text: "body" }],
                role: Some("user"),
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: 512,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "sys");
        assert!(json["system_instruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generation_config"]["max_output_tokens"], 512);
    }
}
