use crate::chat::ChatClient;
use crate::error::{RagError, Result};
use crate::gemini::GeminiClient;
use log::{debug, info};

/// Instruction sent as the system turn of every summary request
pub const SYSTEM_PROMPT: &str = "You are a financial analyst. Summarize the company's financial performance clearly and concisely.\n\
- Include key figures (revenue, net income, gross margin, operating margin, ROE, ROA).\n\
- Explain trends over the years and interpret them.\n\
- End with a short conclusion.\n\
- Keep it under 250 words, no lists.";

/// Separator placed between retrieved chunks in the user turn
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// One system + user exchange sent to a completion service
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A text-completion backend
#[allow(async_fn_in_trait)]
pub trait CompletionService {
    /// Whether an API key is available; checked before any request is made
    fn credentials_configured(&self) -> bool;

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;
}

/// Turns retrieved chunks into prose with a fixed analyst prompt
pub struct Summarizer<C: CompletionService> {
    service: C,
}

impl<C: CompletionService> Summarizer<C> {
    pub fn new(service: C) -> Self {
        Summarizer { service }
    }

    pub fn service(&self) -> &C {
        &self.service
    }

    /// Summarize the chunks. Fails with `CredentialsMissing` without contacting
    /// the service when no key is configured; service errors pass through as is.
    pub async fn summarize<S: AsRef<str>>(&self, chunks: &[S]) -> Result<String> {
        if !self.service.credentials_configured() {
            return Err(RagError::CredentialsMissing(
                "no API key configured for the completion service".to_string(),
            ));
        }

        let prompt = chunks
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<&str>>()
            .join(CHUNK_SEPARATOR);
        debug!(
            "Summarizing {} chunks ({} chars)",
            chunks.len(),
            prompt.len()
        );

        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT,
            user_prompt: &prompt,
            temperature: 0.2,
            max_tokens: 1024,
        };
        let summary = self.service.complete(&request).await?;
        info!("Received summary of {} chars", summary.len());

        Ok(summary.trim().to_string())
    }
}

/// Completion backend chosen at startup
pub enum CompletionProvider {
    /// OpenAI-compatible chat completions (DeepSeek by default)
    Chat(ChatClient),
    Gemini(GeminiClient),
}

impl CompletionService for CompletionProvider {
    fn credentials_configured(&self) -> bool {
        match self {
            CompletionProvider::Chat(client) => client.credentials_configured(),
            CompletionProvider::Gemini(client) => client.credentials_configured(),
        }
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        match self {
            CompletionProvider::Chat(client) => client.complete(request).await,
            CompletionProvider::Gemini(client) => client.complete(request).await,
        }
    }
}
