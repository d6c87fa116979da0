use log::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Words per chunk window
pub const DEFAULT_CHUNK_WINDOW: usize = 500;
/// Words shared between consecutive windows
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
/// Chunks handed to the summarizer
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SUMMARY_TTL_SECS: u64 = 900;

/// Tunables for one pipeline run
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub chunk_window: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embed_batch_size: usize,
    pub http_timeout: Duration,
    pub summary_ttl: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        RagConfig {
            chunk_window: DEFAULT_CHUNK_WINDOW,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            summary_ttl: Duration::from_secs(DEFAULT_SUMMARY_TTL_SECS),
        }
    }
}

impl RagConfig {
    /// Create a configuration from environment variables, falling back to the defaults
    pub fn from_env() -> Self {
        let defaults = RagConfig::default();
        RagConfig {
            chunk_window: env_or("RAG_CHUNK_WINDOW", defaults.chunk_window),
            chunk_overlap: env_or("RAG_CHUNK_OVERLAP", defaults.chunk_overlap),
            top_k: env_or("RAG_TOP_K", defaults.top_k),
            embed_batch_size: env_or("RAG_EMBED_BATCH_SIZE", defaults.embed_batch_size).max(1),
            http_timeout: Duration::from_secs(env_or(
                "RAG_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            summary_ttl: Duration::from_secs(env_or(
                "RAG_SUMMARY_TTL_SECS",
                DEFAULT_SUMMARY_TTL_SECS,
            )),
        }
    }

    /// The fixed retrieval query for a ticker
    pub fn query_for(&self, ticker: &str) -> String {
        format!(
            "Summarize {}'s financial performance for the last 5 years",
            ticker
        )
    }
}

/// Read an optional, non-empty environment variable
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse an environment variable, keeping `default` when unset or unparsable
pub fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
