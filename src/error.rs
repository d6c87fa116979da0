use thiserror::Error;

/// Coarse classification of a [`RagError`], for callers that branch on the
/// failure class and log the message separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoContent,
    ModelUnavailable,
    EmptyInput,
    IndexNotBuilt,
    CredentialsMissing,
    Upstream,
    Timeout,
    DimensionMismatch,
    PayloadMismatch,
    ModelMismatch,
    InvalidTicker,
    Cancelled,
    DocumentExists,
    Storage,
}

/// Errors produced by the summary pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("no document text found for {ticker}")]
    NoContent { ticker: String },
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("cannot build an index from zero vectors")]
    EmptyInput,
    #[error("retrieval attempted before an index was built")]
    IndexNotBuilt,
    #[error("completion service credentials are not configured ({0})")]
    CredentialsMissing(String),
    #[error("upstream service error: {0}")]
    Upstream(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{vectors} vectors but {payloads} payloads")]
    PayloadMismatch { vectors: usize, payloads: usize },
    #[error("index built with model {index} but queried with {query}")]
    ModelMismatch { index: String, query: String },
    #[error("invalid ticker {0:?}")]
    InvalidTicker(String),
    #[error("pipeline cancelled before {0}")]
    Cancelled(&'static str),
    #[error("document for {0} already exists")]
    DocumentExists(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::NoContent { .. } => ErrorKind::NoContent,
            RagError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            RagError::EmptyInput => ErrorKind::EmptyInput,
            RagError::IndexNotBuilt => ErrorKind::IndexNotBuilt,
            RagError::CredentialsMissing(_) => ErrorKind::CredentialsMissing,
            RagError::Upstream(_) => ErrorKind::Upstream,
            RagError::Timeout(_) => ErrorKind::Timeout,
            RagError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            RagError::PayloadMismatch { .. } => ErrorKind::PayloadMismatch,
            RagError::ModelMismatch { .. } => ErrorKind::ModelMismatch,
            RagError::InvalidTicker(_) => ErrorKind::InvalidTicker,
            RagError::Cancelled(_) => ErrorKind::Cancelled,
            RagError::DocumentExists(_) => ErrorKind::DocumentExists,
            RagError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether retrying the whole pipeline later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Upstream | ErrorKind::Timeout)
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            RagError::Timeout(err.to_string())
        } else {
            RagError::Upstream(err.to_string())
        }
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
