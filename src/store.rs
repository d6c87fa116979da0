use crate::document::{normalize_ticker, Document};
use crate::error::{RagError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

/// Lookup-by-ticker access to persisted filing documents
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// All documents stored for `ticker`; empty (not an error) when there are none
    async fn get_documents(&self, ticker: &str) -> Result<Vec<Document>>;
}

/// In-process store, mostly for tests and demos
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, refusing to replace an existing ticker
    pub fn insert(&self, document: Document) -> Result<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| RagError::Storage("document map poisoned".to_string()))?;
        if documents.contains_key(&document.ticker) {
            return Err(RagError::DocumentExists(document.ticker));
        }
        documents.insert(document.ticker.clone(), document);
        Ok(())
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn get_documents(&self, ticker: &str) -> Result<Vec<Document>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| RagError::Storage("document map poisoned".to_string()))?;
        Ok(documents
            .get(&normalize_ticker(ticker))
            .cloned()
            .into_iter()
            .collect())
    }
}

/// A summary persisted next to the documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSummary {
    pub ticker: String,
    pub summary: String,
}

/// Directory-backed store: `<root>/<TICKER>.json` per document and
/// `<root>/analysis/<TICKER>.json` per summary
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("analysis"))?;
        Ok(FileDocumentStore { root })
    }

    fn document_path(&self, ticker: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(ticker)))
    }

    fn summary_path(&self, ticker: &str) -> PathBuf {
        self.root
            .join("analysis")
            .join(format!("{}.json", file_stem(ticker)))
    }

    /// Fetch the single document for `ticker`
    pub fn get(&self, ticker: &str) -> Result<Option<Document>> {
        let path = self.document_path(ticker);
        if !path.exists() {
            return Ok(None);
        }
        let record: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Document::from_record(&record).map(Some)
    }

    /// Persist a new document; an existing document for the ticker is never overwritten
    pub fn insert(&self, document: &Document) -> Result<()> {
        let path = self.document_path(&document.ticker);
        if path.exists() {
            return Err(RagError::DocumentExists(document.ticker.clone()));
        }
        fs::write(&path, serde_json::to_string_pretty(document)?)?;
        info!("Saved document for {} to {}", document.ticker, path.display());
        Ok(())
    }

    /// Upsert the summary for a ticker
    pub fn save_summary(&self, ticker: &str, summary: &str) -> Result<()> {
        let record = StoredSummary {
            ticker: normalize_ticker(ticker),
            summary: summary.to_string(),
        };
        fs::write(
            self.summary_path(ticker),
            serde_json::to_string_pretty(&record)?,
        )?;
        Ok(())
    }

    pub fn get_summary(&self, ticker: &str) -> Result<Option<String>> {
        let path = self.summary_path(ticker);
        if !path.exists() {
            return Ok(None);
        }
        let record: StoredSummary = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok(Some(record.summary))
    }
}

impl DocumentStore for FileDocumentStore {
    async fn get_documents(&self, ticker: &str) -> Result<Vec<Document>> {
        Ok(self.get(ticker)?.into_iter().collect())
    }
}

/// Keep only characters that are safe in a file name
fn file_stem(ticker: &str) -> String {
    normalize_ticker(ticker)
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Store served over HTTP by the dashboard controller (`GET {base}/document/{TICKER}`)
pub struct HttpDocumentStore {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize, Debug)]
struct DocumentResponse {
    exists: bool,
    #[serde(default)]
    document: Option<Value>,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpDocumentStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl DocumentStore for HttpDocumentStore {
    async fn get_documents(&self, ticker: &str) -> Result<Vec<Document>> {
        let url = format!("{}/document/{}", self.base_url, normalize_ticker(ticker));
        debug!("Fetching documents from {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        parse_document_response(status, &body)
    }
}

/// Map a controller reply to the ticker's documents. A missing document is an
/// empty result, whether the controller says so with 404 or `exists: false`.
fn parse_document_response(status: reqwest::StatusCode, body: &str) -> Result<Vec<Document>> {
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(RagError::Upstream(format!(
            "document store returned {}: {}",
            status, body
        )));
    }

    let response: DocumentResponse = serde_json::from_str(body)
        .map_err(|e| RagError::Upstream(format!("malformed document store reply: {}", e)))?;
    match response.document {
        Some(record) if response.exists => Ok(vec![Document::from_record(&record)?]),
        _ => Ok(Vec::new()),
    }
}

/// Document store chosen at startup
pub enum DocumentSource {
    Http(HttpDocumentStore),
    File(FileDocumentStore),
}

impl DocumentStore for DocumentSource {
    async fn get_documents(&self, ticker: &str) -> Result<Vec<Document>> {
        match self {
            DocumentSource::Http(store) => store.get_documents(ticker).await,
            DocumentSource::File(store) => store.get_documents(ticker).await,
        }
    }
}
