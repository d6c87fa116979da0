use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Cleaned filing text for one company, keyed by ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Uppercase ticker; unique key in every store
    pub ticker: String,
    /// Cleaned filing text fed to the chunker
    pub text: String,
    /// Precomputed multi-year trend prose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_summary: Option<String>,
    /// Precomputed per-year figures table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_summary: Option<String>,
}

impl Document {
    pub fn new(ticker: &str, text: impl Into<String>) -> Self {
        Document {
            ticker: normalize_ticker(ticker),
            text: text.into(),
            trend_summary: None,
            table_summary: None,
        }
    }

    /// Create a new document from a text or PDF file
    pub fn from_file<P: AsRef<Path>>(ticker: &str, file_path: P) -> Result<Self> {
        let path = file_path.as_ref();

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let content = read_document_content(path, &mime_type)?;
        Ok(Document::new(ticker, content))
    }

    /// Whether the document carries any text worth chunking
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Trend and table previews joined into one block
    pub fn preview(&self) -> String {
        let trend = self.trend_summary.as_deref().unwrap_or("");
        let table = self.table_summary.as_deref().unwrap_or("");
        format!("{}\n\n{}", trend, table).trim().to_string()
    }

    /// Decode a stored record whose field names vary between data vintages
    pub fn from_record(record: &Value) -> Result<Self> {
        let object = record
            .as_object()
            .ok_or_else(|| RagError::Storage("document record is not an object".to_string()))?;

        let ticker = FieldAliases::TICKER
            .resolve(object)
            .ok_or_else(|| RagError::Storage("document record has no ticker".to_string()))?;
        let text = FieldAliases::TEXT.resolve(object).unwrap_or_default();

        Ok(Document {
            ticker: normalize_ticker(&ticker),
            text,
            trend_summary: FieldAliases::TREND.resolve(object),
            table_summary: FieldAliases::TABLE.resolve(object),
        })
    }
}

/// Trim and uppercase a ticker symbol
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Acceptable field names for one logical field, most preferred first
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub field: &'static str,
    pub names: &'static [&'static str],
}

impl FieldAliases {
    pub const TICKER: FieldAliases = FieldAliases {
        field: "ticker",
        names: &["_id", "symbol", "Symbol", "ticker"],
    };
    pub const TEXT: FieldAliases = FieldAliases {
        field: "text",
        names: &["sec_text_full_clean", "text", "content"],
    };
    pub const TREND: FieldAliases = FieldAliases {
        field: "trend_summary",
        names: &["trend_summary", "trendSummary"],
    };
    pub const TABLE: FieldAliases = FieldAliases {
        field: "table_summary",
        names: &["table_summary", "tableSummary"],
    };

    /// First alias present with a string value (numbers are stringified)
    pub fn resolve(&self, object: &Map<String, Value>) -> Option<String> {
        self.names.iter().find_map(|name| match object.get(*name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let content = extract_text(path).map_err(|e| {
                RagError::Storage(format!(
                    "failed to extract text from PDF {}: {}",
                    path.display(),
                    e
                ))
            })?;

            // PDF extraction can sometimes include excessive whitespace
            let cleaned_content = normalize_whitespace(&content);

            if cleaned_content.is_empty() {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }

            Ok(cleaned_content)
        }

        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)?;
            Ok(normalize_whitespace(&content))
        }

        _ => Err(RagError::Storage(format!(
            "unsupported document format: {}. Only text and PDF files are supported.",
            mime_type
        ))),
    }
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // Add at most two newlines (paragraph break)
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_record_with_legacy_field_names() {
        let record = json!({
            "_id": "aapl",
            "sec_text_full_clean": "Revenue increased 8% driven by services.",
            "trend_summary": "Apple Inc. trends",
        });
        let doc = Document::from_record(&record).unwrap();
        assert_eq!(doc.ticker, "AAPL");
        assert_eq!(doc.text, "Revenue increased 8% driven by services.");
        assert_eq!(doc.trend_summary.as_deref(), Some("Apple Inc. trends"));
        assert_eq!(doc.table_summary, None);
    }

    #[test]
    fn test_record_alias_order() {
        let record = json!({
            "symbol": "MSFT",
            "ticker": "IGNORED",
            "content": "fallback text",
        });
        let doc = Document::from_record(&record).unwrap();
        assert_eq!(doc.ticker, "MSFT");
        assert_eq!(doc.text, "fallback text");
    }

    #[test]
    fn test_record_without_ticker_is_rejected() {
        let err = Document::from_record(&json!({"text": "orphan"})).unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
        assert!(Document::from_record(&json!("not an object")).is_err());
    }

    #[test]
    fn test_record_without_text_is_blank() {
        let doc = Document::from_record(&json!({"_id": "ZZZ"})).unwrap();
        assert!(!doc.has_text());
    }

    #[test]
    fn test_preview_joins_available_parts() {
        let mut doc = Document::new(" demo ", "body");
        assert_eq!(doc.ticker, "DEMO");
        assert_eq!(doc.preview(), "");
        doc.table_summary = Some("2023: Revenue 10".to_string());
        assert_eq!(doc.preview(), "2023: Revenue 10");
        doc.trend_summary = Some("Trends".to_string());
        assert_eq!(doc.preview(), "Trends\n\n2023: Revenue 10");
    }

    #[test]
    fn test_from_text_file() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "Net income  rose.\r\n\r\n\r\nMargins held.").unwrap();
        let doc = Document::from_file("nvda", file.path()).unwrap();
        assert_eq!(doc.ticker, "NVDA");
        assert_eq!(doc.text, "Net income rose.\n\nMargins held.");
    }

    #[test]
    fn test_unsupported_format() {
        let file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        assert!(Document::from_file("X", file.path()).is_err());
    }
}
