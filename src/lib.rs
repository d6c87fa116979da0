pub mod chat;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod index;
pub mod rag;
pub mod retriever;
pub mod service;
pub mod store;
pub mod summarizer;

pub use error::{ErrorKind, RagError};
pub use rag::RagEngine;
