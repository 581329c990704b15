use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::datasource::Document;
use crate::graph::error::GraphError;

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+").expect("token pattern"))
}

/// A bounded slice of a document handed to the extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: Uuid,
    pub title: String,
    pub index: usize,
    pub text: String,
    pub token_count: usize,
}

/// Splits text into windows of at most `chunk_size` whitespace-delimited
/// tokens. Windows start `chunk_size - chunk_overlap` tokens apart and keep
/// the original spacing between their tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TokenTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, GraphError> {
        if chunk_size == 0 {
            return Err(GraphError::InvalidConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(GraphError::InvalidConfig(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn count_tokens(text: &str) -> usize {
        token_pattern().find_iter(text).count()
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let spans: Vec<(usize, usize)> = token_pattern()
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();

        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < spans.len() {
            let end = (start + self.chunk_size).min(spans.len());
            chunks.push(text[spans[start].0..spans[end - 1].1].to_string());
            if end == spans.len() {
                break;
            }
            start += step;
        }
        chunks
    }

    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        self.split_text(&document.content)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                document_id: document.id,
                title: document.title.clone(),
                index,
                token_count: Self::count_tokens(&text),
                text,
            })
            .collect()
    }

    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|document| self.split_document(document))
            .collect()
    }
}
