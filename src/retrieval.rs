//! Passage retrieval for the persona chat.
//!
//! The index is a prepared JSON file of text passages. Search is lexical:
//! each passage is scored by the share of query terms it contains.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::RetrievalError;

/// A chunk of source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Document the chunk was cut from.
    pub source: String,
    pub text: String,
}

/// A passage with its relevance score in `(0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Anything that can answer "which passages are relevant to this query".
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Up to `limit` passages, best first.
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError>;
}

/// In-memory passage index backed by a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassageIndex {
    passages: Vec<Passage>,
}

impl PassageIndex {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self { passages }
    }

    /// Load an index previously written by [`PassageIndex::save`].
    pub async fn load(path: &Path) -> Result<Self, RetrievalError> {
        if !fs::try_exists(path).await? {
            return Err(RetrievalError::IndexMissing {
                path: path.display().to_string(),
            });
        }
        let raw = fs::read_to_string(path).await?;
        let index: Self =
            serde_json::from_str(&raw).map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        tracing::info!(
            passages = index.passages.len(),
            "Loaded passage index from {}",
            path.display()
        );
        Ok(index)
    }

    pub async fn save(&self, path: &Path) -> Result<(), RetrievalError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        fs::write(path, raw).await?;
        Ok(())
    }

    /// Split raw documents into overlapping chunks of `chunk_chars` characters.
    ///
    /// `docs` are `(source, text)` pairs. Consecutive chunks share
    /// `overlap_chars` characters.
    pub fn from_documents(
        docs: &[(String, String)],
        chunk_chars: usize,
        overlap_chars: usize,
    ) -> Result<Self, RetrievalError> {
        if chunk_chars == 0 || overlap_chars >= chunk_chars {
            return Err(RetrievalError::Malformed(format!(
                "chunk size {chunk_chars} must be positive and larger than overlap {overlap_chars}"
            )));
        }
        let step = chunk_chars - overlap_chars;

        let mut passages = Vec::new();
        for (source, text) in docs {
            let chars: Vec<char> = text.chars().collect();
            let mut start = 0;
            while start < chars.len() {
                let end = (start + chunk_chars).min(chars.len());
                let chunk: String = chars[start..end].iter().collect();
                if !chunk.trim().is_empty() {
                    passages.push(Passage {
                        source: source.clone(),
                        text: chunk.trim().to_string(),
                    });
                }
                if end == chars.len() {
                    break;
                }
                start += step;
            }
        }
        Ok(Self { passages })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Score every passage against `query`, best first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ScoredPassage> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<ScoredPassage> = self
            .passages
            .iter()
            .filter_map(|p| {
                let text_lower = p.text.to_lowercase();
                let matched = terms.iter().filter(|t| text_lower.contains(t.as_str())).count();
                (matched > 0).then(|| ScoredPassage {
                    passage: p.clone(),
                    score: matched as f32 / terms.len() as f32,
                })
            })
            .collect();

        // Sort by score descending
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        results
    }
}

/// Lowercased, de-duplicated alphanumeric terms.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl DocumentRetriever for PassageIndex {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        Ok(self
            .search(query, limit)
            .into_iter()
            .map(|r| r.passage)
            .collect())
    }
}
