//! Document context for retrieval-grounded refinement
//!
//! The engine only needs two things from a document store: a cheap check
//! for whether anything has been uploaded, and a ranked search. `DocumentIndex`
//! is a small in-memory term-overlap index good enough for a single
//! process; anything smarter plugs in behind the same trait.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

const CHUNK_SIZE: usize = 1500;
const CHUNK_OVERLAP: usize = 200;

/// One ranked search hit. Lower `score` is closer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSnippet {
    pub text: String,
    pub source: String,
    pub score: f32,
}

/// Display bucket for a distance score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    pub fn from_distance(distance: f32) -> Self {
        if distance < 0.4 {
            Relevance::High
        } else if distance < 0.6 {
            Relevance::Medium
        } else {
            Relevance::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Relevance::High => "High",
            Relevance::Medium => "Medium",
            Relevance::Low => "Low",
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait DocumentContextProvider: Send + Sync {
    /// Whether any document has been ingested
    fn has_context(&self) -> bool;

    /// Up to `k` snippets, ascending by distance
    async fn search(&self, query: &str, k: usize) -> Result<Vec<DocumentSnippet>, DocumentError>;
}

#[async_trait]
impl<T: DocumentContextProvider + ?Sized> DocumentContextProvider for Arc<T> {
    fn has_context(&self) -> bool {
        (**self).has_context()
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<DocumentSnippet>, DocumentError> {
        (**self).search(query, k).await
    }
}

/// Provider for deployments without a document store
pub struct NoDocuments;

#[async_trait]
impl DocumentContextProvider for NoDocuments {
    fn has_context(&self) -> bool {
        false
    }

    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<DocumentSnippet>, DocumentError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    source: String,
    text: String,
    terms: HashSet<String>,
}

/// In-memory chunk index
#[derive(Default)]
pub struct DocumentIndex {
    chunks: RwLock<Vec<Chunk>>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a document into overlapping chunks and index them.
    /// Returns the number of chunks added.
    pub fn ingest(&self, source: &str, content: &str) -> Result<usize, DocumentError> {
        let new_chunks: Vec<Chunk> = split_into_chunks(content, CHUNK_SIZE, CHUNK_OVERLAP)
            .into_iter()
            .map(|text| Chunk {
                source: source.to_string(),
                terms: terms(&text),
                text,
            })
            .collect();
        let added = new_chunks.len();

        self.chunks
            .write()
            .map_err(|_| DocumentError::Unavailable("index lock poisoned".to_string()))?
            .extend(new_chunks);

        tracing::info!(source, chunks = added, "Indexed document");
        Ok(added)
    }

    /// Ingest every `.txt` and `.md` file directly under `dir`
    pub fn load_dir(&self, dir: &Path) -> Result<usize, DocumentError> {
        let io_err = |source| DocumentError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut total = 0;
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"))
            })
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path).map_err(|source| DocumentError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            total += self.ingest(&name, &content)?;
        }
        Ok(total)
    }
}

#[async_trait]
impl DocumentContextProvider for DocumentIndex {
    fn has_context(&self) -> bool {
        self.chunks.read().is_ok_and(|chunks| !chunks.is_empty())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<DocumentSnippet>, DocumentError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self
            .chunks
            .read()
            .map_err(|_| DocumentError::Unavailable("index lock poisoned".to_string()))?;

        #[allow(clippy::cast_precision_loss)]
        let total = query_terms.len() as f32;
        let mut hits: Vec<DocumentSnippet> = chunks
            .iter()
            .map(|chunk| {
                #[allow(clippy::cast_precision_loss)]
                let shared = query_terms.intersection(&chunk.terms).count() as f32;
                DocumentSnippet {
                    text: chunk.text.clone(),
                    source: chunk.source.clone(),
                    score: 1.0 - shared / total,
                }
            })
            .collect();

        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(k);
        Ok(hits)
    }
}

/// Lowercased alphanumeric words of three or more characters
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Split text into chunks of at most `size` characters with `overlap`
/// characters carried between neighbours. Cuts prefer a paragraph break,
/// then a line break, then a sentence end, then a space.
fn split_into_chunks(content: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            preferred_cut(&chars, start, hard_end)
        };

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end == chars.len() {
            break;
        }
        // Always make progress even when the overlap would rewind past start
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

fn preferred_cut(chars: &[char], start: usize, hard_end: usize) -> usize {
    let window = &chars[start..hard_end];
    // Do not cut in the first half of a chunk just to hit a separator
    let min_cut = window.len() / 2;

    let find_last = |pattern: &[char]| {
        window
            .windows(pattern.len())
            .rposition(|w| w == pattern)
            .map(|pos| pos + pattern.len())
            .filter(|cut| *cut > min_cut)
    };

    find_last(&['\n', '\n'])
        .or_else(|| find_last(&['\n']))
        .or_else(|| find_last(&['.', ' ']))
        .or_else(|| find_last(&[' ']))
        .map_or(hard_end, |cut| start + cut)
}
