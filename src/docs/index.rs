use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::DocsError;

/// File name of the persisted index inside the index directory
pub const INDEX_FILE: &str = "doc_index.json";

/// Upper bound on chunk length in bytes; paragraphs are packed up to it
/// and longer paragraphs are split at word boundaries
const MAX_CHUNK_CHARS: usize = 1200;

/// Tokens shorter than this carry no retrieval signal
const MIN_TERM_LEN: usize = 3;

/// A passage of one source document plus its term frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub source: String,
    pub text: String,
    terms: HashMap<String, u32>,
}

/// Lexical passage index over a directory of text documents.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentIndex {
    chunks: Vec<Chunk>,
    /// term → number of chunks containing it
    doc_freq: HashMap<String, u32>,
}

impl DocumentIndex {
    /// Read every UTF-8 file under `docs_dir` (recursively, sorted by path)
    /// and chunk it by paragraph.
    pub fn build(docs_dir: &Path) -> Result<Self, DocsError> {
        let mut files = Vec::new();
        collect_files(docs_dir, &mut files)?;
        files.sort();

        let mut index = Self::default();
        for path in files {
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable document");
                    continue;
                }
            };
            let source = path
                .strip_prefix(docs_dir)
                .unwrap_or(&path)
                .display()
                .to_string();
            for passage in chunk_paragraphs(&text) {
                index.push(source.clone(), passage);
            }
        }

        Ok(index)
    }

    fn push(&mut self, source: String, text: String) {
        let mut terms = HashMap::new();
        for t in tokenize(&text) {
            *terms.entry(t).or_insert(0) += 1;
        }
        for t in terms.keys() {
            *self.doc_freq.entry(t.clone()).or_insert(0) += 1;
        }
        self.chunks.push(Chunk { source, text, terms });
    }

    pub fn load(index_dir: &Path) -> Result<Self, DocsError> {
        let path = index_dir.join(INDEX_FILE);
        let bytes = std::fs::read(&path).map_err(|e| DocsError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| DocsError::json(&path, e))
    }

    pub fn persist(&self, index_dir: &Path) -> Result<(), DocsError> {
        std::fs::create_dir_all(index_dir).map_err(|e| DocsError::io(index_dir, e))?;
        let path = index_dir.join(INDEX_FILE);
        let body = serde_json::to_vec(self).map_err(|e| DocsError::json(&path, e))?;
        std::fs::write(&path, body).map_err(|e| DocsError::io(&path, e))
    }

    /// Load the persisted index, rebuilding from `docs_dir` when it is
    /// missing or unreadable. Never fails: the worst case is an empty index.
    pub fn load_or_build(docs_dir: &Path, index_dir: &Path) -> Self {
        if index_dir.join(INDEX_FILE).exists() {
            match Self::load(index_dir) {
                Ok(index) => {
                    info!(chunks = index.len(), "loaded document index");
                    return index;
                }
                Err(e) => warn!(error = %e, "document index unreadable, rebuilding"),
            }
        } else {
            info!(docs_dir = %docs_dir.display(), "building new document index");
        }

        let index = match Self::build(docs_dir) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "no documents indexed; doc-chat will answer without context");
                return Self::default();
            }
        };

        if let Err(e) = index.persist(index_dir) {
            warn!(error = %e, "could not persist document index");
        }
        info!(chunks = index.len(), "document index ready");
        index
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Up to `top_k` chunks ranked by tf-idf overlap with the query.
    /// Chunks sharing no term with the query are never returned.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<&Chunk> {
        let query_terms: HashSet<String> = tokenize(query).collect();
        let n = self.chunks.len() as f64;

        let mut scored: Vec<(f64, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|t| {
                        let tf = *chunk.terms.get(t)? as f64;
                        let df = self.doc_freq.get(t).copied().unwrap_or(1) as f64;
                        Some(tf * (1.0 + n / df).ln())
                    })
                    .sum();
                (score > 0.0).then_some((score, i))
            })
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, i)| &self.chunks[i])
            .collect()
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), DocsError> {
    let entries = std::fs::read_dir(dir).map_err(|e| DocsError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| DocsError::io(dir, e))?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
}

/// Greedily pack blank-line separated paragraphs into chunks.
fn chunk_paragraphs(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let paragraphs = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .flat_map(split_oversized);

    for para in paragraphs {
        if !current.is_empty() && current.len() + para.len() + 2 > MAX_CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&para);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Break one paragraph into pieces no longer than `MAX_CHUNK_CHARS`,
/// preferring whitespace; a single overlong word is cut at a char boundary.
fn split_oversized(para: &str) -> Vec<String> {
    if para.len() <= MAX_CHUNK_CHARS {
        return vec![para.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in para.split_whitespace() {
        let mut word = word;
        while word.len() > MAX_CHUNK_CHARS {
            let mut cut = MAX_CHUNK_CHARS;
            while !word.is_char_boundary(cut) {
                cut -= 1;
            }
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.push(word[..cut].to_string());
            word = &word[cut..];
        }

        if !current.is_empty() && current.len() + word.len() + 1 > MAX_CHUNK_CHARS {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
