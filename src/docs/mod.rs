pub mod index;

pub use index::DocumentIndex;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::chat::{CompletionProvider, ProviderError, Turn};

/// Passages handed to the model as background context
const TOP_K: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DocsError {
    #[error("document I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("document index {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DocsError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Retrieval-augmented answers: relevant passages from the document index
/// are embedded in the prompt sent to the completion provider.
pub struct DocEngine {
    index: DocumentIndex,
    provider: Arc<dyn CompletionProvider>,
}

pub fn doc_prompt(context: &str, query: &str) -> String {
    format!(
        "You are a supportive and understanding mental health assistant. \
         Provide a warm, empathetic, and practical response to help the user with their concern. \
         Here is some background information that might help you answer:\n\n\
         {context}\n\n\
         User's concern: {query}\n\n\
         Respond as if you're offering thoughtful advice to a friend."
    )
}

impl DocEngine {
    pub fn new(index: DocumentIndex, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { index, provider }
    }

    /// Retrieved context for `query`, passages separated by blank lines.
    pub fn context_for(&self, query: &str) -> String {
        self.index
            .search(query, TOP_K)
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub async fn query_documents(&self, query: &str) -> Result<String, ProviderError> {
        let context = self.context_for(query);
        debug!(context_chars = context.len(), "document context retrieved");

        let prompt = doc_prompt(&context, query);
        self.provider.generate(&[Turn::user(prompt)]).await
    }
}
