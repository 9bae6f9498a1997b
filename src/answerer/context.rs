//! Retrieval and context assembly.

use std::sync::Arc;

use tracing::debug;

use super::types::AssembledContext;
use crate::store::{DocumentStore, RetrievedDocument, StoreError};

/// Number of documents retrieved per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// Fetches the most similar documents and turns them into prompt context and citations.
pub struct ContextAssembler {
    store: Arc<dyn DocumentStore>,
    top_k: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Overrides how many documents are retrieved.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Searches for `question` and assembles the result.
    ///
    /// The citations are part of the return value; nothing is kept between calls.
    pub fn assemble(&self, question: &str) -> Result<AssembledContext, StoreError> {
        let docs = self.store.search(question, self.top_k)?;
        debug!(hits = docs.len(), "retrieved documents");
        Ok(assemble_documents(&docs))
    }
}

/// Builds context and citations from documents already in retrieval order.
pub fn assemble_documents(docs: &[RetrievedDocument]) -> AssembledContext {
    let context = docs
        .iter()
        .map(RetrievedDocument::body)
        .collect::<Vec<_>>()
        .join("\n");

    let links: Vec<String> = docs
        .iter()
        .map(|doc| doc.source_url().trim().to_string())
        .collect();

    AssembledContext {
        context,
        citation_html: render_citations(&links),
        links,
    }
}

/// Renders the "Learn more" fragment, one numbered anchor per link.
///
/// Empty input yields an empty string.
pub fn render_citations<S: AsRef<str>>(links: &[S]) -> String {
    if links.is_empty() {
        return String::new();
    }

    let anchors: String = links
        .iter()
        .enumerate()
        .map(|(i, link)| format!("<a href='{}'>🔗 Article #{}</a>", link.as_ref().trim(), i + 1))
        .collect();

    format!("<br>Learn more:<br>{anchors}")
}
