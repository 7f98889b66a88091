//! Choosing what document context accompanies a chat turn.
//!
//! A session is either in [`ContextMode::Memory`], where the full text of
//! every registered document rides along with each turn, or in
//! [`ContextMode::Rag`], where the top-k chunks for the turn are retrieved
//! from the user's vector store and cut to a token budget.
//!
//! Uploading always forces `Memory`. `Rag` is only entered on request, and
//! only while no document is memory-resident and the store has records.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::config::RetrievalConfig;
use crate::models::Document;
use crate::store::VectorStoreManager;
use crate::tokens::TokenBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    #[default]
    Memory,
    Rag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RagUnavailable {
    #[error("documents are loaded in memory; release them before enabling retrieval")]
    DocumentsInMemory,
    #[error("the vector store is empty; upload documents before enabling retrieval")]
    EmptyStore,
}

#[derive(Debug, Clone, Default)]
pub struct ContextSelector {
    mode: ContextMode,
}

impl ContextSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn on_document_uploaded(&mut self) {
        self.mode = ContextMode::Memory;
    }

    pub fn on_store_cleared(&mut self) {
        self.mode = ContextMode::Memory;
    }

    /// Enable or disable retrieval. A rejected request leaves the mode unchanged.
    pub fn request_rag(
        &mut self,
        enabled: bool,
        store_non_empty: bool,
        memory_resident_docs: usize,
    ) -> Result<ContextMode, RagUnavailable> {
        if !enabled {
            self.mode = ContextMode::Memory;
            return Ok(self.mode);
        }
        if memory_resident_docs > 0 {
            return Err(RagUnavailable::DocumentsInMemory);
        }
        if !store_non_empty {
            return Err(RagUnavailable::EmptyStore);
        }
        self.mode = ContextMode::Rag;
        Ok(self.mode)
    }
}

/// `Document '{name}':\n{text}` for every document, in name order.
pub fn memory_context(documents: &BTreeMap<String, Document>) -> Option<String> {
    if documents.is_empty() {
        return None;
    }
    Some(
        documents
            .values()
            .map(|d| format!("Document '{}':\n{}", d.name, d.extracted_text))
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

/// Retrieved chunk texts in rank order, truncated to the token budget.
pub async fn rag_context(
    store: &VectorStoreManager,
    tokens: &TokenBudget,
    retrieval: &RetrievalConfig,
    user_turn: &str,
) -> Option<String> {
    let hits = store.query(user_turn, retrieval.top_k).await;
    if hits.is_empty() {
        return None;
    }
    let joined = hits
        .iter()
        .map(|h| h.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let context = tokens.truncate(&joined, retrieval.context_token_budget);
    tracing::debug!(
        hits = hits.len(),
        tokens = tokens.count(&context),
        "retrieved context"
    );
    if context.is_empty() {
        None
    } else {
        Some(context)
    }
}

pub async fn select_context(
    mode: ContextMode,
    documents: &BTreeMap<String, Document>,
    store: &VectorStoreManager,
    tokens: &TokenBudget,
    retrieval: &RetrievalConfig,
    user_turn: &str,
) -> Option<String> {
    match mode {
        ContextMode::Memory => memory_context(documents),
        ContextMode::Rag => rag_context(store, tokens, retrieval, user_turn).await,
    }
}
