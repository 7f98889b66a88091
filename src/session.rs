//! Conversation state per user, and the bounded store that holds sessions.

use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Serialize;

use crate::chunk::Chunker;
use crate::config::AdvisorConfig;
use crate::context::{ContextMode, ContextSelector, RagUnavailable};
use crate::embedding::Embedder;
use crate::error::{AdvisorError, Result};
use crate::ledger::HashLedger;
use crate::models::{Document, Message, Role, UserId};
use crate::store::{IndexReport, VectorStoreManager};

/// How an upload compares with what the ledger last recorded for that name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterOutcome {
    New,
    Changed,
    Unchanged,
}

/// Result of [`Session::ingest`].
#[derive(Debug, Clone)]
pub struct Ingested {
    pub outcome: RegisterOutcome,
    pub index: IndexReport,
    /// Set when the document is registered but could not be indexed.
    pub indexing_error: Option<String>,
}

/// One user's conversation and document state.
pub struct Session {
    user: UserId,
    history: Vec<Message>,
    documents: BTreeMap<String, Document>,
    selector: ContextSelector,
    ledger: HashLedger,
    store: VectorStoreManager,
}

impl Session {
    pub fn new(user: UserId, ledger: HashLedger, store: VectorStoreManager) -> Self {
        Self {
            user,
            history: Vec::new(),
            documents: BTreeMap::new(),
            selector: ContextSelector::new(),
            ledger,
            store,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Every message so far, including document injections.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Documents currently resident in memory, by file name.
    pub fn documents(&self) -> &BTreeMap<String, Document> {
        &self.documents
    }

    /// Extracted text of a registered document.
    pub fn document_text(&self, name: &str) -> Option<&str> {
        self.documents.get(name).map(|d| d.extracted_text.as_str())
    }

    pub fn mode(&self) -> ContextMode {
        self.selector.mode()
    }

    pub fn store(&self) -> &VectorStoreManager {
        &self.store
    }

    pub fn ledger(&self) -> &HashLedger {
        &self.ledger
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Compare `doc` with what the ledger last recorded under its name.
    pub fn outcome_for(&self, doc: &Document) -> RegisterOutcome {
        match self.ledger.get(&doc.name) {
            None => RegisterOutcome::New,
            Some(h) if h == doc.content_hash => RegisterOutcome::Unchanged,
            Some(_) => RegisterOutcome::Changed,
        }
    }

    /// Index `doc` into the vector store and register it in memory.
    ///
    /// The ledger is consulted before indexing: unchanged content is not
    /// re-embedded, and a changed document has its previous records removed
    /// first. The new hash is recorded only once indexing succeeded.
    ///
    /// # Errors
    ///
    /// Storage and ledger failures. Embedding failures are returned in
    /// [`Ingested::indexing_error`] and the document is still registered.
    pub async fn ingest(&mut self, doc: Document, chunker: &Chunker) -> Result<Ingested> {
        let outcome = self.outcome_for(&doc);
        let indexed = match outcome {
            RegisterOutcome::Unchanged => Ok(IndexReport {
                chunks: chunker.chunk_iter(&doc.name, &doc.extracted_text).count(),
                inserted: 0,
            }),
            RegisterOutcome::Changed => {
                self.store.delete_source(&doc.name).await?;
                self.store.index_document(&doc, chunker).await
            }
            RegisterOutcome::New => self.store.index_document(&doc, chunker).await,
        };

        let (index, indexing_error) = match indexed {
            Ok(report) => {
                self.ledger.record(&doc.name, &doc.content_hash)?;
                (report, None)
            }
            Err(e) if e.is_degradable() => {
                tracing::warn!(user = %self.user, file = %doc.name, error = %e, "document kept in memory only");
                (IndexReport::default(), Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        self.register_document(doc);
        Ok(Ingested {
            outcome,
            index,
            indexing_error,
        })
    }

    /// Add `doc` to the in-memory registry and inject its text into the
    /// history. Every upload is appended, including unchanged repeats.
    pub fn register_document(&mut self, doc: Document) {
        self.history
            .push(Message::document(&doc.name, &doc.extracted_text));
        self.documents.insert(doc.name.clone(), doc);
        self.selector.on_document_uploaded();
    }

    /// History to send with the next turn. In retrieval mode the messages
    /// carrying full document text are left out, so document content only
    /// reaches the model through the retrieved, budgeted context.
    pub fn prompt_history(&self) -> Vec<Message> {
        match self.mode() {
            ContextMode::Memory => self.history.clone(),
            ContextMode::Rag => self
                .history
                .iter()
                .filter(|m| !m.is_document())
                .cloned()
                .collect(),
        }
    }

    /// Drop every document from the in-memory registry. Vector records and
    /// ledger entries stay, so retrieval becomes available.
    pub fn release_documents(&mut self) -> usize {
        let released = self.documents.len();
        self.documents.clear();
        released
    }

    /// Ask to switch context mode. Enabling retrieval succeeds only with no
    /// resident documents and a non-empty store; disabling always succeeds.
    ///
    /// # Errors
    ///
    /// The outer `Result` carries storage errors from counting the store.
    /// The inner one carries the reason retrieval was refused.
    pub async fn request_rag(&mut self, enabled: bool) -> Result<std::result::Result<ContextMode, RagUnavailable>> {
        let non_empty = if enabled {
            !self.store.is_empty().await?
        } else {
            false
        };
        Ok(self
            .selector
            .request_rag(enabled, non_empty, self.documents.len()))
    }

    /// Wipe the vector collection, the ledger and the document registry.
    /// The conversation history is kept.
    pub async fn clear_user_data(&mut self) -> Result<()> {
        self.store.clear().await?;
        self.ledger.clear()?;
        self.documents.clear();
        self.selector.on_store_cleared();
        tracing::info!(user = %self.user, "user data cleared");
        Ok(())
    }

    pub fn is_ready_for_recommendation(&self, cfg: &AdvisorConfig) -> bool {
        is_ready(&self.history, cfg)
    }
}

/// All three must hold: enough distinct keywords across the conversation,
/// enough messages, and the marker phrase in the latest assistant message.
pub fn is_ready(history: &[Message], cfg: &AdvisorConfig) -> bool {
    if history.len() < cfg.min_messages {
        return false;
    }

    let marker = cfg.readiness_marker.to_lowercase();
    let marker_present = history
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.to_lowercase().contains(&marker))
        .unwrap_or(false);
    if !marker_present {
        return false;
    }

    let text = history
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    let hits = cfg
        .readiness_keywords
        .iter()
        .filter(|k| text.contains(&k.to_lowercase()))
        .count();
    hits >= cfg.min_keyword_hits
}

/// Capacity-bounded map from user to session.
///
/// Each session has its own lock, so work for different users proceeds in
/// parallel. Evicting a session only drops in-memory state.
pub struct SessionStore {
    root: PathBuf,
    embedder: Arc<dyn Embedder>,
    sessions: Mutex<LruCache<UserId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>, embedder: Arc<dyn Embedder>, capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            AdvisorError::Configuration("session capacity must be >= 1".to_string())
        })?;
        Ok(Self {
            root: root.into(),
            embedder,
            sessions: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Return the session for `user`, creating it from on-disk state if needed.
    ///
    /// # Errors
    ///
    /// Storage errors opening the vector collection, or I/O errors reading
    /// the ledger.
    pub async fn open(&self, user: &UserId) -> Result<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(user) {
            return Ok(Arc::clone(session));
        }

        let store = VectorStoreManager::open(&self.root, user, Arc::clone(&self.embedder)).await?;
        let ledger = HashLedger::for_user(&self.root, user)?;
        let session = Arc::new(Mutex::new(Session::new(user.clone(), ledger, store)));
        if let Some((evicted, _)) = sessions.push(user.clone(), Arc::clone(&session)) {
            if &evicted != user {
                tracing::debug!(user = %evicted, "evicted least recently used session");
            }
        }
        tracing::info!(user = %user, "session opened");
        Ok(session)
    }

    /// The cached session for `user`, without creating one.
    pub async fn get(&self, user: &UserId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(user).cloned()
    }

    /// Drop the cached session for `user`. Durable state stays on disk.
    pub async fn evict(&self, user: &UserId) -> bool {
        self.sessions.lock().await.pop(user).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
