//! The advisor façade: uploads, chat turns, retrieval toggling,
//! recommendations, and per-user data lifecycle.
//!
//! Every operation is keyed by [`UserId`] and resolved through the
//! [`SessionStore`]. Callers convert results into an
//! [`Envelope`](crate::error::Envelope) at their boundary.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::analysis::{AnalysisReport, Analyzer};
use crate::chunk::Chunker;
use crate::config::Config;
use crate::context::{select_context, ContextMode};
use crate::contract::{ContractGenerator, ContractRequest, GeneratedContract};
use crate::embedding::{create_embedder, Embedder};
use crate::error::Result;
use crate::extract::{detect_format, extract_text};
use crate::llm::{transcript, ChatModel, CompletionRequest, LazyChatModel};
use crate::models::{Document, Message, Sections, UserId};
use crate::session::{RegisterOutcome, Session, SessionStore};
use crate::tokens::TokenBudget;

pub const SYSTEM_PROMPT: &str = "You are a professional legal assistant specializing in \
Russian legal documents. You analyze legal documents (risks, vulnerabilities, key \
provisions, comparison with standard templates), advise on contracts (choosing the right \
contract type, explaining legal terms, reducing risk), and work with uploaded documents \
(suggesting improvements, spotting problems). If a question needs specialized legal \
counsel, recommend consulting a lawyer. When an uploaded document is provided, use it \
where it has the answer, otherwise answer from general knowledge, and always say which \
source you used.";

const RECOMMENDATION_PROMPT: &str = "Based on the whole conversation, give a comprehensive \
contract recommendation. Write blank-line separated sections of the form 'Key: value' \
covering: the recommended contract type, key terms, potential risks, and suggested \
modifications. Use terminology and structure consistent with the Civil Code of the \
Russian Federation.";

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub file_name: String,
    pub outcome: RegisterOutcome,
    pub mode: ContextMode,
    pub chunks: usize,
    pub indexed: usize,
    /// Set when the document is kept in memory but could not be indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexing_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub ready_for_recommendation: bool,
    pub mode: ContextMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagToggle {
    pub mode: ContextMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub ready_for_recommendation: bool,
    pub recommendation: Sections,
}

pub struct Advisor {
    config: Config,
    llm: Arc<dyn ChatModel>,
    tokens: Arc<TokenBudget>,
    chunker: Chunker,
    sessions: SessionStore,
}

impl Advisor {
    pub fn new(config: Config, llm: Arc<dyn ChatModel>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::from_config(&config.chunking)?;
        let tokens = Arc::new(TokenBudget::cl100k()?);
        let sessions = SessionStore::new(
            config.storage.root.clone(),
            embedder,
            config.sessions.max_sessions,
        )?;
        Ok(Self {
            config,
            llm,
            tokens,
            chunker,
            sessions,
        })
    }

    /// Build the configured embedding backend. The LLM backend is created
    /// on the first completion, so storage-only operations such as upload
    /// and clear work without LLM credentials.
    pub fn from_config(config: Config) -> Result<Self> {
        let llm: Arc<dyn ChatModel> = Arc::new(LazyChatModel::new(config.llm.clone()));
        let embedder = create_embedder(&config.embedding)?;
        Self::new(config, llm, embedder)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn session(&self, user: &UserId) -> Result<Arc<Mutex<Session>>> {
        self.sessions.open(user).await
    }

    /// Extract, register in memory, and index an uploaded file.
    ///
    /// Indexing failures caused by the embedding backend are reported in
    /// the result; the document stays available in memory.
    pub async fn upload(&self, user: &UserId, file_name: &str, bytes: Vec<u8>) -> Result<UploadReport> {
        detect_format(file_name)?;
        let text = extract_text(&bytes, file_name).map_err(|e| {
            tracing::error!(user = %user, file = file_name, error = %e, "upload rejected");
            e
        })?;
        let doc = Document::new(file_name, bytes, text);

        let session = self.sessions.open(user).await?;
        let mut session = session.lock().await;

        let ingested = session.ingest(doc, &self.chunker).await?;
        tracing::info!(
            user = %user,
            file = file_name,
            outcome = ?ingested.outcome,
            chunks = ingested.index.chunks,
            indexed = ingested.index.inserted,
            "document uploaded"
        );
        Ok(UploadReport {
            file_name: file_name.to_string(),
            outcome: ingested.outcome,
            mode: session.mode(),
            chunks: ingested.index.chunks,
            indexed: ingested.index.inserted,
            indexing_error: ingested.indexing_error,
        })
    }

    /// Run one chat turn. A failed completion leaves the history as it was.
    pub async fn chat(&self, user: &UserId, user_turn: &str) -> Result<ChatOutcome> {
        let session = self.sessions.open(user).await?;
        let mut session = session.lock().await;

        let context = select_context(
            session.mode(),
            session.documents(),
            session.store(),
            &self.tokens,
            &self.config.retrieval,
            user_turn,
        )
        .await;

        let request = CompletionRequest::new(SYSTEM_PROMPT, user_turn)
            .with_history(session.prompt_history())
            .with_context(context);
        let response = self.llm.complete(&request).await.map_err(|e| {
            tracing::error!(user = %user, error = %e, "chat turn failed");
            e
        })?;

        session.push(Message::user(user_turn));
        session.push(Message::assistant(response.clone()));
        let ready = session.is_ready_for_recommendation(&self.config.advisor);
        Ok(ChatOutcome {
            response,
            ready_for_recommendation: ready,
            mode: session.mode(),
        })
    }

    pub async fn toggle_rag(&self, user: &UserId, enabled: bool) -> Result<RagToggle> {
        let session = self.sessions.open(user).await?;
        let mut session = session.lock().await;
        let toggle = match session.request_rag(enabled).await? {
            Ok(mode) => RagToggle {
                mode,
                rejected: None,
            },
            Err(reason) => {
                tracing::info!(user = %user, reason = %reason, "retrieval mode refused");
                RagToggle {
                    mode: session.mode(),
                    rejected: Some(reason.to_string()),
                }
            }
        };
        Ok(toggle)
    }

    /// Make every uploaded document non-resident so retrieval can be enabled.
    pub async fn release(&self, user: &UserId) -> Result<usize> {
        let session = self.sessions.open(user).await?;
        let released = session.lock().await.release_documents();
        Ok(released)
    }

    pub async fn recommend(&self, user: &UserId) -> Result<Recommendation> {
        let session = self.sessions.open(user).await?;
        let session = session.lock().await;
        let request = CompletionRequest::new(RECOMMENDATION_PROMPT, transcript(session.history()));
        let reply = self.llm.complete(&request).await.map_err(|e| {
            tracing::error!(user = %user, error = %e, "recommendation failed");
            e
        })?;
        Ok(Recommendation {
            ready_for_recommendation: session.is_ready_for_recommendation(&self.config.advisor),
            recommendation: Sections::from_blocks(&reply),
        })
    }

    pub async fn clear_user_data(&self, user: &UserId) -> Result<()> {
        let session = self.sessions.open(user).await?;
        let mut session = session.lock().await;
        session.clear_user_data().await
    }

    /// Risks, summary, configured questions and revision slot for one file.
    pub async fn analyze(&self, file_name: &str, bytes: &[u8]) -> Result<AnalysisReport> {
        Analyzer::comprehensive(
            Arc::clone(&self.llm),
            self.chunker,
            Arc::clone(&self.tokens),
            self.config.retrieval.context_token_budget,
            self.config.analysis.questions.clone(),
        )
        .analyze(file_name, bytes)
        .await
    }

    /// Sectioned provisions / risks / recommendations / compliance review.
    pub async fn review(&self, file_name: &str, bytes: &[u8]) -> Result<AnalysisReport> {
        Analyzer::review(Arc::clone(&self.llm), self.chunker)
            .analyze(file_name, bytes)
            .await
    }

    pub async fn generate_contract(&self, request: &ContractRequest) -> Result<GeneratedContract> {
        ContractGenerator::new(Arc::clone(&self.llm))
            .generate(request)
            .await
    }
}
