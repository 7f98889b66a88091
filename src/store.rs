//! Per-user vector collections.
//!
//! A [`VectorIndex`] stores [`VectorRecord`]s and ranks them against a query
//! vector. [`SqliteVectorIndex`] persists one collection per user at
//! `{root}/{user_id}/vectors.sqlite`; [`InMemoryVectorIndex`] backs tests
//! and throwaway sessions.
//!
//! [`VectorStoreManager`] pairs an index with an [`Embedder`] and owns the
//! dedup and fail-soft rules: records are keyed by the SHA-256 of their chunk
//! text, so upserting identical content twice keeps one row, and `query`
//! never returns an error.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chunk::Chunker;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, Embedder};
use crate::error::{AdvisorError, Result};
use crate::migrate;
use crate::models::{Chunk, Document, ScoredChunk, UserId, VectorRecord};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert records whose id is not yet present. Returns how many rows were added.
    async fn insert(&self, records: &[VectorRecord]) -> Result<usize>;
    /// Whether a record with this chunk hash is stored.
    async fn contains(&self, id: &str) -> Result<bool>;
    /// Top-`k` records by cosine similarity, highest first, ties broken by id.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;
    async fn count(&self) -> Result<usize>;
    /// Remove the records whose `source_document` metadata is `source`.
    /// Returns how many rows were removed.
    async fn delete_source(&self, source: &str) -> Result<usize>;
    /// Remove every record atomically.
    async fn clear(&self) -> Result<()>;
}

/// Brute-force ranking shared by both index implementations.
fn rank<I>(query: &[f32], candidates: I, k: usize) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (String, String, Vec<f32>, serde_json::Value)>,
{
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|(id, text, embedding, metadata)| ScoredChunk {
            score: cosine_similarity(query, &embedding),
            id,
            text,
            metadata,
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(k);
    scored
}

// ============ SQLite ============

/// One `records` table in a per-user SQLite file.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Open (creating if needed) the collection at `db_path`.
    ///
    /// # Errors
    ///
    /// [`AdvisorError::Storage`] when the database cannot be opened or the
    /// schema cannot be created.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert(&self, records: &[VectorRecord]) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO records (id, chunk_text, embedding, dims, metadata_json, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
            )
            .bind(&record.id)
            .bind(&record.chunk_text)
            .bind(vec_to_blob(&record.embedding))
            .bind(record.embedding.len() as i64)
            .bind(record.metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows: Vec<(String, String, Vec<u8>, String)> =
            sqlx::query_as("SELECT id, chunk_text, embedding, metadata_json FROM records")
                .fetch_all(&self.pool)
                .await?;
        Ok(rank(
            query,
            rows.into_iter().map(|(id, text, blob, meta)| {
                let metadata = serde_json::from_str(&meta).unwrap_or(serde_json::json!({}));
                (id, text, blob_to_vec(&blob), metadata)
            }),
            k,
        ))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn delete_source(&self, source: &str) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM records WHERE json_extract(metadata_json, '$.source_document') = ?",
        )
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS records")
            .execute(&mut *tx)
            .await?;
        migrate::create_records_table(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

// ============ In-memory ============

/// Non-persistent index keyed by record id.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    records: RwLock<BTreeMap<String, VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut stored = self.records.write().await;
        let mut inserted = 0;
        for record in records {
            if !stored.contains_key(&record.id) {
                stored.insert(record.id.clone(), record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let stored = self.records.read().await;
        Ok(rank(
            query,
            stored.values().map(|r| {
                (
                    r.id.clone(),
                    r.chunk_text.clone(),
                    r.embedding.clone(),
                    r.metadata.clone(),
                )
            }),
            k,
        ))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn delete_source(&self, source: &str) -> Result<usize> {
        let mut stored = self.records.write().await;
        let before = stored.len();
        stored.retain(|_, r| r.metadata["source_document"] != source);
        Ok(before - stored.len())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}

// ============ Manager ============

/// Chunks produced for a document and how many of them were newly stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexReport {
    pub chunks: usize,
    pub inserted: usize,
}

/// A user's collection together with the embedder that feeds it.
#[derive(Clone)]
pub struct VectorStoreManager {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl VectorStoreManager {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    /// Open the persistent collection for `user` under `root`.
    pub async fn open(root: &Path, user: &UserId, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let index = SqliteVectorIndex::open(&db::vectors_path(root, user)).await?;
        Ok(Self::new(Arc::new(index), embedder))
    }

    /// Manager over a fresh [`InMemoryVectorIndex`].
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self::new(Arc::new(InMemoryVectorIndex::new()), embedder)
    }

    /// Store `chunks` with their `embeddings`, skipping content already present.
    ///
    /// # Arguments
    ///
    /// * `chunks` - chunks to store; duplicates within the batch are kept once.
    /// * `embeddings` - one vector per chunk, in the same order.
    ///
    /// # Errors
    ///
    /// [`AdvisorError::Retrieval`] when the two lengths differ, or a storage
    /// error from the index.
    pub async fn upsert(&self, chunks: &[Chunk], embeddings: Vec<Vec<f32>>) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(AdvisorError::Retrieval(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }
        let mut seen = HashSet::new();
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .filter(|(chunk, _)| seen.insert(chunk.hash.clone()))
            .map(|(chunk, embedding)| VectorRecord::from_chunk(chunk, embedding))
            .collect();
        let inserted = self.index.insert(&records).await?;
        tracing::debug!(offered = chunks.len(), inserted, "upserted vector records");
        Ok(inserted)
    }

    /// Top-`k` chunks for `text`. Empty on an empty collection or any failure.
    pub async fn query(&self, text: &str, k: usize) -> Vec<ScoredChunk> {
        match self.is_empty().await {
            Ok(true) => return Vec::new(),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "vector store unavailable, retrieving nothing");
                return Vec::new();
            }
        }

        let query_vec = match embed_query(self.embedder.as_ref(), text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, retrieving nothing");
                return Vec::new();
            }
        };

        match self.index.search(&query_vec, k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "vector search failed, retrieving nothing");
                Vec::new()
            }
        }
    }

    /// Remove every record of the collection.
    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await?;
        tracing::info!("vector collection cleared");
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        self.index.count().await
    }

    /// Drop every record indexed from `source`, ahead of re-indexing a new
    /// version of it.
    pub async fn delete_source(&self, source: &str) -> Result<usize> {
        let removed = self.index.delete_source(source).await?;
        tracing::info!(document = source, removed, "removed superseded vector records");
        Ok(removed)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.index.count().await? == 0)
    }

    /// Chunk `doc`, embed the chunks not stored yet, and upsert them.
    ///
    /// # Errors
    ///
    /// Embedding failures propagate as [`AdvisorError::Embedding`]; callers
    /// decide whether to degrade.
    pub async fn index_document(&self, doc: &Document, chunker: &Chunker) -> Result<IndexReport> {
        let chunks = chunker.chunk(&doc.name, &doc.extracted_text);
        let total = chunks.len();

        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for chunk in chunks {
            if !seen.insert(chunk.hash.clone()) {
                continue;
            }
            if !self.index.contains(&chunk.hash).await? {
                fresh.push(chunk);
            }
        }

        if fresh.is_empty() {
            return Ok(IndexReport {
                chunks: total,
                inserted: 0,
            });
        }

        let texts: Vec<String> = fresh.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        let inserted = self.upsert(&fresh, embeddings).await?;
        tracing::info!(document = %doc.name, chunks = total, inserted, "indexed document");
        Ok(IndexReport {
            chunks: total,
            inserted,
        })
    }
}
