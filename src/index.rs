//! Chunk embedding index.
//!
//! [`EmbeddingIndex`] embeds chunk text with the configured
//! [`EmbeddingProvider`] and persists it through a [`VectorStore`]. Search is
//! brute force: the query is embedded once, scored by cosine similarity
//! against every chunk the user owns, thresholded, and ranked.
//!
//! Two stores are provided. [`SqliteVectorStore`] writes to the `chunks`
//! table of the same database as the graph; [`InMemoryVectorStore`] keeps
//! everything in process memory for tests and throwaway sessions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::chunk::Chunk;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, EmbeddingProvider};
use crate::models::{ChunkMatch, StoredChunk, UserId};

/// Pluggable storage behind the similarity index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert a chunk, replacing any chunk with the same id for the user.
    async fn put(&self, user: &UserId, chunk: StoredChunk) -> Result<()>;

    /// All chunks of a user, in insertion order.
    async fn user_chunks(&self, user: &UserId) -> Result<Vec<StoredChunk>>;

    async fn count_user_chunks(&self, user: &UserId) -> Result<i64>;

    async fn delete_user(&self, user: &UserId) -> Result<()>;
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn put(&self, user: &UserId, chunk: StoredChunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (user_id, id, scope, document, chunk_index, text, embedding, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, id) DO UPDATE SET
                document = excluded.document,
                chunk_index = excluded.chunk_index,
                text = excluded.text,
                embedding = excluded.embedding,
                model = excluded.model,
                dims = excluded.dims
            "#,
        )
        .bind(user.as_str())
        .bind(&chunk.id)
        .bind(user.scope_label())
        .bind(&chunk.document)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(&chunk.model)
        .bind(chunk.embedding.len() as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to store chunk")?;
        Ok(())
    }

    async fn user_chunks(&self, user: &UserId) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, document, chunk_index, text, embedding, model
            FROM chunks
            WHERE user_id = ? AND scope = ?
            ORDER BY rowid
            "#,
        )
        .bind(user.as_str())
        .bind(user.scope_label())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredChunk {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    document: row.get("document"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    embedding: blob_to_vec(&blob),
                    model: row.get("model"),
                }
            })
            .collect())
    }

    async fn count_user_chunks(&self, user: &UserId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE user_id = ? AND scope = ?")
                .bind(user.as_str())
                .bind(user.scope_label())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn delete_user(&self, user: &UserId) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE user_id = ? AND scope = ?")
            .bind(user.as_str())
            .bind(user.scope_label())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn put(&self, user: &UserId, mut chunk: StoredChunk) -> Result<()> {
        chunk.user_id = user.as_str().to_string();
        let mut chunks = self.chunks.write().await;
        let owned = chunks.entry(user.as_str().to_string()).or_default();
        match owned.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk,
            None => owned.push(chunk),
        }
        Ok(())
    }

    async fn user_chunks(&self, user: &UserId) -> Result<Vec<StoredChunk>> {
        let chunks = self.chunks.read().await;
        Ok(chunks.get(user.as_str()).cloned().unwrap_or_default())
    }

    async fn count_user_chunks(&self, user: &UserId) -> Result<i64> {
        let chunks = self.chunks.read().await;
        Ok(chunks.get(user.as_str()).map_or(0, |c| c.len() as i64))
    }

    async fn delete_user(&self, user: &UserId) -> Result<()> {
        self.chunks.write().await.remove(user.as_str());
        Ok(())
    }
}

pub struct EmbeddingIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_similarity: f32,
}

impl EmbeddingIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        min_similarity: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            min_similarity,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Embed and persist a single chunk of text under `chunk_id`.
    pub async fn store_document_embeddings(
        &self,
        user: &UserId,
        chunk_text: &str,
        chunk_id: &str,
    ) -> Result<()> {
        let embedding = embed_query(self.embedder.as_ref(), chunk_text).await?;
        self.store
            .put(
                user,
                StoredChunk {
                    id: chunk_id.to_string(),
                    user_id: user.as_str().to_string(),
                    document: String::new(),
                    chunk_index: 0,
                    text: chunk_text.to_string(),
                    embedding,
                    model: self.embedder.model_name().to_string(),
                },
            )
            .await
    }

    /// Embed and persist chunks of one document. Returns the number stored.
    pub async fn store_chunks(&self, user: &UserId, document: &str, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        for (chunk, embedding) in chunks.iter().zip(vectors) {
            self.store
                .put(
                    user,
                    StoredChunk {
                        id: chunk.id.clone(),
                        user_id: user.as_str().to_string(),
                        document: document.to_string(),
                        chunk_index: chunk.chunk_index,
                        text: chunk.text.clone(),
                        embedding,
                        model: self.embedder.model_name().to_string(),
                    },
                )
                .await?;
        }

        Ok(chunks.len())
    }

    /// Top `top_k` chunks of the user at or above the similarity threshold.
    pub async fn vector_search(
        &self,
        user: &UserId,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let chunks = self.store.user_chunks(user).await?;
        if chunks.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query_text).await?;
        let model = self.embedder.model_name();

        let scored: Vec<ChunkMatch> = chunks
            .into_iter()
            .filter(|c| c.model == model)
            .map(|c| ChunkMatch {
                similarity: cosine_similarity(&query_vec, &c.embedding),
                chunk_id: c.id,
                document: c.document,
                text: c.text,
            })
            .collect();

        let matches = rank_matches(scored, top_k, self.min_similarity);
        debug!(user = %user, matches = matches.len(), "vector search complete");
        Ok(matches)
    }
}

/// Threshold, sort by descending similarity (stable, so ties keep input
/// order), and truncate to `top_k`.
pub fn rank_matches(mut scored: Vec<ChunkMatch>, top_k: usize, min_similarity: f32) -> Vec<ChunkMatch> {
    scored.retain(|m| m.similarity >= min_similarity);
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use crate::db;
    use crate::embedding::HashProvider;
    use crate::migrate;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn hit(id: &str, similarity: f32) -> ChunkMatch {
        ChunkMatch {
            chunk_id: id.to_string(),
            document: "doc".to_string(),
            text: String::new(),
            similarity,
        }
    }

    async fn sqlite_store() -> Arc<dyn VectorStore> {
        let pool = db::connect_in_memory().await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        Arc::new(SqliteVectorStore::new(pool))
    }

    fn index(store: Arc<dyn VectorStore>) -> EmbeddingIndex {
        EmbeddingIndex::new(store, Arc::new(HashProvider::new(384)), 0.1)
    }

    #[test]
    fn test_rank_matches_threshold_order_and_ties() {
        let ranked = rank_matches(
            vec![
                hit("low", 0.05),
                hit("a", 0.5),
                hit("b", 0.9),
                hit("c", 0.5),
                hit("edge", 0.1),
            ],
            3,
            0.1,
        );
        let ids: Vec<&str> = ranked.iter().map(|m| m.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let all = rank_matches(vec![hit("edge", 0.1), hit("low", 0.099)], 10, 0.1);
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_store_and_search_sqlite() {
        let idx = index(sqlite_store().await);
        let alice = user("alice");
        let chunks = chunk_text(
            "alice/cs101.txt",
            "CS101 teaches Algorithms.\nPHOTOSYNTHESIS\nPlants convert light into chemical energy.",
            6000,
            50,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(idx.store_chunks(&alice, "cs101.txt", &chunks).await.unwrap(), 2);

        let matches = idx.vector_search(&alice, "What does CS101 teach?", 5).await.unwrap();
        assert!(!matches.is_empty());
        assert!(matches.len() <= 5);
        assert!(matches[0].text.contains("CS101"));
        assert!(matches.iter().all(|m| m.similarity >= 0.1));
        for pair in matches.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_search_is_user_scoped() {
        let idx = index(Arc::new(InMemoryVectorStore::new()));
        let alice = user("alice");
        let bob = user("bob");
        idx.store_document_embeddings(&alice, "CS101 teaches Algorithms.", "c1")
            .await
            .unwrap();

        assert!(idx.vector_search(&bob, "CS101", 5).await.unwrap().is_empty());
        assert_eq!(idx.vector_search(&alice, "CS101", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_replaces_same_id() {
        for store in [sqlite_store().await, Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>] {
            let idx = index(store.clone());
            let alice = user("alice");
            idx.store_document_embeddings(&alice, "first version", "c1").await.unwrap();
            idx.store_document_embeddings(&alice, "second version", "c1").await.unwrap();

            assert_eq!(store.count_user_chunks(&alice).await.unwrap(), 1);
            let chunks = store.user_chunks(&alice).await.unwrap();
            assert_eq!(chunks[0].text, "second version");
        }
    }

    #[tokio::test]
    async fn test_delete_user_chunks() {
        let store = sqlite_store().await;
        let idx = index(store.clone());
        let alice = user("alice");
        let bob = user("bob");
        idx.store_document_embeddings(&alice, "alpha", "a1").await.unwrap();
        idx.store_document_embeddings(&bob, "beta", "b1").await.unwrap();

        store.delete_user(&alice).await.unwrap();
        assert_eq!(store.count_user_chunks(&alice).await.unwrap(), 0);
        assert_eq!(store.count_user_chunks(&bob).await.unwrap(), 1);
    }
}
