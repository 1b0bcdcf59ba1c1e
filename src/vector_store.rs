//! The prose (vector) substrate: a document-scoped embedding store with
//! brute-force cosine similarity search, backed by SQLite.

use crate::config::VectorSettings;
use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// A single prose chunk with its embedding, scoped to the document it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProseChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub page_number: u32,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A similarity search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: ProseChunk,
    pub similarity: f32,
}

/// Abstract prose substrate, kept small so an alternate backend (or an
/// in-memory fake for tests) is pluggable.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace all chunks for `doc_id` with the given set. Re-ingesting the
    /// same document is idempotent: calling this twice with the same input
    /// leaves the same rows in place.
    async fn upsert(&self, doc_id: &str, chunks: Vec<ProseChunk>) -> Result<()>;

    /// Find the `limit` closest chunks to `query_embedding`, scoped to `doc_id`.
    async fn query(
        &self,
        doc_id: &str,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every chunk belonging to `doc_id`.
    async fn delete(&self, doc_id: &str) -> Result<()>;

    /// Total number of chunks across all documents.
    async fn size(&self) -> Result<usize>;

    /// Remove every chunk from every document.
    async fn clear(&self) -> Result<()>;
}

/// SQLite-backed vector store. No native vector extension is assumed, so
/// similarity search is brute-force cosine over the candidate set.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedding_dimension: usize,
}

impl SqliteVectorStore {
    /// Connect to (and initialize the schema of) the vector database.
    pub async fn connect(config: &VectorSettings, embedding_dimension: usize) -> Result<Self> {
        info!("Initializing vector store at: {}", config.database_url);

        let db_path = config
            .database_url
            .strip_prefix("sqlite:")
            .unwrap_or(&config.database_url);
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options =
            SqliteConnectOptions::from_str(&config.database_url).map_err(|e| {
                VectorStoreError::StorageFailed(format!("invalid database url: {e}"))
            })?;
        let options = options.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prose_chunks (
                chunk_id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_prose_chunks_doc_id ON prose_chunks(doc_id)")
            .execute(&pool)
            .await?;

        info!("Vector store initialized");

        Ok(Self {
            pool,
            embedding_dimension,
        })
    }

    /// Calculate cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding
            .iter()
            .flat_map(|f| f.to_le_bytes().to_vec())
            .collect()
    }

    fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, doc_id: &str, chunks: Vec<ProseChunk>) -> Result<()> {
        for chunk in &chunks {
            if chunk.embedding.len() != self.embedding_dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: self.embedding_dimension,
                    actual: chunk.embedding.len(),
                }
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM prose_chunks WHERE doc_id = ?1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO prose_chunks (chunk_id, doc_id, page_number, content, embedding, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.doc_id)
            .bind(chunk.page_number)
            .bind(&chunk.content)
            .bind(Self::serialize_embedding(&chunk.embedding))
            .bind(chunk.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(doc_id, chunks = chunks.len(), "upserted prose chunks");
        Ok(())
    }

    async fn query(
        &self,
        doc_id: &str,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        if query_embedding.len() != self.embedding_dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.embedding_dimension,
                actual: query_embedding.len(),
            }
            .into());
        }

        let rows = sqlx::query("SELECT * FROM prose_chunks WHERE doc_id = ?1")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::new();

        for row in rows {
            let embedding_blob: Vec<u8> = row.get("embedding");
            let embedding = Self::deserialize_embedding(&embedding_blob);
            let similarity = Self::cosine_similarity(query_embedding, &embedding);

            if similarity >= threshold {
                let created_at: String = row.get("created_at");
                results.push(SearchResult {
                    chunk: ProseChunk {
                        chunk_id: row.get("chunk_id"),
                        doc_id: row.get("doc_id"),
                        page_number: row.get::<i64, _>("page_number") as u32,
                        content: row.get("content"),
                        embedding,
                        created_at: DateTime::parse_from_rfc3339(&created_at)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    },
                    similarity,
                });
            }
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        debug!(
            doc_id,
            found = results.len(),
            threshold,
            "vector search complete"
        );
        Ok(results)
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM prose_chunks WHERE doc_id = ?1")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;

        debug!(doc_id, removed = result.rows_affected(), "deleted document chunks");
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM prose_chunks")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM prose_chunks")
            .execute(&self.pool)
            .await?;
        info!("Cleared {} prose chunks", result.rows_affected());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(doc_id: &str, chunk_id: &str, embedding: Vec<f32>) -> ProseChunk {
        ProseChunk {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            page_number: 1,
            content: format!("content for {chunk_id}"),
            embedding,
            created_at: Utc::now(),
        }
    }

    async fn test_store() -> SqliteVectorStore {
        let config = VectorSettings {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        SqliteVectorStore::connect(&config, 4).await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_query_scoped_by_doc() {
        let store = test_store().await;

        store
            .upsert(
                "doc-a",
                vec![make_chunk("doc-a", "c1", vec![1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .upsert(
                "doc-b",
                vec![make_chunk("doc-b", "c2", vec![1.0, 0.0, 0.0, 0.0])],
            )
            .await
            .unwrap();

        let hits_a = store
            .query("doc-a", &[1.0, 0.0, 0.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits_a.len(), 1);
        assert_eq!(hits_a[0].chunk.chunk_id, "c1");

        let hits_wrong_doc = store
            .query("doc-c", &[1.0, 0.0, 0.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert!(hits_wrong_doc.is_empty());
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let store = test_store().await;
        let chunk = make_chunk("doc-a", "c1", vec![1.0, 0.0, 0.0, 0.0]);

        store.upsert("doc-a", vec![chunk.clone()]).await.unwrap();
        store.upsert("doc-a", vec![chunk]).await.unwrap();

        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_only_target_doc() {
        let store = test_store().await;

        store
            .upsert("doc-a", vec![make_chunk("doc-a", "c1", vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("doc-b", vec![make_chunk("doc-b", "c2", vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();

        store.delete("doc-a").await.unwrap();

        assert_eq!(store.size().await.unwrap(), 1);
        let hits = store
            .query("doc-b", &[1.0, 0.0, 0.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(SqliteVectorStore::cosine_similarity(&a, &b), 1.0);
        assert_eq!(SqliteVectorStore::cosine_similarity(&a, &c), 0.0);
    }

    #[test]
    fn test_embedding_round_trip() {
        let embedding = vec![1.5, -2.3, 0.0, 42.1];
        let serialized = SqliteVectorStore::serialize_embedding(&embedding);
        let deserialized = SqliteVectorStore::deserialize_embedding(&serialized);

        assert_eq!(embedding.len(), deserialized.len());
        for (orig, deser) in embedding.iter().zip(deserialized.iter()) {
            assert!((orig - deser).abs() < f32::EPSILON);
        }
    }
}
