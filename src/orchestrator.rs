//! `Core`: the facade that wires every substrate and node together and
//! exposes the three operations a caller needs — `ingest`, `answer`,
//! `delete_document`.

use crate::agents::{AgentState, Combiner, ManagerNode, RagAgent, TableAgent};
use crate::cache::{ClassificationCache, SchemaCache};
use crate::chunking::ProseChunker;
use crate::config::CoreConfig;
use crate::document::{Document, IngestRecord};
use crate::error::{CoreError, Result, TIMEOUT_MESSAGE};
use crate::llm::{LlmClient, OllamaClient};
use crate::relational::RelationalStore;
use crate::table::{self, SchemaInferrer, SchemaRegistry};
use crate::vector_store::{ProseChunk, SqliteVectorStore, VectorStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// The hybrid document QA core. Built once per process; cheap to clone via
/// `Arc` at the call site since every field is already `Arc`-wrapped.
pub struct Core {
    config: CoreConfig,
    llm: Arc<dyn LlmClient>,
    vector_store: Arc<dyn VectorStore>,
    relational: Arc<RelationalStore>,
    registry: Arc<SchemaRegistry>,
    schema_cache: Arc<SchemaCache>,
    manager: ManagerNode,
    table_agent: TableAgent,
    rag_agent: RagAgent,
    combiner: Combiner,
    chunker: ProseChunker,
    inferrer: SchemaInferrer,
}

impl Core {
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        let llm: Arc<dyn LlmClient> = Arc::new(
            OllamaClient::new_with_cache(config.llm.clone())
                .await
                .unwrap_or_else(|_| OllamaClient::new(config.llm.clone())),
        );
        let vector_store: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::connect(&config.vector, config.llm.embedding_dimension).await?,
        );
        let relational = Arc::new(RelationalStore::connect(&config.relational).await?);
        let registry = Arc::new(SchemaRegistry::load(&config.relational.schema_registry_path)?);
        let schema_cache = Arc::new(SchemaCache::new(config.cache.schema_cache_size));
        let classification_cache = Arc::new(ClassificationCache::new(config.cache.classification_cache_size));

        let manager = ManagerNode::new(llm.clone(), classification_cache);
        let table_agent = TableAgent::new(llm.clone(), relational.clone());
        let rag_agent = RagAgent::new(llm.clone(), vector_store.clone(), config.vector.clone());
        let combiner = Combiner::new(llm.clone());
        let chunker = ProseChunker::default();
        let inferrer = SchemaInferrer::new(llm.clone(), config.relational.inference_sample_rows);

        Ok(Self {
            config,
            llm,
            vector_store,
            relational,
            registry,
            schema_cache,
            manager,
            table_agent,
            rag_agent,
            combiner,
            chunker,
            inferrer,
        })
    }

    /// Ingest one PDF: extract prose and tables, embed and store prose
    /// chunks, infer and persist table schemas and rows. `doc_id` is the
    /// content hash of `pdf_bytes` (see `Document::content_hash`); callers
    /// that re-ingest the same bytes get the same `doc_id` back and the
    /// store ends up in the same state as a single ingestion.
    pub async fn ingest(&self, pdf_bytes: &[u8], display_name: String) -> Result<IngestRecord> {
        let started_at = Utc::now();
        let doc_id = Document::content_hash(pdf_bytes);

        let deadline = std::time::Duration::from_secs(self.config.deadlines.ingest_deadline_seconds);
        let result = tokio::time::timeout(deadline, self.ingest_inner(&doc_id, pdf_bytes))
            .await
            .map_err(|_| CoreError::Timeout)?;

        result
            .map_err(CoreError::into_quota_marker)
            .map(|(tables_stored, chunks_stored, schemas_skipped)| IngestRecord {
                doc_id: doc_id.clone(),
                display_name,
                tables_stored,
                chunks_stored,
                schemas_skipped,
                started_at,
                finished_at: Utc::now(),
            })
    }

    async fn ingest_inner(&self, doc_id: &str, pdf_bytes: &[u8]) -> Result<(usize, usize, usize)> {
        let pages = table::extract_pages(pdf_bytes)?;

        let page_texts: Vec<(u32, String)> = pages
            .iter()
            .map(|p| ((p.page_index + 1) as u32, p.page_text.clone()))
            .collect();
        let text_chunks = self.chunker.chunk_pages(&page_texts);

        let mut prose_chunks = Vec::with_capacity(text_chunks.len());
        for (i, chunk) in text_chunks.iter().enumerate() {
            let embedding = self.llm.embed(&chunk.content).await?;
            prose_chunks.push(ProseChunk {
                chunk_id: format!("{doc_id}_chunk_{i}"),
                doc_id: doc_id.to_string(),
                page_number: chunk.page_number,
                content: chunk.content.clone(),
                embedding: embedding.embedding,
                created_at: Utc::now(),
            });
        }
        let chunks_stored = prose_chunks.len();
        self.vector_store.upsert(doc_id, prose_chunks).await?;

        let raw_tables = table::stitch_continuations(&pages, &self.inferrer).await?;

        let mut tables_stored = 0;
        let mut schemas_skipped = 0;
        for raw in &raw_tables {
            match self.inferrer.infer(raw, doc_id).await {
                Ok(schema) => match table::write_table(&self.relational, &schema, raw).await {
                    Ok(_) => {
                        self.registry.put(schema)?;
                        tables_stored += 1;
                    }
                    Err(e) => {
                        warn!("failed to persist inferred table, skipping: {}", e);
                        schemas_skipped += 1;
                    }
                },
                Err(e) => {
                    warn!("schema inference failed for a table, skipping: {}", e);
                    schemas_skipped += 1;
                }
            }
        }
        self.schema_cache.invalidate(doc_id);

        info!(doc_id, tables_stored, chunks_stored, schemas_skipped, "ingestion complete");
        Ok((tables_stored, chunks_stored, schemas_skipped))
    }

    /// Answer one question about one previously-ingested document.
    pub async fn answer(&self, question: String, doc_id: String) -> Result<String> {
        let deadline = std::time::Duration::from_secs(self.config.deadlines.query_deadline_seconds);

        match tokio::time::timeout(deadline, self.answer_inner(question, doc_id)).await {
            Ok(result) => match result {
                Ok(answer) => Ok(answer),
                Err(e) if e.is_quota_exceeded() => Ok(e.into_quota_marker().to_string()),
                Err(e) if e.propagates_out_of_answer() => Err(e),
                Err(e) => {
                    warn!("answer call absorbed a non-fatal error: {}", e);
                    Ok(TIMEOUT_MESSAGE.to_string())
                }
            },
            Err(_) => Ok(TIMEOUT_MESSAGE.to_string()),
        }
    }

    async fn answer_inner(&self, question: String, doc_id: String) -> Result<String> {
        let schemas = self.schemas_for(&doc_id)?;

        let mut state = AgentState::new(question, doc_id.clone());
        self.manager.route(&mut state, &schemas).await?;

        if state.needs_table {
            state.table_response = self.table_agent.answer(&state.table_sub_query, &schemas).await?;
        }
        if state.needs_rag {
            state.rag_response = self.rag_agent.answer(&state.rag_sub_query, &doc_id).await?;
        }

        state.answer = self
            .combiner
            .combine(&state.question, &state.table_response, &state.rag_response)
            .await?;

        Ok(state.answer)
    }

    /// Answer a question using the RAG branch only, bypassing the Manager's
    /// classification. Used by the `/compare` endpoint to show the hybrid
    /// answer next to a pure-prose-retrieval baseline.
    pub async fn answer_rag_only(&self, question: String, doc_id: String) -> Result<String> {
        let deadline = std::time::Duration::from_secs(self.config.deadlines.query_deadline_seconds);
        match tokio::time::timeout(deadline, self.rag_agent.answer(&question, &doc_id)).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(e)) if e.is_quota_exceeded() => Ok(e.into_quota_marker().to_string()),
            Ok(Err(e)) if e.propagates_out_of_answer() => Err(e),
            Ok(Err(e)) => {
                warn!("rag-only answer absorbed a non-fatal error: {}", e);
                Ok(TIMEOUT_MESSAGE.to_string())
            }
            Err(_) => Ok(TIMEOUT_MESSAGE.to_string()),
        }
    }

    fn schemas_for(&self, doc_id: &str) -> Result<Vec<table::TableSchema>> {
        if let Some(cached) = self.schema_cache.get(doc_id) {
            return Ok(cached);
        }
        let schemas = self.registry.by_doc(doc_id);
        self.schema_cache.put(doc_id.to_string(), schemas.clone());
        Ok(schemas)
    }

    /// Maximum size in bytes the caller should accept for an uploaded PDF.
    pub fn max_upload_bytes(&self) -> usize {
        self.config.max_upload_bytes
    }

    /// Delete a document and everything derived from it: prose chunks,
    /// table schemas, and the underlying relational tables.
    pub async fn delete_document(&self, doc_id: &str) -> Result<()> {
        self.vector_store.delete(doc_id).await?;

        let dropped_tables = self.registry.delete_doc(doc_id)?;
        for table_name in &dropped_tables {
            self.relational.drop_table(table_name).await?;
        }
        self.schema_cache.invalidate(doc_id);

        info!(doc_id, tables_dropped = dropped_tables.len(), "document deleted");
        Ok(())
    }

    /// Remove every document's data from both substrates and the registry.
    pub async fn clear_all(&self) -> Result<()> {
        for schema in self.registry.all() {
            self.relational.drop_table(&schema.table_name).await?;
        }
        self.vector_store.clear().await?;
        for schema in self.registry.all() {
            self.registry.delete_doc(&schema.doc_id)?;
        }
        info!("cleared all document data");
        Ok(())
    }
}
