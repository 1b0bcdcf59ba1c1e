//! The RAG agent: embeds a sub-query, retrieves the most similar prose
//! chunks for one document, and asks the LLM to answer from them alone.

use crate::config::VectorSettings;
use crate::error::{Result, INSUFFICIENT_CONTEXT_MESSAGE};
use crate::llm::{system_message, user_message, LlmClient};
use crate::vector_store::{SearchResult, VectorStore};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RagAgent {
    llm: Arc<dyn LlmClient>,
    vector_store: Arc<dyn VectorStore>,
    settings: VectorSettings,
}

impl RagAgent {
    pub fn new(llm: Arc<dyn LlmClient>, vector_store: Arc<dyn VectorStore>, settings: VectorSettings) -> Self {
        Self { llm, vector_store, settings }
    }

    pub async fn answer(&self, sub_query: &str, doc_id: &str) -> Result<String> {
        let embedding = match self.llm.embed(sub_query).await {
            Ok(resp) => resp.embedding,
            Err(e) if e.is_quota_exceeded() => return Err(e.into_quota_marker()),
            Err(e) => {
                warn!("rag agent failed to embed sub-query: {}", e);
                return Ok(INSUFFICIENT_CONTEXT_MESSAGE.to_string());
            }
        };

        let k = adaptive_k(sub_query, &self.settings);
        let mut results = self
            .vector_store
            .query(doc_id, &embedding, k, self.settings.similarity_threshold)
            .await?;

        if results.is_empty() {
            debug!("no hits at configured threshold, retrying once at threshold 0.0");
            results = self.vector_store.query(doc_id, &embedding, k, 0.0).await?;
        }

        if results.is_empty() {
            return Ok(INSUFFICIENT_CONTEXT_MESSAGE.to_string());
        }

        self.synthesize(sub_query, &results).await
    }

    async fn synthesize(&self, sub_query: &str, results: &[SearchResult]) -> Result<String> {
        let context = render_context(results);

        let messages = vec![
            system_message(
                "Answer the question using only the context passages below. If the passages don't \
                 contain the answer, say so plainly instead of guessing.",
            ),
            user_message(format!("Context:\n{context}\n\nQuestion: {sub_query}")),
        ];

        match self.llm.generate(&messages).await {
            Ok(response) => Ok(response.text),
            Err(e) if e.is_quota_exceeded() => Err(e.into_quota_marker()),
            Err(e) => {
                warn!("rag agent generation failed: {}", e);
                Ok(INSUFFICIENT_CONTEXT_MESSAGE.to_string())
            }
        }
    }
}

/// Widens `k` for questions that look comparative or broad, narrows it for
/// short factual lookups.
fn adaptive_k(question: &str, settings: &VectorSettings) -> usize {
    let lowered = question.to_lowercase();
    let broad_markers = ["compare", "overview", "summarize", "summary", "all of", "every"];

    if broad_markers.iter().any(|m| lowered.contains(m)) {
        settings.max_k
    } else if question.split_whitespace().count() <= 8 {
        settings.min_k
    } else {
        ((settings.min_k + settings.max_k) / 2).clamp(settings.min_k, settings.max_k)
    }
}

fn render_context(results: &[SearchResult]) -> String {
    let mut ordered = results.to_vec();
    ordered.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));

    ordered
        .iter()
        .map(|r| format!("[page {}] {}", r.chunk.page_number, r.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingResponse, GenerationResponse, Message};
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;

    struct QuotaLlm;

    #[async_trait]
    impl LlmClient for QuotaLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResponse> {
            Err(crate::error::CoreError::Llm(crate::error::LlmError::QuotaExceeded(
                "daily limit reached".to_string(),
            )))
        }
        async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
            Err(crate::error::CoreError::Llm(crate::error::LlmError::QuotaExceeded(
                "daily limit reached".to_string(),
            )))
        }
        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn is_model_available(&self, _model: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_answer_propagates_quota_exceeded_instead_of_insufficient_context() {
        let settings = VectorSettings {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let vector_store = Arc::new(SqliteVectorStore::connect(&settings, 4).await.unwrap());
        let agent = RagAgent::new(Arc::new(QuotaLlm), vector_store, settings);

        let result = agent.answer("Who won?", "doc-x").await;
        assert!(matches!(result, Err(e) if e.is_quota_exceeded()));
    }

    #[test]
    fn test_adaptive_k_widens_for_comparative_questions() {
        let settings = VectorSettings { min_k: 3, max_k: 12, ..Default::default() };
        assert_eq!(adaptive_k("Compare the attendance in 1930 and 1950", &settings), 12);
    }

    #[test]
    fn test_adaptive_k_narrows_for_short_factual_questions() {
        let settings = VectorSettings { min_k: 3, max_k: 12, ..Default::default() };
        assert_eq!(adaptive_k("Who won in 1950?", &settings), 3);
    }

    #[test]
    fn test_adaptive_k_midpoint_for_longer_plain_questions() {
        let settings = VectorSettings { min_k: 3, max_k: 12, ..Default::default() };
        let k = adaptive_k(
            "What were the main reasons the tournament format changed between editions",
            &settings,
        );
        assert!(k >= 3 && k <= 12);
    }
}
