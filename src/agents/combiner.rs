//! The Combiner node: merges the table and RAG branch responses into one
//! final answer.

use crate::error::{Result, INSUFFICIENT_CONTEXT_MESSAGE};
use crate::llm::{system_message, user_message, LlmClient};
use std::sync::Arc;
use tracing::warn;

pub struct Combiner {
    llm: Arc<dyn LlmClient>,
}

impl Combiner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Combine the two branch responses. Either may be empty if its branch
    /// never ran. Every discrete item present in `table_response` must
    /// survive into the final answer verbatim — no truncation or summarizing
    /// away of rows.
    pub async fn combine(
        &self,
        original_question: &str,
        table_response: &str,
        rag_response: &str,
    ) -> Result<String> {
        let table_response = table_response.trim();
        let rag_response = rag_response.trim();

        match (table_response.is_empty(), rag_response.is_empty()) {
            (true, true) => Ok(INSUFFICIENT_CONTEXT_MESSAGE.to_string()),
            (false, true) => Ok(table_response.to_string()),
            (true, false) => Ok(rag_response.to_string()),
            (false, false) => self.synthesize(original_question, table_response, rag_response).await,
        }
    }

    async fn synthesize(&self, question: &str, table_response: &str, rag_response: &str) -> Result<String> {
        let messages = vec![
            system_message(
                "You combine a structured-data answer and a prose answer into one final answer to the \
                 user's question. Every discrete item in the structured-data answer (every row, every \
                 listed value) must still appear in your final answer — do not truncate, summarize away, \
                 or drop any of them. Weave in the prose answer's context around them.",
            ),
            user_message(format!(
                "Question: {question}\n\nStructured-data answer:\n{table_response}\n\nProse answer:\n{rag_response}"
            )),
        ];

        match self.llm.generate(&messages).await {
            Ok(response) => Ok(response.text),
            Err(e) if e.is_quota_exceeded() => Err(e.into_quota_marker()),
            Err(e) => {
                warn!("combiner synthesis failed, falling back to the structured-data answer: {}", e);
                Ok(table_response.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingResponse, GenerationResponse, Message};
    use async_trait::async_trait;

    struct StubLlm {
        response_text: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResponse> {
            Ok(GenerationResponse {
                text: self.response_text.clone(),
                tokens_used: None,
                model: "stub".to_string(),
                finish_reason: None,
            })
        }
        async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
            unimplemented!()
        }
        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn is_model_available(&self, _model: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn combiner() -> Combiner {
        Combiner::new(Arc::new(StubLlm { response_text: "synthesized".to_string() }))
    }

    struct QuotaLlm;

    #[async_trait]
    impl LlmClient for QuotaLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResponse> {
            Err(crate::error::CoreError::Llm(crate::error::LlmError::QuotaExceeded(
                "daily limit reached".to_string(),
            )))
        }
        async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
            unimplemented!()
        }
        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn is_model_available(&self, _model: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_combine_propagates_quota_exceeded_instead_of_table_fallback() {
        let combiner = Combiner::new(Arc::new(QuotaLlm));
        let result = combiner.combine("q", "- Brazil", "Brazil won the most titles.").await;
        assert!(matches!(result, Err(e) if e.is_quota_exceeded()));
    }

    #[tokio::test]
    async fn test_combine_both_empty_returns_insufficient_context() {
        let result = combiner().combine("q", "", "").await.unwrap();
        assert_eq!(result, INSUFFICIENT_CONTEXT_MESSAGE);
    }

    #[tokio::test]
    async fn test_combine_table_only_returns_verbatim() {
        let result = combiner().combine("q", "- Brazil\n- Uruguay", "").await.unwrap();
        assert_eq!(result, "- Brazil\n- Uruguay");
    }

    #[tokio::test]
    async fn test_combine_rag_only_returns_verbatim() {
        let result = combiner().combine("q", "", "Uruguay hosted it.").await.unwrap();
        assert_eq!(result, "Uruguay hosted it.");
    }

    #[tokio::test]
    async fn test_combine_both_present_synthesizes() {
        let result = combiner().combine("q", "- Brazil", "Brazil won the most titles.").await.unwrap();
        assert_eq!(result, "synthesized");
    }
}
