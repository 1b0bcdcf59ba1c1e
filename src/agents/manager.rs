//! The Manager node: classifies a question and, for hybrid questions,
//! rewrites it into two self-contained sub-queries.

use super::state::{AgentState, Classification};
use crate::cache::ClassificationCache;
use crate::error::{CoreError, Result};
use crate::llm::{system_message, user_message, LlmClient};
use crate::table::TableSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManagerDecision {
    status: Classification,
    table_sub_query: String,
    rag_sub_query: String,
}

pub struct ManagerNode {
    llm: Arc<dyn LlmClient>,
    cache: Arc<ClassificationCache>,
}

impl ManagerNode {
    pub fn new(llm: Arc<dyn LlmClient>, cache: Arc<ClassificationCache>) -> Self {
        Self { llm, cache }
    }

    /// Populate `classification`, `needs_table`, `needs_rag`, and both
    /// sub-queries on `state`.
    pub async fn route(&self, state: &mut AgentState, schemas: &[TableSchema]) -> Result<()> {
        if state.question.trim().is_empty() {
            return Err(CoreError::InvalidInput("question must not be empty".to_string()));
        }

        if let Some(cached) = self.cache.get(&state.question, &state.doc_id) {
            if let Ok(decision) = serde_json::from_str::<ManagerDecision>(&cached) {
                debug!("classification cache hit");
                self.apply(state, decision);
                return Ok(());
            }
        }

        let decision = match self.classify(&state.question, schemas).await {
            Ok(decision) => decision,
            Err(e) if e.is_quota_exceeded() => return Err(e.into_quota_marker()),
            Err(e) => {
                warn!("classifier unparseable, defaulting to hybrid routing: {}", e);
                ManagerDecision {
                    status: Classification::Both,
                    table_sub_query: state.question.clone(),
                    rag_sub_query: state.question.clone(),
                }
            }
        };

        if let Ok(serialized) = serde_json::to_string(&decision) {
            self.cache.put(&state.question, &state.doc_id, serialized);
        }

        self.apply(state, decision);
        Ok(())
    }

    fn apply(&self, state: &mut AgentState, decision: ManagerDecision) {
        state.needs_table = matches!(decision.status, Classification::Table | Classification::Both);
        state.needs_rag = matches!(decision.status, Classification::Rag | Classification::Both);
        state.classification = Some(decision.status);
        state.table_sub_query = decision.table_sub_query;
        state.rag_sub_query = decision.rag_sub_query;
    }

    async fn classify(&self, question: &str, schemas: &[TableSchema]) -> Result<ManagerDecision> {
        let schema_summary = render_schema_summary(schemas);

        let messages = vec![
            system_message(
                "You route questions about a document to a table-query engine, a prose retrieval engine, or both. \
                 Respond with JSON only: {\"status\": \"table\"|\"rag\"|\"both\", \"table_sub_query\": \"...\", \"rag_sub_query\": \"...\"}. \
                 When a question is hybrid, split it into two self-contained sub-questions that each carry the same intent; \
                 do not return a verbatim copy of the compound question as both sub-queries when a meaningful split exists.",
            ),
            user_message(format!(
                "Available tables:\n{schema_summary}\n\nQuestion: {question}"
            )),
        ];

        let response = self.llm.generate(&messages).await?;
        let cleaned = response
            .text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        serde_json::from_str(cleaned).map_err(CoreError::from)
    }
}

fn render_schema_summary(schemas: &[TableSchema]) -> String {
    if schemas.is_empty() {
        return "(no tables extracted from this document)".to_string();
    }

    schemas
        .iter()
        .map(|schema| {
            let columns = schema
                .columns
                .iter()
                .map(|(name, ty)| format!("{name}:{ty:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("- {} ({}) — {}", schema.table_name, columns, schema.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingResponse, GenerationResponse, Message};
    use async_trait::async_trait;
    use chrono::Utc;

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

    struct QuotaLlm;

    #[async_trait]
    impl LlmClient for QuotaLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResponse> {
            Err(CoreError::Llm(crate::error::LlmError::QuotaExceeded("daily limit reached".to_string())))
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
    async fn test_route_propagates_quota_exceeded_instead_of_falling_back() {
        let node = ManagerNode::new(Arc::new(QuotaLlm), Arc::new(ClassificationCache::new(10)));
        let mut state = AgentState::new("Who won?".to_string(), "doc_x".to_string());
        let result = node.route(&mut state, &[]).await;
        assert!(matches!(result, Err(e) if e.is_quota_exceeded()));
    }

    fn sample_schema() -> TableSchema {
        TableSchema {
            table_name: "doc_x_matches".to_string(),
            doc_id: "doc_x".to_string(),
            description: "Final match results".to_string(),
            columns: vec![("home_team".to_string(), crate::table::SemanticType::String)],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_route_empty_question_is_invalid() {
        let node = ManagerNode::new(
            Arc::new(StubLlm { response_text: String::new() }),
            Arc::new(ClassificationCache::new(10)),
        );
        let mut state = AgentState::new("".to_string(), "doc_x".to_string());
        let result = node.route(&mut state, &[]).await;
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_route_parses_table_classification() {
        let node = ManagerNode::new(
            Arc::new(StubLlm {
                response_text: r#"{"status": "table", "table_sub_query": "how many matches", "rag_sub_query": ""}"#.to_string(),
            }),
            Arc::new(ClassificationCache::new(10)),
        );
        let mut state = AgentState::new("How many matches were played?".to_string(), "doc_x".to_string());
        node.route(&mut state, &[sample_schema()]).await.unwrap();

        assert!(state.needs_table);
        assert!(!state.needs_rag);
        assert_eq!(state.classification, Some(Classification::Table));
    }

    #[tokio::test]
    async fn test_route_falls_back_to_hybrid_on_garbage() {
        let node = ManagerNode::new(
            Arc::new(StubLlm { response_text: "not json".to_string() }),
            Arc::new(ClassificationCache::new(10)),
        );
        let mut state = AgentState::new("Tell me everything".to_string(), "doc_x".to_string());
        node.route(&mut state, &[]).await.unwrap();

        assert!(state.needs_table);
        assert!(state.needs_rag);
    }

    #[tokio::test]
    async fn test_route_uses_cache_on_second_call() {
        let cache = Arc::new(ClassificationCache::new(10));
        let node = ManagerNode::new(
            Arc::new(StubLlm {
                response_text: r#"{"status": "rag", "table_sub_query": "", "rag_sub_query": "who hosted it"}"#.to_string(),
            }),
            cache.clone(),
        );

        let mut state1 = AgentState::new("Who hosted the tournament?".to_string(), "doc_x".to_string());
        node.route(&mut state1, &[]).await.unwrap();

        assert!(cache.get("Who hosted the tournament?", "doc_x").is_some());
    }
}
