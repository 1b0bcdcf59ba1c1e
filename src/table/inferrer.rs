//! LLM-driven schema inference, and the continuation oracle that decides
//! whether two page-level tables are the same logical table.

use super::extractor::{ContinuationOracle, RawTable};
use super::schema::{SemanticType, TableSchema};
use crate::error::{CoreError, Result};
use crate::llm::{system_message, user_message, LlmClient};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Infers a `TableSchema` from the first N rows of a raw table, and answers
/// the extractor's cross-page continuation question — both are "LLM as
/// parser" call sites with their own prompt and strict output parser.
pub struct SchemaInferrer {
    llm: Arc<dyn LlmClient>,
    sample_rows: usize,
}

#[derive(Debug, Deserialize)]
struct InferredSchemaResponse {
    columns: BTreeMap<String, String>,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ContinuationResponse {
    continues: bool,
    #[allow(dead_code)]
    reason: String,
}

impl SchemaInferrer {
    pub fn new(llm: Arc<dyn LlmClient>, sample_rows: usize) -> Self {
        Self { llm, sample_rows }
    }

    /// Infer the typed schema for one logical table.
    pub async fn infer(&self, raw: &RawTable, doc_id: &str) -> Result<TableSchema> {
        let sample = self.render_sample(raw);

        match self.try_infer(&sample, false).await {
            Ok(schema) => Ok(self.finalize(schema, raw, doc_id)),
            Err(_) => match self.try_infer(&sample, true).await {
                Ok(schema) => Ok(self.finalize(schema, raw, doc_id)),
                Err(e) => {
                    warn!("schema inference failed twice: {}", e);
                    Err(CoreError::SchemaInferenceFailure(e.to_string()))
                }
            },
        }
    }

    async fn try_infer(&self, sample: &str, strict: bool) -> Result<InferredSchemaResponse> {
        let instruction = if strict {
            "Return ONLY minified JSON matching exactly: {\"columns\": {\"col_name\": \"string|integer|float|currency|percentage|date\"}, \"description\": \"...\"}. No prose, no markdown fences."
        } else {
            "Infer a semantic type for each column from this table sample. Respond with JSON: {\"columns\": {\"col_name\": \"string|integer|float|currency|percentage|date\"}, \"description\": \"one sentence\"}."
        };

        let messages = vec![
            system_message(
                "You are a precise data-typing assistant for tabular data extracted from PDFs.",
            ),
            user_message(format!("{instruction}\n\nTable sample:\n{sample}")),
        ];

        let response = self.llm.generate(&messages).await?;
        parse_json_response(&response.text)
    }

    fn render_sample(&self, raw: &RawTable) -> String {
        raw.rows
            .iter()
            .take(self.sample_rows + 1)
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Order columns the way the raw table's header row does, not however
    /// the LLM's JSON object happened to list them — a JSON map's key order
    /// is not a format guarantee, and the writer depends on this order
    /// matching each raw row's cell positions exactly.
    fn finalize(&self, response: InferredSchemaResponse, raw: &RawTable, doc_id: &str) -> TableSchema {
        let header = raw.rows.first().cloned().unwrap_or_default();
        let columns: Vec<(String, SemanticType)> = header
            .into_iter()
            .map(|name| {
                let semantic_type = response
                    .columns
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(&name))
                    .map(|(_, type_str)| parse_semantic_type(type_str))
                    .unwrap_or(SemanticType::String);
                (name, semantic_type)
            })
            .collect();

        let short_id = &doc_id[..doc_id.len().min(8)];
        TableSchema {
            table_name: format!("doc_{short_id}_table_{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)),
            doc_id: doc_id.to_string(),
            description: response.description,
            columns,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ContinuationOracle for SchemaInferrer {
    async fn is_continuation(&self, in_flight: &RawTable, candidate: &RawTable) -> Result<bool> {
        let in_flight_sample = self.render_sample(in_flight);
        let candidate_sample = candidate
            .rows
            .iter()
            .take(self.sample_rows)
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            system_message(
                "You decide whether a second table fragment is the continuation of a first one across a page break in a PDF.",
            ),
            user_message(format!(
                "First table (header + sample rows):\n{in_flight_sample}\n\nSecond table fragment (sample rows):\n{candidate_sample}\n\nRespond with JSON: {{\"continues\": true|false, \"reason\": \"...\"}}."
            )),
        ];

        let response = self.llm.generate(&messages).await?;
        match parse_json_response::<ContinuationResponse>(&response.text) {
            Ok(parsed) => {
                debug!(continues = parsed.continues, "continuation oracle decided");
                Ok(parsed.continues)
            }
            Err(_) => {
                warn!("continuation oracle returned unparseable response; assuming no continuation");
                Ok(false)
            }
        }
    }
}

fn parse_json_response<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(CoreError::from)
}

fn parse_semantic_type(raw: &str) -> SemanticType {
    match raw.to_lowercase().as_str() {
        "integer" => SemanticType::Integer,
        "float" => SemanticType::Float,
        "currency" => SemanticType::Currency,
        "percentage" => SemanticType::Percentage,
        "date" => SemanticType::Date,
        _ => SemanticType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingResponse, GenerationResponse};

    struct StubLlm {
        response_text: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn generate(&self, _messages: &[crate::llm::Message]) -> Result<GenerationResponse> {
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

    #[tokio::test]
    async fn test_infer_parses_valid_json() {
        let llm = Arc::new(StubLlm {
            response_text: r#"{"columns": {"team": "string", "wins": "integer"}, "description": "World Cup wins by team"}"#.to_string(),
        });
        let inferrer = SchemaInferrer::new(llm, 3);
        let raw = RawTable {
            rows: vec![
                vec!["Team".to_string(), "Wins".to_string()],
                vec!["Brazil".to_string(), "5".to_string()],
            ],
        };

        let schema = inferrer.infer(&raw, "doc123").await.unwrap();
        assert_eq!(schema.semantic_type_of("wins"), Some(SemanticType::Integer));
        assert_eq!(schema.column_names(), vec!["Team", "Wins"]);
        assert!(schema.table_name.starts_with("doc_doc123"));
    }

    #[tokio::test]
    async fn test_infer_fails_gracefully_on_garbage() {
        let llm = Arc::new(StubLlm {
            response_text: "not json at all".to_string(),
        });
        let inferrer = SchemaInferrer::new(llm, 3);
        let raw = RawTable {
            rows: vec![vec!["Team".to_string()], vec!["Brazil".to_string()]],
        };

        let result = inferrer.infer(&raw, "doc123").await;
        assert!(matches!(result, Err(CoreError::SchemaInferenceFailure(_))));
    }

    #[tokio::test]
    async fn test_continuation_oracle_parses_response() {
        let llm = Arc::new(StubLlm {
            response_text: r#"{"continues": true, "reason": "same columns, sequential data"}"#
                .to_string(),
        });
        let inferrer = SchemaInferrer::new(llm, 3);
        let a = RawTable {
            rows: vec![vec!["Team".to_string()], vec!["Brazil".to_string()]],
        };
        let b = RawTable {
            rows: vec![vec!["Germany".to_string()]],
        };

        assert!(inferrer.is_continuation(&a, &b).await.unwrap());
    }
}
