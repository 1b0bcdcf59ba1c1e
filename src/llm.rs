//! Language model integration using Ollama
//!
//! This client backs all four LLM call sites used by the agents
//! (classification, schema inference, SQL generation, answer/combination).
//! Each call site owns its own prompt template and parser; this module only
//! speaks "messages in, text out" plus embeddings.

use crate::cache::LlmCache;
use crate::config::LlmSettings;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Marker the LLM client recognizes in a raw provider response as a quota
/// condition, distinct from any other generation failure.
pub const QUOTA_EXCEEDED_MARKER: &str = "QUOTA_EXCEEDED";

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Embedding response
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Trait for language model operations. Kept abstract so tests and
/// alternate providers can be substituted behind a single seam.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text from a conversation
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse>;

    /// Generate embeddings for text
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse>;

    /// Generate embeddings for a batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingResponse>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// List available models
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Check if model is available
    async fn is_model_available(&self, model: &str) -> Result<bool>;
}

/// Ollama client implementation
pub struct OllamaClient {
    client: reqwest::Client,
    config: LlmSettings,
    cache: Option<Arc<LlmCache>>,
}

/// Ollama API request for generation
#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

/// Ollama API options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

/// Ollama API response for generation
#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    model: String,
    message: Message,
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama API request for embeddings
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

/// Ollama API response for embeddings
#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModelInfo>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client without a response cache
    pub fn new(config: LlmSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config,
            cache: None,
        }
    }

    /// Create a new Ollama client backed by the LLM response cache
    pub async fn new_with_cache(config: LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        let cache = if config.cache.enabled {
            Some(Arc::new(LlmCache::new(config.cache.clone()).await?))
        } else {
            None
        };

        Ok(Self {
            client,
            config,
            cache,
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/{}",
            self.config.ollama_url.trim_end_matches('/'),
            endpoint
        )
    }

    fn cache_key_for(&self, messages: &[Message]) -> String {
        let messages_json =
            serde_json::to_string(messages).unwrap_or_else(|_| format!("{:?}", messages));
        let system_prompt = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str());

        LlmCache::compute_cache_key(
            &messages_json,
            &self.config.model_name,
            self.config.temperature,
            self.config.max_tokens,
            system_prompt,
        )
    }

    /// Detect the quota marker in a raw provider error/response body.
    fn check_quota(&self, raw: &str) -> Option<LlmError> {
        if raw.contains(QUOTA_EXCEEDED_MARKER) {
            warn!("LLM provider reported quota exhaustion");
            Some(LlmError::QuotaExceeded(raw.to_string()))
        } else {
            None
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResponse> {
        debug!("Generating text with {} messages", messages.len());

        if let Some(cache) = &self.cache {
            let cache_key = self.cache_key_for(messages);
            if let Ok(Some(cached_response)) = cache.get(&cache_key).await {
                debug!("Using cached response");
                return Ok(GenerationResponse {
                    text: cached_response,
                    tokens_used: None,
                    model: self.config.model_name.clone(),
                    finish_reason: Some("cached".to_string()),
                });
            }
        }

        let request = OllamaGenerateRequest {
            model: self.config.model_name.clone(),
            messages: messages.to_vec(),
            stream: false,
            options: OllamaOptions {
                num_predict: self.config.max_tokens,
                temperature: self.config.temperature,
            },
        };

        let url = self.api_url("chat");
        debug!("Making request to: {}", url);

        let response = timeout(
            Duration::from_secs(self.config.request_timeout_seconds),
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if let Some(quota_err) = self.check_quota(&error_text) {
                return Err(quota_err.into());
            }
            error!("Ollama API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let ollama_response: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if !ollama_response.done {
            return Err(LlmError::InvalidResponse("Incomplete response".to_string()).into());
        }

        let response_text = ollama_response.message.content.clone();

        if let Some(quota_err) = self.check_quota(&response_text) {
            return Err(quota_err.into());
        }

        info!(
            "Generated {} tokens",
            ollama_response.eval_count.unwrap_or(0)
        );

        if let Some(cache) = &self.cache {
            let cache_key = self.cache_key_for(messages);
            if let Err(e) = cache
                .set(
                    cache_key,
                    response_text.clone(),
                    ollama_response.model.clone(),
                    self.config.temperature,
                )
                .await
            {
                error!("Failed to cache response: {}", e);
            }
        }

        Ok(GenerationResponse {
            text: response_text,
            tokens_used: ollama_response.eval_count,
            model: ollama_response.model,
            finish_reason: ollama_response.done_reason,
        })
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        debug!("Generating embedding for text of length {}", text.len());

        let request = OllamaEmbedRequest {
            model: self.config.embedding_model_name.clone(),
            prompt: text.to_string(),
        };

        let url = self.api_url("embeddings");

        let response = timeout(
            Duration::from_secs(self.config.request_timeout_seconds),
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Ollama embedding API error: {}", error_text);
            return Err(LlmError::EmbeddingFailed(error_text).into());
        }

        let ollama_response: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        if ollama_response.embedding.len() != self.config.embedding_dimension {
            return Err(LlmError::InvalidResponse(format!(
                "expected embedding dimension {}, got {}",
                self.config.embedding_dimension,
                ollama_response.embedding.len()
            ))
            .into());
        }

        Ok(EmbeddingResponse {
            embedding: ollama_response.embedding,
            model: self.config.embedding_model_name.clone(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = self.api_url("tags");

        let response = timeout(
            Duration::from_secs(self.config.request_timeout_seconds),
            self.client.get(&url).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let models_response: OllamaModelsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let models: Vec<String> = models_response.models.into_iter().map(|m| m.name).collect();

        info!("Found {} models", models.len());
        Ok(models)
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == model))
    }
}

/// Helper function to create a system message
pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

/// Helper function to create a user message
pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

/// Helper function to create an assistant message
pub fn assistant_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::Assistant,
        content: content.into(),
    }
}
