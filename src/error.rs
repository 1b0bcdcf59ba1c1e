//! Error handling for the hybrid document QA core

use thiserror::Error;

/// Result type alias for the core
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for the core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("⚠️ QUOTA EXCEEDED: {0}")]
    QuotaExceeded(String),

    #[error("I am not able to process this query. Please try rephrasing.")]
    RetrievalFailure,

    #[error("Schema inference failed for table: {0}")]
    SchemaInferenceFailure(String),

    #[error("The request took too long to process. Please try again.")]
    Timeout,

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("Relational store error: {0}")]
    Relational(#[from] RelationalError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors related to language model operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: operation took too long")]
    Timeout,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

/// Errors related to the vector (prose) substrate
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Storage failed: {0}")]
    StorageFailed(String),
}

/// Errors related to the relational (table) substrate
#[derive(Error, Debug)]
pub enum RelationalError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Statement rejected: only SELECT statements may be executed ({0})")]
    NonSelectRejected(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

impl CoreError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Timeout
                | CoreError::Llm(LlmError::Timeout)
                | CoreError::Llm(LlmError::ConnectionFailed(_))
                | CoreError::VectorStore(_)
                | CoreError::Relational(RelationalError::QueryFailed(_))
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::QuotaExceeded(_) => "quota_exceeded",
            CoreError::RetrievalFailure => "retrieval_failure",
            CoreError::SchemaInferenceFailure(_) => "schema_inference_failure",
            CoreError::Timeout => "timeout",
            CoreError::Fatal(_) => "fatal",
            CoreError::Llm(_) => "llm",
            CoreError::VectorStore(_) => "vector_store",
            CoreError::Relational(_) => "relational",
            CoreError::Config(_) => "config",
            CoreError::Io(_) => "io",
            CoreError::Serialization(_) => "serialization",
            CoreError::Database(_) => "database",
            CoreError::NotFound(_) => "not_found",
        }
    }

    /// Whether this error should propagate out of `answer`/`ingest` verbatim,
    /// rather than being absorbed into an inert per-branch response.
    pub fn propagates_out_of_answer(&self) -> bool {
        matches!(self, CoreError::InvalidInput(_) | CoreError::Fatal(_)) || self.is_quota_exceeded()
    }

    /// True for a quota condition reported either directly or wrapped from
    /// the LLM client (`#[from] LlmError`). Agent call sites check this
    /// before absorbing an LLM error into a fallback response, so a quota
    /// condition always reaches the caller instead of being swallowed.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            CoreError::QuotaExceeded(_) | CoreError::Llm(LlmError::QuotaExceeded(_))
        )
    }

    /// Normalize an `Llm(LlmError::QuotaExceeded)` into the bare
    /// `QuotaExceeded` variant so its `Display` carries the visible
    /// "⚠️ QUOTA EXCEEDED" marker through to the caller. A no-op for every
    /// other variant, including a bare `QuotaExceeded` already.
    pub fn into_quota_marker(self) -> CoreError {
        match self {
            CoreError::Llm(LlmError::QuotaExceeded(msg)) => CoreError::QuotaExceeded(msg),
            other => other,
        }
    }
}

/// The fixed message returned when neither substrate can answer a question.
pub const INSUFFICIENT_CONTEXT_MESSAGE: &str =
    "I don't have enough information in this document to answer that question.";

/// The fixed message returned when a query deadline is exceeded.
pub const TIMEOUT_MESSAGE: &str = "The request took too long to process. Please try again.";

/// The fixed message returned when the table agent cannot execute a query.
pub const QUERY_FAILURE_MESSAGE: &str =
    "I am not able to process this query. Please try rephrasing.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_error = CoreError::Timeout;
        assert!(timeout_error.is_retryable());

        let config_error = CoreError::Config("invalid config".to_string());
        assert!(!config_error.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let llm_error = CoreError::Llm(LlmError::Timeout);
        assert_eq!(llm_error.category(), "llm");

        let vs_error = CoreError::VectorStore(VectorStoreError::NotInitialized);
        assert_eq!(vs_error.category(), "vector_store");
    }

    #[test]
    fn test_propagation_policy() {
        assert!(CoreError::InvalidInput("x".into()).propagates_out_of_answer());
        assert!(CoreError::QuotaExceeded("x".into()).propagates_out_of_answer());
        assert!(CoreError::Fatal("x".into()).propagates_out_of_answer());
        assert!(!CoreError::Timeout.propagates_out_of_answer());
        assert!(!CoreError::RetrievalFailure.propagates_out_of_answer());
    }

    #[test]
    fn test_llm_wrapped_quota_exceeded_propagates() {
        let err = CoreError::Llm(LlmError::QuotaExceeded("daily limit reached".to_string()));
        assert!(err.is_quota_exceeded());
        assert!(err.propagates_out_of_answer());
    }

    #[test]
    fn test_into_quota_marker_surfaces_visible_marker() {
        let err = CoreError::Llm(LlmError::QuotaExceeded("daily limit reached".to_string()));
        assert!(err.into_quota_marker().to_string().contains("QUOTA EXCEEDED"));
    }

    #[test]
    fn test_quota_marker_visible() {
        let err = CoreError::QuotaExceeded("daily limit reached".to_string());
        assert!(err.to_string().contains("QUOTA EXCEEDED"));
    }
}
