//! Hybrid document QA core
//!
//! Retrieval-augmented question answering over PDFs that mix prose and
//! tables. A vector substrate handles prose, a relational substrate holds
//! typed table rows, and a four-node agent pipeline (Manager, Table agent,
//! RAG agent, Combiner) routes each question across whichever substrates it
//! needs and fuses the results.
//!
//! # Example
//!
//! ```rust,no_run
//! use hybrid_doc_qa::config::CoreConfig;
//! use hybrid_doc_qa::orchestrator::Core;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let core = Core::new(CoreConfig::default()).await?;
//!     let record = core.ingest(&[], "report.pdf".to_string()).await?;
//!     let answer = core.answer("What was Q3 revenue?".to_string(), record.doc_id).await?;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod api;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod relational;
pub mod table;
pub mod vector_store;

pub use agents::{AgentState, Classification, Combiner, ManagerNode, RagAgent, TableAgent};
pub use cache::{ClassificationCache, SchemaCache};
pub use config::CoreConfig;
pub use document::{Document, IngestRecord};
pub use error::{CoreError, Result};
pub use orchestrator::Core;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
