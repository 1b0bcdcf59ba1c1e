//! The value carried through the four-node classification/routing state
//! machine for one question.

use serde::{Deserialize, Serialize};

/// The classifier's routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Table,
    Rag,
    Both,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Table => "table",
            Classification::Rag => "rag",
            Classification::Both => "both",
        }
    }
}

/// State for a single `answer` call, mutated monotonically: each field is
/// written exactly once, by the node named in its doc comment.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub question: String,
    pub doc_id: String,

    /// Written by the Manager node.
    pub needs_table: bool,
    /// Written by the Manager node.
    pub needs_rag: bool,
    /// Written by the Manager node.
    pub classification: Option<Classification>,
    /// Written by the Manager node.
    pub table_sub_query: String,
    /// Written by the Manager node.
    pub rag_sub_query: String,

    /// Written by the Table agent.
    pub table_response: String,
    /// Written by the RAG agent.
    pub rag_response: String,

    /// Written by the Combiner node.
    pub answer: String,
}

impl AgentState {
    pub fn new(question: String, doc_id: String) -> Self {
        Self {
            question,
            doc_id,
            needs_table: false,
            needs_rag: false,
            classification: None,
            table_sub_query: String::new(),
            rag_sub_query: String::new(),
            table_response: String::new(),
            rag_response: String::new(),
            answer: String::new(),
        }
    }
}
