//! The four-node classification/routing state machine: Manager, Table
//! agent, RAG agent, Combiner.

pub mod combiner;
pub mod manager;
pub mod rag_agent;
pub mod state;
pub mod table_agent;

pub use combiner::Combiner;
pub use manager::ManagerNode;
pub use rag_agent::RagAgent;
pub use state::{AgentState, Classification};
pub use table_agent::TableAgent;
