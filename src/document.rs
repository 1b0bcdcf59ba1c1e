//! Document identity and the audit record produced by each ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A document identified by a content hash stable across rename/copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub display_name: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(doc_id: String, display_name: String) -> Self {
        Self {
            doc_id,
            display_name,
            uploaded_at: Utc::now(),
        }
    }

    /// Derive a stable `doc_id` from the raw PDF bytes.
    pub fn content_hash(pdf_bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(pdf_bytes);
        format!("{:x}", hasher.finalize())[..16].to_string()
    }
}

/// A per-ingestion audit row, persisted alongside the schema registry so a
/// caller can inspect what the last `ingest` call actually did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub doc_id: String,
    pub display_name: String,
    pub tables_stored: usize,
    pub chunks_stored: usize,
    pub schemas_skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let bytes = b"%PDF-1.4 fake content";
        let first = Document::content_hash(bytes);
        let second = Document::content_hash(bytes);
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }

    #[test]
    fn test_content_hash_differs_for_different_bytes() {
        let a = Document::content_hash(b"content A");
        let b = Document::content_hash(b"content B");
        assert_ne!(a, b);
    }
}
