//! The schema registry: a single JSON-shaped file mapping
//! `table_name -> TableSchema`, rewritten atomically (write-to-temp then
//! rename) so a crash mid-write never corrupts it.

use super::schema::TableSchema;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    tables: HashMap<String, TableSchema>,
}

/// Process-local, single-writer registry backed by an atomically rewritten
/// JSON file on disk.
pub struct SchemaRegistry {
    path: PathBuf,
    state: Mutex<RegistryFile>,
}

impl SchemaRegistry {
    /// Load the registry from disk, starting empty if the file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            RegistryFile::default()
        };

        info!(tables = state.tables.len(), "loaded schema registry");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Insert or replace a schema, then rewrite the file atomically.
    pub fn put(&self, schema: TableSchema) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.tables.insert(schema.table_name.clone(), schema);
        }
        self.flush()
    }

    pub fn get(&self, table_name: &str) -> Option<TableSchema> {
        self.state.lock().unwrap().tables.get(table_name).cloned()
    }

    /// All schemas belonging to one document.
    pub fn by_doc(&self, doc_id: &str) -> Vec<TableSchema> {
        self.state
            .lock()
            .unwrap()
            .tables
            .values()
            .filter(|s| s.doc_id == doc_id)
            .cloned()
            .collect()
    }

    /// Remove every schema belonging to one document, returning their names.
    pub fn delete_doc(&self, doc_id: &str) -> Result<Vec<String>> {
        let removed: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let to_remove: Vec<String> = state
                .tables
                .values()
                .filter(|s| s.doc_id == doc_id)
                .map(|s| s.table_name.clone())
                .collect();
            for name in &to_remove {
                state.tables.remove(name);
            }
            to_remove
        };
        self.flush()?;
        debug!(doc_id, removed = removed.len(), "removed schemas for document");
        Ok(removed)
    }

    pub fn all(&self) -> Vec<TableSchema> {
        self.state.lock().unwrap().tables.values().cloned().collect()
    }

    fn flush(&self) -> Result<()> {
        let content = {
            let state = self.state.lock().unwrap();
            serde_json::to_string_pretty(&*state)?
        };

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::schema::SemanticType;
    use chrono::Utc;

    fn schema(table_name: &str, doc_id: &str) -> TableSchema {
        TableSchema {
            table_name: table_name.to_string(),
            doc_id: doc_id.to_string(),
            description: "test".to_string(),
            columns: vec![("col_a".to_string(), SemanticType::String)],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_and_by_doc() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SchemaRegistry::load(dir.path().join("registry.json")).unwrap();

        registry.put(schema("t1", "doc-a")).unwrap();
        registry.put(schema("t2", "doc-a")).unwrap();
        registry.put(schema("t3", "doc-b")).unwrap();

        assert!(registry.get("t1").is_some());
        assert_eq!(registry.by_doc("doc-a").len(), 2);
        assert_eq!(registry.by_doc("doc-b").len(), 1);
    }

    #[test]
    fn test_delete_doc_removes_only_its_tables() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SchemaRegistry::load(dir.path().join("registry.json")).unwrap();

        registry.put(schema("t1", "doc-a")).unwrap();
        registry.put(schema("t2", "doc-b")).unwrap();

        let removed = registry.delete_doc("doc-a").unwrap();
        assert_eq!(removed, vec!["t1".to_string()]);
        assert!(registry.get("t1").is_none());
        assert!(registry.get("t2").is_some());
    }

    #[test]
    fn test_registry_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        {
            let registry = SchemaRegistry::load(&path).unwrap();
            registry.put(schema("t1", "doc-a")).unwrap();
        }

        let reloaded = SchemaRegistry::load(&path).unwrap();
        assert!(reloaded.get("t1").is_some());
    }
}
