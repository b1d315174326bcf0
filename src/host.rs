//! Host integration shim
//!
//! The boundary between the REPL and the document store that owns the
//! pattern source. The shell emits a [`SaveRequest`]; this module resolves
//! the owning document and applies a partial update touching only the
//! pattern source and the update timestamp.
//!
//! A document that cannot be resolved fails the save visibly. Silently
//! no-opping would leave the user believing broken edits were persisted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

/// The slice of a hosted document the REPL cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub pattern_source: String,
    pub updated_at: SystemTime,
}

impl Document {
    pub fn new(id: &str, pattern_source: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern_source: pattern_source.to_string(),
            updated_at: SystemTime::now(),
        }
    }
}

/// Constructed by the shell on a save action; consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub document_id: String,
    pub new_source: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaveError {
    #[error("document `{0}` not found")]
    NotFound(String),
    #[error("document store failure: {0}")]
    Store(String),
}

/// What the host application must provide. Only the shim calls this, and
/// only on explicit save.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Document, SaveError>;

    /// Replace the pattern source field (and bump the update timestamp),
    /// leaving the rest of the document alone.
    async fn apply_partial_update(&self, id: &str, new_source: &str) -> Result<(), SaveError>;
}

/// Resolve-then-update, reporting the outcome. Resolution failures surface
/// before any write is attempted.
pub async fn apply_save(store: &dyn DocumentStore, request: &SaveRequest) -> Result<(), SaveError> {
    let document = store.get_document(&request.document_id).await?;
    store
        .apply_partial_update(&document.id, &request.new_source)
        .await
        .map(|()| info!(document = %document.id, "pattern source saved"))
        .map_err(|err| {
            warn!(document = %document.id, error = %err, "save failed");
            err
        })
}

/// Document store backed by process memory. Used by tests and by embedding
/// hosts without a persistence backend.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: tokio::sync::RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: impl IntoIterator<Item = Document>) -> Arc<Self> {
        let map = docs.into_iter().map(|d| (d.id.clone(), d)).collect();
        Arc::new(Self {
            docs: tokio::sync::RwLock::new(map),
        })
    }

    pub async fn insert(&self, doc: Document) {
        self.docs.write().await.insert(doc.id.clone(), doc);
    }

    pub async fn remove(&self, id: &str) {
        self.docs.write().await.remove(id);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, id: &str) -> Result<Document, SaveError> {
        self.docs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SaveError::NotFound(id.to_string()))
    }

    async fn apply_partial_update(&self, id: &str, new_source: &str) -> Result<(), SaveError> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| SaveError::NotFound(id.to_string()))?;
        doc.pattern_source = new_source.to_string();
        doc.updated_at = SystemTime::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_updates_source_and_timestamp() {
        let store = InMemoryDocumentStore::new();
        store.insert(Document::new("memo-1", "s(\"bd\")")).await;
        let before = store.get_document("memo-1").await.unwrap();

        let request = SaveRequest {
            document_id: "memo-1".to_string(),
            new_source: "s(\"bd hh\")".to_string(),
        };
        apply_save(&store, &request).await.unwrap();

        let after = store.get_document("memo-1").await.unwrap();
        assert_eq!(after.pattern_source, "s(\"bd hh\")");
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn missing_document_fails_visibly() {
        let store = InMemoryDocumentStore::new();
        let request = SaveRequest {
            document_id: "gone".to_string(),
            new_source: "silence".to_string(),
        };
        let err = apply_save(&store, &request).await.unwrap_err();
        assert_eq!(err, SaveError::NotFound("gone".to_string()));
    }

    #[tokio::test]
    async fn concurrent_delete_fails_the_save() {
        let store = InMemoryDocumentStore::new();
        store.insert(Document::new("memo-1", "s(\"bd\")")).await;
        store.remove("memo-1").await;
        let request = SaveRequest {
            document_id: "memo-1".to_string(),
            new_source: "silence".to_string(),
        };
        assert!(apply_save(&store, &request).await.is_err());
    }

    #[tokio::test]
    async fn broken_source_is_persisted_verbatim() {
        // Saving does not require the pattern to compile.
        let store = InMemoryDocumentStore::new();
        store.insert(Document::new("memo-1", "s(\"bd hh\")")).await;
        let request = SaveRequest {
            document_id: "memo-1".to_string(),
            new_source: "s(\"bd hh".to_string(),
        };
        apply_save(&store, &request).await.unwrap();
        assert_eq!(
            store.get_document("memo-1").await.unwrap().pattern_source,
            "s(\"bd hh"
        );
    }
}
