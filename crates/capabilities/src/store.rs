//! The `DocumentStore` capability (§6): durable persistence of authoritative
//! document state. A real durable store (with migrations) is explicitly out
//! of scope (§1); this module's [`InMemoryDocumentStore`] exists so the
//! core builds and runs standalone and so tests don't need a database.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use sync_common::{WriteKey, candidate_wins};
use sync_protocol::{FieldRecordWire, VectorClock};
use thiserror::Error;

/// The authoritative, persisted state of one document.
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    pub fields: HashMap<String, FieldRecordWire>,
    pub vector_clock: VectorClock,
}

/// Failure persisting to or loading from the store (§7 `StoreUnavailable`).
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for document state (§6).
///
/// `apply_delta` is called by the coordinator with already-LWW-decided
/// field records — at-most-once from the coordinator's perspective, but
/// retried on transient failure (§4.4.b, §7), so the store must tolerate
/// re-application of the same `(docId, field, writerId, counter,
/// timestamp)` triple without regressing state. The reference
/// implementation gets this for free by re-running the same LWW comparison
/// the coordinator already applied in memory.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the full persisted snapshot for `doc_id`, or an empty one if the
    /// document has never been written.
    async fn load(&self, doc_id: &str) -> Result<DocumentSnapshot, StoreError>;

    /// Persist `fields` (already LWW-merged) and advance the stored vector
    /// clock to at least `vector_clock` componentwise.
    async fn apply_delta(
        &self,
        doc_id: &str,
        fields: HashMap<String, FieldRecordWire>,
        vector_clock: VectorClock,
    ) -> Result<(), StoreError>;

    /// Every document id the store currently holds state for.
    async fn list_documents(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process [`DocumentStore`]. Never fails; exists purely so the core has
/// somewhere to persist to without an external database.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: DashMap<String, DocumentSnapshot>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, doc_id: &str) -> Result<DocumentSnapshot, StoreError> {
        Ok(self.docs.get(doc_id).map(|e| e.clone()).unwrap_or_default())
    }

    async fn apply_delta(
        &self,
        doc_id: &str,
        fields: HashMap<String, FieldRecordWire>,
        vector_clock: VectorClock,
    ) -> Result<(), StoreError> {
        let mut entry = self.docs.entry(doc_id.to_string()).or_default();

        for (path, incoming) in fields {
            let existing_key = entry.fields.get(&path).map(|r| WriteKey {
                timestamp: r.timestamp,
                clock: r.clock,
                writer_id: r.writer_id.as_str(),
            });
            let candidate_key = WriteKey {
                timestamp: incoming.timestamp,
                clock: incoming.clock,
                writer_id: incoming.writer_id.as_str(),
            };
            if candidate_wins(existing_key, candidate_key) {
                entry.fields.insert(path, incoming);
            }
        }

        for (writer, counter) in vector_clock {
            let slot = entry.vector_clock.entry(writer).or_insert(0);
            *slot = (*slot).max(counter);
        }

        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.docs.iter().map(|e| e.key().clone()).collect())
    }
}
