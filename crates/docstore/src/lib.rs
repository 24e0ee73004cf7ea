//! Per-dataset document collections with content-addressed ids.
//!
//! The store exposes the narrow contract the ingestion pipeline depends on:
//! `get_or_create`, `upsert`, `get`, `count`. Records are identified by a
//! blake3 hash of their metadata, so re-ingesting identical content is a
//! no-op overwrite rather than a duplicate.

mod backend;

pub use backend::{Backend, FileBackend, InMemoryBackend};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stringified field->value mapping for one ingested row.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Ser(#[from] serde_json::Error),

    #[error("upsert shape mismatch: {ids} ids, {documents} documents, {metadatas} metadatas")]
    Shape {
        ids: usize,
        documents: usize,
        metadatas: usize,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One ingested row. Never mutated after creation; an upsert with the same
/// id overwrites the stored copy in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

/// Deterministic content-addressed id for a row: blake3 over the sorted
/// `key=value` lines of its metadata, hex-encoded.
pub fn content_id(metadata: &Metadata) -> String {
    let mut hasher = blake3::Hasher::new();
    for (key, value) in metadata {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize().as_bytes())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Records that did not exist before this batch.
    pub added: usize,
    /// Records whose id was already present and got overwritten.
    pub overwritten: usize,
}

/// Handle to one named collection. Cheap to clone; all clones share the
/// same record map.
#[derive(Clone)]
pub struct Collection {
    name: String,
    backend: Arc<dyn Backend>,
    records: Arc<Mutex<IndexMap<String, StoredRecord>>>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Idempotent batch upsert. Existing ids keep their insertion position,
    /// so history order survives re-ingestion.
    pub fn upsert(
        &self,
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<UpsertOutcome> {
        if ids.len() != documents.len() || ids.len() != metadatas.len() {
            return Err(StoreError::Shape {
                ids: ids.len(),
                documents: documents.len(),
                metadatas: metadatas.len(),
            });
        }

        let snapshot;
        let mut outcome = UpsertOutcome::default();
        {
            let mut records = self.records.lock().unwrap();
            for ((id, document), metadata) in ids.into_iter().zip(documents).zip(metadatas) {
                let record = StoredRecord {
                    id: id.clone(),
                    document,
                    metadata,
                };
                if records.insert(id, record).is_some() {
                    outcome.overwritten += 1;
                } else {
                    outcome.added += 1;
                }
            }
            snapshot = records.values().cloned().collect::<Vec<_>>();
        }

        self.backend.persist(&self.name, &snapshot)?;
        Ok(outcome)
    }

    /// Returns records in insertion order, oldest first. `limit` truncates
    /// from the front, matching the upstream store contract.
    pub fn get(&self, limit: Option<usize>) -> Vec<StoredRecord> {
        let records = self.records.lock().unwrap();
        let take = limit.unwrap_or(records.len());
        records.values().take(take).cloned().collect()
    }

    /// Returns the newest `limit` records, most recent last.
    pub fn tail(&self, limit: usize) -> Vec<StoredRecord> {
        let records = self.records.lock().unwrap();
        let skip = records.len().saturating_sub(limit);
        records.values().skip(skip).cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

/// Collection registry backed by a [`Backend`].
pub struct DocStore {
    backend: Arc<dyn Backend>,
    collections: Mutex<HashMap<String, Collection>>,
}

impl DocStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the named collection, loading any persisted records on first
    /// access.
    pub fn get_or_create(&self, name: &str) -> Result<Collection> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }

        let mut records = IndexMap::new();
        for record in self.backend.load(name)? {
            records.insert(record.id.clone(), record);
        }

        let collection = Collection {
            name: name.to_string(),
            backend: self.backend.clone(),
            records: Arc::new(Mutex::new(records)),
        };
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn content_id_is_deterministic() {
        let a = meta(&[("draw_date", "2024-01-01"), ("winning_numbers", "1 2 3")]);
        let b = meta(&[("winning_numbers", "1 2 3"), ("draw_date", "2024-01-01")]);
        assert_eq!(content_id(&a), content_id(&b));
    }

    #[test]
    fn content_id_changes_with_content() {
        let a = meta(&[("winning_numbers", "1 2 3")]);
        let b = meta(&[("winning_numbers", "1 2 4")]);
        assert_ne!(content_id(&a), content_id(&b));
    }

    #[test]
    fn upsert_shape_mismatch_is_rejected() {
        let store = DocStore::new(Arc::new(InMemoryBackend::new()));
        let col = store.get_or_create("take5").unwrap();
        let err = col
            .upsert(vec!["a".into()], vec![], vec![])
            .unwrap_err();
        assert!(matches!(err, StoreError::Shape { ids: 1, .. }));
    }
}
