//! Shared per-dataset sync progress, readable while syncs run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::types::now;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Pending,
    Fetching,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub processed: u64,
    pub total: u64,
    pub error: Option<String>,
    pub updated_at: u64,
}

impl SyncProgress {
    fn pending() -> Self {
        Self {
            phase: SyncPhase::Pending,
            processed: 0,
            total: 0,
            error: None,
            updated_at: now(),
        }
    }
}

/// Mutex-guarded map of dataset key to its latest sync progress. Clones
/// share the map.
#[derive(Clone, Default)]
pub struct ProgressMap {
    inner: Arc<Mutex<HashMap<String, SyncProgress>>>,
}

impl ProgressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, dataset: &str) {
        let mut map = self.inner.lock().expect("progress lock");
        map.insert(dataset.to_string(), SyncProgress::pending());
    }

    pub fn update(&self, dataset: &str, processed: u64, total: u64) {
        let mut map = self.inner.lock().expect("progress lock");
        map.insert(
            dataset.to_string(),
            SyncProgress {
                phase: SyncPhase::Fetching,
                processed,
                total,
                error: None,
                updated_at: now(),
            },
        );
    }

    pub fn complete(&self, dataset: &str, processed: u64, total: u64) {
        let mut map = self.inner.lock().expect("progress lock");
        map.insert(
            dataset.to_string(),
            SyncProgress {
                phase: SyncPhase::Completed,
                processed,
                total,
                error: None,
                updated_at: now(),
            },
        );
    }

    pub fn fail(&self, dataset: &str, error: String) {
        let mut map = self.inner.lock().expect("progress lock");
        let entry = map.entry(dataset.to_string()).or_insert_with(SyncProgress::pending);
        entry.phase = SyncPhase::Failed;
        entry.error = Some(error);
        entry.updated_at = now();
    }

    pub fn get(&self, dataset: &str) -> Option<SyncProgress> {
        self.inner.lock().expect("progress lock").get(dataset).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, SyncProgress> {
        self.inner.lock().expect("progress lock").clone()
    }
}
