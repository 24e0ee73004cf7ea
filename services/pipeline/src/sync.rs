//! Idempotent dataset ingestion.
//!
//! Fetches rows from the resolved endpoints with retry/backoff, normalizes
//! the two upstream payload shapes, and upserts content-addressed records
//! in fixed-size batches. Re-running a sync is always safe: record ids are
//! content hashes, and a populated collection short-circuits the whole
//! network pass unless `force` is set.

use std::sync::Arc;
use std::time::Duration;

use docstore::{content_id, Collection, DocStore, Metadata};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::resolver::{CompositeResolver, EndpointResolver};
use crate::rules::RuleRegistry;
use crate::types::SyncReport;

/// `(rows_done, rows_total)` callback, invoked with running totals.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown dataset '{dataset}', valid keys: {known:?}")]
    UnknownDataset { dataset: String, known: Vec<String> },

    #[error("no rows ingested for '{dataset}': every endpoint came up empty")]
    NoData { dataset: String },

    #[error(transparent)]
    Store(#[from] docstore::StoreError),
}

pub struct DataSyncEngine {
    client: reqwest::Client,
    resolver: Arc<CompositeResolver>,
    store: Arc<DocStore>,
    registry: Arc<RuleRegistry>,
    batch_size: usize,
    max_fetch_attempts: u32,
    backoff_base: Duration,
    discovery_fallback: bool,
}

impl DataSyncEngine {
    pub fn new(
        config: &AppConfig,
        store: Arc<DocStore>,
        registry: Arc<RuleRegistry>,
        resolver: Arc<CompositeResolver>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            resolver,
            store,
            registry,
            batch_size: config.sync_batch_size.max(1),
            max_fetch_attempts: config.fetch_max_attempts.max(1),
            backoff_base: Duration::from_millis(500),
            discovery_fallback: config.discovery_fallback,
        }
    }

    pub async fn sync(
        &self,
        dataset: &str,
        force: bool,
        on_progress: Option<&ProgressFn>,
    ) -> Result<SyncReport, SyncError> {
        if self.registry.get(dataset).is_none() {
            return Err(SyncError::UnknownDataset {
                dataset: dataset.to_string(),
                known: self.registry.keys(),
            });
        }

        let collection = self.store.get_or_create(dataset)?;
        let existing = collection.count() as u64;
        if existing > 0 && !force {
            info!(dataset, existing, "collection already populated, skipping sync");
            if let Some(progress) = on_progress {
                progress(existing, existing);
            }
            return Ok(SyncReport {
                dataset: dataset.to_string(),
                processed: 0,
                net_added: 0,
                skipped: existing,
                total: existing,
            });
        }

        let endpoints = self.resolver.resolve(dataset).await;
        let mut tried: Vec<String> = Vec::new();
        let mut totals = RunTotals::default();
        let mut columns: Option<Vec<String>> = None;

        self.run_endpoints(
            dataset,
            &collection,
            &endpoints,
            &mut tried,
            &mut columns,
            &mut totals,
            on_progress,
        )
        .await?;

        if totals.processed == 0 && self.discovery_fallback {
            let extra = self.resolver.discover_untried(dataset, &tried).await;
            if !extra.is_empty() {
                info!(dataset, candidates = extra.len(), "zero rows, retrying via catalog discovery");
                self.run_endpoints(
                    dataset,
                    &collection,
                    &extra,
                    &mut tried,
                    &mut columns,
                    &mut totals,
                    on_progress,
                )
                .await?;
            }
        }

        let total = collection.count() as u64;
        if total == 0 {
            return Err(SyncError::NoData {
                dataset: dataset.to_string(),
            });
        }

        info!(
            dataset,
            processed = totals.processed,
            net_added = totals.net_added,
            total,
            "sync finished"
        );
        Ok(SyncReport {
            dataset: dataset.to_string(),
            processed: totals.processed,
            net_added: totals.net_added,
            skipped: totals.skipped,
            total,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_endpoints(
        &self,
        dataset: &str,
        collection: &Collection,
        endpoints: &[String],
        tried: &mut Vec<String>,
        columns: &mut Option<Vec<String>>,
        totals: &mut RunTotals,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), SyncError> {
        for endpoint in endpoints {
            tried.push(endpoint.clone());

            let payload = match self.fetch_payload(endpoint).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(dataset, endpoint, "endpoint failed: {e}");
                    continue;
                }
            };

            let rows = parse_rows(&payload, columns);
            if rows.is_empty() {
                warn!(dataset, endpoint, "payload yielded no usable rows");
                continue;
            }

            let run_total = totals.processed + rows.len() as u64;
            for batch in rows.chunks(self.batch_size) {
                let mut ids = Vec::with_capacity(batch.len());
                let mut documents = Vec::with_capacity(batch.len());
                let mut metadatas = Vec::with_capacity(batch.len());
                for metadata in batch {
                    ids.push(content_id(metadata));
                    documents.push(
                        serde_json::to_string(metadata).unwrap_or_default(),
                    );
                    metadatas.push(metadata.clone());
                }
                let outcome = collection.upsert(ids, documents, metadatas)?;
                totals.net_added += outcome.added as u64;
                totals.skipped += outcome.overwritten as u64;
                totals.processed += batch.len() as u64;
                if let Some(progress) = on_progress {
                    progress(totals.processed, run_total);
                }
            }
            debug!(dataset, endpoint, rows = rows.len(), "endpoint ingested");
        }
        Ok(())
    }

    /// GET with capped exponential backoff on transient failures. Anything
    /// else (HTTP status, parse) is returned immediately so the caller can
    /// move on to the next endpoint.
    async fn fetch_payload(&self, url: &str) -> Result<Value, reqwest::Error> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_get(url).await {
                Ok(payload) => return Ok(payload),
                Err(e) if is_transient(&e) && attempt < self.max_fetch_attempts => {
                    let delay = (self.backoff_base * 2u32.saturating_pow(attempt - 1))
                        .min(Duration::from_secs(10));
                    warn!(url, attempt, ?delay, "transient fetch failure, backing off: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get(&self, url: &str) -> Result<Value, reqwest::Error> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        resp.json().await
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

#[derive(Default)]
struct RunTotals {
    processed: u64,
    net_added: u64,
    skipped: u64,
}

/// Normalizes a payload into per-row metadata maps.
///
/// Supported shapes:
/// - Socrata columnar: `{meta:{view:{columns:[{fieldName}]}}, data:[[..]]}`
///   (a top-level `columns` list works too);
/// - flat list of objects.
///
/// Column names derived from the first payload that carries them are
/// remembered in `columns` and reused for later rows lacking explicit keys.
pub(crate) fn parse_rows(payload: &Value, columns: &mut Option<Vec<String>>) -> Vec<Metadata> {
    if let Some(names) = column_names(payload) {
        *columns = Some(names);
    }

    let data = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data").and_then(|v| v.as_array()) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut rows = Vec::with_capacity(data.len());
    for item in data {
        match item {
            Value::Object(fields) => {
                let metadata: Metadata = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), stringify(v)))
                    .collect();
                rows.push(metadata);
            }
            Value::Array(values) => {
                let metadata: Metadata = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (column_name(columns, i), stringify(v)))
                    .collect();
                rows.push(metadata);
            }
            _ => debug!("skipping non-row payload item"),
        }
    }
    rows
}

fn column_name(columns: &Option<Vec<String>>, index: usize) -> String {
    columns
        .as_ref()
        .and_then(|names| names.get(index).cloned())
        .unwrap_or_else(|| format!("column_{index}"))
}

fn column_names(payload: &Value) -> Option<Vec<String>> {
    let list = payload
        .pointer("/meta/view/columns")
        .or_else(|| payload.get("columns"))?
        .as_array()?;

    let names: Vec<String> = list
        .iter()
        .filter_map(|c| match c {
            Value::String(name) => Some(name.clone()),
            Value::Object(obj) => obj
                .get("fieldName")
                .or_else(|| obj.get("name"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        })
        .collect();

    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

/// Metadata values are plain strings; `null` collapses to "".
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
