//! Fan-out sync across all datasets with bounded concurrency, reporting
//! into the shared progress map.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::state::SharedState;
use crate::sync::ProgressFn;
use crate::types::SyncReport;

/// Per-dataset outcome of a [`sync_all`] pass.
pub struct SyncOutcome {
    pub dataset: String,
    pub result: Result<SyncReport, String>,
}

/// Syncs every registered dataset, at most `max_concurrent_syncs` at a
/// time. Failures are isolated per dataset; the pass always completes.
pub async fn sync_all(state: SharedState, force: bool) -> Vec<SyncOutcome> {
    let semaphore = Arc::new(Semaphore::new(state.config.max_concurrent_syncs.max(1)));
    let mut tasks = JoinSet::new();

    for dataset in state.registry.keys() {
        state.progress.begin(&dataset);
        let state = state.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");

            let progress_map = state.progress.clone();
            let key = dataset.clone();
            let on_progress: ProgressFn = Box::new(move |done, total| {
                progress_map.update(&key, done, total);
            });

            let result = match state.sync.sync(&dataset, force, Some(&on_progress)).await {
                Ok(report) => {
                    state
                        .progress
                        .complete(&dataset, report.processed, report.total);
                    info!(
                        dataset,
                        net_added = report.net_added,
                        total = report.total,
                        "dataset synced"
                    );
                    Ok(report)
                }
                Err(e) => {
                    let msg = e.to_string();
                    state.progress.fail(&dataset, msg.clone());
                    error!(dataset, "sync failed: {msg}");
                    Err(msg)
                }
            };
            SyncOutcome { dataset, result }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("sync task panicked: {e}"),
        }
    }
    outcomes.sort_by(|a, b| a.dataset.cmp(&b.dataset));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::progress::SyncPhase;
    use crate::rules::RuleRegistry;
    use crate::state::AppState;
    use chrono::FixedOffset;
    use docstore::{content_id, Metadata};

    fn state(dir: &std::path::Path) -> SharedState {
        let config = AppConfig {
            data_dir: dir.join("data"),
            models_dir: dir.join("models"),
            catalog_url: None,
            discovery_enabled: false,
            discovery_fallback: false,
            schedule_offset: FixedOffset::west_opt(5 * 3600).unwrap(),
            max_concurrent_syncs: 3,
            fetch_timeout_secs: 5,
            fetch_max_attempts: 1,
            sync_batch_size: 100,
            max_session_draws: 12,
        };
        AppState::new(config, RuleRegistry::builtin()).unwrap()
    }

    #[tokio::test]
    async fn prepopulated_datasets_short_circuit_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());

        // Every collection already holds a record, so no sync touches the
        // network and every outcome is a short-circuit success.
        for dataset in state.registry.keys() {
            let col = state.store.get_or_create(&dataset).unwrap();
            let meta: Metadata = [
                ("winning_numbers".to_string(), "1 2 3 4 5".to_string()),
                ("dataset".to_string(), dataset.clone()),
            ]
            .into_iter()
            .collect();
            col.upsert(vec![content_id(&meta)], vec![String::new()], vec![meta])
                .unwrap();
        }

        let outcomes = sync_all(state.clone(), false).await;
        assert_eq!(outcomes.len(), 8);
        for outcome in &outcomes {
            let report = outcome.result.as_ref().unwrap();
            assert_eq!(report.processed, 0);
            assert_eq!(report.total, 1);
            assert_eq!(
                state.progress.get(&outcome.dataset).unwrap().phase,
                SyncPhase::Completed
            );
        }
    }

    #[tokio::test]
    async fn endpointless_failure_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().join("data"),
            models_dir: dir.path().join("models"),
            catalog_url: None,
            discovery_enabled: false,
            discovery_fallback: false,
            schedule_offset: FixedOffset::west_opt(5 * 3600).unwrap(),
            max_concurrent_syncs: 2,
            fetch_timeout_secs: 5,
            fetch_max_attempts: 1,
            sync_batch_size: 100,
            max_session_draws: 12,
        };
        let rule = RuleRegistry::builtin().get("take5").unwrap().clone();
        let registry = RuleRegistry::new(vec![rule], Default::default());
        let state = AppState::new(config, registry).unwrap();

        let outcomes = sync_all(state.clone(), false).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
        assert_eq!(
            state.progress.get("take5").unwrap().phase,
            SyncPhase::Failed
        );
    }
}
