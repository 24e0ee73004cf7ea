mod config;
mod extract;
mod predictor;
mod progress;
mod resolver;
mod rules;
mod state;
mod sync;
mod trainer;
mod types;
mod worker;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::rules::RuleRegistry;
use crate::state::{AppState, SharedState};

/// Seed window for prediction: how many recent records to scan for a
/// usable sequence.
const RECENT_SEED_WINDOW: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    info!(
        data_dir = %cfg.data_dir.display(),
        models_dir = %cfg.models_dir.display(),
        discovery = cfg.discovery_enabled,
        "starting pipeline"
    );

    let force = std::env::args().any(|a| a == "--force-sync");
    let state = AppState::new(cfg, RuleRegistry::builtin())?;

    run_pipeline(state, force).await
}

async fn run_pipeline(state: SharedState, force: bool) -> Result<()> {
    // Stage 1: ingest, all datasets, bounded fan-out.
    let outcomes = worker::sync_all(state.clone(), force).await;
    let synced: Vec<String> = outcomes
        .iter()
        .filter(|o| o.result.is_ok())
        .map(|o| o.dataset.clone())
        .collect();
    info!(
        ok = synced.len(),
        failed = outcomes.len() - synced.len(),
        "sync pass finished"
    );

    // Stages 2 and 3 run per dataset; one bad dataset never stops the rest.
    for dataset in synced {
        let trained = {
            let state = state.clone();
            let key = dataset.clone();
            tokio::task::spawn_blocking(move || state.trainer.train(&key))
                .await
                .context("training task panicked")?
        };
        match trained {
            Ok(report) => info!(
                dataset,
                strategy = ?report.strategy,
                accuracy = report.accuracy,
                attempts = report.attempts,
                retained = report.retained_previous_model,
                "training finished"
            ),
            Err(e) => {
                warn!(dataset, "training failed: {e}");
                continue;
            }
        }

        match state.predictor.predict_session(&dataset, RECENT_SEED_WINDOW) {
            Ok(session) => {
                if let Some(message) = &session.message {
                    info!(dataset, %message, "prediction session");
                } else {
                    for draw in &session.draws {
                        info!(
                            dataset,
                            label = %draw.label,
                            primary = ?draw.primary,
                            bonus = ?draw.bonus,
                            "predicted draw"
                        );
                    }
                }
                println!("{}", serde_json::to_string_pretty(&session)?);
            }
            Err(e) => error!(dataset, "prediction failed: {e}"),
        }
    }

    Ok(())
}
