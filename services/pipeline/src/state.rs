//! Process-wide wiring: one storage backend, one rule registry, and the
//! three pipeline stages built on top of them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docstore::{DocStore, FileBackend};

use crate::config::AppConfig;
use crate::predictor::ConstrainedPredictor;
use crate::progress::ProgressMap;
use crate::resolver::{CatalogResolver, CompositeResolver, StaticResolver};
use crate::rules::RuleRegistry;
use crate::sync::DataSyncEngine;
use crate::trainer::{AdaptiveTrainer, TrainerConfig};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<RuleRegistry>,
    pub store: Arc<DocStore>,
    pub progress: ProgressMap,
    pub sync: DataSyncEngine,
    pub trainer: AdaptiveTrainer,
    pub predictor: ConstrainedPredictor,
}

impl AppState {
    pub fn new(config: AppConfig, registry: RuleRegistry) -> Result<SharedState> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        let registry = Arc::new(registry);
        let store = Arc::new(DocStore::new(Arc::new(FileBackend::new(
            config.data_dir.clone(),
        ))));

        let catalog = match (&config.catalog_url, config.discovery_enabled || config.discovery_fallback) {
            (Some(url), true) => Some(Arc::new(CatalogResolver::new(
                url.clone(),
                registry.clone(),
                Duration::from_secs(config.fetch_timeout_secs),
            ))),
            _ => None,
        };
        let resolver = Arc::new(CompositeResolver::new(
            Arc::new(StaticResolver::new(registry.clone())),
            catalog,
        ));

        let sync = DataSyncEngine::new(&config, store.clone(), registry.clone(), resolver);
        let trainer = AdaptiveTrainer::new(
            store.clone(),
            registry.clone(),
            config.models_dir.clone(),
            TrainerConfig::default(),
        );
        let predictor = ConstrainedPredictor::new(
            store.clone(),
            registry.clone(),
            config.models_dir.clone(),
            config.schedule_offset,
            config.max_session_draws,
        );

        Ok(Arc::new(Self {
            config,
            registry,
            store,
            progress: ProgressMap::new(),
            sync,
            trainer,
            predictor,
        }))
    }
}
