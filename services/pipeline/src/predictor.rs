//! Schedule-aware autoregressive prediction.
//!
//! Each session covers one calendar day in the configured timezone. The
//! persisted artifact predicts the next sequence from the most recent
//! usable one, the output is normalized back into the dataset's numeric
//! constraints, and the normalized draw seeds the next iteration.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, FixedOffset, NaiveDate, Utc};
use docstore::DocStore;
use modelkit::{load_artifact, ModelArtifact};
use thiserror::Error;
use tracing::{debug, info};

use crate::extract::extract;
use crate::rules::{DatasetRule, DrawSchedule, RuleRegistry};
use crate::types::{now, PredictionDraw, PredictionSession};

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("unknown dataset '{dataset}', valid keys: {known:?}")]
    UnknownDataset { dataset: String, known: Vec<String> },

    #[error("no trained model for '{dataset}', run training first")]
    MissingArtifact { dataset: String },

    #[error("stored model for '{dataset}' is unusable: {detail}")]
    CorruptArtifact { dataset: String, detail: String },

    #[error("no usable history for '{dataset}' to seed prediction")]
    InsufficientHistory { dataset: String },

    #[error(transparent)]
    Store(#[from] docstore::StoreError),
}

pub struct ConstrainedPredictor {
    store: Arc<DocStore>,
    registry: Arc<RuleRegistry>,
    models_dir: PathBuf,
    timezone: FixedOffset,
    max_session_draws: usize,
}

impl ConstrainedPredictor {
    pub fn new(
        store: Arc<DocStore>,
        registry: Arc<RuleRegistry>,
        models_dir: PathBuf,
        timezone: FixedOffset,
        max_session_draws: usize,
    ) -> Self {
        Self {
            store,
            registry,
            models_dir,
            timezone,
            max_session_draws,
        }
    }

    /// Predicts all of today's remaining-schedule draws for `dataset`,
    /// seeding from the newest of the last `recent_k` stored records.
    pub fn predict_session(
        &self,
        dataset: &str,
        recent_k: usize,
    ) -> Result<PredictionSession, PredictError> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        self.session_for_date(dataset, recent_k, today)
    }

    pub(crate) fn session_for_date(
        &self,
        dataset: &str,
        recent_k: usize,
        date: NaiveDate,
    ) -> Result<PredictionSession, PredictError> {
        let rule = self.registry.get(dataset).ok_or_else(|| PredictError::UnknownDataset {
            dataset: dataset.to_string(),
            known: self.registry.keys(),
        })?;

        // A day with no scheduled draws is a successful empty session and
        // never touches the model artifact.
        let draw_count = (scheduled_draws(rule, date) as usize).min(self.max_session_draws);
        if draw_count == 0 {
            info!(dataset, %date, "no draws scheduled");
            return Ok(PredictionSession {
                dataset: dataset.to_string(),
                strategy: None,
                blend_weight: None,
                draw_count: 0,
                draws: Vec::new(),
                message: Some(format!("no {} draws scheduled on {date}", rule.title)),
                generated_at: now(),
            });
        }

        let artifact = match load_artifact(&self.models_dir, dataset) {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                return Err(PredictError::MissingArtifact {
                    dataset: dataset.to_string(),
                })
            }
            Err(e) => {
                return Err(PredictError::CorruptArtifact {
                    dataset: dataset.to_string(),
                    detail: e.to_string(),
                })
            }
        };

        let collection = self.store.get_or_create(dataset)?;
        let seed = collection
            .tail(recent_k.max(1))
            .iter()
            .rev()
            .find_map(|record| extract(record, rule))
            .ok_or_else(|| PredictError::InsufficientHistory {
                dataset: dataset.to_string(),
            })?;

        let mut draws = Vec::with_capacity(draw_count);
        let mut current = seed;
        for i in 0..draw_count {
            let features: Vec<f64> = current.iter().map(|&v| v as f64).collect();
            let mut raw = artifact.predict(&features);
            raw.resize(rule.sequence_len(), 0.0);

            let primary = normalize_primary(&raw[..rule.primary_count], rule);
            let bonus: Vec<i64> = raw[rule.primary_count..]
                .iter()
                .map(|&v| clamp(v, rule.bonus_min, rule.bonus_max))
                .collect();
            debug!(dataset, draw = i + 1, ?primary, ?bonus, "normalized draw");

            current = primary.iter().chain(bonus.iter()).copied().collect();
            draws.push(PredictionDraw {
                draw_index: i + 1,
                label: format!("{date} draw {} of {draw_count}", i + 1),
                primary,
                bonus,
            });
        }

        Ok(PredictionSession {
            dataset: dataset.to_string(),
            strategy: Some(artifact.strategy),
            blend_weight: blend_weight(&artifact),
            draw_count,
            draws,
            message: None,
            generated_at: now(),
        })
    }
}

fn blend_weight(artifact: &ModelArtifact) -> Option<f64> {
    match artifact.strategy {
        modelkit::Strategy::Ensemble => Some(artifact.blend_weight),
        modelkit::Strategy::Single => None,
    }
}

fn scheduled_draws(rule: &DatasetRule, date: NaiveDate) -> u32 {
    match &rule.schedule {
        DrawSchedule::Daily(n) => *n,
        DrawSchedule::Weekly(days) => days.get(&date.weekday()).copied().unwrap_or(0),
    }
}

fn clamp(value: f64, min: i64, max: i64) -> i64 {
    (value.round() as i64).clamp(min, max)
}

/// Rounds and clamps each raw prediction into the primary range, resolving
/// collisions under the uniqueness rule by probing upward from the clamped
/// value and then downward. The range is always at least `primary_count`
/// wide for unique rules, so probing always lands somewhere.
pub(crate) fn normalize_primary(raw: &[f64], rule: &DatasetRule) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(raw.len());
    for &value in raw {
        let mut v = clamp(value, rule.primary_min, rule.primary_max);
        if rule.primary_unique && out.contains(&v) {
            let probe_up = (v + 1..=rule.primary_max).find(|c| !out.contains(c));
            let probe_down = (rule.primary_min..v).rev().find(|c| !out.contains(c));
            if let Some(free) = probe_up.or(probe_down) {
                v = free;
            }
        }
        out.push(v);
    }
    if rule.sort_primary {
        out.sort_unstable();
    }
    out
}
