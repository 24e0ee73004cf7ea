//! Regression-guarded iterative training.
//!
//! Each run rebuilds the supervised set from stored history, fits a fresh
//! forest per attempt with growing capacity, and only ever replaces the
//! persisted artifact with something that scores at least as well on the
//! same validation split. A blend of candidate and previous model can win
//! over both and is persisted as an ensemble.

use std::path::PathBuf;
use std::sync::Arc;

use docstore::DocStore;
use modelkit::{
    load_artifact, save_artifact, ArtifactMetrics, ForestConfig, ForestRegressor, ModelArtifact,
    Strategy, SCHEMA_VERSION,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extract::extract;
use crate::rules::RuleRegistry;
use crate::types::{now, TrainReport};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("unknown dataset '{dataset}', valid keys: {known:?}")]
    UnknownDataset { dataset: String, known: Vec<String> },

    #[error("need at least 2 usable sequences for '{dataset}', found {found}")]
    InsufficientHistory { dataset: String, found: usize },

    #[error(transparent)]
    Store(#[from] docstore::StoreError),

    #[error(transparent)]
    Artifact(#[from] modelkit::ArtifactError),
}

#[derive(Clone, Copy, Debug)]
pub struct TrainerConfig {
    pub max_attempts: u32,
    pub target_accuracy: f64,
    pub blend_step: f64,
    /// Share of pairs used for fitting; the rest validate. Deliberately
    /// validation-heavy given typically sparse history.
    pub train_ratio: f64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            target_accuracy: 0.95,
            blend_step: 0.1,
            train_ratio: 0.33,
        }
    }
}

pub struct AdaptiveTrainer {
    store: Arc<DocStore>,
    registry: Arc<RuleRegistry>,
    models_dir: PathBuf,
    config: TrainerConfig,
}

impl AdaptiveTrainer {
    pub fn new(
        store: Arc<DocStore>,
        registry: Arc<RuleRegistry>,
        models_dir: PathBuf,
        config: TrainerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            models_dir,
            config,
        }
    }

    /// Synchronous and CPU-bound; call through `spawn_blocking` from async
    /// contexts.
    pub fn train(&self, dataset: &str) -> Result<TrainReport, TrainError> {
        let rule = self.registry.get(dataset).ok_or_else(|| TrainError::UnknownDataset {
            dataset: dataset.to_string(),
            known: self.registry.keys(),
        })?;

        let collection = self.store.get_or_create(dataset)?;
        let sequences: Vec<Vec<i64>> = collection
            .get(None)
            .iter()
            .filter_map(|record| extract(record, rule))
            .collect();
        if sequences.len() < 2 {
            return Err(TrainError::InsufficientHistory {
                dataset: dataset.to_string(),
                found: sequences.len(),
            });
        }

        let set = build_supervised(&sequences);
        let pairs = set.features.len();
        let train_count = ((pairs as f64 * self.config.train_ratio).floor() as usize)
            .max(1)
            .min(pairs);
        // A single pair validates against itself rather than nothing.
        let (train_end, val_start) = if train_count >= pairs {
            (pairs, 0)
        } else {
            (train_count, train_count)
        };
        let train_x = &set.features[..train_end];
        let train_y = &set.targets[..train_end];
        let val_x = &set.features[val_start..];
        let val_y = &set.targets[val_start..];

        // Bounded retrain loop with attempt-scaled capacity.
        let mut best: Option<(ForestRegressor, Vec<Vec<f64>>, f64, f64)> = None;
        let mut attempts_used = 0;
        for attempt in 1..=self.config.max_attempts.max(1) {
            attempts_used = attempt;
            let forest_config = ForestConfig {
                trees: 16 + 8 * attempt as usize,
                max_depth: 3 + attempt as usize,
                min_leaf: 2,
                seed: 0x5eed_0000 + u64::from(attempt),
            };
            let model = ForestRegressor::fit(forest_config, train_x, train_y);
            let preds: Vec<Vec<f64>> = val_x.iter().map(|x| model.predict(x)).collect();
            let (mae, accuracy) = score(&preds, val_y);
            debug!(dataset, attempt, mae, accuracy, "training attempt scored");

            if best.as_ref().map_or(true, |(_, _, _, a)| accuracy > *a) {
                best = Some((model, preds, mae, accuracy));
            }
            if accuracy >= self.config.target_accuracy {
                break;
            }
        }
        let (candidate, candidate_preds, candidate_mae, candidate_acc) =
            best.expect("at least one attempt ran");

        // Regression guard input: the persisted artifact scored on the same
        // validation split. Unreadable or dimension-mismatched artifacts
        // are treated as absent so training can repair them.
        let previous = match load_artifact(&self.models_dir, dataset) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(dataset, "ignoring unreadable previous artifact: {e}");
                None
            }
        }
        .filter(|p| {
            let compatible = p.feature_len == set.feature_len && p.output_len == set.output_len;
            if !compatible {
                warn!(
                    dataset,
                    "previous artifact widths {}x{} no longer match {}x{}, ignoring",
                    p.feature_len, p.output_len, set.feature_len, set.output_len
                );
            }
            compatible
        });

        let (previous_scored, blend) = match &previous {
            Some(prev) => {
                let preds: Vec<Vec<f64>> = val_x.iter().map(|x| prev.predict(x)).collect();
                let scored = score(&preds, val_y);
                // Blending stays one level deep: only a plain previous model
                // can become the secondary of a new ensemble.
                let blend = if prev.strategy == Strategy::Single {
                    sweep_blend(&candidate_preds, &preds, val_y, self.config.blend_step)
                } else {
                    None
                };
                (Some(scored), blend)
            }
            None => (None, None),
        };

        let selection = choose((candidate_mae, candidate_acc), previous_scored, blend);

        let report = match selection {
            Selection::RetainPrevious => {
                let prev = previous.expect("retain implies previous");
                let (prev_mae, prev_acc) = previous_scored.expect("retain implies scores");
                info!(
                    dataset,
                    candidate_acc, prev_acc, "candidate regressed, keeping persisted artifact"
                );
                TrainReport {
                    dataset: dataset.to_string(),
                    strategy: prev.strategy,
                    accuracy: prev_acc,
                    mae: prev_mae,
                    attempts: attempts_used,
                    reached_target: prev_acc >= self.config.target_accuracy,
                    blend_weight: match prev.strategy {
                        Strategy::Ensemble => Some(prev.blend_weight),
                        Strategy::Single => None,
                    },
                    retained_previous_model: true,
                    candidate_accuracy: candidate_acc,
                    sequences: sequences.len(),
                    train_size: train_x.len(),
                    validation_size: val_x.len(),
                }
            }
            Selection::PersistCandidate => {
                let artifact = ModelArtifact {
                    schema_version: SCHEMA_VERSION,
                    dataset: dataset.to_string(),
                    strategy: Strategy::Single,
                    primary_model: candidate,
                    secondary_model: None,
                    blend_weight: 1.0,
                    feature_len: set.feature_len,
                    output_len: set.output_len,
                    rule_snapshot: rule.snapshot(),
                    metrics: ArtifactMetrics {
                        accuracy: candidate_acc,
                        mae: candidate_mae,
                        attempts: attempts_used,
                        reached_target: candidate_acc >= self.config.target_accuracy,
                    },
                    trained_at: now(),
                };
                save_artifact(&self.models_dir, &artifact)?;
                info!(dataset, accuracy = candidate_acc, "persisted single-model artifact");
                TrainReport {
                    dataset: dataset.to_string(),
                    strategy: Strategy::Single,
                    accuracy: candidate_acc,
                    mae: candidate_mae,
                    attempts: attempts_used,
                    reached_target: candidate_acc >= self.config.target_accuracy,
                    blend_weight: None,
                    retained_previous_model: false,
                    candidate_accuracy: candidate_acc,
                    sequences: sequences.len(),
                    train_size: train_x.len(),
                    validation_size: val_x.len(),
                }
            }
            Selection::PersistEnsemble { weight, mae, accuracy } => {
                let prev = previous.expect("ensemble implies previous");
                let artifact = ModelArtifact {
                    schema_version: SCHEMA_VERSION,
                    dataset: dataset.to_string(),
                    strategy: Strategy::Ensemble,
                    primary_model: candidate,
                    secondary_model: Some(prev.primary_model),
                    blend_weight: weight,
                    feature_len: set.feature_len,
                    output_len: set.output_len,
                    rule_snapshot: rule.snapshot(),
                    metrics: ArtifactMetrics {
                        accuracy,
                        mae,
                        attempts: attempts_used,
                        reached_target: accuracy >= self.config.target_accuracy,
                    },
                    trained_at: now(),
                };
                save_artifact(&self.models_dir, &artifact)?;
                info!(dataset, accuracy, weight, "persisted ensemble artifact");
                TrainReport {
                    dataset: dataset.to_string(),
                    strategy: Strategy::Ensemble,
                    accuracy,
                    mae,
                    attempts: attempts_used,
                    reached_target: accuracy >= self.config.target_accuracy,
                    blend_weight: Some(weight),
                    retained_previous_model: false,
                    candidate_accuracy: candidate_acc,
                    sequences: sequences.len(),
                    train_size: train_x.len(),
                    validation_size: val_x.len(),
                }
            }
        };
        Ok(report)
    }
}

pub(crate) struct SupervisedSet {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<Vec<f64>>,
    pub feature_len: usize,
    pub output_len: usize,
}

/// `(sequence[t-1] -> sequence[t])` pairs, padded/truncated to the widest
/// input and output seen in the history.
pub(crate) fn build_supervised(sequences: &[Vec<i64>]) -> SupervisedSet {
    let n = sequences.len();
    let feature_len = sequences[..n - 1].iter().map(Vec::len).max().unwrap_or(0);
    let output_len = sequences[1..].iter().map(Vec::len).max().unwrap_or(0);

    let mut features = Vec::with_capacity(n - 1);
    let mut targets = Vec::with_capacity(n - 1);
    for t in 1..n {
        features.push(pad_to(&sequences[t - 1], feature_len));
        targets.push(pad_to(&sequences[t], output_len));
    }
    SupervisedSet {
        features,
        targets,
        feature_len,
        output_len,
    }
}

pub(crate) fn pad_to(sequence: &[i64], len: usize) -> Vec<f64> {
    let mut out: Vec<f64> = sequence.iter().take(len).map(|&v| v as f64).collect();
    out.resize(len, 0.0);
    out
}

/// `(mae, accuracy)` with `accuracy = max(0, 1 - mae / max |target|)`.
/// The formula is a project-specific heuristic kept for artifact
/// compatibility, not a standard metric.
pub(crate) fn score(preds: &[Vec<f64>], targets: &[Vec<f64>]) -> (f64, f64) {
    let mut abs_sum = 0.0;
    let mut count = 0usize;
    let mut max_target = 0.0f64;
    for (pred, target) in preds.iter().zip(targets) {
        for (p, t) in pred.iter().zip(target) {
            abs_sum += (p - t).abs();
            count += 1;
            max_target = max_target.max(t.abs());
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mae = abs_sum / count as f64;
    let accuracy = if max_target > 0.0 {
        (1.0 - mae / max_target).max(0.0)
    } else if mae == 0.0 {
        1.0
    } else {
        0.0
    };
    (mae, accuracy)
}

/// Best interior blend `w·candidate + (1-w)·previous` by accuracy.
/// Returns `(weight, mae, accuracy)`.
pub(crate) fn sweep_blend(
    candidate: &[Vec<f64>],
    previous: &[Vec<f64>],
    targets: &[Vec<f64>],
    step: f64,
) -> Option<(f64, f64, f64)> {
    let mut best: Option<(f64, f64, f64)> = None;
    let mut w = step;
    while w < 1.0 - step / 2.0 {
        let blended: Vec<Vec<f64>> = candidate
            .iter()
            .zip(previous)
            .map(|(c, p)| {
                c.iter()
                    .zip(p)
                    .map(|(a, b)| w * a + (1.0 - w) * b)
                    .collect()
            })
            .collect();
        let (mae, accuracy) = score(&blended, targets);
        if best.map_or(true, |(_, _, a)| accuracy > a) {
            best = Some((w, mae, accuracy));
        }
        w += step;
    }
    best
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Selection {
    PersistCandidate,
    RetainPrevious,
    PersistEnsemble { weight: f64, mae: f64, accuracy: f64 },
}

/// Promotion protocol: an ensemble must beat both pure models; otherwise
/// the better pure model wins, with ties going to the candidate.
pub(crate) fn choose(
    candidate: (f64, f64),
    previous: Option<(f64, f64)>,
    blend: Option<(f64, f64, f64)>,
) -> Selection {
    let (_, candidate_acc) = candidate;
    let Some((_, previous_acc)) = previous else {
        return Selection::PersistCandidate;
    };

    if let Some((weight, mae, accuracy)) = blend {
        if accuracy > candidate_acc && accuracy > previous_acc {
            return Selection::PersistEnsemble {
                weight,
                mae,
                accuracy,
            };
        }
    }

    if previous_acc > candidate_acc {
        Selection::RetainPrevious
    } else {
        Selection::PersistCandidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore::{content_id, InMemoryBackend, Metadata};

    #[test]
    fn supervised_set_pads_to_widest() {
        let sequences = vec![vec![1, 2, 3], vec![4, 5], vec![6, 7, 8, 9]];
        let set = build_supervised(&sequences);
        assert_eq!(set.feature_len, 3); // widest of all-but-last
        assert_eq!(set.output_len, 4); // widest of all-but-first
        assert_eq!(set.features[1], vec![4.0, 5.0, 0.0]);
        assert_eq!(set.targets[1], vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn score_matches_hand_computation() {
        let preds = vec![vec![1.0, 2.0]];
        let targets = vec![vec![2.0, 4.0]];
        let (mae, accuracy) = score(&preds, &targets);
        assert!((mae - 1.5).abs() < 1e-9);
        assert!((accuracy - (1.0 - 1.5 / 4.0)).abs() < 1e-9);
    }

    #[test]
    fn score_on_zero_targets() {
        let (_, exact) = score(&[vec![0.0]], &[vec![0.0]]);
        assert_eq!(exact, 1.0);
        let (_, off) = score(&[vec![3.0]], &[vec![0.0]]);
        assert_eq!(off, 0.0);
    }

    #[test]
    fn blend_sweep_finds_the_midpoint() {
        // candidate says 0, previous says 20, truth is 10: w=0.5 is exact.
        let candidate = vec![vec![0.0]];
        let previous = vec![vec![20.0]];
        let targets = vec![vec![10.0]];
        let (w, mae, accuracy) = sweep_blend(&candidate, &previous, &targets, 0.1).unwrap();
        assert!((w - 0.5).abs() < 1e-9, "weight {w}");
        assert!(mae < 1e-9);
        assert!((accuracy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn guard_retains_better_previous() {
        let selection = choose((2.0, 0.75), Some((1.5, 0.80)), None);
        assert_eq!(selection, Selection::RetainPrevious);
    }

    #[test]
    fn guard_prefers_candidate_on_tie() {
        let selection = choose((2.0, 0.80), Some((2.0, 0.80)), None);
        assert_eq!(selection, Selection::PersistCandidate);
    }

    #[test]
    fn ensemble_must_beat_both_pure_models() {
        let winning = choose((2.0, 0.70), Some((1.9, 0.72)), Some((0.4, 1.0, 0.78)));
        assert!(matches!(
            winning,
            Selection::PersistEnsemble { weight, accuracy, .. }
                if (weight - 0.4).abs() < 1e-9 && (accuracy - 0.78).abs() < 1e-9
        ));

        // A blend that only beats one side loses to the guard.
        let losing = choose((2.0, 0.70), Some((1.9, 0.72)), Some((0.4, 1.0, 0.71)));
        assert_eq!(losing, Selection::RetainPrevious);
    }

    fn seeded_store(rows: usize) -> std::sync::Arc<DocStore> {
        let store = std::sync::Arc::new(DocStore::new(std::sync::Arc::new(
            InMemoryBackend::new(),
        )));
        let col = store.get_or_create("take5").unwrap();
        for i in 0..rows {
            let base = (i % 35) as i64 + 1;
            let numbers = format!(
                "{} {} {} {} {}",
                base,
                base + 1,
                base + 2,
                base + 3,
                base + 4
            );
            let metadata: Metadata = [
                ("draw_date".to_string(), format!("2024-01-{:02}", i + 1)),
                ("winning_numbers".to_string(), numbers),
            ]
            .into_iter()
            .collect();
            col.upsert(
                vec![content_id(&metadata)],
                vec![String::new()],
                vec![metadata],
            )
            .unwrap();
        }
        store
    }

    fn trainer(store: std::sync::Arc<DocStore>, dir: &std::path::Path) -> AdaptiveTrainer {
        AdaptiveTrainer::new(
            store,
            std::sync::Arc::new(crate::rules::RuleRegistry::builtin()),
            dir.to_path_buf(),
            TrainerConfig {
                max_attempts: 4,
                ..TrainerConfig::default()
            },
        )
    }

    #[test]
    fn insufficient_history_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(seeded_store(1), dir.path());
        let err = trainer.train("take5").unwrap_err();
        assert!(matches!(err, TrainError::InsufficientHistory { found: 1, .. }));
    }

    #[test]
    fn training_persists_an_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(seeded_store(40), dir.path());

        let report = trainer.train("take5").unwrap();
        assert_eq!(report.sequences, 40);
        assert_eq!(report.train_size + report.validation_size, 39);
        assert!(report.accuracy >= 0.0 && report.accuracy <= 1.0);
        assert!(!report.retained_previous_model);

        let artifact = load_artifact(dir.path(), "take5").unwrap().unwrap();
        assert_eq!(artifact.feature_len, 5);
        assert_eq!(artifact.output_len, 5);
        assert_eq!(artifact.rule_snapshot.primary_max, 39);
    }

    #[test]
    fn persisted_accuracy_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(40);
        let trainer = trainer(store, dir.path());

        trainer.train("take5").unwrap();
        let first = load_artifact(dir.path(), "take5").unwrap().unwrap();
        trainer.train("take5").unwrap();
        let second = load_artifact(dir.path(), "take5").unwrap().unwrap();

        assert!(second.metrics.accuracy >= first.metrics.accuracy);
    }

    #[test]
    fn unknown_dataset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(seeded_store(5), dir.path());
        assert!(matches!(
            trainer.train("keno"),
            Err(TrainError::UnknownDataset { .. })
        ));
    }
}
