use serde::{Deserialize, Serialize};

use crate::forest::ForestRegressor;

/// Bumped whenever the artifact layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Single,
    Ensemble,
}

/// The numeric constraints the artifact was trained under. Carried in the
/// file so the predictor can normalize outputs without re-reading config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub primary_count: usize,
    pub primary_min: i64,
    pub primary_max: i64,
    pub primary_unique: bool,
    pub bonus_count: usize,
    pub bonus_min: i64,
    pub bonus_max: i64,
    pub sort_primary: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    pub accuracy: f64,
    pub mae: f64,
    pub attempts: u32,
    pub reached_target: bool,
}

fn default_blend_weight() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub dataset: String,
    pub strategy: Strategy,
    pub primary_model: ForestRegressor,
    #[serde(default)]
    pub secondary_model: Option<ForestRegressor>,
    /// Weight on `primary_model` when `strategy` is `Ensemble`.
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f64,
    pub feature_len: usize,
    pub output_len: usize,
    pub rule_snapshot: RuleSnapshot,
    pub metrics: ArtifactMetrics,
    pub trained_at: u64,
}

impl ModelArtifact {
    /// Raw scores for one input vector, blending when the artifact is an
    /// ensemble.
    pub fn predict(&self, features: &[f64]) -> Vec<f64> {
        match (&self.strategy, &self.secondary_model) {
            (Strategy::Ensemble, Some(secondary)) => {
                let a = self.primary_model.predict(features);
                let b = secondary.predict(features);
                a.iter()
                    .zip(&b)
                    .map(|(x, y)| self.blend_weight * x + (1.0 - self.blend_weight) * y)
                    .collect()
            }
            _ => self.primary_model.predict(features),
        }
    }
}
