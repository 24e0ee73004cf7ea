use serde::Serialize;

/// Outcome of one sync run for one dataset.
#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
    pub dataset: String,
    /// Rows fetched and pushed through upsert in this run.
    pub processed: u64,
    /// Rows whose content id was new to the collection.
    pub net_added: u64,
    /// Rows skipped: already-present ids (idempotent overwrites), or the
    /// pre-existing count when the run short-circuited.
    pub skipped: u64,
    /// Records in the collection after the run.
    pub total: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrainReport {
    pub dataset: String,
    pub strategy: modelkit::Strategy,
    /// Accuracy of whatever is persisted after this run.
    pub accuracy: f64,
    pub mae: f64,
    pub attempts: u32,
    pub reached_target: bool,
    pub blend_weight: Option<f64>,
    /// True when the freshly trained candidate lost to the already
    /// persisted artifact and was discarded.
    pub retained_previous_model: bool,
    /// Validation accuracy of this run's candidate, even when rejected.
    pub candidate_accuracy: f64,
    pub sequences: usize,
    pub train_size: usize,
    pub validation_size: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PredictionDraw {
    pub draw_index: usize,
    pub label: String,
    pub primary: Vec<i64>,
    pub bonus: Vec<i64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PredictionSession {
    pub dataset: String,
    pub strategy: Option<modelkit::Strategy>,
    pub blend_weight: Option<f64>,
    pub draw_count: usize,
    pub draws: Vec<PredictionDraw>,
    pub message: Option<String>,
    pub generated_at: u64,
}

pub fn now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
