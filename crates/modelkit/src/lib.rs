//! Model artifacts for the draw-forecast pipeline.
//!
//! One artifact per dataset, written by the trainer and read by the
//! predictor. The JSON file is the wire contract between the two; it
//! carries a `schema_version` and is replaced atomically.

pub mod forest;
pub mod schema;
pub mod store;

pub use forest::{ForestConfig, ForestRegressor};
pub use schema::{ArtifactMetrics, ModelArtifact, RuleSnapshot, Strategy, SCHEMA_VERSION};
pub use store::{artifact_path, load_artifact, save_artifact, ArtifactError};
