//! Atomic artifact persistence.
//!
//! One JSON file per dataset at `{models_dir}/{dataset}_model.json`.
//! Writes go through a temp file and a rename so a concurrent reader
//! never sees a half-written artifact.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::{ModelArtifact, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt artifact at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("artifact at {path} has schema version {found}, this build reads up to {}", SCHEMA_VERSION)]
    SchemaTooNew { path: PathBuf, found: u32 },

    #[error("failed to serialize artifact: {0}")]
    Ser(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

pub fn artifact_path(models_dir: &Path, dataset: &str) -> PathBuf {
    models_dir.join(format!("{dataset}_model.json"))
}

/// Loads the persisted artifact for `dataset`. A missing file is `None`;
/// an empty or unparseable file is an explicit corruption error.
pub fn load_artifact(models_dir: &Path, dataset: &str) -> Result<Option<ModelArtifact>> {
    let path = artifact_path(models_dir, dataset);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ArtifactError::Io { path, source }),
    };

    if bytes.is_empty() {
        return Err(ArtifactError::Corrupt {
            path,
            detail: "empty file".into(),
        });
    }

    let artifact: ModelArtifact =
        serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Corrupt {
            path: path.clone(),
            detail: e.to_string(),
        })?;

    if artifact.schema_version > SCHEMA_VERSION {
        return Err(ArtifactError::SchemaTooNew {
            path,
            found: artifact.schema_version,
        });
    }

    Ok(Some(artifact))
}

/// Replaces the dataset's artifact wholesale: temp write, then rename.
/// On any failure the previously persisted artifact is untouched.
pub fn save_artifact(models_dir: &Path, artifact: &ModelArtifact) -> Result<()> {
    fs::create_dir_all(models_dir).map_err(|source| ArtifactError::Io {
        path: models_dir.to_path_buf(),
        source,
    })?;

    let bytes = serde_json::to_vec(artifact)?;
    let tmp = models_dir.join(format!(".{}_model.json.tmp", artifact.dataset));
    fs::write(&tmp, &bytes).map_err(|source| ArtifactError::Io {
        path: tmp.clone(),
        source,
    })?;

    let path = artifact_path(models_dir, &artifact.dataset);
    fs::rename(&tmp, &path).map_err(|source| ArtifactError::Io { path, source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{ForestConfig, ForestRegressor};
    use crate::schema::{ArtifactMetrics, RuleSnapshot, Strategy};

    fn sample_artifact(dataset: &str) -> ModelArtifact {
        let xs = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let ys = vec![vec![2.0], vec![4.0]];
        ModelArtifact {
            schema_version: SCHEMA_VERSION,
            dataset: dataset.to_string(),
            strategy: Strategy::Single,
            primary_model: ForestRegressor::fit(ForestConfig::default(), &xs, &ys),
            secondary_model: None,
            blend_weight: 1.0,
            feature_len: 2,
            output_len: 1,
            rule_snapshot: RuleSnapshot {
                primary_count: 1,
                primary_min: 1,
                primary_max: 39,
                primary_unique: true,
                bonus_count: 0,
                bonus_min: 0,
                bonus_max: 0,
                sort_primary: true,
            },
            metrics: ArtifactMetrics {
                accuracy: 0.9,
                mae: 0.5,
                attempts: 3,
                reached_target: false,
            },
            trained_at: 1,
        }
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = sample_artifact("take5");
        save_artifact(dir.path(), &artifact).unwrap();

        let loaded = load_artifact(dir.path(), "take5").unwrap().unwrap();
        assert_eq!(loaded.dataset, "take5");
        assert_eq!(loaded.metrics, artifact.metrics);
        assert_eq!(loaded.strategy, Strategy::Single);
    }

    #[test]
    fn missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_artifact(dir.path(), "pick3").unwrap().is_none());
    }

    #[test]
    fn empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(artifact_path(dir.path(), "pick3"), b"").unwrap();
        let err = load_artifact(dir.path(), "pick3").unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(artifact_path(dir.path(), "pick3"), b"not json").unwrap();
        let err = load_artifact(dir.path(), "pick3").unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = serde_json::to_value(sample_artifact("take5")).unwrap();
        value["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);
        std::fs::write(
            artifact_path(dir.path(), "take5"),
            serde_json::to_vec(&value).unwrap(),
        )
        .unwrap();

        let err = load_artifact(dir.path(), "take5").unwrap_err();
        assert!(matches!(err, ArtifactError::SchemaTooNew { found, .. } if found == SCHEMA_VERSION + 1));
    }

    #[test]
    fn save_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = sample_artifact("take5");
        save_artifact(dir.path(), &artifact).unwrap();

        artifact.metrics.accuracy = 0.95;
        save_artifact(dir.path(), &artifact).unwrap();

        let loaded = load_artifact(dir.path(), "take5").unwrap().unwrap();
        assert_eq!(loaded.metrics.accuracy, 0.95);
    }
}
