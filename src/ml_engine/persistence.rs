//! Persistence - atomic file writes and model artifact storage
//!
//! Every file is written whole to a sibling temp file and then renamed over
//! the target, so readers never see a half-written checkpoint or history.

use crate::config::{ClassifierKind, ForestParams, LogisticParams};
use crate::ml_engine::metrics::SplitMetrics;
use crate::ml_engine::models::FittedModel;
use crate::types::Market;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write `bytes` to `path` via a temp file and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Pretty JSON, written atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    write_atomic(path, json.as_bytes())
}

/// Read JSON; `Ok(None)` when the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Hyper-parameters an artifact was trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactParams {
    pub classifier: ClassifierKind,
    pub validation_ratio: f64,
    pub feature_window: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub logistic: Option<LogisticParams>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub forest: Option<ForestParams>,
}

/// One market's trained classifier with everything needed to score it later
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub market: Market,
    pub model: FittedModel,
    /// Order-significant; inputs are rebuilt in exactly this order
    pub feature_names: Vec<String>,
    pub train_metrics: SplitMetrics,
    pub validation_metrics: SplitMetrics,
    pub params: ArtifactParams,
    pub trained_at: DateTime<Utc>,
}

/// Artifact files under the models directory.
/// Experimental markets live in `experimental/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, experimental: bool) -> PathBuf {
        if experimental {
            self.root.join("experimental")
        } else {
            self.root.clone()
        }
    }

    pub fn artifact_path(&self, market: Market) -> PathBuf {
        self.dir_for(market.is_experimental())
            .join(format!("{}_model.json", market.label()))
    }

    pub fn metadata_path(&self, experimental: bool) -> PathBuf {
        self.dir_for(experimental).join("metadata.json")
    }

    /// Write a new artifact file, replacing the previous one wholesale
    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        let path = self.artifact_path(artifact.market);
        write_json_atomic(&path, artifact)?;
        info!(market = %artifact.market, path = %path.display(), "💾 Model artifact saved");
        Ok(path)
    }

    pub fn load(&self, market: Market) -> Result<Option<ModelArtifact>> {
        read_json(&self.artifact_path(market))
    }

    pub fn save_metadata<T: Serialize>(&self, experimental: bool, metadata: &T) -> Result<()> {
        write_json_atomic(&self.metadata_path(experimental), metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("footy_persistence_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp_file() {
        let dir = temp_dir();
        let path = dir.join("nested").join("state.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();

        let back: Option<Vec<i32>> = read_json(&path).unwrap();
        assert_eq!(back, Some(vec![4]));
        assert!(!dir.join("nested").join("state.json.tmp").exists());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_json_reads_as_none() {
        let back: Option<Vec<i32>> = read_json(&temp_dir().join("absent.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn artifacts_are_routed_by_market_kind() {
        let store = ArtifactStore::new("/models");
        assert_eq!(store.artifact_path(Market::Btts), PathBuf::from("/models/btts_model.json"));
        assert_eq!(
            store.artifact_path(Market::HasRedCard),
            PathBuf::from("/models/experimental/has_red_card_model.json")
        );
    }

    #[test]
    fn artifact_round_trips() {
        let dir = temp_dir();
        let store = ArtifactStore::new(&dir);
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![0, 0, 1, 1];
        let model = FittedModel::fit(&TrainingConfig::default(), &x, &y).unwrap();
        let metrics = SplitMetrics::compute(&y, &[0.1, 0.2, 0.8, 0.9]);

        let artifact = ModelArtifact {
            market: Market::Over25Goals,
            model,
            feature_names: vec!["home_goals_scored_l5".to_string()],
            train_metrics: metrics,
            validation_metrics: metrics,
            params: ArtifactParams {
                classifier: ClassifierKind::Logistic,
                validation_ratio: 0.2,
                feature_window: 5,
                logistic: Some(LogisticParams::default()),
                forest: None,
            },
            trained_at: Utc::now(),
        };
        store.save(&artifact).unwrap();

        let loaded = store.load(Market::Over25Goals).unwrap().unwrap();
        assert_eq!(loaded.feature_names, artifact.feature_names);
        assert_eq!(loaded.validation_metrics, metrics);
        assert!(store.load(Market::Btts).unwrap().is_none());

        fs::remove_dir_all(&dir).ok();
    }
}
