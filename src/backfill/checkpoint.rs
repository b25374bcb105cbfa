//! Backfill checkpoint (`data/training_progress.json`)

use crate::ml_engine::persistence::{read_json, write_json_atomic};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Summary of the last completed season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearStats {
    pub year: i32,
    pub total_fixtures: usize,
    pub leagues_covered: usize,
    /// Fixtures without two statistic blocks or with missing fields
    pub dropped_incomplete: usize,
    pub failed_leagues: usize,
    pub file: String,
}

/// The only state carried between invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// Next season to process; only ever decreases
    pub current_year: i32,
    #[serde(default)]
    pub last_trained: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<YearStats>,
    /// `null` once the backfill has passed the floor year
    #[serde(default)]
    pub next_year: Option<i32>,
}

impl TrainingProgress {
    pub fn fresh(start_year: i32) -> Self {
        Self {
            current_year: start_year,
            last_trained: None,
            stats: None,
            next_year: Some(start_year),
        }
    }

    /// Progress after `stats.year` trained successfully
    pub fn advance(&self, stats: YearStats, now: DateTime<Utc>, floor_year: i32) -> Self {
        let current_year = (stats.year - 1).min(self.current_year - 1);
        Self {
            current_year,
            last_trained: Some(now),
            stats: Some(stats),
            next_year: (current_year >= floor_year).then_some(current_year),
        }
    }

    pub fn is_complete(&self, floor_year: i32) -> bool {
        self.current_year < floor_year
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub const FILE_NAME: &'static str = "training_progress.json";

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved progress, or a fresh start at `start_year`
    pub fn load(&self, start_year: i32) -> Result<TrainingProgress> {
        Ok(read_json(&self.path)?.unwrap_or_else(|| TrainingProgress::fresh(start_year)))
    }

    pub fn save(&self, progress: &TrainingProgress) -> Result<()> {
        write_json_atomic(&self.path, progress)?;
        info!(
            current_year = progress.current_year,
            path = %self.path.display(),
            "💾 Checkpoint saved"
        );
        Ok(())
    }
}
