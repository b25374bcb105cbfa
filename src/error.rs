//! Error taxonomy of the pipeline
//!
//! Each boundary gets its own enum so callers can tell "skip this item" from
//! "abort the invocation". Binaries collapse everything into `anyhow`.

use crate::types::Market;
use std::path::PathBuf;
use thiserror::Error;

/// Transient failure talking to the fixture data source.
/// The affected league-season or fixture is skipped.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source returned HTTP {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },
    #[error("request to {endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode {endpoint} response: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// A raw fixture could not be turned into a `FixtureRecord`.
/// The fixture is dropped from the derived dataset.
#[derive(Debug, Error, PartialEq)]
pub enum DeriveError {
    #[error("fixture {fixture_id}: incomplete statistics ({blocks} team blocks)")]
    IncompleteStatistics { fixture_id: i64, blocks: usize },
    #[error("fixture {fixture_id}: invalid kickoff timestamp {raw:?}")]
    InvalidKickoff { fixture_id: i64, raw: String },
    #[error("fixture {fixture_id}: missing {field}")]
    MissingField {
        fixture_id: i64,
        field: &'static str,
    },
}

/// Training of a single market failed. Other markets are unaffected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrainingError {
    #[error("{market}: label column absent from the training table")]
    LabelAbsent { market: Market },
    #[error("{market}: degenerate label column (every row is {value})")]
    DegenerateLabel { market: Market, value: u8 },
    #[error("{market}: not enough rows ({rows}, need {required})")]
    NotEnoughRows {
        market: Market,
        rows: usize,
        required: usize,
    },
    #[error("{market}: empty {split} split")]
    EmptySplit { market: Market, split: &'static str },
    #[error("{market}: feature guard rejected column {column}")]
    LeakingColumn { market: Market, column: String },
    #[error("{market}: fit failed: {reason}")]
    Fit { market: Market, reason: String },
    #[error("{market}: failed to persist artifact: {reason}")]
    Persist { market: Market, reason: String },
}

impl TrainingError {
    pub fn market(&self) -> Market {
        match self {
            TrainingError::LabelAbsent { market }
            | TrainingError::DegenerateLabel { market, .. }
            | TrainingError::NotEnoughRows { market, .. }
            | TrainingError::EmptySplit { market, .. }
            | TrainingError::LeakingColumn { market, .. }
            | TrainingError::Fit { market, .. }
            | TrainingError::Persist { market, .. } => *market,
        }
    }
}

/// Fatal pipeline errors reported to the caller
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required input missing: {}", path.display())]
    MissingInput { path: PathBuf },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A backfill invocation ended without advancing the checkpoint
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("no usable fixtures collected for season {year}")]
    NoFixtures { year: i32 },
    #[error("training failed for season {year}: {} market(s) failed", failures.len())]
    Training {
        year: i32,
        failures: Vec<TrainingError>,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<anyhow::Error> for BackfillError {
    fn from(err: anyhow::Error) -> Self {
        BackfillError::Pipeline(PipelineError::Storage(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_error_reports_its_market() {
        let err = TrainingError::DegenerateLabel {
            market: Market::Over35Cards,
            value: 1,
        };
        assert_eq!(err.market(), Market::Over35Cards);
        assert!(err.to_string().contains("over_3_5_cards"));
    }

    #[test]
    fn missing_input_names_the_path() {
        let err = PipelineError::MissingInput {
            path: PathBuf::from("data/processed/val_split.csv"),
        };
        assert!(err.to_string().contains("val_split.csv"));
    }
}
