//! ML Engine - data, features and per-market classifiers for Footy LM
//!
//! This module implements:
//! - API-Football client and raw record types
//! - Label derivation and the per-year / processed CSV datasets
//! - Leakage-free rolling features
//! - Multi-target training, evaluation with trend tracking
//! - Slate scoring into the predictions payload

pub mod data_client;
pub mod dataset;
pub mod evaluation;
pub mod features;
pub mod labeling;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod predictor;
pub mod training;

pub use data_client::{ApiFootballClient, FixtureSource};
pub use dataset::{DatasetRow, DatasetStore, FixtureRow, TrainingTable};
pub use evaluation::{EvaluationReport, EvaluationTracker};
pub use features::{FeatureVector, RollingFeatureEngine};
pub use models::{BinaryClassifier, FittedModel};
pub use persistence::{ArtifactStore, ModelArtifact};
pub use predictor::SlatePredictor;
pub use training::{ModelTrainer, MultiTargetTrainer, TrainingReport};
