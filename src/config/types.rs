//! Small configuration enums and hyper-parameter blocks

use serde::{Deserialize, Serialize};

/// What a team's rolling window reports before it has any prior match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStart {
    /// League trailing average of the statistic (0 when the league is new)
    #[default]
    LeaguePrior,
    /// The match's own value, as pandas `rolling(min_periods=1)` does.
    /// Leaks the first appearance's outcome into its features.
    OwnValue,
}

/// Classifier family fitted per market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Logistic,
    Forest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// L2 penalty on the weights of the standardised features
    pub alpha: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_split: usize,
    /// Bootstrap sample size as a fraction of the training rows
    pub sample_ratio: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 7,
            min_samples_split: 5,
            sample_ratio: 0.8,
            seed: 42,
        }
    }
}
