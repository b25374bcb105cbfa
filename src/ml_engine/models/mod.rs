//! Binary classifiers fitted per market
//!
//! Two families: SmartCore's L2-regularised logistic regression fitted on
//! standardised features, and a bagged forest of SmartCore decision trees
//! whose probability is the share of trees voting for the positive class.
//! SmartCore's `RandomForestClassifier` only exposes hard votes, so the
//! bagging is done here to keep the vote share.

use crate::config::{ClassifierKind, ForestParams, LogisticParams, TrainingConfig};
use anyhow::{anyhow, bail, Result};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};

/// Common interface of every fitted classifier
pub trait BinaryClassifier {
    /// Probability of the positive class for each row
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>>;
    fn name(&self) -> &'static str;
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn to_array(x: &[Vec<f64>]) -> Result<Array2<f64>> {
    let n = x.len();
    let d = x.first().map(|r| r.len()).unwrap_or(0);
    if x.iter().any(|r| r.len() != d) {
        bail!("ragged feature matrix");
    }
    Array2::from_shape_vec((n, d), x.iter().flatten().copied().collect())
        .map_err(|e| anyhow!("feature matrix shape: {}", e))
}

fn to_dense(x: &[Vec<f64>]) -> Result<DenseMatrix<f64>> {
    DenseMatrix::from_2d_array(&x.iter().map(|v| v.as_slice()).collect::<Vec<_>>())
        .map_err(|e| anyhow!("dense matrix: {:?}", e))
}

/// Logistic regression fitted by SmartCore; only the standardisation and
/// the fitted coefficients are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    weights: Vec<f64>,
    intercept: f64,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl LogisticModel {
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &LogisticParams) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            bail!("need matching non-empty x ({}) and y ({})", x.len(), y.len());
        }
        let raw = to_array(x)?;

        let means = raw
            .mean_axis(Axis(0))
            .ok_or_else(|| anyhow!("empty feature matrix"))?;
        let stds = raw
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let scaled = (&raw - &means) / &stds;
        let rows: Vec<Vec<f64>> = scaled.outer_iter().map(|r| r.to_vec()).collect();
        let labels: Vec<i64> = y.iter().map(|v| *v as i64).collect();

        let fitted: LogisticRegression<f64, i64, DenseMatrix<f64>, Vec<i64>> = LogisticRegression::fit(
            &to_dense(&rows)?,
            &labels,
            LogisticRegressionParameters::default().with_alpha(params.alpha),
        )
        .map_err(|e| anyhow!("Logistic Regression training failed: {:?}", e))?;

        // binary fits hold one coefficient row for the class labelled 1
        let weights: Vec<f64> = fitted.coefficients().iterator(0).copied().collect();
        let intercept = fitted
            .intercept()
            .iterator(0)
            .next()
            .copied()
            .ok_or_else(|| anyhow!("logistic regression has no intercept"))?;

        if weights.len() != raw.ncols() {
            bail!("expected {} coefficients, got {}", raw.ncols(), weights.len());
        }
        if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            bail!("logistic regression diverged");
        }

        Ok(Self {
            weights,
            intercept,
            means: means.to_vec(),
            stds: stds.to_vec(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.weights.len()
    }
}

impl BinaryClassifier for LogisticModel {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        x.iter()
            .map(|row| {
                if row.len() != self.weights.len() {
                    bail!("expected {} features, got {}", self.weights.len(), row.len());
                }
                let z = row
                    .iter()
                    .zip(&self.means)
                    .zip(&self.stds)
                    .zip(&self.weights)
                    .map(|(((v, m), s), w)| (v - m) / s * w)
                    .sum::<f64>()
                    + self.intercept;
                Ok(sigmoid(z))
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "LogisticRegression"
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum ForestMember {
    Tree(DecisionTreeClassifier<f64, i64, DenseMatrix<f64>, Vec<i64>>),
    /// Bootstrap sample held a single class
    Constant(i64),
}

/// Bagged decision trees (SmartCore)
#[derive(Debug, Serialize, Deserialize)]
pub struct ForestModel {
    members: Vec<ForestMember>,
    n_features: usize,
}

impl ForestModel {
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &ForestParams) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            bail!("need matching non-empty x ({}) and y ({})", x.len(), y.len());
        }
        let n = x.len();
        let n_features = x[0].len();
        let sample_size = ((n as f64 * params.sample_ratio) as usize).max(1);
        let mut rng = StdRng::seed_from_u64(params.seed);

        let tree_params = DecisionTreeClassifierParameters::default()
            .with_max_depth(params.max_depth)
            .with_min_samples_split(params.min_samples_split);

        let mut members = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees.max(1) {
            let idx: Vec<usize> = (0..sample_size).map(|_| rng.gen_range(0..n)).collect();
            let labels: Vec<i64> = idx.iter().map(|i| y[*i] as i64).collect();

            if labels.iter().all(|l| *l == labels[0]) {
                members.push(ForestMember::Constant(labels[0]));
                continue;
            }

            let rows: Vec<Vec<f64>> = idx.iter().map(|i| x[*i].clone()).collect();
            let matrix = to_dense(&rows)?;
            let tree = DecisionTreeClassifier::fit(&matrix, &labels, tree_params.clone())
                .map_err(|e| anyhow!("Decision tree training failed: {:?}", e))?;
            members.push(ForestMember::Tree(tree));
        }

        Ok(Self {
            members,
            n_features,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.members.len()
    }
}

impl BinaryClassifier for ForestModel {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        if x.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = x.iter().find(|r| r.len() != self.n_features) {
            bail!("expected {} features, got {}", self.n_features, bad.len());
        }
        let matrix = to_dense(x)?;

        let mut votes = vec![0usize; x.len()];
        for member in &self.members {
            match member {
                ForestMember::Tree(tree) => {
                    let predicted: Vec<i64> = tree
                        .predict(&matrix)
                        .map_err(|e| anyhow!("Decision tree prediction failed: {:?}", e))?;
                    for (v, p) in votes.iter_mut().zip(predicted) {
                        if p == 1 {
                            *v += 1;
                        }
                    }
                }
                ForestMember::Constant(1) => votes.iter_mut().for_each(|v| *v += 1),
                ForestMember::Constant(_) => {}
            }
        }

        let total = self.members.len().max(1) as f64;
        Ok(votes.into_iter().map(|v| v as f64 / total).collect())
    }

    fn name(&self) -> &'static str {
        "BaggedDecisionTrees"
    }
}

/// A fitted model of either family, as stored in artifacts
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FittedModel {
    Logistic(LogisticModel),
    Forest(ForestModel),
}

impl FittedModel {
    pub fn fit(config: &TrainingConfig, x: &[Vec<f64>], y: &[u8]) -> Result<Self> {
        match config.classifier {
            ClassifierKind::Logistic => Ok(Self::Logistic(LogisticModel::fit(x, y, &config.logistic)?)),
            ClassifierKind::Forest => Ok(Self::Forest(ForestModel::fit(x, y, &config.forest)?)),
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            FittedModel::Logistic(_) => ClassifierKind::Logistic,
            FittedModel::Forest(_) => ClassifierKind::Forest,
        }
    }
}

impl BinaryClassifier for FittedModel {
    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        match self {
            FittedModel::Logistic(m) => m.predict_proba(x),
            FittedModel::Forest(m) => m.predict_proba(x),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FittedModel::Logistic(m) => m.name(),
            FittedModel::Forest(m) => m.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Positive iff the first feature is above 5; second feature is noise
    fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![(i % 10) as f64 + 0.5, ((i * 7) % 3) as f64])
            .collect();
        let y = x.iter().map(|r| (r[0] > 5.0) as u8).collect();
        (x, y)
    }

    #[test]
    fn logistic_learns_a_separable_rule() {
        let (x, y) = separable();
        let model = LogisticModel::fit(&x, &y, &LogisticParams::default()).unwrap();
        let proba = model.predict_proba(&[vec![9.5, 1.0], vec![0.5, 1.0]]).unwrap();
        assert!(proba[0] > 0.8, "high side: {}", proba[0]);
        assert!(proba[1] < 0.2, "low side: {}", proba[1]);
        assert_eq!(model.n_features(), 2);
    }

    #[test]
    fn logistic_handles_constant_columns() {
        let x = vec![vec![1.0, 3.0], vec![1.0, 4.0], vec![1.0, 5.0], vec![1.0, 6.0]];
        let y = vec![0, 0, 1, 1];
        let model = LogisticModel::fit(&x, &y, &LogisticParams::default()).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p)));
        assert!(proba[3] > proba[0]);
    }

    #[test]
    fn logistic_probability_is_for_the_positive_label() {
        let (x, y) = separable();
        let flipped: Vec<u8> = y.iter().map(|v| 1 - v).collect();
        let params = LogisticParams::default();
        let rows = [vec![9.5, 1.0], vec![0.5, 1.0]];

        let straight = LogisticModel::fit(&x, &y, &params).unwrap().predict_proba(&rows).unwrap();
        let inverted = LogisticModel::fit(&x, &flipped, &params)
            .unwrap()
            .predict_proba(&rows)
            .unwrap();
        assert!(straight[0] > 0.5 && straight[1] < 0.5);
        assert!(inverted[0] < 0.5 && inverted[1] > 0.5);
    }

    #[test]
    fn logistic_rejects_wrong_width() {
        let (x, y) = separable();
        let model = LogisticModel::fit(&x, &y, &LogisticParams::default()).unwrap();
        assert!(model.predict_proba(&[vec![1.0]]).is_err());
    }

    #[test]
    fn forest_votes_give_probabilities() {
        let (x, y) = separable();
        let params = ForestParams {
            n_trees: 15,
            ..ForestParams::default()
        };
        let model = ForestModel::fit(&x, &y, &params).unwrap();
        assert_eq!(model.n_trees(), 15);
        let proba = model.predict_proba(&[vec![9.5, 0.0], vec![0.5, 0.0]]).unwrap();
        assert!(proba[0] > 0.7);
        assert!(proba[1] < 0.3);
    }

    #[test]
    fn forest_is_deterministic_for_a_seed() {
        let (x, y) = separable();
        let params = ForestParams::default();
        let a = ForestModel::fit(&x, &y, &params).unwrap().predict_proba(&x).unwrap();
        let b = ForestModel::fit(&x, &y, &params).unwrap().predict_proba(&x).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fitted_model_survives_json() {
        let (x, y) = separable();
        let config = TrainingConfig::default();
        let model = FittedModel::fit(&config, &x, &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: FittedModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), ClassifierKind::Logistic);
        assert_eq!(back.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }
}
