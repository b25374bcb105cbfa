//! Binary classification metrics

use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-15;

/// Share of rows where `p >= 0.5` matches the label
pub fn accuracy(y: &[u8], proba: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let correct = y
        .iter()
        .zip(proba)
        .filter(|(t, p)| (**p >= 0.5) == (**t == 1))
        .count();
    correct as f64 / y.len() as f64
}

/// Mean binary cross-entropy with probabilities clipped to `[eps, 1 - eps]`
pub fn log_loss(y: &[u8], proba: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .zip(proba)
        .map(|(t, p)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            if *t == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y.len() as f64
}

/// True when the labels hold both classes
pub fn has_both_classes(y: &[u8]) -> bool {
    y.iter().any(|t| *t == 1) && y.iter().any(|t| *t != 1)
}

/// Area under the ROC curve via average ranks (ties share their rank).
/// Undefined, and `None`, when only one class is present.
pub fn roc_auc(y: &[u8], proba: &[f64]) -> Option<f64> {
    if !has_both_classes(y) {
        return None;
    }
    let positives = y.iter().filter(|t| **t == 1).count();
    let negatives = y.len() - positives;

    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|a, b| proba[*a].total_cmp(&proba[*b]));

    let mut ranks = vec![0.0; proba.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && proba[order[j + 1]] == proba[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie block
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = y
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t == 1)
        .map(|(_, r)| r)
        .sum();
    let p = positives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

/// AUC for tables and logs, `n/a` when undefined
pub fn format_auc(auc: Option<f64>) -> String {
    auc.map(|a| format!("{:.4}", a))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Precision, recall and F1 of the positive class; 0 when undefined
pub fn precision_recall_f1(y: &[u8], proba: &[f64]) -> (f64, f64, f64) {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (t, p) in y.iter().zip(proba) {
        match (*p >= 0.5, *t == 1) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    (precision, recall, f1)
}

/// Quality metrics reported for a train or validation split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub accuracy: f64,
    pub log_loss: f64,
    /// `null` when the split holds a single class
    pub auc: Option<f64>,
    pub samples: usize,
}

impl SplitMetrics {
    pub fn compute(y: &[u8], proba: &[f64]) -> Self {
        Self {
            accuracy: accuracy(y, proba),
            log_loss: log_loss(y, proba),
            auc: roc_auc(y, proba),
            samples: y.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_thresholds_at_one_half() {
        assert_eq!(accuracy(&[1, 0, 1, 0], &[0.5, 0.49, 0.2, 0.9]), 0.5);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn log_loss_is_clipped() {
        assert!(log_loss(&[1, 0], &[0.0, 1.0]).is_finite());
        let loss = log_loss(&[1], &[0.0]);
        assert!((loss - (-(EPS).ln())).abs() < 1e-6);
        let perfect = log_loss(&[1, 0], &[1.0, 0.0]);
        assert!(perfect < 1e-12);
    }

    #[test]
    fn auc_matches_hand_computed_values() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]), Some(0.75));
        assert_eq!(roc_auc(&[0, 1], &[0.3, 0.3]), Some(0.5));
        assert_eq!(roc_auc(&[0, 1, 1], &[0.1, 0.9, 0.8]), Some(1.0));
    }

    #[test]
    fn auc_is_undefined_for_a_single_class() {
        assert_eq!(roc_auc(&[1, 1], &[0.3, 0.9]), None);
        assert_eq!(roc_auc(&[0, 0, 0], &[0.3, 0.9, 0.1]), None);
        assert_eq!(roc_auc(&[], &[]), None);
        assert!(!has_both_classes(&[1, 1]));
        assert_eq!(format_auc(None), "n/a");
        assert_eq!(format_auc(Some(0.75)), "0.7500");

        let metrics = SplitMetrics::compute(&[1, 1], &[0.3, 0.9]);
        assert_eq!(metrics.auc, None);
        let json = serde_json::to_value(metrics).unwrap();
        assert!(json["auc"].is_null());
    }

    #[test]
    fn precision_recall_f1_handle_zero_division() {
        assert_eq!(precision_recall_f1(&[0, 0], &[0.1, 0.2]), (0.0, 0.0, 0.0));
        let (p, r, f1) = precision_recall_f1(&[1, 1, 0, 0], &[0.9, 0.2, 0.8, 0.1]);
        assert_eq!(p, 0.5);
        assert_eq!(r, 0.5);
        assert_eq!(f1, 0.5);
    }
}
