//! Evaluation & Trend Tracker
//!
//! Scores production artifacts on the held-out split, compares each market
//! with its previous evaluation and keeps daily snapshots plus trend
//! statistics for dashboards. Artifacts are only ever read here.

use crate::error::PipelineError;
use crate::ml_engine::dataset::{DatasetStore, TrainingTable};
use crate::ml_engine::metrics::{
    accuracy, format_auc, has_both_classes, log_loss, precision_recall_f1, roc_auc,
};
use crate::ml_engine::models::BinaryClassifier;
use crate::ml_engine::persistence::{read_json, write_json_atomic, ArtifactStore, ModelArtifact};
use crate::types::Market;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Daily snapshots kept in `daily_performance.json`
pub const DAILY_RETENTION: usize = 365;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// `null` when the validation labels hold a single class
    pub auc_roc: Option<f64>,
    pub log_loss: f64,
    /// Mean predicted positive probability
    pub confidence_avg: f64,
    /// Share of rows predicted positive
    pub positive_rate: f64,
    pub actual_positive_rate: f64,
    pub samples: usize,
}

impl EvaluationMetrics {
    pub fn compute(y: &[u8], proba: &[f64]) -> Self {
        let n = y.len().max(1) as f64;
        let (precision, recall, f1_score) = precision_recall_f1(y, proba);
        Self {
            accuracy: accuracy(y, proba),
            precision,
            recall,
            f1_score,
            auc_roc: roc_auc(y, proba),
            log_loss: log_loss(y, proba),
            confidence_avg: proba.iter().sum::<f64>() / n,
            positive_rate: proba.iter().filter(|p| **p >= 0.5).count() as f64 / n,
            actual_positive_rate: y.iter().filter(|t| **t == 1).count() as f64 / n,
            samples: y.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub previous_accuracy: f64,
    pub current_accuracy: f64,
    pub improvement: f64,
    pub improved: bool,
}

impl Comparison {
    pub fn between(previous: &EvaluationMetrics, current: &EvaluationMetrics) -> Self {
        let improvement = current.accuracy - previous.accuracy;
        Self {
            previous_accuracy: previous.accuracy,
            current_accuracy: current.accuracy,
            improvement,
            improved: improvement > 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub metrics: EvaluationMetrics,
    /// `None` on a market's first evaluation
    pub comparison: Option<Comparison>,
}

/// Append-only evaluation log of one market
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationHistory {
    entries: Vec<HistoryEntry>,
}

impl EvaluationHistory {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub models: BTreeMap<Market, EvaluationMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub current: f64,
    pub avg_7_days: f64,
    pub avg_30_days: f64,
    pub improvement_7_days: f64,
    pub improvement_30_days: f64,
    pub best_ever: f64,
    pub worst_ever: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn window_stats(points: &[f64], days: usize) -> (f64, f64) {
    let window = &points[points.len().saturating_sub(days)..];
    let current = points.last().copied().unwrap_or(0.0);
    let improvement = if window.len() > 1 {
        current - mean(&window[..window.len() - 1])
    } else {
        0.0
    };
    (mean(window), improvement)
}

/// Accuracy trends per market over daily points.
///
/// Several snapshots on one calendar day collapse to the latest; days
/// without a snapshot are simply absent.
pub fn compute_trends(snapshots: &[DailySnapshot]) -> BTreeMap<Market, TrendSummary> {
    let mut daily: BTreeMap<Market, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for snapshot in snapshots {
        for (market, metrics) in &snapshot.models {
            daily
                .entry(*market)
                .or_default()
                .insert(snapshot.date, metrics.accuracy);
        }
    }

    daily
        .into_iter()
        .map(|(market, by_day)| {
            let points: Vec<f64> = by_day.into_values().collect();
            let (avg_7_days, improvement_7_days) = window_stats(&points, 7);
            let (avg_30_days, improvement_30_days) = window_stats(&points, 30);
            let summary = TrendSummary {
                current: points.last().copied().unwrap_or(0.0),
                avg_7_days,
                avg_30_days,
                improvement_7_days,
                improvement_30_days,
                best_ever: points.iter().copied().fold(f64::MIN, f64::max),
                worst_ever: points.iter().copied().fold(f64::MAX, f64::min),
            };
            (market, summary)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketEvaluation {
    pub market: Market,
    pub metrics: EvaluationMetrics,
    pub comparison: Option<Comparison>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    pub results: Vec<MarketEvaluation>,
    /// Markets without an artifact
    pub skipped: Vec<Market>,
    pub failures: Vec<(Market, String)>,
}

impl EvaluationReport {
    /// No market declined and none failed; first evaluations count as fine
    pub fn all_improved(&self) -> bool {
        self.failures.is_empty()
            && self
                .results
                .iter()
                .all(|r| r.comparison.map(|c| c.improved).unwrap_or(true))
    }

    pub fn print(&self) {
        println!("\n📊 Evaluation Summary:");
        println!(
            "{:<20} {:<12} {:<12} {:<12} {:<10}",
            "Model", "Accuracy", "AUC-ROC", "F1 Score", "Status"
        );
        println!("{}", "-".repeat(68));
        for r in &self.results {
            let status = match r.comparison {
                None => "🆕 FIRST".to_string(),
                Some(c) if c.improved => format!("✅ {:+.4}", c.improvement),
                Some(c) => format!("⚠️ {:+.4}", c.improvement),
            };
            println!(
                "{:<20} {:<12.4} {:<12} {:<12.4} {:<10}",
                r.market.label(),
                r.metrics.accuracy,
                format_auc(r.metrics.auc_roc),
                r.metrics.f1_score,
                status
            );
        }
        if !self.results.is_empty() {
            let avg = |f: fn(&EvaluationMetrics) -> f64| {
                mean(&self.results.iter().map(|r| f(&r.metrics)).collect::<Vec<_>>())
            };
            let aucs: Vec<f64> = self.results.iter().filter_map(|r| r.metrics.auc_roc).collect();
            let avg_auc = (!aucs.is_empty()).then(|| mean(&aucs));
            println!("{}", "-".repeat(68));
            println!(
                "{:<20} {:<12.4} {:<12} {:<12.4}",
                "Average",
                avg(|m| m.accuracy),
                format_auc(avg_auc),
                avg(|m| m.f1_score)
            );
        }
        for market in &self.skipped {
            println!("⚠️  Skipped {} - model not found", market.label());
        }
        for (market, reason) in &self.failures {
            println!("❌ {}: {}", market.label(), reason);
        }
    }
}

pub struct EvaluationTracker {
    datasets: DatasetStore,
    artifacts: ArtifactStore,
    logs_dir: PathBuf,
    analytics_dir: PathBuf,
    markets: Vec<Market>,
}

impl EvaluationTracker {
    pub fn new(
        datasets: DatasetStore,
        artifacts: ArtifactStore,
        logs_dir: impl Into<PathBuf>,
        analytics_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            datasets,
            artifacts,
            logs_dir: logs_dir.into(),
            analytics_dir: analytics_dir.into(),
            markets: Market::PRODUCTION.to_vec(),
        }
    }

    pub fn history_path(&self, market: Market) -> PathBuf {
        self.logs_dir.join(format!("{}_history.json", market.label()))
    }

    pub fn daily_path(&self) -> PathBuf {
        self.analytics_dir.join("daily_performance.json")
    }

    pub fn trends_path(&self) -> PathBuf {
        self.analytics_dir.join("historical_trends.json")
    }

    fn score(artifact: &ModelArtifact, validation: &TrainingTable) -> Result<EvaluationMetrics, String> {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for row in &validation.rows {
            let Some(label) = row.label(artifact.market) else {
                continue;
            };
            let values = row
                .features
                .to_ordered(&artifact.feature_names)
                .map_err(|missing| format!("validation data lacks feature column {}", missing))?;
            x.push(values);
            y.push(label);
        }
        if y.is_empty() {
            return Err("no labelled validation rows".to_string());
        }
        if !has_both_classes(&y) {
            warn!(market = %artifact.market, "validation labels hold a single class, AUC not recorded");
        }
        let proba = artifact.model.predict_proba(&x).map_err(|e| e.to_string())?;
        Ok(EvaluationMetrics::compute(&y, &proba))
    }

    /// Evaluate every production market with an artifact
    pub fn evaluate_all(&self, now: DateTime<Utc>) -> Result<EvaluationReport, PipelineError> {
        let validation = self.datasets.load_processed(DatasetStore::VAL_SPLIT)?;
        info!(rows = validation.len(), "📊 Loaded validation data");

        let mut report = EvaluationReport::default();
        for market in &self.markets {
            let artifact = match self.artifacts.load(*market)? {
                Some(a) => a,
                None => {
                    warn!(market = %market, "model not found, skipped");
                    report.skipped.push(*market);
                    continue;
                }
            };

            let metrics = match Self::score(&artifact, &validation) {
                Ok(m) => m,
                Err(reason) => {
                    error!(market = %market, %reason, "evaluation failed");
                    report.failures.push((*market, reason));
                    continue;
                }
            };

            let path = self.history_path(*market);
            let mut history = EvaluationHistory::load(&path)?;
            let comparison = history
                .last()
                .map(|prev| Comparison::between(&prev.metrics, &metrics));

            match comparison {
                Some(c) => info!(
                    market = %market,
                    previous = format!("{:.4}", c.previous_accuracy),
                    current = format!("{:.4}", c.current_accuracy),
                    improved = c.improved,
                    "evaluation compared with previous"
                ),
                None => info!(market = %market, accuracy = format!("{:.4}", metrics.accuracy), "🆕 first evaluation"),
            }

            history.append(HistoryEntry {
                timestamp: now,
                metrics,
                comparison,
            });
            history.save(&path)?;

            report.results.push(MarketEvaluation {
                market: *market,
                metrics,
                comparison,
            });
        }

        self.save_analytics(&report, now)?;
        Ok(report)
    }

    fn save_analytics(&self, report: &EvaluationReport, now: DateTime<Utc>) -> Result<()> {
        let mut daily: Vec<DailySnapshot> = read_json(&self.daily_path())?.unwrap_or_default();
        daily.push(DailySnapshot {
            date: now.date_naive(),
            timestamp: now,
            models: report.results.iter().map(|r| (r.market, r.metrics)).collect(),
        });
        if daily.len() > DAILY_RETENTION {
            daily.drain(..daily.len() - DAILY_RETENTION);
        }
        write_json_atomic(&self.daily_path(), &daily)?;

        let trends = compute_trends(&daily);
        write_json_atomic(&self.trends_path(), &trends)?;
        info!(snapshots = daily.len(), markets = trends.len(), "📈 Trends updated");
        Ok(())
    }
}
