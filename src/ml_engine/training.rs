//! Multi-Target Trainer
//!
//! One independent binary classifier per market over the shared rolling
//! feature set. Markets are isolated: a failing market is reported and the
//! rest still train.

use crate::config::{ClassifierKind, TrainingConfig};
use crate::error::TrainingError;
use crate::ml_engine::dataset::{DatasetRow, FixtureRow, TrainingTable};
use crate::ml_engine::metrics::{format_auc, has_both_classes, SplitMetrics};
use crate::ml_engine::models::{BinaryClassifier, FittedModel};
use crate::ml_engine::persistence::{ArtifactParams, ArtifactStore, ModelArtifact};
use crate::types::Market;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Anything that turns a training table into per-market artifacts
#[cfg_attr(test, mockall::automock)]
pub trait ModelTrainer: Send + Sync {
    fn train_all(&self, table: &TrainingTable) -> TrainingReport;
}

/// Result of one successfully trained market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market: Market,
    pub train: SplitMetrics,
    pub validation: SplitMetrics,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub trained: Vec<MarketSummary>,
    pub failures: Vec<TrainingError>,
}

impl TrainingReport {
    /// True when at least one market trained and none failed
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty() && !self.trained.is_empty()
    }

    pub fn print(&self) {
        println!("\n╔══════════════════════════════════════════╗");
        println!("║          MODEL TRAINING SUMMARY          ║");
        println!("╚══════════════════════════════════════════╝\n");

        println!(
            "{:<24} {:>8} {:>8} {:>9} {:>8}",
            "Market", "Val Acc", "Val AUC", "LogLoss", "Rows"
        );
        println!("{}", "-".repeat(61));
        for summary in &self.trained {
            println!(
                "{:<24} {:>7.2}% {:>8} {:>9.4} {:>8}",
                summary.market.label(),
                summary.validation.accuracy * 100.0,
                format_auc(summary.validation.auc),
                summary.validation.log_loss,
                summary.train.samples + summary.validation.samples
            );
        }
        for failure in &self.failures {
            println!("❌ {}", failure);
        }
        println!(
            "\n{} trained, {} failed",
            self.trained.len(),
            self.failures.len()
        );
    }
}

/// Summary written next to the artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub trained_at: DateTime<Utc>,
    pub classifier: ClassifierKind,
    pub total_rows: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub feature_names: Vec<String>,
    pub markets: Vec<MarketSummary>,
    pub failures: BTreeMap<Market, String>,
}

/// Columns that may never be fed to a classifier
fn forbidden_column(name: &str) -> bool {
    FixtureRow::COLUMNS.contains(&name)
        || Market::from_label(name).is_some()
        || name == "kickoff"
}

/// Reject identifier, timestamp, raw outcome and label columns
pub fn guard_features(market: Market, feature_names: &[String]) -> Result<(), TrainingError> {
    match feature_names.iter().find(|n| forbidden_column(n)) {
        Some(column) => Err(TrainingError::LeakingColumn {
            market,
            column: column.clone(),
        }),
        None => Ok(()),
    }
}

pub struct MultiTargetTrainer {
    config: TrainingConfig,
    feature_window: usize,
    store: ArtifactStore,
    markets: Vec<Market>,
}

impl MultiTargetTrainer {
    /// Trainer for the production markets
    pub fn new(config: TrainingConfig, feature_window: usize, store: ArtifactStore) -> Self {
        Self {
            config,
            feature_window,
            store,
            markets: Market::PRODUCTION.to_vec(),
        }
    }

    pub fn with_markets(mut self, markets: Vec<Market>) -> Self {
        self.markets = markets;
        self
    }

    pub fn markets(&self) -> &[Market] {
        &self.markets
    }

    fn labeled<'a>(rows: &'a [DatasetRow], market: Market) -> Vec<(&'a DatasetRow, u8)> {
        rows.iter()
            .filter_map(|r| r.label(market).map(|label| (r, label)))
            .collect()
    }

    fn inputs(
        market: Market,
        rows: &[(&DatasetRow, u8)],
        names: &[String],
    ) -> Result<(Vec<Vec<f64>>, Vec<u8>), TrainingError> {
        let mut x = Vec::with_capacity(rows.len());
        for (row, _) in rows {
            let values = row.features.to_ordered(names).map_err(|missing| TrainingError::Fit {
                market,
                reason: format!("fixture {} lacks feature {}", row.row.fixture_id, missing),
            })?;
            x.push(values);
        }
        Ok((x, rows.iter().map(|(_, y)| *y).collect()))
    }

    fn train_market(
        &self,
        market: Market,
        table: &TrainingTable,
        train: &TrainingTable,
        validation: &TrainingTable,
    ) -> Result<MarketSummary, TrainingError> {
        guard_features(market, &table.feature_names)?;

        if !table.has_label(market) {
            return Err(TrainingError::LabelAbsent { market });
        }

        let train_rows = Self::labeled(&train.rows, market);
        let val_rows = Self::labeled(&validation.rows, market);

        let total = train_rows.len() + val_rows.len();
        if total < self.config.min_samples {
            return Err(TrainingError::NotEnoughRows {
                market,
                rows: total,
                required: self.config.min_samples,
            });
        }
        if train_rows.is_empty() {
            return Err(TrainingError::EmptySplit { market, split: "train" });
        }
        if val_rows.is_empty() {
            return Err(TrainingError::EmptySplit { market, split: "validation" });
        }

        let first = train_rows[0].1;
        if train_rows.iter().all(|(_, y)| *y == first) {
            return Err(TrainingError::DegenerateLabel { market, value: first });
        }

        if !has_both_classes(&val_rows.iter().map(|(_, y)| *y).collect::<Vec<_>>()) {
            warn!(
                market = %market,
                rows = val_rows.len(),
                "validation labels hold a single class, AUC not recorded"
            );
        }

        let names = &table.feature_names;
        let (x_train, y_train) = Self::inputs(market, &train_rows, names)?;
        let (x_val, y_val) = Self::inputs(market, &val_rows, names)?;

        let fit_err = |e: anyhow::Error| TrainingError::Fit {
            market,
            reason: e.to_string(),
        };
        let model = FittedModel::fit(&self.config, &x_train, &y_train).map_err(fit_err)?;
        let p_train = model.predict_proba(&x_train).map_err(fit_err)?;
        let p_val = model.predict_proba(&x_val).map_err(fit_err)?;

        let train_metrics = SplitMetrics::compute(&y_train, &p_train);
        let validation_metrics = SplitMetrics::compute(&y_val, &p_val);

        let artifact = ModelArtifact {
            market,
            model,
            feature_names: names.clone(),
            train_metrics,
            validation_metrics,
            params: ArtifactParams {
                classifier: self.config.classifier,
                validation_ratio: self.config.validation_ratio,
                feature_window: self.feature_window,
                logistic: (self.config.classifier == ClassifierKind::Logistic)
                    .then(|| self.config.logistic.clone()),
                forest: (self.config.classifier == ClassifierKind::Forest)
                    .then(|| self.config.forest.clone()),
            },
            trained_at: Utc::now(),
        };

        let path = self.store.save(&artifact).map_err(|e| TrainingError::Persist {
            market,
            reason: e.to_string(),
        })?;

        Ok(MarketSummary {
            market,
            train: train_metrics,
            validation: validation_metrics,
            artifact: path,
        })
    }
}

impl ModelTrainer for MultiTargetTrainer {
    fn train_all(&self, table: &TrainingTable) -> TrainingReport {
        let (train, validation) = table.chronological_split(self.config.validation_ratio);
        info!(
            markets = self.markets.len(),
            rows = table.len(),
            train = train.len(),
            validation = validation.len(),
            features = table.feature_names.len(),
            classifier = ?self.config.classifier,
            "🧠 Training markets"
        );

        let mut report = TrainingReport::default();
        for market in &self.markets {
            match self.train_market(*market, table, &train, &validation) {
                Ok(summary) => {
                    info!(
                        market = %market,
                        val_accuracy = format!("{:.4}", summary.validation.accuracy),
                        val_auc = %format_auc(summary.validation.auc),
                        val_log_loss = format!("{:.4}", summary.validation.log_loss),
                        "✅ Market trained"
                    );
                    report.trained.push(summary);
                }
                Err(e) => {
                    error!(market = %market, error = %e, "❌ Market training failed");
                    report.failures.push(e);
                }
            }
        }

        let metadata = TrainingMetadata {
            trained_at: Utc::now(),
            classifier: self.config.classifier,
            total_rows: table.len(),
            train_rows: train.len(),
            validation_rows: validation.len(),
            feature_names: table.feature_names.clone(),
            markets: report.trained.clone(),
            failures: report
                .failures
                .iter()
                .map(|f| (f.market(), f.to_string()))
                .collect(),
        };
        let experimental = self.markets.iter().all(|m| m.is_experimental());
        if let Err(e) = self.store.save_metadata(experimental, &metadata) {
            error!(error = %e, "failed to write training metadata");
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSettings;
    use crate::ml_engine::features::{FeatureVector, RollingFeatureEngine};
    use crate::types::{FixtureRecord, TeamRef, TeamStats};
    use chrono::{Duration, TimeZone};

    fn temp_store() -> (PathBuf, ArtifactStore) {
        let dir = std::env::temp_dir().join(format!("footy_training_{}", uuid::Uuid::new_v4()));
        (dir.clone(), ArtifactStore::new(dir))
    }

    /// Eight teams with persistent styles so rolling features carry signal
    fn synthetic_rows(n: i64) -> Vec<FixtureRow> {
        (0..n)
            .map(|i| {
                let home = i % 8;
                let away = (i * 3 + 1) % 8;
                let away = if away == home { (away + 1) % 8 } else { away };
                let attack = |t: i64| if t < 4 { 3 } else { 0 };
                let stats = |t: i64| TeamStats {
                    corners: if t % 2 == 0 { 7 } else { 2 },
                    yellow_cards: (t % 3) as u32 + 1,
                    red_cards: 0,
                    total_shots: 12,
                    shots_on_goal: 4,
                    possession: 50.0,
                };
                let record = FixtureRecord {
                    fixture_id: i + 1,
                    kickoff: Utc.with_ymd_and_hms(2018, 8, 1, 15, 0, 0).unwrap() + Duration::days(i),
                    league_id: 39,
                    league: "Premier League".to_string(),
                    season: 2018,
                    home: TeamRef { id: home, name: format!("team {}", home) },
                    away: TeamRef { id: away, name: format!("team {}", away) },
                    home_goals: attack(home) + (i % 2) as u32,
                    away_goals: attack(away) / 3,
                    ht_home_goals: Some(0),
                    ht_away_goals: Some(0),
                    home_stats: stats(home),
                    away_stats: stats(away),
                };
                FixtureRow::from_record(&record)
            })
            .collect()
    }

    fn table(n: i64) -> TrainingTable {
        RollingFeatureEngine::build_table(FeatureSettings::default(), synthetic_rows(n)).unwrap()
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            min_samples: 20,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn production_markets_train_and_write_artifacts() {
        let (dir, store) = temp_store();
        let trainer = MultiTargetTrainer::new(config(), 5, store.clone());
        let report = trainer.train_all(&table(200));

        assert!(report.all_succeeded(), "failures: {:?}", report.failures);
        assert_eq!(report.trained.len(), 4);
        for market in Market::PRODUCTION {
            let artifact = store.load(market).unwrap().unwrap();
            assert_eq!(artifact.feature_names, table(1).feature_names);
            assert_eq!(artifact.validation_metrics.samples, 40);
        }
        assert!(store.metadata_path(false).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn feature_sets_never_contain_label_columns() {
        let t = table(50);
        for market in Market::all() {
            assert!(guard_features(market, &t.feature_names).is_ok());
            for other in Market::all() {
                assert!(!t.feature_names.iter().any(|n| n == other.label()));
            }
        }

        let mut leaking = t.feature_names.clone();
        leaking.push("over_9_5_corners".to_string());
        assert_eq!(
            guard_features(Market::Btts, &leaking),
            Err(TrainingError::LeakingColumn {
                market: Market::Btts,
                column: "over_9_5_corners".to_string()
            })
        );
        leaking.pop();
        leaking.push("fixture_id".to_string());
        assert!(guard_features(Market::Btts, &leaking).is_err());
    }

    #[test]
    fn degenerate_market_fails_alone() {
        let (dir, store) = temp_store();
        let mut t = table(200);
        for row in &mut t.rows {
            row.row.over_3_5_cards = 0;
        }
        let report = MultiTargetTrainer::new(config(), 5, store).train_all(&t);

        assert_eq!(report.trained.len(), 3);
        assert_eq!(
            report.failures,
            vec![TrainingError::DegenerateLabel { market: Market::Over35Cards, value: 0 }]
        );
        assert!(!report.all_succeeded());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn single_class_validation_records_no_auc() {
        let (dir, store) = temp_store();
        let mut t = table(200);
        let n = t.rows.len();
        for row in &mut t.rows[n - 40..] {
            row.row.over_3_5_cards = 1;
        }
        let report = MultiTargetTrainer::new(config(), 5, store.clone())
            .with_markets(vec![Market::Over35Cards, Market::Btts])
            .train_all(&t);

        assert!(report.all_succeeded(), "failures: {:?}", report.failures);
        let cards = &report.trained[0];
        assert_eq!(cards.market, Market::Over35Cards);
        assert_eq!(cards.validation.samples, 40);
        assert_eq!(cards.validation.auc, None);
        assert!(cards.train.auc.is_some());
        assert!(report.trained[1].validation.auc.is_some());

        let artifact = store.load(Market::Over35Cards).unwrap().unwrap();
        assert_eq!(artifact.validation_metrics.auc, None);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn absent_experimental_label_is_reported() {
        let (dir, store) = temp_store();
        let mut t = table(100);
        for row in &mut t.rows {
            row.row.experimental.clear();
        }
        let report = MultiTargetTrainer::new(config(), 5, store)
            .with_markets(vec![Market::HasRedCard])
            .train_all(&t);
        assert_eq!(report.failures, vec![TrainingError::LabelAbsent { market: Market::HasRedCard }]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn too_few_rows_is_reported() {
        let (dir, store) = temp_store();
        let report = MultiTargetTrainer::new(TrainingConfig::default(), 5, store)
            .with_markets(vec![Market::Btts])
            .train_all(&table(10));
        assert!(matches!(
            report.failures.as_slice(),
            [TrainingError::NotEnoughRows { rows: 10, required: 50, .. }]
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_feature_value_is_a_fit_error() {
        let (dir, store) = temp_store();
        let mut t = table(100);
        t.rows[0].features = FeatureVector::default();
        let report = MultiTargetTrainer::new(config(), 5, store)
            .with_markets(vec![Market::Btts])
            .train_all(&t);
        assert!(matches!(report.failures.as_slice(), [TrainingError::Fit { .. }]));

        std::fs::remove_dir_all(&dir).ok();
    }
}
