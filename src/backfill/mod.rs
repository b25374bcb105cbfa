//! Progressive historical backfill
//!
//! Walks backward one season per invocation:
//! `Idle -> CollectYear -> DeriveAndMerge -> Train -> Checkpoint -> Idle`,
//! or `Complete` once the checkpoint is below the floor season. The
//! checkpoint only advances after every market trained, so a failed
//! invocation is retried from the same season next time.
//!
//! Precondition: at most one controller runs against a data directory.

pub mod checkpoint;

pub use checkpoint::{CheckpointStore, TrainingProgress, YearStats};

use crate::config::{AppConfig, BackfillConfig, FeatureSettings, SourceConfig};
use crate::error::{BackfillError, DeriveError};
use crate::ml_engine::data_client::{with_timeout, FixtureSource, RawFixture, RawTeamStatistics};
use crate::ml_engine::dataset::{DatasetStore, FixtureRow, TrainingTable};
use crate::ml_engine::features::RollingFeatureEngine;
use crate::ml_engine::labeling::derive_record;
use crate::ml_engine::training::{ModelTrainer, TrainingReport};
use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    CollectYear,
    DeriveAndMerge,
    Train,
    Checkpoint,
    Complete,
}

impl fmt::Display for BackfillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackfillState::Idle => "idle",
            BackfillState::CollectYear => "collect_year",
            BackfillState::DeriveAndMerge => "derive_and_merge",
            BackfillState::Train => "train",
            BackfillState::Checkpoint => "checkpoint",
            BackfillState::Complete => "complete",
        };
        write!(f, "{}", name)
    }
}

/// What one invocation achieved
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    /// Season trained and checkpoint moved to `progress.current_year`
    Advanced {
        progress: TrainingProgress,
        report: TrainingReport,
    },
    /// Nothing left to do
    Complete { current_year: i32 },
}

/// Raw fixtures of one season with their statistic blocks
#[derive(Debug, Default)]
pub struct CollectedYear {
    pub year: i32,
    pub fixtures: Vec<(RawFixture, Vec<RawTeamStatistics>)>,
    pub leagues_covered: usize,
    pub failed_leagues: usize,
    /// Fixtures whose statistics call failed
    pub failed_fixtures: usize,
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

pub struct BackfillController<S: FixtureSource, T: ModelTrainer> {
    source: S,
    trainer: T,
    datasets: DatasetStore,
    checkpoint: CheckpointStore,
    backfill: BackfillConfig,
    source_config: SourceConfig,
    features: FeatureSettings,
    validation_ratio: f64,
    state: BackfillState,
}

impl<S: FixtureSource, T: ModelTrainer> BackfillController<S, T> {
    pub fn new(source: S, trainer: T, config: &AppConfig) -> Self {
        let data_dir = config.pipeline.data_path();
        Self {
            source,
            trainer,
            datasets: DatasetStore::new(&data_dir),
            checkpoint: CheckpointStore::new(&data_dir),
            backfill: config.backfill.clone(),
            source_config: config.source.clone(),
            features: config.features.clone(),
            validation_ratio: config.training.validation_ratio,
            state: BackfillState::Idle,
        }
    }

    pub fn state(&self) -> BackfillState {
        self.state
    }

    pub fn progress(&self) -> anyhow::Result<TrainingProgress> {
        self.checkpoint.load(self.backfill.start_year)
    }

    fn enter(&mut self, state: BackfillState) {
        debug!(from = %self.state, to = %state, "backfill state");
        self.state = state;
    }

    /// Process exactly one season
    pub async fn run_once(&mut self) -> Result<BackfillOutcome, BackfillError> {
        self.enter(BackfillState::Idle);
        let progress = self.progress()?;
        if progress.is_complete(self.backfill.floor_year) {
            self.enter(BackfillState::Complete);
            info!(
                current_year = progress.current_year,
                floor_year = self.backfill.floor_year,
                "✅ Backfill complete, nothing to do"
            );
            return Ok(BackfillOutcome::Complete {
                current_year: progress.current_year,
            });
        }

        let year = progress.current_year;
        info!(year, start_year = self.backfill.start_year, "📊 Backfilling season");

        let result = self.process_year(&progress).await;
        if result.is_err() {
            self.enter(BackfillState::Idle);
        }
        result
    }

    async fn process_year(
        &mut self,
        progress: &TrainingProgress,
    ) -> Result<BackfillOutcome, BackfillError> {
        let year = progress.current_year;

        self.enter(BackfillState::CollectYear);
        let collected = self.collect_year(year).await;

        self.enter(BackfillState::DeriveAndMerge);
        let stats = self.persist_year(&collected)?;
        let rows = self.datasets.merge_years(year, self.backfill.start_year)?;
        let table = RollingFeatureEngine::build_table(self.features.clone(), rows)?;
        table.summary().log();
        self.datasets.write_processed(&table, self.validation_ratio)?;

        self.enter(BackfillState::Train);
        let report = self.train(year, &table)?;

        self.enter(BackfillState::Checkpoint);
        let advanced = progress.advance(stats, Utc::now(), self.backfill.floor_year);
        self.checkpoint.save(&advanced)?;
        info!(
            trained_year = year,
            next_year = advanced.current_year,
            markets = report.trained.len(),
            "✅ Season complete"
        );

        self.enter(if advanced.is_complete(self.backfill.floor_year) {
            BackfillState::Complete
        } else {
            BackfillState::Idle
        });
        Ok(BackfillOutcome::Advanced {
            progress: advanced,
            report,
        })
    }

    fn train(&self, year: i32, table: &TrainingTable) -> Result<TrainingReport, BackfillError> {
        let report = self.trainer.train_all(table);
        if !report.all_succeeded() {
            error!(
                year,
                trained = report.trained.len(),
                failed = report.failures.len(),
                "❌ Training failed, checkpoint not advanced"
            );
            return Err(BackfillError::Training {
                year,
                failures: report.failures,
            });
        }
        Ok(report)
    }

    /// Collect and persist one season without training or checkpointing
    pub async fn collect_only(&mut self, year: i32) -> Result<YearStats, BackfillError> {
        self.enter(BackfillState::CollectYear);
        let collected = self.collect_year(year).await;
        self.enter(BackfillState::DeriveAndMerge);
        let stats = self.persist_year(&collected);
        self.enter(BackfillState::Idle);
        stats
    }

    /// Fetch every active league's finished fixtures plus their statistics.
    /// Failures only shrink the result.
    pub async fn collect_year(&self, year: i32) -> CollectedYear {
        let leagues = self.backfill.active_leagues();
        let timeout = self.source_config.request_timeout_secs;
        let mut collected = CollectedYear {
            year,
            ..CollectedYear::default()
        };

        for (i, league_id) in leagues.iter().enumerate() {
            if i > 0 {
                pause(self.source_config.league_delay_ms).await;
            }

            let fixtures = match with_timeout(
                timeout,
                "/fixtures",
                self.source.fetch_finished_fixtures(*league_id, year),
            )
            .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(league_id, year, error = %e, "league skipped");
                    collected.failed_leagues += 1;
                    continue;
                }
            };
            pause(self.source_config.fixture_delay_ms).await;

            if fixtures.is_empty() {
                debug!(league_id, year, "no finished fixtures");
                continue;
            }
            collected.leagues_covered += 1;
            let count = fixtures.len();

            for fixture in fixtures {
                let stats = with_timeout(
                    timeout,
                    "/fixtures/statistics",
                    self.source.fetch_statistics(fixture.fixture.id),
                )
                .await;
                pause(self.source_config.stats_delay_ms).await;

                match stats {
                    Ok(stats) => collected.fixtures.push((fixture, stats)),
                    Err(e) => {
                        warn!(fixture_id = fixture.fixture.id, error = %e, "statistics skipped");
                        collected.failed_fixtures += 1;
                    }
                }
            }
            info!(league_id, year, fixtures = count, "🔗 League collected");
        }

        info!(
            year,
            fixtures = collected.fixtures.len(),
            leagues = collected.leagues_covered,
            failed_leagues = collected.failed_leagues,
            "📊 Season collected"
        );
        collected
    }

    /// Derive labels and write `historical/fixtures_{year}.csv`
    fn persist_year(&self, collected: &CollectedYear) -> Result<YearStats, BackfillError> {
        let year = collected.year;
        let mut rows = Vec::with_capacity(collected.fixtures.len());
        let mut dropped = collected.failed_fixtures;

        for (raw, stats) in &collected.fixtures {
            match derive_record(raw, stats) {
                Ok(record) => rows.push(FixtureRow::from_record(&record)),
                Err(e @ DeriveError::IncompleteStatistics { .. }) => {
                    debug!(error = %e, "fixture dropped");
                    dropped += 1;
                }
                Err(e) => {
                    warn!(error = %e, "fixture dropped");
                    dropped += 1;
                }
            }
        }

        if rows.is_empty() {
            warn!(year, dropped, "❌ No usable fixtures, checkpoint not advanced");
            return Err(BackfillError::NoFixtures { year });
        }

        let path = self.datasets.write_year(year, &rows)?;
        Ok(YearStats {
            year,
            total_fixtures: rows.len(),
            leagues_covered: collected.leagues_covered,
            dropped_incomplete: dropped,
            failed_leagues: collected.failed_leagues,
            file: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, SourceError, TrainingError};
    use crate::ml_engine::data_client::{
        MockFixtureSource, RawFixtureInfo, RawGoals, RawLeague, RawScore, RawStatistic, RawTeam,
        RawTeams,
    };
    use crate::ml_engine::metrics::SplitMetrics;
    use crate::ml_engine::training::{MarketSummary, MockModelTrainer};
    use crate::types::Market;
    use std::path::PathBuf;

    fn config(dir: &std::path::Path, start_year: i32, floor_year: i32) -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.data_dir = dir.join("data").display().to_string();
        config.backfill.start_year = start_year;
        config.backfill.floor_year = floor_year;
        config.backfill.leagues = vec![39];
        config.source.fixture_delay_ms = 0;
        config.source.stats_delay_ms = 0;
        config.source.league_delay_ms = 0;
        config
    }

    fn raw_fixture(id: i64, season: i32) -> RawFixture {
        RawFixture {
            fixture: RawFixtureInfo {
                id,
                date: format!("{}-09-{:02}T15:00:00+00:00", season, (id % 28) + 1),
            },
            league: RawLeague {
                id: 39,
                name: "Premier League".to_string(),
                season,
            },
            teams: RawTeams {
                home: RawTeam { id: id % 4, name: format!("team {}", id % 4) },
                away: RawTeam { id: 10 + id % 3, name: format!("team {}", 10 + id % 3) },
            },
            goals: RawGoals {
                home: Some((id % 3) as u32),
                away: Some((id % 2) as u32),
            },
            score: RawScore::default(),
        }
    }

    fn block(team: i64) -> RawTeamStatistics {
        let stat = |kind: &str, value: i64| RawStatistic {
            kind: kind.to_string(),
            value: serde_json::json!(value),
        };
        RawTeamStatistics {
            team: RawTeam { id: team, name: format!("team {}", team) },
            statistics: vec![stat("Corner Kicks", 5), stat("Yellow Cards", 2), stat("Shots on Goal", 4)],
        }
    }

    fn source_with(fixtures_per_season: usize) -> MockFixtureSource {
        let mut source = MockFixtureSource::new();
        source
            .expect_fetch_finished_fixtures()
            .returning(move |_, season| {
                Ok((0..fixtures_per_season as i64)
                    .map(|i| raw_fixture(season as i64 * 1000 + i, season))
                    .collect())
            });
        source.expect_fetch_statistics().returning(|id| {
            let f = raw_fixture(id, 2018);
            Ok(vec![block(f.teams.home.id), block(f.teams.away.id)])
        });
        source
    }

    fn succeeding_trainer() -> MockModelTrainer {
        let mut trainer = MockModelTrainer::new();
        trainer.expect_train_all().returning(|_| TrainingReport {
            trained: vec![MarketSummary {
                market: Market::Btts,
                train: SplitMetrics::compute(&[0, 1], &[0.3, 0.7]),
                validation: SplitMetrics::compute(&[0, 1], &[0.3, 0.7]),
                artifact: PathBuf::from("models/btts_model.json"),
            }],
            failures: Vec::new(),
        });
        trainer
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("footy_backfill_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn checkpoint_moves_back_one_season_per_success() {
        let dir = temp_dir();
        let cfg = config(&dir, 2018, 2000);
        let mut controller = BackfillController::new(source_with(6), succeeding_trainer(), &cfg);

        for n in 1..=3 {
            let outcome = controller.run_once().await.unwrap();
            match outcome {
                BackfillOutcome::Advanced { progress, .. } => {
                    assert_eq!(progress.current_year, 2018 - n);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(controller.progress().unwrap().current_year, 2015);
        assert_eq!(controller.state(), BackfillState::Idle);

        let datasets = DatasetStore::new(dir.join("data"));
        for year in 2016..=2018 {
            assert!(datasets.year_path(year).exists());
        }
        assert!(datasets.processed_path(DatasetStore::TRAINING_DATA).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn training_failure_leaves_checkpoint_untouched() {
        let dir = temp_dir();
        let cfg = config(&dir, 2018, 2000);
        let mut trainer = MockModelTrainer::new();
        trainer.expect_train_all().returning(|_| TrainingReport {
            trained: Vec::new(),
            failures: vec![TrainingError::DegenerateLabel {
                market: Market::Over35Cards,
                value: 0,
            }],
        });
        let mut controller = BackfillController::new(source_with(6), trainer, &cfg);

        let err = controller.run_once().await.unwrap_err();
        assert!(matches!(err, BackfillError::Training { year: 2018, .. }));
        assert!(!CheckpointStore::new(dir.join("data")).path().exists());
        assert_eq!(controller.progress().unwrap().current_year, 2018);
        assert_eq!(controller.state(), BackfillState::Idle);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn nothing_collected_is_no_fixtures() {
        let dir = temp_dir();
        let cfg = config(&dir, 2018, 2000);
        let mut source = MockFixtureSource::new();
        source.expect_fetch_finished_fixtures().returning(|_, _| {
            Err(SourceError::Status {
                endpoint: "/fixtures".to_string(),
                status: 429,
            })
        });
        let mut trainer = MockModelTrainer::new();
        trainer.expect_train_all().never();

        let mut controller = BackfillController::new(source, trainer, &cfg);
        let err = controller.run_once().await.unwrap_err();
        assert!(matches!(err, BackfillError::NoFixtures { year: 2018 }));
        assert_eq!(controller.progress().unwrap().current_year, 2018);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn incomplete_statistics_are_dropped() {
        let dir = temp_dir();
        let cfg = config(&dir, 2018, 2000);
        let mut source = MockFixtureSource::new();
        source
            .expect_fetch_finished_fixtures()
            .returning(|_, season| Ok((0..4).map(|i| raw_fixture(i, season)).collect()));
        source.expect_fetch_statistics().returning(|id| {
            let f = raw_fixture(id, 2018);
            if id == 0 {
                Ok(vec![block(f.teams.home.id)])
            } else {
                Ok(vec![block(f.teams.home.id), block(f.teams.away.id)])
            }
        });

        let mut controller = BackfillController::new(source, succeeding_trainer(), &cfg);
        let stats = controller.collect_only(2018).await.unwrap();
        assert_eq!(stats.total_fixtures, 3);
        assert_eq!(stats.dropped_incomplete, 1);
        assert_eq!(stats.leagues_covered, 1);
        // collect-only never checkpoints
        assert!(!CheckpointStore::new(dir.join("data")).path().exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn below_floor_is_complete_without_work() {
        let dir = temp_dir();
        let cfg = config(&dir, 2018, 2017);
        let mut controller = BackfillController::new(source_with(6), succeeding_trainer(), &cfg);

        controller.run_once().await.unwrap();
        controller.run_once().await.unwrap();
        assert_eq!(controller.progress().unwrap().current_year, 2016);
        assert_eq!(controller.state(), BackfillState::Complete);

        let mut source = MockFixtureSource::new();
        source.expect_fetch_finished_fixtures().never();
        let mut trainer = MockModelTrainer::new();
        trainer.expect_train_all().never();
        let mut idle = BackfillController::new(source, trainer, &cfg);
        let outcome = idle.run_once().await.unwrap();
        assert_eq!(outcome, BackfillOutcome::Complete { current_year: 2016 });

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_every_year_file_is_missing_input() {
        let dir = temp_dir();
        let cfg = config(&dir, 2018, 2000);
        let controller = BackfillController::new(source_with(0), succeeding_trainer(), &cfg);
        let err = controller.datasets.merge_years(2017, 2018).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }
}
