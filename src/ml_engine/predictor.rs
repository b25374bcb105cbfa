//! Slate predictor
//!
//! Replays the processed history through the rolling engine, scores each
//! scheduled fixture with every production artifact and writes the
//! `predictions.json` payload the bet-builder detector consumes.

use crate::config::FeatureSettings;
use crate::error::PipelineError;
use crate::ml_engine::data_client::{with_timeout, FixtureSource};
use crate::ml_engine::dataset::{DatasetStore, TrainingTable};
use crate::ml_engine::features::RollingFeatureEngine;
use crate::ml_engine::labeling::{derive_upcoming, UpcomingFixture};
use crate::ml_engine::models::BinaryClassifier;
use crate::ml_engine::persistence::{write_json_atomic, ArtifactStore, ModelArtifact};
use crate::types::{
    confidence_of, FixturePrediction, Market, MarketPrediction, MarketSignal, PredictionsFile,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// A scored fixture: the payload entry plus its per-market signals
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFixture {
    pub prediction: FixturePrediction,
    pub signals: Vec<MarketSignal>,
}

pub struct SlatePredictor {
    engine: RollingFeatureEngine,
    artifacts: Vec<ModelArtifact>,
    prices: BTreeMap<Market, Decimal>,
}

impl SlatePredictor {
    pub fn new(
        settings: FeatureSettings,
        artifacts: Vec<ModelArtifact>,
        prices: BTreeMap<Market, Decimal>,
    ) -> Self {
        Self {
            engine: RollingFeatureEngine::new(settings),
            artifacts,
            prices,
        }
    }

    /// Load every production artifact; none at all is `MissingInput`
    pub fn load(
        settings: FeatureSettings,
        store: &ArtifactStore,
        prices: BTreeMap<Market, Decimal>,
    ) -> Result<Self, PipelineError> {
        let mut artifacts = Vec::new();
        for market in Market::PRODUCTION {
            match store.load(market)? {
                Some(artifact) => artifacts.push(artifact),
                None => warn!(market = %market, "model not found, market not predicted"),
            }
        }
        if artifacts.is_empty() {
            return Err(PipelineError::MissingInput {
                path: store.dir_for(false),
            });
        }
        info!(models = artifacts.len(), "🧠 Production models loaded");
        Ok(Self::new(settings, artifacts, prices))
    }

    pub fn markets(&self) -> Vec<Market> {
        self.artifacts.iter().map(|a| a.market).collect()
    }

    /// Feed finished matches into the rolling history in kickoff order
    pub fn replay(&mut self, history: &TrainingTable) -> Result<usize> {
        let mut records = history
            .rows
            .iter()
            .map(|r| r.row.to_fixture_record())
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.kickoff);
        for record in &records {
            self.engine.ingest(record);
        }
        Ok(records.len())
    }

    pub fn score(&self, fixture: &UpcomingFixture) -> ScoredFixture {
        let features = self.engine.features_for_upcoming(fixture);
        let mut predictions = BTreeMap::new();
        let mut signals = Vec::new();

        for artifact in &self.artifacts {
            let market = artifact.market;
            let row = match features.to_ordered(&artifact.feature_names) {
                Ok(row) => row,
                Err(missing) => {
                    warn!(market = %market, fixture_id = fixture.fixture_id, %missing, "feature missing, market skipped");
                    continue;
                }
            };
            let probability = match artifact.model.predict_proba(&[row]) {
                Ok(p) => p.first().copied().unwrap_or(0.0),
                Err(e) => {
                    warn!(market = %market, fixture_id = fixture.fixture_id, error = %e, "prediction failed");
                    continue;
                }
            };
            let confidence = confidence_of(probability);

            let positive = probability >= 0.5;
            let (key_yes, outcome) = match market.selection() {
                "Over" => (false, if positive { "Over" } else { "Under" }),
                _ => (true, if positive { "Yes" } else { "No" }),
            };
            predictions.insert(
                market.label().to_string(),
                MarketPrediction {
                    yes_probability: key_yes.then_some(probability),
                    over_probability: (!key_yes).then_some(probability),
                    confidence,
                    prediction: Some(outcome.to_string()),
                },
            );
            if let Some(price) = self.prices.get(&market) {
                signals.push(MarketSignal::new(market, probability, confidence, *price));
            }
        }

        ScoredFixture {
            prediction: FixturePrediction {
                fixture_id: fixture.fixture_id,
                home_team: fixture.home.name.clone(),
                away_team: fixture.away.name.clone(),
                league: fixture.league.clone(),
                kickoff: fixture.kickoff,
                predictions,
            },
            signals,
        }
    }

    /// Score a slate; output order is kickoff then fixture id
    pub fn score_slate(
        &self,
        fixtures: &[UpcomingFixture],
        generated_at: DateTime<Utc>,
    ) -> (PredictionsFile, Vec<ScoredFixture>) {
        let mut ordered: Vec<&UpcomingFixture> = fixtures.iter().collect();
        ordered.sort_by_key(|f| (f.kickoff, f.fixture_id));
        let scored: Vec<ScoredFixture> = ordered.into_iter().map(|f| self.score(f)).collect();
        let file = PredictionsFile {
            generated_at,
            fixtures: scored.iter().map(|s| s.prediction.clone()).collect(),
        };
        (file, scored)
    }
}

/// Fetch the slate of `date`, score it and write `output`
pub async fn predict_date<S: FixtureSource + ?Sized>(
    predictor: &SlatePredictor,
    source: &S,
    date: NaiveDate,
    timeout_secs: u64,
    output: &Path,
    generated_at: DateTime<Utc>,
) -> Result<PredictionsFile, PipelineError> {
    let raw = match with_timeout(timeout_secs, "/fixtures", source.fetch_fixtures_on(date)).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(%date, error = %e, "slate fetch failed, writing empty predictions");
            Vec::new()
        }
    };

    let fixtures: Vec<UpcomingFixture> = raw
        .iter()
        .filter_map(|f| match derive_upcoming(f) {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(error = %e, "fixture dropped");
                None
            }
        })
        .collect();

    let (file, _) = predictor.score_slate(&fixtures, generated_at);
    write_json_atomic(output, &file)?;
    info!(%date, fixtures = file.fixtures.len(), path = %output.display(), "✅ Predictions saved");
    Ok(file)
}

/// Predictor over the processed history and production artifacts
pub fn prepare(
    settings: FeatureSettings,
    datasets: &DatasetStore,
    artifacts: &ArtifactStore,
    prices: BTreeMap<Market, Decimal>,
) -> Result<SlatePredictor, PipelineError> {
    let mut predictor = SlatePredictor::load(settings, artifacts, prices)?;
    let history = datasets.load_processed(DatasetStore::TRAINING_DATA)?;
    let replayed = predictor.replay(&history)?;
    info!(matches = replayed, "📊 History replayed for slate features");
    Ok(predictor)
}
