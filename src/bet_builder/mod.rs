//! Multi-Market Convergence Detector
//!
//! Finds fixtures where several independent market models agree with high
//! confidence and combines them into a ranked list of bet builders:
//! - Only fixtures from the allowed (top-tier) competitions are considered
//! - A market qualifies when both its confidence and its positive-outcome
//!   probability clear their thresholds
//! - A fixture needs `min_markets` qualifying markets
//! - Combined price is the product of the assumed per-market prices
//!   (decimal arithmetic, two places, half away from zero)

use crate::config::BetBuilderConfig;
use crate::error::PipelineError;
use crate::ml_engine::persistence::{read_json, write_json_atomic};
use crate::types::{FixturePrediction, Market, MarketPrediction, MarketSignal, PredictionsFile};
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// A fixture with enough converging markets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetBuilderCandidate {
    pub fixture_id: i64,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub kickoff: DateTime<Utc>,
    /// Full prediction payload of the fixture
    pub predictions: BTreeMap<String, MarketPrediction>,
    pub high_confidence_markets: Vec<MarketSignal>,
    /// Mean confidence of the qualifying markets, rounded to an integer
    pub combined_confidence: i64,
    #[serde(rename = "estimated_combined_odds", with = "rust_decimal::serde::float")]
    pub combined_price: Decimal,
    pub market_count: usize,
}

/// Contents of `bet_builders.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetBuilderOutput {
    pub generated_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub total_fixtures_analyzed: usize,
    pub bet_builders_found: usize,
    pub bet_builders: Vec<BetBuilderCandidate>,
}

impl BetBuilderOutput {
    pub fn print(&self) {
        println!("\n╔══════════════════════════════════════════════════════════╗");
        println!("║                 🧠 BET BUILDER SUMMARY                   ║");
        println!("╠══════════════════════════════════════════════════════════╣");
        println!(
            "║ Fixtures analyzed: {:>6}   Bet builders found: {:>4}    ║",
            self.total_fixtures_analyzed, self.bet_builders_found
        );
        println!("╚══════════════════════════════════════════════════════════╝");
        for (i, bb) in self.bet_builders.iter().enumerate() {
            println!("{}. {} vs {}", i + 1, bb.home_team, bb.away_team);
            println!("   League: {}", bb.league);
            println!(
                "   Markets: {} @ {}% confidence",
                bb.market_count, bb.combined_confidence
            );
            println!("   Combined Odds: {}x", bb.combined_price);
        }
    }
}

/// Decimal price of every configured market
pub fn assumed_prices(config: &BetBuilderConfig) -> Result<BTreeMap<Market, Decimal>> {
    let mut prices = BTreeMap::new();
    for market in &config.markets {
        let price = config
            .price_of(*market)
            .ok_or_else(|| anyhow!("no assumed price configured for {}", market))?;
        // shortest round-trip text keeps 1.85 exactly 1.85
        let price: Decimal = price
            .to_string()
            .parse()
            .map_err(|e| anyhow!("invalid price {} for {}: {}", price, market, e))?;
        prices.insert(*market, price);
    }
    Ok(prices)
}

pub struct ConvergenceDetector {
    config: BetBuilderConfig,
    prices: BTreeMap<Market, Decimal>,
}

impl ConvergenceDetector {
    /// Fails when a configured market has no assumed price
    pub fn new(config: BetBuilderConfig) -> Result<Self> {
        let prices = assumed_prices(&config)?;
        Ok(Self { config, prices })
    }

    fn league_allowed(&self, league: &str) -> bool {
        self.config.allowed_leagues.iter().any(|l| l == league)
    }

    /// Qualifying markets of one fixture, in configured market order
    pub fn high_confidence_markets(&self, fixture: &FixturePrediction) -> Vec<MarketSignal> {
        self.config
            .markets
            .iter()
            .filter_map(|market| {
                let prediction = fixture.predictions.get(market.label())?;
                let probability = prediction.probability(*market);
                let qualifies = prediction.confidence >= self.config.confidence_threshold
                    && probability >= self.config.probability_threshold;
                if !qualifies {
                    return None;
                }
                let price = *self.prices.get(market)?;
                Some(MarketSignal::new(*market, probability, prediction.confidence, price))
            })
            .collect()
    }

    pub fn candidate_for(&self, fixture: &FixturePrediction) -> Option<BetBuilderCandidate> {
        if !self.league_allowed(&fixture.league) {
            return None;
        }
        let markets = self.high_confidence_markets(fixture);
        if markets.is_empty() || markets.len() < self.config.min_markets {
            return None;
        }

        let mean = markets.iter().map(|m| m.confidence).sum::<f64>() / markets.len() as f64;
        let combined_price = markets
            .iter()
            .fold(Decimal::ONE, |acc, m| acc * m.price)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        Some(BetBuilderCandidate {
            fixture_id: fixture.fixture_id,
            home_team: fixture.home_team.clone(),
            away_team: fixture.away_team.clone(),
            league: fixture.league.clone(),
            kickoff: fixture.kickoff,
            predictions: fixture.predictions.clone(),
            market_count: markets.len(),
            // ties go to the even integer
            combined_confidence: mean.round_ties_even() as i64,
            combined_price,
            high_confidence_markets: markets,
        })
    }

    /// Ranked (confidence descending, fixture id ascending) and truncated
    pub fn detect(&self, fixtures: &[FixturePrediction]) -> Vec<BetBuilderCandidate> {
        let mut candidates: Vec<BetBuilderCandidate> =
            fixtures.iter().filter_map(|f| self.candidate_for(f)).collect();
        candidates.sort_by(|a, b| {
            b.combined_confidence
                .cmp(&a.combined_confidence)
                .then(a.fixture_id.cmp(&b.fixture_id))
        });
        candidates.truncate(self.config.max_daily);
        candidates
    }

    pub fn build_output(
        &self,
        fixtures: &[FixturePrediction],
        generated_at: DateTime<Utc>,
    ) -> BetBuilderOutput {
        let bet_builders = self.detect(fixtures);
        BetBuilderOutput {
            generated_at,
            date: generated_at.date_naive(),
            total_fixtures_analyzed: fixtures.len(),
            bet_builders_found: bet_builders.len(),
            bet_builders,
        }
    }

    /// Read `predictions.json`, detect, write `bet_builders.json`
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        generated_at: DateTime<Utc>,
    ) -> Result<BetBuilderOutput, PipelineError> {
        let predictions: PredictionsFile =
            read_json(input)?.ok_or_else(|| PipelineError::MissingInput {
                path: input.to_path_buf(),
            })?;
        if predictions.fixtures.is_empty() {
            warn!(path = %input.display(), "No fixtures in predictions file");
        }
        info!(fixtures = predictions.fixtures.len(), "📊 Analyzing fixtures for bet builders");

        let result = self.build_output(&predictions.fixtures, generated_at);
        write_json_atomic(output, &result)?;
        info!(
            found = result.bet_builders_found,
            min_markets = self.config.min_markets,
            threshold = self.config.confidence_threshold,
            path = %output.display(),
            "✅ Bet builders saved"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn prediction(market: Market, probability: f64, confidence: f64) -> (String, MarketPrediction) {
        let mut p = MarketPrediction {
            confidence,
            ..MarketPrediction::default()
        };
        match market.probability_key() {
            "over_probability" => p.over_probability = Some(probability),
            _ => p.yes_probability = Some(probability),
        }
        (market.label().to_string(), p)
    }

    fn fixture(id: i64, league: &str, markets: &[(Market, f64, f64)]) -> FixturePrediction {
        FixturePrediction {
            fixture_id: id,
            home_team: format!("Home {}", id),
            away_team: format!("Away {}", id),
            league: league.to_string(),
            kickoff: Utc.with_ymd_and_hms(2024, 3, 9, 15, 0, 0).unwrap(),
            predictions: markets
                .iter()
                .map(|(m, p, c)| prediction(*m, *p, *c))
                .collect(),
        }
    }

    fn detector() -> ConvergenceDetector {
        ConvergenceDetector::new(BetBuilderConfig::default()).unwrap()
    }

    #[test]
    fn three_converging_markets_make_a_candidate() {
        let f = fixture(
            1,
            "Premier League",
            &[
                (Market::Btts, 0.85, 85.0),
                (Market::Over25Goals, 0.80, 80.0),
                (Market::Over95Corners, 0.65, 70.0),
                (Market::Over35Cards, 0.78, 78.0),
            ],
        );
        let c = detector().candidate_for(&f).unwrap();
        assert_eq!(c.market_count, 3);
        assert_eq!(c.combined_confidence, 81);
        let markets: Vec<Market> = c.high_confidence_markets.iter().map(|m| m.market).collect();
        assert_eq!(markets, vec![Market::Btts, Market::Over25Goals, Market::Over35Cards]);
        // 1.75 * 1.85 * 2.00 = 6.475
        assert_eq!(c.combined_price, dec!(6.48));
    }

    #[test]
    fn both_thresholds_must_hold() {
        let f = fixture(
            2,
            "La Liga",
            &[
                (Market::Btts, 0.60, 90.0),
                (Market::Over25Goals, 0.80, 74.9),
                (Market::Over95Corners, 0.90, 90.0),
                (Market::Over35Cards, 0.90, 90.0),
            ],
        );
        assert!(detector().candidate_for(&f).is_none());
    }

    #[test]
    fn other_leagues_and_empty_payloads_never_qualify() {
        let strong = [
            (Market::Btts, 0.9, 90.0),
            (Market::Over25Goals, 0.9, 90.0),
            (Market::Over35Cards, 0.9, 90.0),
        ];
        assert!(detector().candidate_for(&fixture(3, "Eredivisie", &strong)).is_none());
        assert!(detector().candidate_for(&fixture(4, "Serie A", &[])).is_none());
    }

    #[test]
    fn confidence_ties_round_to_even() {
        let f = fixture(
            5,
            "Bundesliga",
            &[
                (Market::Btts, 0.80, 80.0),
                (Market::Over25Goals, 0.80, 81.0),
                (Market::Over95Corners, 0.80, 80.0),
                (Market::Over35Cards, 0.80, 81.0),
            ],
        );
        let c = detector().candidate_for(&f).unwrap();
        assert_eq!(c.combined_confidence, 80);
        // 1.75 * 1.85 * 1.90 * 2.00 = 12.3025
        assert_eq!(c.combined_price, dec!(12.30));

        let f = fixture(
            6,
            "Bundesliga",
            &[
                (Market::Btts, 0.80, 81.0),
                (Market::Over25Goals, 0.80, 82.0),
                (Market::Over95Corners, 0.80, 81.0),
                (Market::Over35Cards, 0.80, 82.0),
            ],
        );
        assert_eq!(detector().candidate_for(&f).unwrap().combined_confidence, 82);
    }

    #[test]
    fn ranks_by_confidence_then_fixture_id_and_truncates() {
        let fixtures: Vec<FixturePrediction> = [76.0, 90.0, 80.0, 88.0, 80.0, 95.0, 77.0, 85.0]
            .iter()
            .enumerate()
            .map(|(i, c)| {
                fixture(
                    100 - i as i64,
                    "Ligue 1",
                    &[
                        (Market::Btts, 0.9, *c),
                        (Market::Over25Goals, 0.9, *c),
                        (Market::Over35Cards, 0.9, *c),
                    ],
                )
            })
            .collect();
        let ranked = detector().detect(&fixtures);
        assert_eq!(ranked.len(), 5);
        let confidences: Vec<i64> = ranked.iter().map(|c| c.combined_confidence).collect();
        assert_eq!(confidences, vec![95, 90, 88, 85, 80]);

        let tied = detector().detect(&[
            fixture(20, "Serie A", &[(Market::Btts, 0.9, 80.0), (Market::Over25Goals, 0.9, 80.0), (Market::Over35Cards, 0.9, 80.0)]),
            fixture(10, "Serie A", &[(Market::Btts, 0.9, 80.0), (Market::Over25Goals, 0.9, 80.0), (Market::Over35Cards, 0.9, 80.0)]),
        ]);
        assert_eq!(tied[0].fixture_id, 10);
        assert_eq!(tied[1].fixture_id, 20);
    }

    #[test]
    fn rerun_output_is_byte_identical() {
        let dir = std::env::temp_dir().join(format!("footy_bb_{}", uuid::Uuid::new_v4()));
        let input = dir.join("predictions.json");
        let generated_at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
        let predictions = PredictionsFile {
            generated_at,
            fixtures: vec![
                fixture(7, "Premier League", &[(Market::Btts, 0.85, 85.0), (Market::Over25Goals, 0.8, 80.0), (Market::Over35Cards, 0.78, 78.0)]),
                fixture(8, "Europa League", &[(Market::Btts, 0.9, 90.0)]),
            ],
        };
        write_json_atomic(&input, &predictions).unwrap();

        let first = dir.join("a.json");
        let second = dir.join("b.json");
        let d = detector();
        let out = d.run(&input, &first, generated_at).unwrap();
        d.run(&input, &second, generated_at).unwrap();

        assert_eq!(out.total_fixtures_analyzed, 2);
        assert_eq!(out.bet_builders_found, 1);
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&first).unwrap()).unwrap();
        assert_eq!(json["bet_builders"][0]["estimated_combined_odds"], serde_json::json!(6.48));
        assert_eq!(json["bet_builders"][0]["high_confidence_markets"][0]["estimated_odds"], serde_json::json!(1.75));
        assert_eq!(json["date"], "2024-03-09");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_predictions_file_is_missing_input() {
        let dir = std::env::temp_dir().join(format!("footy_bb_{}", uuid::Uuid::new_v4()));
        let err = detector()
            .run(&dir.join("predictions.json"), &dir.join("out.json"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[test]
    fn unpriced_market_is_rejected() {
        let mut config = BetBuilderConfig::default();
        config.market_prices.remove("btts");
        assert!(ConvergenceDetector::new(config).is_err());
    }
}
