//! Configuration management for Footy LM
//!
//! Loads built-in defaults, then `config/default` and `config/local` files,
//! then `FOOTY__*` environment variables (after reading `.env`).

mod types;

pub use types::*;

use crate::types::Market;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// API-Football ids of the tracked leagues, most important first
pub const TOP_50_LEAGUES: [i64; 49] = [
    39, 140, 78, 135, 61, 94, 88, 144, 203, 235, 71, 128, 253, 262, 2, 3, 848, 45, 143, 81, 137,
    66, 48, 141, 79, 136, 62, 119, 103, 113, 207, 218, 345, 197, 179, 283, 307, 188, 271, 169,
    172, 318, 292, 266, 98, 106, 104, 120, 384,
];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub backfill: BackfillConfig,
    pub source: SourceConfig,
    pub features: FeatureSettings,
    pub training: TrainingConfig,
    pub bet_builder: BetBuilderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of checkpoint, per-year and processed datasets
    pub data_dir: String,
    pub models_dir: String,
    /// Evaluation histories
    pub logs_dir: String,
    /// Predictions, bet builders and analytics snapshots
    pub outputs_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            models_dir: "./models".to_string(),
            logs_dir: "./logs".to_string(),
            outputs_dir: "./outputs".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn models_path(&self) -> PathBuf {
        PathBuf::from(&self.models_dir)
    }

    pub fn logs_path(&self) -> PathBuf {
        PathBuf::from(&self.logs_dir)
    }

    pub fn outputs_path(&self) -> PathBuf {
        PathBuf::from(&self.outputs_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// First (most recent) season walked when no checkpoint exists
    pub start_year: i32,
    /// Backfill is complete once the checkpoint drops below this season
    pub floor_year: i32,
    pub leagues: Vec<i64>,
    /// Only the first `max_leagues` entries of `leagues` are collected
    pub max_leagues: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            start_year: 2018,
            floor_year: 2000,
            leagues: TOP_50_LEAGUES.to_vec(),
            max_leagues: 50,
        }
    }
}

impl BackfillConfig {
    pub fn active_leagues(&self) -> Vec<i64> {
        self.leagues.iter().take(self.max_leagues).copied().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Per-call timeout; exceeding it fails that item only
    pub request_timeout_secs: u64,
    /// Pause after each league-season fixture listing
    pub fixture_delay_ms: u64,
    /// Pause after each per-fixture statistics call
    pub stats_delay_ms: u64,
    /// Pause between leagues
    pub league_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://v3.football.api-sports.io".to_string(),
            api_key_env: "API_FOOTBALL_KEY".to_string(),
            request_timeout_secs: 30,
            fixture_delay_ms: 500,
            stats_delay_ms: 300,
            league_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSettings {
    /// Trailing matches per team-role
    pub window: usize,
    /// Trailing matches per league for league-wide averages
    pub league_window: usize,
    pub cold_start: ColdStart,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            window: 5,
            league_window: 100,
            cold_start: ColdStart::LeaguePrior,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Most recent share of rows (by kickoff) held out for validation
    pub validation_ratio: f64,
    /// Minimum rows with a known label before a market is fitted
    pub min_samples: usize,
    pub classifier: ClassifierKind,
    pub logistic: LogisticParams,
    pub forest: ForestParams,
    /// Also fit the experimental markets on `train --experimental`
    pub experimental_enabled: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_ratio: 0.2,
            min_samples: 50,
            classifier: ClassifierKind::Logistic,
            logistic: LogisticParams::default(),
            forest: ForestParams::default(),
            experimental_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetBuilderConfig {
    /// Minimum per-market confidence, percent
    pub confidence_threshold: f64,
    /// Minimum per-market positive-outcome probability
    pub probability_threshold: f64,
    pub min_markets: usize,
    pub max_daily: usize,
    /// Competitions eligible for bet builders
    pub allowed_leagues: Vec<String>,
    /// Markets checked, in output order
    pub markets: Vec<Market>,
    /// Assumed decimal price per market label
    pub market_prices: BTreeMap<String, f64>,
}

impl Default for BetBuilderConfig {
    fn default() -> Self {
        let market_prices = [
            (Market::Btts, 1.75),
            (Market::Over25Goals, 1.85),
            (Market::Over95Corners, 1.90),
            (Market::Over35Cards, 2.00),
        ]
        .into_iter()
        .map(|(m, p)| (m.label().to_string(), p))
        .collect();

        Self {
            confidence_threshold: 75.0,
            probability_threshold: 0.70,
            min_markets: 3,
            max_daily: 5,
            allowed_leagues: [
                "Premier League",
                "La Liga",
                "Bundesliga",
                "Serie A",
                "Ligue 1",
                "Champions League",
                "Europa League",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            markets: Market::PRODUCTION.to_vec(),
            market_prices,
        }
    }
}

impl BetBuilderConfig {
    pub fn price_of(&self, market: Market) -> Option<f64> {
        self.market_prices.get(market.label()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output
    pub json: bool,
    /// Default filter when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, files and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let defaults =
            Config::try_from(&AppConfig::default()).context("Failed to encode defaults")?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (FOOTY__BACKFILL__START_YEAR=2020)
            .add_source(
                Environment::with_prefix("FOOTY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("backfill.leagues")
                    .with_list_parse_key("bet_builder.allowed_leagues")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.backfill.floor_year > self.backfill.start_year {
            bail!(
                "backfill.floor_year ({}) is after backfill.start_year ({})",
                self.backfill.floor_year,
                self.backfill.start_year
            );
        }
        if !(0.0..1.0).contains(&self.training.validation_ratio) {
            bail!("training.validation_ratio must be in [0, 1)");
        }
        if self.features.window == 0 || self.features.league_window == 0 {
            bail!("feature windows must be at least 1");
        }
        for market in &self.bet_builder.markets {
            if self.bet_builder.price_of(*market).is_none() {
                bail!("bet_builder.market_prices has no price for {}", market);
            }
        }
        Ok(())
    }

    /// API key for the fixture source, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.source.api_key_env).ok()
    }

    /// Digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "start_year={} floor_year={} leagues={} window={} classifier={:?} val_ratio={:.2} bb=conf>={} prob>={} min_markets={}",
            self.backfill.start_year,
            self.backfill.floor_year,
            self.backfill.active_leagues().len(),
            self.features.window,
            self.training.classifier,
            self.training.validation_ratio,
            self.bet_builder.confidence_threshold,
            self.bet_builder.probability_threshold,
            self.bet_builder.min_markets
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backfill.start_year, 2018);
        assert_eq!(config.backfill.floor_year, 2000);
        assert_eq!(config.bet_builder.min_markets, 3);
        assert_eq!(config.bet_builder.price_of(Market::Over35Cards), Some(2.00));
    }

    #[test]
    fn active_leagues_respects_max() {
        let mut config = BackfillConfig::default();
        config.max_leagues = 3;
        assert_eq!(config.active_leagues(), vec![39, 140, 78]);
    }

    #[test]
    fn floor_after_start_is_rejected() {
        let mut config = AppConfig::default();
        config.backfill.floor_year = 2030;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_market_price_is_rejected() {
        let mut config = AppConfig::default();
        config.bet_builder.market_prices.remove("btts");
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_survive_config_round_trip() {
        let built = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();
        assert_eq!(config.features.cold_start, ColdStart::LeaguePrior);
        assert_eq!(config.bet_builder.markets, Market::PRODUCTION.to_vec());
        assert_eq!(config.backfill.leagues.len(), TOP_50_LEAGUES.len());
    }
}
