//! Core types used throughout Footy LM
//!
//! Markets, team roles and the immutable per-match fixture record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single wager type with a binary outcome.
///
/// The label column of every market in the dataset files is `Market::label()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "btts")]
    Btts,
    #[serde(rename = "over_2_5_goals")]
    Over25Goals,
    #[serde(rename = "over_9_5_corners")]
    Over95Corners,
    #[serde(rename = "over_3_5_cards")]
    Over35Cards,
    // Experimental markets, trained separately
    #[serde(rename = "has_red_card")]
    HasRedCard,
    #[serde(rename = "any_player_booked")]
    AnyPlayerBooked,
    #[serde(rename = "over_3_5_bookings")]
    Over35Bookings,
    #[serde(rename = "home_win_by_2_plus")]
    HomeWinBy2Plus,
    #[serde(rename = "away_win_by_2_plus")]
    AwayWinBy2Plus,
    #[serde(rename = "any_team_win_by_2_plus")]
    AnyTeamWinBy2Plus,
    #[serde(rename = "ht_ft_home_home")]
    HtFtHomeHome,
    #[serde(rename = "ht_ft_home_draw")]
    HtFtHomeDraw,
    #[serde(rename = "ht_ft_home_away")]
    HtFtHomeAway,
    #[serde(rename = "ht_ft_draw_home")]
    HtFtDrawHome,
    #[serde(rename = "ht_ft_draw_draw")]
    HtFtDrawDraw,
    #[serde(rename = "ht_ft_draw_away")]
    HtFtDrawAway,
    #[serde(rename = "ht_ft_away_home")]
    HtFtAwayHome,
    #[serde(rename = "ht_ft_away_draw")]
    HtFtAwayDraw,
    #[serde(rename = "ht_ft_away_away")]
    HtFtAwayAway,
}

impl Market {
    /// The four markets served to users
    pub const PRODUCTION: [Market; 4] = [
        Market::Btts,
        Market::Over25Goals,
        Market::Over95Corners,
        Market::Over35Cards,
    ];

    pub const EXPERIMENTAL: [Market; 15] = [
        Market::HasRedCard,
        Market::AnyPlayerBooked,
        Market::Over35Bookings,
        Market::HomeWinBy2Plus,
        Market::AwayWinBy2Plus,
        Market::AnyTeamWinBy2Plus,
        Market::HtFtHomeHome,
        Market::HtFtHomeDraw,
        Market::HtFtHomeAway,
        Market::HtFtDrawHome,
        Market::HtFtDrawDraw,
        Market::HtFtDrawAway,
        Market::HtFtAwayHome,
        Market::HtFtAwayDraw,
        Market::HtFtAwayAway,
    ];

    /// Every market, production first
    pub fn all() -> impl Iterator<Item = Market> {
        Self::PRODUCTION
            .into_iter()
            .chain(Self::EXPERIMENTAL.into_iter())
    }

    /// Label column name in dataset files
    pub fn label(&self) -> &'static str {
        match self {
            Market::Btts => "btts",
            Market::Over25Goals => "over_2_5_goals",
            Market::Over95Corners => "over_9_5_corners",
            Market::Over35Cards => "over_3_5_cards",
            Market::HasRedCard => "has_red_card",
            Market::AnyPlayerBooked => "any_player_booked",
            Market::Over35Bookings => "over_3_5_bookings",
            Market::HomeWinBy2Plus => "home_win_by_2_plus",
            Market::AwayWinBy2Plus => "away_win_by_2_plus",
            Market::AnyTeamWinBy2Plus => "any_team_win_by_2_plus",
            Market::HtFtHomeHome => "ht_ft_home_home",
            Market::HtFtHomeDraw => "ht_ft_home_draw",
            Market::HtFtHomeAway => "ht_ft_home_away",
            Market::HtFtDrawHome => "ht_ft_draw_home",
            Market::HtFtDrawDraw => "ht_ft_draw_draw",
            Market::HtFtDrawAway => "ht_ft_draw_away",
            Market::HtFtAwayHome => "ht_ft_away_home",
            Market::HtFtAwayDraw => "ht_ft_away_draw",
            Market::HtFtAwayAway => "ht_ft_away_away",
        }
    }

    /// Human readable name for summaries and the bet builder output
    pub fn display_name(&self) -> &'static str {
        match self {
            Market::Btts => "Both Teams To Score",
            Market::Over25Goals => "Over 2.5 Goals",
            Market::Over95Corners => "Over 9.5 Corners",
            Market::Over35Cards => "Over 3.5 Cards",
            Market::HasRedCard => "Red Card In Game",
            Market::AnyPlayerBooked => "Any Player Booked",
            Market::Over35Bookings => "Over 3.5 Bookings",
            Market::HomeWinBy2Plus => "Home Win By 2+",
            Market::AwayWinBy2Plus => "Away Win By 2+",
            Market::AnyTeamWinBy2Plus => "Any Team Win By 2+",
            Market::HtFtHomeHome => "HT/FT Home/Home",
            Market::HtFtHomeDraw => "HT/FT Home/Draw",
            Market::HtFtHomeAway => "HT/FT Home/Away",
            Market::HtFtDrawHome => "HT/FT Draw/Home",
            Market::HtFtDrawDraw => "HT/FT Draw/Draw",
            Market::HtFtDrawAway => "HT/FT Draw/Away",
            Market::HtFtAwayHome => "HT/FT Away/Home",
            Market::HtFtAwayDraw => "HT/FT Away/Draw",
            Market::HtFtAwayAway => "HT/FT Away/Away",
        }
    }

    /// Selection label of the positive outcome
    pub fn selection(&self) -> &'static str {
        match self {
            Market::Btts
            | Market::HasRedCard
            | Market::AnyPlayerBooked
            | Market::HomeWinBy2Plus
            | Market::AwayWinBy2Plus
            | Market::AnyTeamWinBy2Plus => "Yes",
            Market::Over25Goals
            | Market::Over95Corners
            | Market::Over35Cards
            | Market::Over35Bookings => "Over",
            _ => "Yes",
        }
    }

    /// Key of the positive-outcome probability in prediction payloads
    pub fn probability_key(&self) -> &'static str {
        match self.selection() {
            "Over" => "over_probability",
            _ => "yes_probability",
        }
    }

    pub fn is_experimental(&self) -> bool {
        !Self::PRODUCTION.contains(self)
    }

    /// Parse from a label column name
    pub fn from_label(s: &str) -> Option<Self> {
        Self::all().find(|m| m.label() == s)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Side of the pitch a team played on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Home,
    Away,
}

impl Role {
    pub const BOTH: [Role; 2] = [Role::Home, Role::Away];

    /// Column prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            Role::Home => "home",
            Role::Away => "away",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Per-team statistic block of a finished match
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TeamStats {
    pub corners: u32,
    pub yellow_cards: u32,
    pub red_cards: u32,
    /// Total shots attempted
    pub total_shots: u32,
    /// "Shots on Goal" in the source feed
    pub shots_on_goal: u32,
    /// Ball possession, percent
    pub possession: f64,
}

impl TeamStats {
    pub fn cards(&self) -> u32 {
        self.yellow_cards + self.red_cards
    }
}

/// Team identity inside a fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: i64,
    pub name: String,
}

/// Immutable per-match facts of a finished fixture.
///
/// Built once by the label deriver from a raw source record; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub fixture_id: i64,
    pub kickoff: DateTime<Utc>,
    pub league_id: i64,
    pub league: String,
    pub season: i32,
    pub home: TeamRef,
    pub away: TeamRef,
    pub home_goals: u32,
    pub away_goals: u32,
    pub ht_home_goals: Option<u32>,
    pub ht_away_goals: Option<u32>,
    pub home_stats: TeamStats,
    pub away_stats: TeamStats,
}

impl FixtureRecord {
    pub fn total_goals(&self) -> u32 {
        self.home_goals + self.away_goals
    }

    pub fn total_corners(&self) -> u32 {
        self.home_stats.corners + self.away_stats.corners
    }

    pub fn total_cards(&self) -> u32 {
        self.home_stats.cards() + self.away_stats.cards()
    }

    pub fn goal_difference(&self) -> i64 {
        self.home_goals as i64 - self.away_goals as i64
    }
}

/// One market's entry in a prediction payload.
///
/// Only one of the two probability keys is present, matching
/// `Market::probability_key()`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketPrediction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yes_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_probability: Option<f64>,
    /// Certainty of the predicted class, percent
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
}

impl MarketPrediction {
    /// Probability of the positive outcome; absent reads as 0
    pub fn probability(&self, market: Market) -> f64 {
        let value = match market.probability_key() {
            "over_probability" => self.over_probability,
            _ => self.yes_probability,
        };
        value.unwrap_or(0.0)
    }
}

/// Scored upcoming fixture as written to `predictions.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixturePrediction {
    pub fixture_id: i64,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub league: String,
    pub kickoff: DateTime<Utc>,
    /// Keyed by market label
    #[serde(default)]
    pub predictions: BTreeMap<String, MarketPrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionsFile {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub fixtures: Vec<FixturePrediction>,
}

/// One market's prediction for one fixture, with its assumed price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    pub market: Market,
    pub market_name: String,
    pub selection: String,
    pub probability: f64,
    pub confidence: f64,
    #[serde(rename = "estimated_odds", with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Confidence in percent of the class a probability predicts
pub fn confidence_of(probability: f64) -> f64 {
    probability.max(1.0 - probability) * 100.0
}

impl MarketSignal {
    pub fn new(market: Market, probability: f64, confidence: f64, price: Decimal) -> Self {
        Self {
            market,
            market_name: market.display_name().to_string(),
            selection: market.selection().to_string(),
            probability,
            confidence,
            price,
        }
    }
}
