//! Feature/label deriver
//!
//! Converts raw source records into typed [`FixtureRecord`]s and computes the
//! binary outcome flags of every market. All flags are pure functions of the
//! record, so recomputing them is always safe.

use crate::error::DeriveError;
use crate::ml_engine::data_client::{RawFixture, RawTeamStatistics};
use crate::types::{FixtureRecord, Market, TeamRef, TeamStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistic type names in the API-Football feed
pub mod stat_names {
    pub const CORNERS: &str = "Corner Kicks";
    pub const YELLOW_CARDS: &str = "Yellow Cards";
    pub const RED_CARDS: &str = "Red Cards";
    pub const TOTAL_SHOTS: &str = "Total Shots";
    pub const SHOTS_ON_GOAL: &str = "Shots on Goal";
    pub const POSSESSION: &str = "Ball Possession";
}

/// Labels of the four production markets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedLabels {
    pub btts: bool,
    pub over_2_5_goals: bool,
    pub over_9_5_corners: bool,
    pub over_3_5_cards: bool,
}

impl DerivedLabels {
    pub fn from_record(record: &FixtureRecord) -> Self {
        Self {
            btts: record.home_goals > 0 && record.away_goals > 0,
            over_2_5_goals: record.total_goals() > 2,
            over_9_5_corners: record.total_corners() > 9,
            over_3_5_cards: record.total_cards() > 3,
        }
    }
}

/// Halftime/fulltime result of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    fn of(home: u32, away: u32) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => Outcome::Home,
            std::cmp::Ordering::Equal => Outcome::Draw,
            std::cmp::Ordering::Less => Outcome::Away,
        }
    }
}

/// Labels of the experimental markets.
///
/// `ht_ft` is `None` when halftime goals were not reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentalLabels {
    pub has_red_card: bool,
    pub any_player_booked: bool,
    pub over_3_5_bookings: bool,
    pub home_win_by_2_plus: bool,
    pub away_win_by_2_plus: bool,
    pub any_team_win_by_2_plus: bool,
    /// Index `ht * 3 + ft` with Home=0, Draw=1, Away=2
    pub ht_ft: Option<u8>,
}

impl ExperimentalLabels {
    pub fn from_record(record: &FixtureRecord) -> Self {
        let diff = record.goal_difference();
        let bookings = record.home_stats.yellow_cards + record.away_stats.yellow_cards;

        let ht_ft = match (record.ht_home_goals, record.ht_away_goals) {
            (Some(h), Some(a)) => {
                let ht = Outcome::of(h, a) as u8;
                let ft = Outcome::of(record.home_goals, record.away_goals) as u8;
                Some(ht * 3 + ft)
            }
            _ => None,
        };

        Self {
            has_red_card: record.home_stats.red_cards > 0 || record.away_stats.red_cards > 0,
            any_player_booked: record.home_stats.yellow_cards > 0
                || record.away_stats.yellow_cards > 0,
            over_3_5_bookings: bookings > 3,
            home_win_by_2_plus: diff >= 2,
            away_win_by_2_plus: diff <= -2,
            any_team_win_by_2_plus: diff.abs() >= 2,
            ht_ft,
        }
    }
}

/// Flag of any market for a record; `None` when it cannot be known
pub fn label_for(record: &FixtureRecord, market: Market) -> Option<bool> {
    let labels = DerivedLabels::from_record(record);
    let experimental = ExperimentalLabels::from_record(record);

    let ht_ft = |index: u8| experimental.ht_ft.map(|v| v == index);

    match market {
        Market::Btts => Some(labels.btts),
        Market::Over25Goals => Some(labels.over_2_5_goals),
        Market::Over95Corners => Some(labels.over_9_5_corners),
        Market::Over35Cards => Some(labels.over_3_5_cards),
        Market::HasRedCard => Some(experimental.has_red_card),
        Market::AnyPlayerBooked => Some(experimental.any_player_booked),
        Market::Over35Bookings => Some(experimental.over_3_5_bookings),
        Market::HomeWinBy2Plus => Some(experimental.home_win_by_2_plus),
        Market::AwayWinBy2Plus => Some(experimental.away_win_by_2_plus),
        Market::AnyTeamWinBy2Plus => Some(experimental.any_team_win_by_2_plus),
        Market::HtFtHomeHome => ht_ft(0),
        Market::HtFtHomeDraw => ht_ft(1),
        Market::HtFtHomeAway => ht_ft(2),
        Market::HtFtDrawHome => ht_ft(3),
        Market::HtFtDrawDraw => ht_ft(4),
        Market::HtFtDrawAway => ht_ft(5),
        Market::HtFtAwayHome => ht_ft(6),
        Market::HtFtAwayDraw => ht_ft(7),
        Market::HtFtAwayAway => ht_ft(8),
    }
}

fn parse_kickoff(fixture_id: i64, raw: &str) -> Result<DateTime<Utc>, DeriveError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DeriveError::InvalidKickoff {
            fixture_id,
            raw: raw.to_string(),
        })
}

fn team_stats(block: &RawTeamStatistics) -> TeamStats {
    TeamStats {
        corners: block.count(stat_names::CORNERS),
        yellow_cards: block.count(stat_names::YELLOW_CARDS),
        red_cards: block.count(stat_names::RED_CARDS),
        total_shots: block.count(stat_names::TOTAL_SHOTS),
        shots_on_goal: block.count(stat_names::SHOTS_ON_GOAL),
        possession: block.percent(stat_names::POSSESSION),
    }
}

/// Build the immutable record of a finished fixture.
///
/// Statistic blocks are matched to sides by team id, falling back to feed
/// order (home first). The two sides never share a block.
pub fn derive_record(
    raw: &RawFixture,
    statistics: &[RawTeamStatistics],
) -> Result<FixtureRecord, DeriveError> {
    let fixture_id = raw.fixture.id;

    if statistics.len() < 2 {
        return Err(DeriveError::IncompleteStatistics {
            fixture_id,
            blocks: statistics.len(),
        });
    }

    let kickoff = parse_kickoff(fixture_id, &raw.fixture.date)?;
    let home_goals = raw.goals.home.ok_or(DeriveError::MissingField {
        fixture_id,
        field: "goals.home",
    })?;
    let away_goals = raw.goals.away.ok_or(DeriveError::MissingField {
        fixture_id,
        field: "goals.away",
    })?;

    // an unmatched side takes the first block the other side did not claim
    let position = |team_id: i64| statistics.iter().position(|b| b.team.id == team_id);
    let home_match = position(raw.teams.home.id);
    let away_match = position(raw.teams.away.id).filter(|i| Some(*i) != home_match);
    let unclaimed = |taken: Option<usize>| (0..statistics.len()).find(|i| Some(*i) != taken);
    let incomplete = || DeriveError::IncompleteStatistics {
        fixture_id,
        blocks: statistics.len(),
    };
    let home_idx = home_match
        .or_else(|| unclaimed(away_match))
        .ok_or_else(incomplete)?;
    let away_idx = away_match
        .or_else(|| unclaimed(Some(home_idx)))
        .ok_or_else(incomplete)?;
    let home_block = &statistics[home_idx];
    let away_block = &statistics[away_idx];

    Ok(FixtureRecord {
        fixture_id,
        kickoff,
        league_id: raw.league.id,
        league: raw.league.name.clone(),
        season: raw.league.season,
        home: TeamRef {
            id: raw.teams.home.id,
            name: raw.teams.home.name.clone(),
        },
        away: TeamRef {
            id: raw.teams.away.id,
            name: raw.teams.away.name.clone(),
        },
        home_goals,
        away_goals,
        ht_home_goals: raw.score.halftime.home,
        ht_away_goals: raw.score.halftime.away,
        home_stats: team_stats(home_block),
        away_stats: team_stats(away_block),
    })
}

/// A scheduled fixture awaiting predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingFixture {
    pub fixture_id: i64,
    pub kickoff: DateTime<Utc>,
    pub league_id: i64,
    pub league: String,
    pub home: TeamRef,
    pub away: TeamRef,
}

pub fn derive_upcoming(raw: &RawFixture) -> Result<UpcomingFixture, DeriveError> {
    Ok(UpcomingFixture {
        fixture_id: raw.fixture.id,
        kickoff: parse_kickoff(raw.fixture.id, &raw.fixture.date)?,
        league_id: raw.league.id,
        league: raw.league.name.clone(),
        home: TeamRef {
            id: raw.teams.home.id,
            name: raw.teams.home.name.clone(),
        },
        away: TeamRef {
            id: raw.teams.away.id,
            name: raw.teams.away.name.clone(),
        },
    })
}
