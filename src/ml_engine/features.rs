//! Rolling Feature Engine
//!
//! Per team-role trailing-window means over a time-ordered fixture stream,
//! plus derived match-level features and league-wide trailing averages.
//!
//! A match's features only ever see matches with a strictly earlier kickoff:
//! rows are processed in kickoff groups, every row of a group is featurised
//! before any of them is ingested into the history.

use crate::config::{ColdStart, FeatureSettings};
use crate::ml_engine::dataset::{DatasetRow, FixtureRow, TrainingTable};
use crate::ml_engine::labeling::UpcomingFixture;
use crate::types::{FixtureRecord, Role};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Feature name -> value, built only from rolling engine outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Values in the given order; `Err` names the first missing feature
    pub fn to_ordered(&self, names: &[String]) -> Result<Vec<f64>, String> {
        names
            .iter()
            .map(|n| self.get(n).ok_or_else(|| n.clone()))
            .collect()
    }
}

const N_STATS: usize = 6;

/// Per-team statistics tracked in the rolling windows
const STAT_NAMES: [&str; N_STATS] = [
    "goals_scored",
    "goals_conceded",
    "corners",
    "cards",
    "shots_on_goal",
    "total_shots",
];

const GOALS_SCORED: usize = 0;
const GOALS_CONCEDED: usize = 1;
const CORNERS: usize = 2;
const CARDS: usize = 3;
const SHOTS_ON_GOAL: usize = 4;
const TOTAL_SHOTS: usize = 5;

type Observation = [f64; N_STATS];

fn observation(record: &FixtureRecord, role: Role) -> Observation {
    let (stats, scored, conceded) = match role {
        Role::Home => (&record.home_stats, record.home_goals, record.away_goals),
        Role::Away => (&record.away_stats, record.away_goals, record.home_goals),
    };
    [
        scored as f64,
        conceded as f64,
        stats.corners as f64,
        stats.cards() as f64,
        stats.shots_on_goal as f64,
        stats.total_shots as f64,
    ]
}

fn mean_of<'a>(items: impl Iterator<Item = &'a Observation>) -> Option<Observation> {
    let mut sum = [0.0; N_STATS];
    let mut n = 0usize;
    for obs in items {
        for (acc, v) in sum.iter_mut().zip(obs.iter()) {
            *acc += v;
        }
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some(sum.map(|s| s / n as f64))
}

#[derive(Debug, Clone)]
struct LeagueMatch {
    home: Observation,
    away: Observation,
}

/// Stateful rolling-window engine
#[derive(Debug, Clone)]
pub struct RollingFeatureEngine {
    settings: FeatureSettings,
    team_history: HashMap<(i64, Role), VecDeque<Observation>>,
    league_history: HashMap<i64, VecDeque<LeagueMatch>>,
}

impl RollingFeatureEngine {
    pub fn new(settings: FeatureSettings) -> Self {
        Self {
            settings,
            team_history: HashMap::new(),
            league_history: HashMap::new(),
        }
    }

    /// Ordered names of every feature this engine emits
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for role in Role::BOTH {
            for stat in STAT_NAMES {
                names.push(format!("{}_{}_l{}", role.prefix(), stat, self.settings.window));
            }
            names.push(format!("{}_history_len", role.prefix()));
        }
        names.extend(
            [
                "form_goal_difference",
                "expected_total_goals",
                "shots_on_target_ratio",
                "expected_total_corners",
                "expected_total_cards",
                "league_avg_goals",
                "league_avg_corners",
                "league_avg_cards",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        names
    }

    /// Featurise a merged set of rows into a training table.
    ///
    /// Rows are sorted stably by kickoff; the engine starts from empty history.
    pub fn build_table(settings: FeatureSettings, rows: Vec<FixtureRow>) -> Result<TrainingTable> {
        let mut engine = Self::new(settings);
        let mut pairs = rows
            .into_iter()
            .map(|row| row.to_fixture_record().map(|record| (row, record)))
            .collect::<Result<Vec<_>>>()?;
        pairs.sort_by_key(|(_, record)| record.kickoff);

        let mut out = Vec::with_capacity(pairs.len());
        let mut start = 0;
        while start < pairs.len() {
            let kickoff = pairs[start].1.kickoff;
            let end = pairs[start..]
                .iter()
                .position(|(_, r)| r.kickoff != kickoff)
                .map(|offset| start + offset)
                .unwrap_or(pairs.len());

            let group = &pairs[start..end];
            let features: Vec<FeatureVector> = group
                .iter()
                .map(|(_, record)| engine.features_for_record(record))
                .collect();
            for (_, record) in group {
                engine.ingest(record);
            }

            out.extend(
                group
                    .iter()
                    .zip(features)
                    .map(|((row, record), features)| DatasetRow {
                        row: row.clone(),
                        kickoff: record.kickoff,
                        features,
                    }),
            );
            start = end;
        }

        debug!(rows = out.len(), teams = engine.team_history.len(), "rolling features built");

        Ok(TrainingTable {
            feature_names: engine.feature_names(),
            rows: out,
        })
    }

    /// Add a finished match to the history
    pub fn ingest(&mut self, record: &FixtureRecord) {
        let window = self.settings.window;
        for (role, team) in [(Role::Home, record.home.id), (Role::Away, record.away.id)] {
            let history = self.team_history.entry((team, role)).or_default();
            history.push_back(observation(record, role));
            while history.len() > window {
                history.pop_front();
            }
        }

        let league_window = self.settings.league_window;
        let league = self.league_history.entry(record.league_id).or_default();
        league.push_back(LeagueMatch {
            home: observation(record, Role::Home),
            away: observation(record, Role::Away),
        });
        while league.len() > league_window {
            league.pop_front();
        }
    }

    /// Features of a finished match from the history ingested so far
    pub fn features_for_record(&self, record: &FixtureRecord) -> FeatureVector {
        self.compute(
            record.league_id,
            record.home.id,
            record.away.id,
            Some(record),
        )
    }

    /// Features of a scheduled fixture; cold starts use the league prior
    pub fn features_for_upcoming(&self, fixture: &UpcomingFixture) -> FeatureVector {
        self.compute(fixture.league_id, fixture.home.id, fixture.away.id, None)
    }

    fn league_prior(&self, league_id: i64, role: Role) -> Option<Observation> {
        let league = self.league_history.get(&league_id)?;
        mean_of(league.iter().map(|m| match role {
            Role::Home => &m.home,
            Role::Away => &m.away,
        }))
    }

    fn compute(
        &self,
        league_id: i64,
        home_id: i64,
        away_id: i64,
        own: Option<&FixtureRecord>,
    ) -> FeatureVector {
        let mut fv = FeatureVector::default();
        let window = self.settings.window;

        let mut rolling = [[0.0; N_STATS]; 2];
        for (slot, (role, team)) in [(Role::Home, home_id), (Role::Away, away_id)]
            .into_iter()
            .enumerate()
        {
            let history = self.team_history.get(&(team, role));
            let len = history.map(|h| h.len()).unwrap_or(0);

            let means = history
                .and_then(|h| mean_of(h.iter()))
                .unwrap_or_else(|| match (self.settings.cold_start, own) {
                    (ColdStart::OwnValue, Some(record)) => observation(record, role),
                    _ => self.league_prior(league_id, role).unwrap_or([0.0; N_STATS]),
                });

            for (stat, value) in STAT_NAMES.iter().zip(means.iter()) {
                fv.insert(format!("{}_{}_l{}", role.prefix(), stat, window), *value);
            }
            fv.insert(format!("{}_history_len", role.prefix()), len as f64);
            rolling[slot] = means;
        }

        let [home, away] = rolling;
        fv.insert(
            "form_goal_difference",
            (home[GOALS_SCORED] - home[GOALS_CONCEDED]) - (away[GOALS_SCORED] - away[GOALS_CONCEDED]),
        );
        fv.insert(
            "expected_total_goals",
            (home[GOALS_SCORED] + away[GOALS_CONCEDED]) / 2.0
                + (away[GOALS_SCORED] + home[GOALS_CONCEDED]) / 2.0,
        );
        fv.insert(
            "shots_on_target_ratio",
            (home[SHOTS_ON_GOAL] + away[SHOTS_ON_GOAL])
                / (home[TOTAL_SHOTS] + away[TOTAL_SHOTS] + 1.0),
        );
        fv.insert("expected_total_corners", home[CORNERS] + away[CORNERS]);
        fv.insert("expected_total_cards", home[CARDS] + away[CARDS]);

        let league_totals = self
            .league_history
            .get(&league_id)
            .filter(|l| !l.is_empty())
            .map(|l| {
                let n = l.len() as f64;
                let total = |stat: usize| l.iter().map(|m| m.home[stat] + m.away[stat]).sum::<f64>() / n;
                [total(GOALS_SCORED), total(CORNERS), total(CARDS)]
            })
            .unwrap_or([0.0; 3]);
        fv.insert("league_avg_goals", league_totals[0]);
        fv.insert("league_avg_corners", league_totals[1]);
        fv.insert("league_avg_cards", league_totals[2]);

        fv
    }
}
