//! Dataset - flat fixture rows, training tables and their CSV storage
//!
//! Per-year files carry the fixed column contract of [`FixtureRow::COLUMNS`]
//! followed by the experimental label columns. Processed tables append the
//! rolling feature columns. Readers probe for optional columns instead of
//! assuming them.

use crate::error::PipelineError;
use crate::ml_engine::features::FeatureVector;
use crate::ml_engine::labeling::{label_for, DerivedLabels};
use crate::ml_engine::persistence::write_atomic;
use crate::types::{FixtureRecord, Market, TeamRef, TeamStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One processed fixture as stored in per-year dataset files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRow {
    pub fixture_id: i64,
    /// RFC3339 kickoff
    pub date: String,
    pub league: String,
    pub league_id: i64,
    pub season: i32,
    pub home_team: String,
    pub home_team_id: i64,
    pub away_team: String,
    pub away_team_id: i64,
    pub home_goals: u32,
    pub away_goals: u32,
    pub total_goals: u32,
    pub btts: u8,
    pub over_2_5_goals: u8,
    pub over_9_5_corners: u8,
    pub over_3_5_cards: u8,
    pub home_corners: u32,
    pub away_corners: u32,
    pub total_corners: u32,
    pub home_yellow_cards: u32,
    pub away_yellow_cards: u32,
    pub home_red_cards: u32,
    pub away_red_cards: u32,
    pub total_cards: u32,
    /// Shots on goal
    pub home_shots: u32,
    pub away_shots: u32,
    pub home_total_shots: u32,
    pub away_total_shots: u32,
    pub home_possession: f64,
    pub away_possession: f64,
    #[serde(default)]
    pub ht_home_goals: Option<u32>,
    #[serde(default)]
    pub ht_away_goals: Option<u32>,
    /// Experimental label columns found in the file
    #[serde(skip)]
    pub experimental: BTreeMap<Market, u8>,
}

impl FixtureRow {
    /// Fixed column contract, in file order
    pub const COLUMNS: [&'static str; 32] = [
        "fixture_id",
        "date",
        "league",
        "league_id",
        "season",
        "home_team",
        "home_team_id",
        "away_team",
        "away_team_id",
        "home_goals",
        "away_goals",
        "total_goals",
        "btts",
        "over_2_5_goals",
        "over_9_5_corners",
        "over_3_5_cards",
        "home_corners",
        "away_corners",
        "total_corners",
        "home_yellow_cards",
        "away_yellow_cards",
        "home_red_cards",
        "away_red_cards",
        "total_cards",
        "home_shots",
        "away_shots",
        "home_total_shots",
        "away_total_shots",
        "home_possession",
        "away_possession",
        "ht_home_goals",
        "ht_away_goals",
    ];

    pub fn from_record(record: &FixtureRecord) -> Self {
        let labels = DerivedLabels::from_record(record);
        let experimental = Market::EXPERIMENTAL
            .iter()
            .filter_map(|m| label_for(record, *m).map(|v| (*m, v as u8)))
            .collect();

        Self {
            fixture_id: record.fixture_id,
            date: record.kickoff.to_rfc3339(),
            league: record.league.clone(),
            league_id: record.league_id,
            season: record.season,
            home_team: record.home.name.clone(),
            home_team_id: record.home.id,
            away_team: record.away.name.clone(),
            away_team_id: record.away.id,
            home_goals: record.home_goals,
            away_goals: record.away_goals,
            total_goals: record.total_goals(),
            btts: labels.btts as u8,
            over_2_5_goals: labels.over_2_5_goals as u8,
            over_9_5_corners: labels.over_9_5_corners as u8,
            over_3_5_cards: labels.over_3_5_cards as u8,
            home_corners: record.home_stats.corners,
            away_corners: record.away_stats.corners,
            total_corners: record.total_corners(),
            home_yellow_cards: record.home_stats.yellow_cards,
            away_yellow_cards: record.away_stats.yellow_cards,
            home_red_cards: record.home_stats.red_cards,
            away_red_cards: record.away_stats.red_cards,
            total_cards: record.total_cards(),
            home_shots: record.home_stats.shots_on_goal,
            away_shots: record.away_stats.shots_on_goal,
            home_total_shots: record.home_stats.total_shots,
            away_total_shots: record.away_stats.total_shots,
            home_possession: record.home_stats.possession,
            away_possession: record.away_stats.possession,
            ht_home_goals: record.ht_home_goals,
            ht_away_goals: record.ht_away_goals,
            experimental,
        }
    }

    /// Rebuild the typed record of this row
    pub fn to_fixture_record(&self) -> Result<FixtureRecord> {
        let kickoff = parse_date(&self.date)
            .with_context(|| format!("fixture {}: bad date {:?}", self.fixture_id, self.date))?;

        Ok(FixtureRecord {
            fixture_id: self.fixture_id,
            kickoff,
            league_id: self.league_id,
            league: self.league.clone(),
            season: self.season,
            home: TeamRef {
                id: self.home_team_id,
                name: self.home_team.clone(),
            },
            away: TeamRef {
                id: self.away_team_id,
                name: self.away_team.clone(),
            },
            home_goals: self.home_goals,
            away_goals: self.away_goals,
            ht_home_goals: self.ht_home_goals,
            ht_away_goals: self.ht_away_goals,
            home_stats: TeamStats {
                corners: self.home_corners,
                yellow_cards: self.home_yellow_cards,
                red_cards: self.home_red_cards,
                total_shots: self.home_total_shots,
                shots_on_goal: self.home_shots,
                possession: self.home_possession,
            },
            away_stats: TeamStats {
                corners: self.away_corners,
                yellow_cards: self.away_yellow_cards,
                red_cards: self.away_red_cards,
                total_shots: self.away_total_shots,
                shots_on_goal: self.away_shots,
                possession: self.away_possession,
            },
        })
    }

    /// Stored label of a market; experimental labels only when present
    pub fn label(&self, market: Market) -> Option<u8> {
        match market {
            Market::Btts => Some(self.btts),
            Market::Over25Goals => Some(self.over_2_5_goals),
            Market::Over95Corners => Some(self.over_9_5_corners),
            Market::Over35Cards => Some(self.over_3_5_cards),
            other => self.experimental.get(&other).copied(),
        }
    }

    /// Header of a dataset file with the given feature columns
    pub fn header(feature_names: &[String]) -> Vec<String> {
        Self::COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(Market::EXPERIMENTAL.iter().map(|m| m.label().to_string()))
            .chain(feature_names.iter().cloned())
            .collect()
    }

    /// Values in [`FixtureRow::header`] order, without feature values
    pub fn to_record(&self) -> Vec<String> {
        let opt = |v: Option<u32>| v.map(|x| x.to_string()).unwrap_or_default();

        let mut out = vec![
            self.fixture_id.to_string(),
            self.date.clone(),
            self.league.clone(),
            self.league_id.to_string(),
            self.season.to_string(),
            self.home_team.clone(),
            self.home_team_id.to_string(),
            self.away_team.clone(),
            self.away_team_id.to_string(),
            self.home_goals.to_string(),
            self.away_goals.to_string(),
            self.total_goals.to_string(),
            self.btts.to_string(),
            self.over_2_5_goals.to_string(),
            self.over_9_5_corners.to_string(),
            self.over_3_5_cards.to_string(),
            self.home_corners.to_string(),
            self.away_corners.to_string(),
            self.total_corners.to_string(),
            self.home_yellow_cards.to_string(),
            self.away_yellow_cards.to_string(),
            self.home_red_cards.to_string(),
            self.away_red_cards.to_string(),
            self.total_cards.to_string(),
            self.home_shots.to_string(),
            self.away_shots.to_string(),
            self.home_total_shots.to_string(),
            self.away_total_shots.to_string(),
            self.home_possession.to_string(),
            self.away_possession.to_string(),
            opt(self.ht_home_goals),
            opt(self.ht_away_goals),
        ];

        for market in Market::EXPERIMENTAL {
            out.push(
                self.experimental
                    .get(&market)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        out
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// A fixture row with its parsed kickoff and rolling features
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub row: FixtureRow,
    pub kickoff: DateTime<Utc>,
    pub features: FeatureVector,
}

impl DatasetRow {
    pub fn label(&self, market: Market) -> Option<u8> {
        self.row.label(market)
    }
}

/// Merged rows plus the ordered list of feature columns they carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingTable {
    pub rows: Vec<DatasetRow>,
    pub feature_names: Vec<String>,
}

impl TrainingTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any row carries a label for `market`
    pub fn has_label(&self, market: Market) -> bool {
        self.rows.iter().any(|r| r.label(market).is_some())
    }

    /// Split by kickoff: the most recent `validation_ratio` share is validation
    pub fn chronological_split(&self, validation_ratio: f64) -> (TrainingTable, TrainingTable) {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|r| r.kickoff);

        let split_idx = (rows.len() as f64 * (1.0 - validation_ratio)) as usize;
        let val = rows.split_off(split_idx.min(rows.len()));

        (
            TrainingTable {
                rows,
                feature_names: self.feature_names.clone(),
            },
            TrainingTable {
                rows: val,
                feature_names: self.feature_names.clone(),
            },
        )
    }

    pub fn summary(&self) -> DatasetSummary {
        let leagues: BTreeSet<&str> = self.rows.iter().map(|r| r.row.league.as_str()).collect();
        let teams: BTreeSet<i64> = self
            .rows
            .iter()
            .flat_map(|r| [r.row.home_team_id, r.row.away_team_id])
            .collect();

        let mut positive_rates = BTreeMap::new();
        for market in Market::all() {
            let known: Vec<u8> = self.rows.iter().filter_map(|r| r.label(market)).collect();
            if !known.is_empty() {
                let positives = known.iter().filter(|v| **v == 1).count();
                positive_rates.insert(market, positives as f64 / known.len() as f64);
            }
        }

        DatasetSummary {
            rows: self.rows.len(),
            first_kickoff: self.rows.iter().map(|r| r.kickoff).min(),
            last_kickoff: self.rows.iter().map(|r| r.kickoff).max(),
            leagues: leagues.len(),
            teams: teams.len(),
            positive_rates,
        }
    }
}

/// Shape of a training table, logged after each merge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub first_kickoff: Option<DateTime<Utc>>,
    pub last_kickoff: Option<DateTime<Utc>>,
    pub leagues: usize,
    pub teams: usize,
    pub positive_rates: BTreeMap<Market, f64>,
}

impl DatasetSummary {
    pub fn log(&self) {
        info!(
            rows = self.rows,
            leagues = self.leagues,
            teams = self.teams,
            from = ?self.first_kickoff,
            to = ?self.last_kickoff,
            "📊 Dataset summary"
        );
        for (market, rate) in &self.positive_rates {
            info!(market = %market, positive_rate = format!("{:.1}%", rate * 100.0), "label balance");
        }
    }
}

/// CSV storage of per-year and processed datasets under one data directory
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub const TRAINING_DATA: &'static str = "training_data.csv";
    pub const TRAIN_SPLIT: &'static str = "train_split.csv";
    pub const VAL_SPLIT: &'static str = "val_split.csv";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn historical_dir(&self) -> PathBuf {
        self.root.join("historical")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn year_path(&self, year: i32) -> PathBuf {
        self.historical_dir().join(format!("fixtures_{}.csv", year))
    }

    pub fn processed_path(&self, name: &str) -> PathBuf {
        self.processed_dir().join(name)
    }

    /// Persist one year's rows, replacing any earlier file for that year
    pub fn write_year(&self, year: i32, rows: &[FixtureRow]) -> Result<PathBuf> {
        let path = self.year_path(year);
        let body = encode_rows(rows.iter().map(|r| (r, None)), &[])?;
        write_atomic(&path, &body)?;
        info!(year, rows = rows.len(), path = %path.display(), "💾 Year dataset saved");
        Ok(path)
    }

    /// Concatenate per-year files for `from..=to` (oldest first).
    ///
    /// Missing years are skipped with a warning; no file at all is fatal.
    /// Duplicate fixture ids across years are kept as they are.
    pub fn merge_years(&self, from: i32, to: i32) -> Result<Vec<FixtureRow>, PipelineError> {
        let mut merged = Vec::new();
        let mut files = 0usize;

        for year in from..=to {
            let path = self.year_path(year);
            if !path.exists() {
                warn!(year, path = %path.display(), "year dataset missing, skipped");
                continue;
            }
            let table = read_table(&path)?;
            files += 1;
            merged.extend(table.rows.into_iter().map(|r| r.row));
        }

        if files == 0 {
            return Err(PipelineError::MissingInput {
                path: self.historical_dir(),
            });
        }

        info!(from, to, files, rows = merged.len(), "🔗 Merged year datasets");
        Ok(merged)
    }

    /// Write the processed table and its chronological train/validation split
    pub fn write_processed(&self, table: &TrainingTable, validation_ratio: f64) -> Result<()> {
        let (train, val) = table.chronological_split(validation_ratio);
        write_table(&self.processed_path(Self::TRAINING_DATA), table)?;
        write_table(&self.processed_path(Self::TRAIN_SPLIT), &train)?;
        write_table(&self.processed_path(Self::VAL_SPLIT), &val)?;

        info!(
            total = table.len(),
            train = train.len(),
            validation = val.len(),
            features = table.feature_names.len(),
            "💾 Processed datasets saved"
        );
        Ok(())
    }

    /// Load a processed table, failing with `MissingInput` when absent
    pub fn load_processed(&self, name: &str) -> Result<TrainingTable, PipelineError> {
        let path = self.processed_path(name);
        if !path.exists() {
            return Err(PipelineError::MissingInput { path });
        }
        Ok(read_table(&path)?)
    }
}

fn encode_rows<'a>(
    rows: impl Iterator<Item = (&'a FixtureRow, Option<&'a FeatureVector>)>,
    feature_names: &[String],
) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer
        .write_record(FixtureRow::header(feature_names))
        .context("Failed to write dataset header")?;

    for (row, features) in rows {
        let mut record = row.to_record();
        if let Some(features) = features {
            record.extend(
                feature_names
                    .iter()
                    .map(|n| features.get(n).map(|v| v.to_string()).unwrap_or_default()),
            );
        }
        writer
            .write_record(&record)
            .context("Failed to write dataset row")?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush dataset writer: {}", e))
}

/// Write a table with its feature columns
pub fn write_table(path: &Path, table: &TrainingTable) -> Result<()> {
    let body = encode_rows(
        table.rows.iter().map(|r| (&r.row, Some(&r.features))),
        &table.feature_names,
    )?;
    write_atomic(path, &body)
}

/// Read any dataset file, probing for experimental and feature columns
pub fn read_table(path: &Path) -> Result<TrainingTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader.headers().context("Failed to read header")?.clone();

    let mut experimental_cols = Vec::new();
    let mut feature_cols = Vec::new();
    for (idx, name) in headers.iter().enumerate() {
        if FixtureRow::COLUMNS.contains(&name) {
            continue;
        }
        match Market::from_label(name) {
            Some(market) => experimental_cols.push((idx, market)),
            None => feature_cols.push((idx, name.to_string())),
        }
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read dataset row")?;
        rows.push(parse_row(&record, &headers, &experimental_cols, &feature_cols)?);
    }

    Ok(TrainingTable {
        rows,
        feature_names: feature_cols.into_iter().map(|(_, n)| n).collect(),
    })
}

fn parse_row(
    record: &StringRecord,
    headers: &StringRecord,
    experimental_cols: &[(usize, Market)],
    feature_cols: &[(usize, String)],
) -> Result<DatasetRow> {
    let mut row: FixtureRow = record
        .deserialize(Some(headers))
        .context("Failed to deserialize fixture row")?;

    for (idx, market) in experimental_cols {
        if let Some(value) = record.get(*idx).filter(|v| !v.is_empty()) {
            let flag: u8 = value
                .parse()
                .with_context(|| format!("bad {} value {:?}", market, value))?;
            row.experimental.insert(*market, flag);
        }
    }

    let mut features = FeatureVector::default();
    for (idx, name) in feature_cols {
        let value = record.get(*idx).unwrap_or_default();
        let parsed: f64 = value
            .parse()
            .with_context(|| format!("fixture {}: bad {} value {:?}", row.fixture_id, name, value))?;
        features.insert(name.clone(), parsed);
    }

    let kickoff = parse_date(&row.date)
        .with_context(|| format!("fixture {}: bad date {:?}", row.fixture_id, row.date))?;

    Ok(DatasetRow {
        row,
        kickoff,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_store() -> DatasetStore {
        let dir = std::env::temp_dir().join(format!("footy_dataset_{}", uuid::Uuid::new_v4()));
        DatasetStore::new(dir)
    }

    fn record(id: i64, day: u32, home_goals: u32, away_goals: u32) -> FixtureRecord {
        FixtureRecord {
            fixture_id: id,
            kickoff: Utc.with_ymd_and_hms(2018, 9, day, 15, 0, 0).unwrap(),
            league_id: 39,
            league: "Premier League".to_string(),
            season: 2018,
            home: TeamRef { id: 1, name: "Home, FC".to_string() },
            away: TeamRef { id: 2, name: "Away FC".to_string() },
            home_goals,
            away_goals,
            ht_home_goals: Some(0),
            ht_away_goals: None,
            home_stats: TeamStats {
                corners: 6,
                yellow_cards: 2,
                red_cards: 0,
                total_shots: 12,
                shots_on_goal: 5,
                possession: 55.0,
            },
            away_stats: TeamStats {
                corners: 4,
                yellow_cards: 1,
                red_cards: 1,
                total_shots: 8,
                shots_on_goal: 2,
                possession: 45.0,
            },
        }
    }

    #[test]
    fn header_and_record_have_equal_length() {
        let row = FixtureRow::from_record(&record(1, 1, 2, 1));
        assert_eq!(FixtureRow::header(&[]).len(), row.to_record().len());
    }

    #[test]
    fn year_file_round_trips_rows_and_probes_experimental_columns() {
        let store = temp_store();
        let rows: Vec<FixtureRow> = (1..=3)
            .map(|i| FixtureRow::from_record(&record(i, i as u32, 2, i as u32)))
            .collect();
        let path = store.write_year(2018, &rows).unwrap();

        let table = read_table(&path).unwrap();
        assert!(table.feature_names.is_empty());
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0].row, rows[0]);
        assert_eq!(table.rows[0].label(Market::HasRedCard), Some(1));
        // halftime away goals unknown, so HT/FT labels are absent
        assert_eq!(table.rows[0].label(Market::HtFtDrawHome), None);
        assert_eq!(table.rows[0].row.home_team, "Home, FC");

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn files_without_optional_columns_still_load() {
        let store = temp_store();
        std::fs::create_dir_all(store.historical_dir()).unwrap();
        let full = FixtureRow::header(&[]);
        let legacy: Vec<&str> = full[..30].iter().map(|s| s.as_str()).collect();
        let values = FixtureRow::from_record(&record(9, 3, 1, 1)).to_record();
        let body = format!("{}\n{}\n", legacy.join(","), values[..30].join(",").replace("Home, FC", "Home FC"));
        std::fs::write(store.year_path(2017), body).unwrap();

        let table = read_table(&store.year_path(2017)).unwrap();
        assert_eq!(table.rows[0].row.ht_home_goals, None);
        assert_eq!(table.rows[0].label(Market::HasRedCard), None);
        assert_eq!(table.rows[0].label(Market::Btts), Some(1));
        assert!(!table.has_label(Market::AnyPlayerBooked));

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn merge_concatenates_without_dedup_and_skips_missing_years() {
        let store = temp_store();
        let row = FixtureRow::from_record(&record(5, 1, 0, 0));
        store.write_year(2016, &[row.clone()]).unwrap();
        store.write_year(2018, &[row.clone(), row.clone()]).unwrap();

        let merged = store.merge_years(2016, 2018).unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(|r| r.fixture_id == 5));

        std::fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn merge_without_any_file_is_missing_input() {
        let store = temp_store();
        let err = store.merge_years(2010, 2012).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[test]
    fn chronological_split_holds_out_latest_rows() {
        let rows: Vec<DatasetRow> = (1..=10)
            .rev()
            .map(|i| {
                let rec = record(i, i as u32, 1, 0);
                DatasetRow {
                    kickoff: rec.kickoff,
                    row: FixtureRow::from_record(&rec),
                    features: FeatureVector::default(),
                }
            })
            .collect();
        let table = TrainingTable { rows, feature_names: vec![] };

        let (train, val) = table.chronological_split(0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        let last_train = train.rows.iter().map(|r| r.kickoff).max().unwrap();
        assert!(val.rows.iter().all(|r| r.kickoff > last_train));
    }

    #[test]
    fn processed_table_keeps_feature_columns() {
        let store = temp_store();
        let rec = record(1, 1, 3, 1);
        let mut features = FeatureVector::default();
        features.insert("home_goals_scored_l5", 1.5);
        features.insert("away_goals_scored_l5", 0.25);
        let table = TrainingTable {
            rows: vec![DatasetRow {
                kickoff: rec.kickoff,
                row: FixtureRow::from_record(&rec),
                features,
            }],
            feature_names: vec!["home_goals_scored_l5".into(), "away_goals_scored_l5".into()],
        };
        store.write_processed(&table, 0.0).unwrap();

        let loaded = store.load_processed(DatasetStore::TRAINING_DATA).unwrap();
        assert_eq!(loaded.feature_names, table.feature_names);
        assert_eq!(loaded.rows[0].features.get("away_goals_scored_l5"), Some(0.25));
        assert_eq!(loaded.rows[0].kickoff, rec.kickoff);

        std::fs::remove_dir_all(store.root()).ok();
    }
}
