//! API-Football data client
//!
//! Fetches finished fixtures per league-season, per-fixture team statistics
//! and the scheduled slate of a day. The pipeline only sees the
//! [`FixtureSource`] trait so tests can swap in canned data.

use crate::config::SourceConfig;
use crate::error::SourceError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Envelope of every API-Football response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub response: Vec<T>,
    /// `[]` when fine, an object of messages otherwise
    #[serde(default)]
    pub errors: serde_json::Value,
}

/// Fixture as returned by `/fixtures`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFixture {
    pub fixture: RawFixtureInfo,
    pub league: RawLeague,
    pub teams: RawTeams,
    #[serde(default)]
    pub goals: RawGoals,
    #[serde(default)]
    pub score: RawScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFixtureInfo {
    pub id: i64,
    /// RFC3339 kickoff, e.g. `2018-08-10T19:00:00+00:00`
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLeague {
    pub id: i64,
    pub name: String,
    pub season: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTeams {
    pub home: RawTeam,
    pub away: RawTeam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTeam {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawGoals {
    pub home: Option<u32>,
    pub away: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawScore {
    #[serde(default)]
    pub halftime: RawGoals,
}

/// One team's block from `/fixtures/statistics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTeamStatistics {
    pub team: RawTeam,
    #[serde(default)]
    pub statistics: Vec<RawStatistic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatistic {
    #[serde(rename = "type")]
    pub kind: String,
    /// Integer, `"55%"` style string, or null (meaning zero)
    pub value: serde_json::Value,
}

impl RawTeamStatistics {
    fn value_of(&self, kind: &str) -> Option<&serde_json::Value> {
        self.statistics
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| &s.value)
    }

    /// Counting statistic; absent or null reads as zero
    pub fn count(&self, kind: &str) -> u32 {
        match self.value_of(kind) {
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Percentage statistic such as `"55%"`; absent reads as zero
    pub fn percent(&self, kind: &str) -> f64 {
        match self.value_of(kind) {
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(serde_json::Value::String(s)) => {
                s.trim().trim_end_matches('%').parse().unwrap_or(0.0)
            }
            _ => 0.0,
        }
    }
}

/// Source of historical and scheduled fixtures
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FixtureSource: Send + Sync {
    /// Finished fixtures of one league-season
    async fn fetch_finished_fixtures(
        &self,
        league_id: i64,
        season: i32,
    ) -> Result<Vec<RawFixture>, SourceError>;

    /// Per-team statistic blocks of one fixture (normally two)
    async fn fetch_statistics(&self, fixture_id: i64)
        -> Result<Vec<RawTeamStatistics>, SourceError>;

    /// Every fixture scheduled on a calendar day
    async fn fetch_fixtures_on(&self, date: NaiveDate) -> Result<Vec<RawFixture>, SourceError>;
}

/// HTTP client for the API-Football v3 REST API
pub struct ApiFootballClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiFootballClient {
    pub fn new(config: &SourceConfig, api_key: String) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SourceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(endpoint, ?query, "GET");

        let response = self
            .client
            .get(&url)
            .header("x-rapidapi-key", &self.api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint, status = status.as_u16(), "API-Football request failed");
            return Err(SourceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let envelope: ApiEnvelope<T> =
            serde_json::from_str(&body).map_err(|e| SourceError::Decode {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if has_errors(&envelope.errors) {
            return Err(SourceError::Decode {
                endpoint: endpoint.to_string(),
                reason: format!("API reported errors: {}", envelope.errors),
            });
        }

        Ok(envelope.response)
    }
}

fn has_errors(errors: &serde_json::Value) -> bool {
    match errors {
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Null => false,
        _ => true,
    }
}

/// Bound a source call by `secs`; an elapsed call is a `SourceError::Timeout`
pub async fn with_timeout<T, F>(secs: u64, endpoint: &str, call: F) -> Result<T, SourceError>
where
    F: std::future::Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            endpoint: endpoint.to_string(),
            secs,
        }),
    }
}

#[async_trait]
impl FixtureSource for ApiFootballClient {
    async fn fetch_finished_fixtures(
        &self,
        league_id: i64,
        season: i32,
    ) -> Result<Vec<RawFixture>, SourceError> {
        self.get(
            "/fixtures",
            &[
                ("league", league_id.to_string()),
                ("season", season.to_string()),
                ("status", "FT".to_string()),
            ],
        )
        .await
    }

    async fn fetch_statistics(
        &self,
        fixture_id: i64,
    ) -> Result<Vec<RawTeamStatistics>, SourceError> {
        self.get("/fixtures/statistics", &[("fixture", fixture_id.to_string())])
            .await
    }

    async fn fetch_fixtures_on(&self, date: NaiveDate) -> Result<Vec<RawFixture>, SourceError> {
        self.get("/fixtures", &[("date", date.format("%Y-%m-%d").to_string())])
            .await
    }
}
