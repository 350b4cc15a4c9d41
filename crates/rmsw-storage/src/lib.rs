//! Persistence for the watcher: webhook event log, opportunity replica,
//! forecast overlays, risk columns and sync run history.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rmsw_core::risk::RiskSummaryRow;
use rmsw_core::{
    EventCounts, ForecastMetadata, Opportunity, ProcessedEvent, RiskAssessment, RiskLevel,
    SyncRun,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "rmsw-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database schema is missing ({0}); run `rmsw-cli migrate`")]
    MissingSchema(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // 42P01: undefined_table
            if db.code().as_deref() == Some("42P01") {
                return StorageError::MissingSchema(db.message().to_string());
            }
        }
        StorageError::Database(err)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Inclusive window on the opportunity start date; an open end means "from
/// `start` onwards".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn contains(&self, at: Option<DateTime<Utc>>) -> bool {
        let Some(at) = at else { return false };
        let day = at.date_naive();
        day >= self.start && self.end.is_none_or(|end| day <= end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOrdersOutcome {
    pub created: u64,
    pub updated: u64,
    pub total: u64,
}

/// Opportunity joined with its stored risk columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskedOpportunity {
    #[serde(flatten)]
    pub opportunity: Opportunity,
    #[serde(flatten)]
    pub risk: Option<RiskAssessment>,
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn ping(&self) -> StorageResult<()>;

    async fn record_event(&self, event: &ProcessedEvent) -> StorageResult<()>;
    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<ProcessedEvent>>;
    async fn event_counts(&self) -> StorageResult<EventCounts>;

    /// Insert if absent, else refresh remote fields. Risk columns are kept.
    async fn upsert_opportunity(&self, opportunity: &Opportunity) -> StorageResult<UpsertOutcome>;
    async fn opportunity(&self, id: i64) -> StorageResult<Option<Opportunity>>;
    /// Opportunities starting inside `window`, each with its forecast row,
    /// ordered by start date.
    async fn forecast_rows(
        &self,
        window: DateWindow,
    ) -> StorageResult<Vec<(Opportunity, Option<ForecastMetadata>)>>;

    async fn forecast(&self, opportunity_id: i64) -> StorageResult<Option<ForecastMetadata>>;
    /// Replace the forecast row, keeping the original `created_at`.
    async fn save_forecast(&self, forecast: &ForecastMetadata) -> StorageResult<ForecastMetadata>;
    async fn delete_forecast(&self, opportunity_id: i64) -> StorageResult<bool>;
    /// Force every order-status opportunity to commit with at least 90%.
    async fn commit_orders(&self, now: DateTime<Utc>) -> StorageResult<CommitOrdersOutcome>;

    /// Returns `false` when the opportunity is unknown.
    async fn save_risk_assessment(
        &self,
        opportunity_id: i64,
        assessment: &RiskAssessment,
    ) -> StorageResult<bool>;
    /// Rows for LOW, MEDIUM, HIGH, CRITICAL and unscored, in that order.
    async fn risk_summary(&self) -> StorageResult<Vec<RiskSummaryRow>>;
    async fn opportunities_by_risk_level(
        &self,
        level: Option<RiskLevel>,
        limit: usize,
    ) -> StorageResult<Vec<RiskedOpportunity>>;

    async fn start_sync_run(&self, run: &SyncRun) -> StorageResult<()>;
    async fn finish_sync_run(&self, run: &SyncRun) -> StorageResult<()>;
    async fn sync_history(&self, limit: usize) -> StorageResult<Vec<SyncRun>>;
    async fn last_completed_sync(&self) -> StorageResult<Option<SyncRun>>;

    async fn last_sync_run(&self) -> StorageResult<Option<SyncRun>> {
        Ok(self.sync_history(1).await?.into_iter().next())
    }
}

pub(crate) fn summary_rows(
    counts: impl IntoIterator<Item = (Option<RiskLevel>, u64, f64)>,
) -> Vec<RiskSummaryRow> {
    let mut rows: Vec<RiskSummaryRow> = RiskLevel::ALL
        .iter()
        .map(|&level| Some(level))
        .chain(std::iter::once(None))
        .map(|level| RiskSummaryRow {
            level,
            count: 0,
            total_value: 0.0,
        })
        .collect();
    for (level, count, total) in counts {
        if let Some(row) = rows.iter_mut().find(|r| r.level == level) {
            row.count += count;
            row.total_value += total;
        }
    }
    rows
}

/// Postgres when `DATABASE_URL` is set (migrations applied), otherwise an
/// in-memory store that forgets everything on restart.
pub async fn connect_from_env() -> anyhow::Result<Arc<dyn PipelineStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let store = PgStore::connect(&url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        _ => {
            warn!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_is_inclusive_and_open_ended() {
        let window = DateWindow {
            start: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            end: Some(NaiveDate::from_ymd_opt(2026, 5, 31).unwrap()),
        };
        let at = |d| Some(Utc.with_ymd_and_hms(2026, 5, d, 23, 0, 0).single().unwrap());
        assert!(window.contains(at(1)));
        assert!(window.contains(at(31)));
        assert!(!window.contains(None));

        let open = DateWindow { end: None, ..window };
        assert!(open.contains(Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().unwrap())));
        assert!(!open.contains(Some(Utc.with_ymd_and_hms(2026, 4, 30, 0, 0, 0).single().unwrap())));
    }

    #[test]
    fn summary_rows_fill_missing_levels() {
        let rows = summary_rows([(Some(RiskLevel::High), 2, 500.0), (None, 1, 10.0)]);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].level, Some(RiskLevel::Low));
        assert_eq!(rows[0].count, 0);
        assert_eq!(rows[2].count, 2);
        assert_eq!(rows[4].level, None);
        assert_eq!(rows[4].total_value, 10.0);
    }
}
