use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rmsw_core::risk::RiskSummaryRow;
use rmsw_core::{
    EventCounts, ForecastMetadata, Opportunity, ProcessedEvent, RiskAssessment, RiskLevel,
    RiskScores, SyncRun, SyncStatus, SyncType,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{
    summary_rows, CommitOrdersOutcome, DateWindow, PipelineStore, RiskedOpportunity,
    StorageError, StorageResult, StoreBackend, UpsertOutcome,
};

const OPPORTUNITY_COLUMNS: &str = r#"
    o.id, o.name, o.subject, o.organisation_name, o.owner_name, o.starts_at, o.ends_at,
    o.opportunity_status, o.charge_total, o.provisional_cost_total, o.predicted_cost_total,
    o.actual_cost_total, o.remote_updated_at, o.synced_at
"#;

const RISK_COLUMNS: &str = r#"
    o.risk_project_novelty, o.risk_technical_complexity, o.risk_resource_utilization,
    o.risk_client_sophistication, o.risk_budget_size, o.risk_timeframe_constraint,
    o.risk_team_experience, o.risk_subhire_availability, o.risk_score, o.risk_level,
    o.risk_reviewed, o.risk_mitigation_plan, o.risk_mitigation_notes, o.risk_last_updated
"#;

const FORECAST_COLUMNS: &str = r#"
    f.opportunity_id AS f_opportunity_id, f.probability AS f_probability,
    f.is_commit AS f_is_commit, f.revenue_override AS f_revenue_override,
    f.profit_override AS f_profit_override, f.is_excluded AS f_is_excluded,
    f.exclusion_reason AS f_exclusion_reason, f.notes AS f_notes,
    f.last_reviewed_at AS f_last_reviewed_at, f.reviewed_by AS f_reviewed_by,
    f.created_at AS f_created_at, f.updated_at AS f_updated_at
"#;

const RISK_FIELD_NAMES: [&str; 8] = [
    "risk_project_novelty",
    "risk_technical_complexity",
    "risk_resource_utilization",
    "risk_client_sophistication",
    "risk_budget_size",
    "risk_timeframe_constraint",
    "risk_team_experience",
    "risk_subhire_availability",
];

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn event_from_row(row: &PgRow) -> StorageResult<ProcessedEvent> {
    Ok(ProcessedEvent {
        id: row.try_get("id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        opportunity_name: row.try_get("opportunity_name")?,
        customer_name: row.try_get("customer_name")?,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        action_type: row.try_get("action_type")?,
        new_status: row.try_get("new_status")?,
        timestamp: row.try_get("received_at")?,
        processed: row.try_get("processed")?,
        error: row.try_get("error")?,
    })
}

fn opportunity_from_row(row: &PgRow) -> StorageResult<Opportunity> {
    Ok(Opportunity {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        organisation_name: row.try_get("organisation_name")?,
        owner_name: row.try_get("owner_name")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        opportunity_status: row.try_get("opportunity_status")?,
        charge_total: row.try_get("charge_total")?,
        provisional_cost_total: row.try_get("provisional_cost_total")?,
        predicted_cost_total: row.try_get("predicted_cost_total")?,
        actual_cost_total: row.try_get("actual_cost_total")?,
        updated_at: row.try_get("remote_updated_at")?,
        synced_at: row.try_get("synced_at")?,
    })
}

fn small_to_u8(value: i16, column: &str) -> StorageResult<u8> {
    u8::try_from(value).map_err(|_| StorageError::Corrupt(format!("{column} = {value}")))
}

/// `None` when the row carries no risk data at all.
fn risk_from_row(row: &PgRow) -> StorageResult<Option<RiskAssessment>> {
    let mut values = [None; 8];
    for (slot, column) in values.iter_mut().zip(RISK_FIELD_NAMES) {
        let raw: Option<i16> = row.try_get(column)?;
        *slot = raw.map(|v| small_to_u8(v, column)).transpose()?;
    }
    let risk_score: Option<f64> = row.try_get("risk_score")?;
    let risk_last_updated: Option<DateTime<Utc>> = row.try_get("risk_last_updated")?;
    if risk_score.is_none() && risk_last_updated.is_none() && values.iter().all(Option::is_none) {
        return Ok(None);
    }
    let level: Option<String> = row.try_get("risk_level")?;
    Ok(Some(RiskAssessment {
        scores: RiskScores::from_array(values),
        risk_score: risk_score.unwrap_or(0.0),
        risk_level: level.as_deref().and_then(RiskLevel::parse),
        risk_reviewed: row.try_get("risk_reviewed")?,
        risk_mitigation_plan: row.try_get("risk_mitigation_plan")?,
        risk_mitigation_notes: row.try_get("risk_mitigation_notes")?,
        risk_last_updated,
    }))
}

fn forecast_from_row(row: &PgRow, prefix: &str) -> StorageResult<Option<ForecastMetadata>> {
    let col = |name: &str| format!("{prefix}{name}");
    let Some(opportunity_id) = row.try_get::<Option<i64>, _>(col("opportunity_id").as_str())? else {
        return Ok(None);
    };
    let probability: i16 = row.try_get(col("probability").as_str())?;
    Ok(Some(ForecastMetadata {
        opportunity_id,
        probability: small_to_u8(probability, "probability")?,
        is_commit: row.try_get(col("is_commit").as_str())?,
        revenue_override: row.try_get(col("revenue_override").as_str())?,
        profit_override: row.try_get(col("profit_override").as_str())?,
        is_excluded: row.try_get(col("is_excluded").as_str())?,
        exclusion_reason: row.try_get(col("exclusion_reason").as_str())?,
        notes: row.try_get(col("notes").as_str())?,
        last_reviewed_at: row.try_get(col("last_reviewed_at").as_str())?,
        reviewed_by: row.try_get(col("reviewed_by").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
        updated_at: row.try_get(col("updated_at").as_str())?,
    }))
}

fn sync_run_from_row(row: &PgRow) -> StorageResult<SyncRun> {
    let sync_type: String = row.try_get("sync_type")?;
    let status: String = row.try_get("status")?;
    let records_synced: i64 = row.try_get("records_synced")?;
    let records_failed: i64 = row.try_get("records_failed")?;
    Ok(SyncRun {
        id: row.try_get("id")?,
        sync_type: SyncType::parse(&sync_type)
            .ok_or_else(|| StorageError::Corrupt(format!("sync_type = {sync_type}")))?,
        status: SyncStatus::parse(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("status = {status}")))?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        records_synced: records_synced.max(0) as u64,
        records_failed: records_failed.max(0) as u64,
        error: row.try_get("error")?,
    })
}

const SYNC_RUN_COLUMNS: &str =
    "id, sync_type, status, started_at, completed_at, records_synced, records_failed, error";

#[async_trait]
impl PipelineStore for PgStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Postgres
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1 FROM events LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_event(&self, event: &ProcessedEvent) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (
                id, opportunity_id, opportunity_name, customer_name, user_id, user_name,
                action_type, new_status, received_at, processed, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.opportunity_id)
        .bind(&event.opportunity_name)
        .bind(&event.customer_name)
        .bind(event.user_id)
        .bind(&event.user_name)
        .bind(&event.action_type)
        .bind(&event.new_status)
        .bind(event.timestamp)
        .bind(event.processed)
        .bind(&event.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<ProcessedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, opportunity_id, opportunity_name, customer_name, user_id, user_name,
                   action_type, new_status, received_at, processed, error
              FROM events
             ORDER BY received_at DESC
             LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn event_counts(&self) -> StorageResult<EventCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE processed) AS successful,
                   COUNT(*) FILTER (WHERE NOT processed) AS failed,
                   MAX(received_at) AS last_event_at
              FROM events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let successful: i64 = row.try_get("successful")?;
        let failed: i64 = row.try_get("failed")?;
        Ok(EventCounts {
            total: total as u64,
            successful: successful as u64,
            failed: failed as u64,
            last_event_at: row.try_get("last_event_at")?,
        })
    }

    async fn upsert_opportunity(&self, opp: &Opportunity) -> StorageResult<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, name, subject, organisation_name, owner_name, starts_at, ends_at,
                opportunity_status, charge_total, provisional_cost_total, predicted_cost_total,
                actual_cost_total, remote_updated_at, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                subject = EXCLUDED.subject,
                organisation_name = EXCLUDED.organisation_name,
                owner_name = EXCLUDED.owner_name,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                opportunity_status = EXCLUDED.opportunity_status,
                charge_total = EXCLUDED.charge_total,
                provisional_cost_total = EXCLUDED.provisional_cost_total,
                predicted_cost_total = EXCLUDED.predicted_cost_total,
                actual_cost_total = EXCLUDED.actual_cost_total,
                remote_updated_at = EXCLUDED.remote_updated_at,
                synced_at = EXCLUDED.synced_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(opp.id)
        .bind(&opp.name)
        .bind(&opp.subject)
        .bind(&opp.organisation_name)
        .bind(&opp.owner_name)
        .bind(opp.starts_at)
        .bind(opp.ends_at)
        .bind(&opp.opportunity_status)
        .bind(opp.charge_total)
        .bind(opp.provisional_cost_total)
        .bind(opp.predicted_cost_total)
        .bind(opp.actual_cost_total)
        .bind(opp.updated_at)
        .bind(opp.synced_at)
        .fetch_one(&self.pool)
        .await?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn opportunity(&self, id: i64) -> StorageResult<Option<Opportunity>> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities o WHERE o.id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn forecast_rows(
        &self,
        window: DateWindow,
    ) -> StorageResult<Vec<(Opportunity, Option<ForecastMetadata>)>> {
        let sql = format!(
            r#"
            SELECT {OPPORTUNITY_COLUMNS}, {FORECAST_COLUMNS}
              FROM opportunities o
              LEFT JOIN forecast_metadata f ON f.opportunity_id = o.id
             WHERE (o.starts_at AT TIME ZONE 'UTC')::date >= $1
               AND ($2::date IS NULL OR (o.starts_at AT TIME ZONE 'UTC')::date <= $2)
             ORDER BY o.starts_at ASC, o.id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok((opportunity_from_row(row)?, forecast_from_row(row, "f_")?)))
            .collect()
    }

    async fn forecast(&self, opportunity_id: i64) -> StorageResult<Option<ForecastMetadata>> {
        let row = sqlx::query("SELECT * FROM forecast_metadata WHERE opportunity_id = $1")
            .bind(opportunity_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => forecast_from_row(&row, ""),
            None => Ok(None),
        }
    }

    async fn save_forecast(&self, f: &ForecastMetadata) -> StorageResult<ForecastMetadata> {
        let row = sqlx::query(
            r#"
            INSERT INTO forecast_metadata (
                opportunity_id, probability, is_commit, revenue_override, profit_override,
                is_excluded, exclusion_reason, notes, last_reviewed_at, reviewed_by,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11, NOW()), COALESCE($12, NOW()))
            ON CONFLICT (opportunity_id) DO UPDATE SET
                probability = EXCLUDED.probability,
                is_commit = EXCLUDED.is_commit,
                revenue_override = EXCLUDED.revenue_override,
                profit_override = EXCLUDED.profit_override,
                is_excluded = EXCLUDED.is_excluded,
                exclusion_reason = EXCLUDED.exclusion_reason,
                notes = EXCLUDED.notes,
                last_reviewed_at = EXCLUDED.last_reviewed_at,
                reviewed_by = EXCLUDED.reviewed_by,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(f.opportunity_id)
        .bind(i16::from(f.probability))
        .bind(f.is_commit)
        .bind(f.revenue_override)
        .bind(f.profit_override)
        .bind(f.is_excluded)
        .bind(&f.exclusion_reason)
        .bind(&f.notes)
        .bind(f.last_reviewed_at)
        .bind(&f.reviewed_by)
        .bind(f.created_at)
        .bind(f.updated_at)
        .fetch_one(&self.pool)
        .await?;
        forecast_from_row(&row, "")?
            .ok_or_else(|| StorageError::Corrupt("forecast upsert returned no row".into()))
    }

    async fn delete_forecast(&self, opportunity_id: i64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM forecast_metadata WHERE opportunity_id = $1")
            .bind(opportunity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit_orders(&self, now: DateTime<Utc>) -> StorageResult<CommitOrdersOutcome> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            r#"
            INSERT INTO forecast_metadata (opportunity_id, probability, is_commit, created_at, updated_at)
            SELECT o.id, 100, TRUE, $1, $1
              FROM opportunities o
              LEFT JOIN forecast_metadata f ON f.opportunity_id = o.id
             WHERE LOWER(o.opportunity_status) = 'order'
               AND f.opportunity_id IS NULL
            ON CONFLICT (opportunity_id) DO NOTHING
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let updated = sqlx::query(
            r#"
            UPDATE forecast_metadata f
               SET is_commit = TRUE,
                   probability = GREATEST(f.probability, 90),
                   updated_at = $1
              FROM opportunities o
             WHERE f.opportunity_id = o.id
               AND LOWER(o.opportunity_status) = 'order'
               AND (f.is_commit = FALSE OR f.probability < 90)
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
              FROM forecast_metadata f
              JOIN opportunities o ON o.id = f.opportunity_id
             WHERE LOWER(o.opportunity_status) = 'order'
               AND f.is_commit
            "#,
        )
        .fetch_one(&mut *tx)
        .await?
        .try_get("total")?;

        tx.commit().await?;
        Ok(CommitOrdersOutcome {
            created,
            updated,
            total: total as u64,
        })
    }

    async fn save_risk_assessment(
        &self,
        opportunity_id: i64,
        a: &RiskAssessment,
    ) -> StorageResult<bool> {
        let scores = a.scores.as_array().map(|v| v.map(i16::from));
        let result = sqlx::query(
            r#"
            UPDATE opportunities SET
                risk_project_novelty = $2,
                risk_technical_complexity = $3,
                risk_resource_utilization = $4,
                risk_client_sophistication = $5,
                risk_budget_size = $6,
                risk_timeframe_constraint = $7,
                risk_team_experience = $8,
                risk_subhire_availability = $9,
                risk_score = $10,
                risk_level = $11,
                risk_reviewed = $12,
                risk_mitigation_plan = $13,
                risk_mitigation_notes = $14,
                risk_last_updated = $15
             WHERE id = $1
            "#,
        )
        .bind(opportunity_id)
        .bind(scores[0])
        .bind(scores[1])
        .bind(scores[2])
        .bind(scores[3])
        .bind(scores[4])
        .bind(scores[5])
        .bind(scores[6])
        .bind(scores[7])
        .bind(a.risk_score)
        .bind(a.risk_level.map(RiskLevel::as_str))
        .bind(&a.risk_reviewed)
        .bind(a.risk_mitigation_plan)
        .bind(&a.risk_mitigation_notes)
        .bind(a.risk_last_updated)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn risk_summary(&self) -> StorageResult<Vec<RiskSummaryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT risk_level, COUNT(*) AS count, COALESCE(SUM(charge_total), 0) AS total_value
              FROM opportunities
             GROUP BY risk_level
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let level: Option<String> = row.try_get("risk_level")?;
            let count: i64 = row.try_get("count")?;
            let total: f64 = row.try_get("total_value")?;
            counts.push((level.as_deref().and_then(RiskLevel::parse), count as u64, total));
        }
        Ok(summary_rows(counts))
    }

    async fn opportunities_by_risk_level(
        &self,
        level: Option<RiskLevel>,
        limit: usize,
    ) -> StorageResult<Vec<RiskedOpportunity>> {
        let sql = format!(
            r#"
            SELECT {OPPORTUNITY_COLUMNS}, {RISK_COLUMNS}
              FROM opportunities o
             WHERE o.risk_level IS NOT DISTINCT FROM $1
             ORDER BY o.risk_score DESC NULLS LAST, o.charge_total DESC, o.id ASC
             LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(level.map(RiskLevel::as_str))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(RiskedOpportunity {
                    opportunity: opportunity_from_row(row)?,
                    risk: risk_from_row(row)?,
                })
            })
            .collect()
    }

    async fn start_sync_run(&self, run: &SyncRun) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, sync_type, status, started_at, records_synced, records_failed)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id)
        .bind(run.sync_type.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.records_synced as i64)
        .bind(run.records_failed as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_sync_run(&self, run: &SyncRun) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs
               SET status = $2,
                   completed_at = $3,
                   records_synced = $4,
                   records_failed = $5,
                   error = $6
             WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.completed_at)
        .bind(run.records_synced as i64)
        .bind(run.records_failed as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync_history(&self, limit: usize) -> StorageResult<Vec<SyncRun>> {
        let sql = format!(
            "SELECT {SYNC_RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(sync_run_from_row).collect()
    }

    async fn last_completed_sync(&self) -> StorageResult<Option<SyncRun>> {
        let sql = format!(
            r#"
            SELECT {SYNC_RUN_COLUMNS}
              FROM sync_runs
             WHERE status = 'completed'
             ORDER BY started_at DESC
             LIMIT 1
            "#
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(sync_run_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Runs only when a scratch database is provided.
    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("RMSW_TEST_DATABASE_URL").ok()?;
        let store = PgStore::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        Some(store)
    }

    #[tokio::test]
    async fn commit_orders_round_trip_against_postgres() {
        let Some(store) = test_store().await else {
            return;
        };
        let now = Utc::now();
        let id = 900_000_000 + (now.timestamp_subsec_micros() as i64);
        let mut opp = Opportunity::new(id, "PG order");
        opp.opportunity_status = Some("Order".into());
        opp.starts_at = Some(now);
        assert_eq!(
            store.upsert_opportunity(&opp).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            store.upsert_opportunity(&opp).await.unwrap(),
            UpsertOutcome::Updated
        );

        let outcome = store.commit_orders(now).await.unwrap();
        assert!(outcome.created >= 1);
        let saved = store.forecast(id).await.unwrap().unwrap();
        assert_eq!(saved.probability, 100);
        assert!(saved.is_commit);

        let window = DateWindow {
            start: now.date_naive() - chrono::Days::new(1),
            end: None,
        };
        let rows = store.forecast_rows(window).await.unwrap();
        assert!(rows.iter().any(|(o, f)| o.id == id && f.is_some()));

        assert!(store.delete_forecast(id).await.unwrap());
        assert!(!store.delete_forecast(id).await.unwrap());
    }
}
