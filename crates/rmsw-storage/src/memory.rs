use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rmsw_core::risk::RiskSummaryRow;
use rmsw_core::{
    EventCounts, ForecastMetadata, Opportunity, ProcessedEvent, RiskAssessment, RiskLevel,
    SyncRun, SyncStatus,
};
use tokio::sync::RwLock;

use crate::{
    summary_rows, CommitOrdersOutcome, DateWindow, PipelineStore, RiskedOpportunity,
    StorageResult, StoreBackend, UpsertOutcome,
};

#[derive(Debug, Default)]
struct State {
    events: Vec<ProcessedEvent>,
    opportunities: BTreeMap<i64, (Opportunity, Option<RiskAssessment>)>,
    forecasts: BTreeMap<i64, ForecastMetadata>,
    sync_runs: Vec<SyncRun>,
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(runs: &[SyncRun]) -> Vec<&SyncRun> {
    let mut sorted: Vec<_> = runs.iter().collect();
    sorted.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    sorted
}

#[async_trait]
impl PipelineStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn record_event(&self, event: &ProcessedEvent) -> StorageResult<()> {
        self.state.write().await.events.push(event.clone());
        Ok(())
    }

    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<ProcessedEvent>> {
        let state = self.state.read().await;
        let mut events = state.events.clone();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }

    async fn event_counts(&self) -> StorageResult<EventCounts> {
        let state = self.state.read().await;
        let successful = state.events.iter().filter(|e| e.processed).count() as u64;
        Ok(EventCounts {
            total: state.events.len() as u64,
            successful,
            failed: state.events.len() as u64 - successful,
            last_event_at: state.events.iter().map(|e| e.timestamp).max(),
        })
    }

    async fn upsert_opportunity(&self, opportunity: &Opportunity) -> StorageResult<UpsertOutcome> {
        let mut state = self.state.write().await;
        match state.opportunities.get_mut(&opportunity.id) {
            Some((existing, _risk)) => {
                *existing = opportunity.clone();
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state
                    .opportunities
                    .insert(opportunity.id, (opportunity.clone(), None));
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn opportunity(&self, id: i64) -> StorageResult<Option<Opportunity>> {
        let state = self.state.read().await;
        Ok(state.opportunities.get(&id).map(|(o, _)| o.clone()))
    }

    async fn forecast_rows(
        &self,
        window: DateWindow,
    ) -> StorageResult<Vec<(Opportunity, Option<ForecastMetadata>)>> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .opportunities
            .values()
            .filter(|(o, _)| window.contains(o.starts_at))
            .map(|(o, _)| (o.clone(), state.forecasts.get(&o.id).cloned()))
            .collect();
        rows.sort_by(|a, b| a.0.starts_at.cmp(&b.0.starts_at).then(a.0.id.cmp(&b.0.id)));
        Ok(rows)
    }

    async fn forecast(&self, opportunity_id: i64) -> StorageResult<Option<ForecastMetadata>> {
        Ok(self.state.read().await.forecasts.get(&opportunity_id).cloned())
    }

    async fn save_forecast(&self, forecast: &ForecastMetadata) -> StorageResult<ForecastMetadata> {
        let mut state = self.state.write().await;
        let mut saved = forecast.clone();
        if let Some(existing) = state.forecasts.get(&forecast.opportunity_id) {
            saved.created_at = existing.created_at;
        }
        let now = Utc::now();
        saved.created_at = saved.created_at.or(Some(now));
        saved.updated_at = saved.updated_at.or(Some(now));
        state.forecasts.insert(saved.opportunity_id, saved.clone());
        Ok(saved)
    }

    async fn delete_forecast(&self, opportunity_id: i64) -> StorageResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .forecasts
            .remove(&opportunity_id)
            .is_some())
    }

    async fn commit_orders(&self, now: DateTime<Utc>) -> StorageResult<CommitOrdersOutcome> {
        let mut state = self.state.write().await;
        let order_ids: Vec<i64> = state
            .opportunities
            .values()
            .filter(|(o, _)| o.is_order())
            .map(|(o, _)| o.id)
            .collect();

        let mut outcome = CommitOrdersOutcome::default();
        for id in order_ids {
            match state.forecasts.get_mut(&id) {
                None => {
                    state
                        .forecasts
                        .insert(id, ForecastMetadata::committed_order(id, now));
                    outcome.created += 1;
                }
                Some(f) if !f.is_commit || f.probability < 90 => {
                    f.is_commit = true;
                    f.probability = f.probability.max(90);
                    f.updated_at = Some(now);
                    outcome.updated += 1;
                }
                Some(_) => {}
            }
        }
        outcome.total = state
            .opportunities
            .values()
            .filter(|(o, _)| o.is_order())
            .filter(|(o, _)| state.forecasts.get(&o.id).is_some_and(|f| f.is_commit))
            .count() as u64;
        Ok(outcome)
    }

    async fn save_risk_assessment(
        &self,
        opportunity_id: i64,
        assessment: &RiskAssessment,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        match state.opportunities.get_mut(&opportunity_id) {
            Some((_, risk)) => {
                *risk = Some(assessment.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn risk_summary(&self) -> StorageResult<Vec<RiskSummaryRow>> {
        let state = self.state.read().await;
        Ok(summary_rows(state.opportunities.values().map(|(o, risk)| {
            let level = risk.as_ref().and_then(|r| r.risk_level);
            (level, 1, o.charge_total)
        })))
    }

    async fn opportunities_by_risk_level(
        &self,
        level: Option<RiskLevel>,
        limit: usize,
    ) -> StorageResult<Vec<RiskedOpportunity>> {
        let state = self.state.read().await;
        let mut rows: Vec<RiskedOpportunity> = state
            .opportunities
            .values()
            .filter(|(_, risk)| risk.as_ref().and_then(|r| r.risk_level) == level)
            .map(|(o, risk)| RiskedOpportunity {
                opportunity: o.clone(),
                risk: risk.clone(),
            })
            .collect();
        let score = |r: &RiskedOpportunity| r.risk.as_ref().map_or(f64::MIN, |a| a.risk_score);
        rows.sort_by(|a, b| {
            score(b)
                .total_cmp(&score(a))
                .then(b.opportunity.charge_total.total_cmp(&a.opportunity.charge_total))
                .then(a.opportunity.id.cmp(&b.opportunity.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn start_sync_run(&self, run: &SyncRun) -> StorageResult<()> {
        self.state.write().await.sync_runs.push(run.clone());
        Ok(())
    }

    async fn finish_sync_run(&self, run: &SyncRun) -> StorageResult<()> {
        let mut state = self.state.write().await;
        match state.sync_runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => state.sync_runs.push(run.clone()),
        }
        Ok(())
    }

    async fn sync_history(&self, limit: usize) -> StorageResult<Vec<SyncRun>> {
        let state = self.state.read().await;
        Ok(newest_first(&state.sync_runs)
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_completed_sync(&self) -> StorageResult<Option<SyncRun>> {
        let state = self.state.read().await;
        Ok(newest_first(&state.sync_runs)
            .into_iter()
            .find(|r| r.status == SyncStatus::Completed)
            .cloned())
    }
}
