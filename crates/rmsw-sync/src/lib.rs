//! Paged copy of remote opportunities into the local store, run on demand or
//! on a cron schedule.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rmsw_adapters::current_rms::DEFAULT_BASE_URL;
use rmsw_adapters::{
    map_remote_opportunity, CurrentRmsConfig, CurrentRmsSource, HttpClientConfig, HttpFetcher,
    OpportunitySource, PageQuery,
};
use rmsw_core::{SyncRun, SyncStatus, SyncType};
use rmsw_storage::{PipelineStore, StorageError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "rmsw-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub subdomain: Option<String>,
    pub api_key: Option<String>,
    pub base_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            database_url: non_empty("DATABASE_URL"),
            subdomain: non_empty("CURRENT_RMS_SUBDOMAIN"),
            api_key: non_empty("CURRENT_RMS_API_KEY"),
            base_url: non_empty("CURRENT_RMS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            page_size: parse_var(non_empty("RMSW_SYNC_PAGE_SIZE")).filter(|n| *n > 0).unwrap_or(100),
            max_pages: parse_var(non_empty("RMSW_SYNC_MAX_PAGES")).filter(|n| *n > 0).unwrap_or(500),
            http_timeout_secs: parse_var(non_empty("RMSW_HTTP_TIMEOUT_SECS")).unwrap_or(20),
            user_agent: non_empty("RMSW_USER_AGENT")
                .unwrap_or_else(|| format!("rmsw/{}", env!("CARGO_PKG_VERSION"))),
            scheduler_enabled: non_empty("RMSW_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: normalize_cron(
                non_empty("SYNC_CRON").as_deref().unwrap_or(DEFAULT_SYNC_CRON),
            ),
        }
    }

    pub fn current_rms(&self) -> Option<CurrentRmsConfig> {
        Some(CurrentRmsConfig {
            base_url: self.base_url.clone(),
            subdomain: self.subdomain.clone()?,
            api_key: self.api_key.clone()?,
        })
    }
}

/// Every fifteen minutes, on the minute.
pub const DEFAULT_SYNC_CRON: &str = "0 */15 * * * *";

/// The scheduler wants a leading seconds field; classic five-field
/// expressions get one.
pub fn normalize_cron(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        fields.join(" ")
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub run: SyncRun,
    pub duration_secs: Option<i64>,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        self.run.status == SyncStatus::Completed
    }
}

const NOT_CONFIGURED: &str =
    "Current RMS credentials are not configured (CURRENT_RMS_SUBDOMAIN / CURRENT_RMS_API_KEY)";

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn PipelineStore>,
    source: Option<Arc<dyn OpportunitySource>>,
    running: Mutex<()>,
}

impl SyncPipeline {
    /// Live pipeline; without credentials every run fails with a clear error.
    pub fn new(config: SyncConfig, store: Arc<dyn PipelineStore>) -> Result<Self> {
        let source: Option<Arc<dyn OpportunitySource>> = match config.current_rms() {
            Some(rms) => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent.clone()),
                    ..Default::default()
                })?;
                Some(Arc::new(CurrentRmsSource::new(rms, http)) as Arc<dyn OpportunitySource>)
            }
            None => None,
        };
        Ok(Self {
            config,
            store,
            source,
            running: Mutex::new(()),
        })
    }

    pub fn with_source(
        config: SyncConfig,
        store: Arc<dyn PipelineStore>,
        source: Arc<dyn OpportunitySource>,
    ) -> Self {
        Self {
            config,
            store,
            source: Some(source),
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// Execute one run. Source failures end up in the returned run as
    /// `failed`; only bookkeeping failures surface as `Err`.
    pub async fn run(&self, sync_type: SyncType) -> Result<SyncOutcome, SyncError> {
        let _guard = self.running.try_lock().map_err(|_| SyncError::AlreadyRunning)?;

        let updated_since = match sync_type {
            SyncType::InitialSync => None,
            SyncType::IncrementalSync => self
                .store
                .last_completed_sync()
                .await?
                .map(|r| r.started_at),
        };

        let mut run = SyncRun::start(sync_type, Utc::now());
        self.store.start_sync_run(&run).await?;

        let span = info_span!("sync_run", run_id = %run.id, sync_type = sync_type.as_str());
        let result = self
            .copy_pages(&mut run, updated_since)
            .instrument(span)
            .await;

        match result {
            Ok(()) => run.complete(Utc::now()),
            Err(message) => run.fail(Utc::now(), message),
        }
        self.store.finish_sync_run(&run).await?;

        info!(
            run_id = %run.id,
            status = run.status.as_str(),
            synced = run.records_synced,
            failed = run.records_failed,
            "sync run finished"
        );
        Ok(SyncOutcome {
            duration_secs: run.duration_secs(),
            run,
        })
    }

    async fn copy_pages(
        &self,
        run: &mut SyncRun,
        updated_since: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), String> {
        let Some(source) = &self.source else {
            return Err(NOT_CONFIGURED.to_string());
        };
        let per_page = self.config.page_size.max(1);

        for page in 1..=self.config.max_pages {
            let query = PageQuery {
                page,
                per_page,
                updated_since,
            };
            let fetched = source
                .fetch_page(&query)
                .await
                .map_err(|e| format!("{} page {page}: {e}", source.name()))?;
            let count = fetched.records.len();

            for record in fetched.records {
                let opportunity = match map_remote_opportunity(&record, Utc::now()) {
                    Ok(opportunity) => opportunity,
                    Err(err) => {
                        warn!(page, error = %err, "skipping unmappable record");
                        run.records_failed += 1;
                        continue;
                    }
                };
                match self.store.upsert_opportunity(&opportunity).await {
                    Ok(_) => run.records_synced += 1,
                    Err(err) => {
                        warn!(opportunity_id = opportunity.id, error = %err, "failed to store opportunity");
                        run.records_failed += 1;
                    }
                }
            }

            if count < per_page as usize {
                return Ok(());
            }
        }
        warn!(max_pages = self.config.max_pages, "stopped at page limit");
        Ok(())
    }

    /// Cron job running incremental syncs, when enabled.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.as_str();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run(SyncType::IncrementalSync).await {
                    Ok(outcome) if outcome.succeeded() => {}
                    Ok(outcome) => warn!(
                        error = outcome.run.error.as_deref().unwrap_or_default(),
                        "scheduled sync failed"
                    ),
                    Err(SyncError::AlreadyRunning) => {
                        info!("scheduled sync skipped; previous run still active")
                    }
                    Err(err) => warn!(error = %err, "scheduled sync aborted"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

/// One-shot run for the CLI.
pub async fn run_sync_once_from_env(sync_type: SyncType) -> Result<SyncOutcome> {
    let config = SyncConfig::from_env();
    let store = rmsw_storage::connect_from_env().await?;
    let pipeline = SyncPipeline::new(config, store)?;
    Ok(pipeline.run(sync_type).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rmsw_adapters::{AdapterError, FixtureSource, OpportunityPage};
    use rmsw_storage::{DateWindow, MemoryStore};
    use serde_json::json;
    use std::collections::HashMap;

    fn config(page_size: u32) -> SyncConfig {
        let mut vars = HashMap::new();
        vars.insert("RMSW_SYNC_PAGE_SIZE", page_size.to_string());
        SyncConfig::from_lookup(|k| vars.get(k).cloned())
    }

    fn record(id: i64, updated: &str) -> serde_json::Value {
        json!({
            "id": id,
            "subject": format!("Job {id}"),
            "starts_at": "2026-11-01T09:00:00Z",
            "charge_total": "100.00",
            "updated_at": updated,
        })
    }

    #[test]
    fn config_defaults_and_overrides() {
        let defaults = SyncConfig::from_lookup(|_| None);
        assert_eq!(defaults.page_size, 100);
        assert_eq!(defaults.max_pages, 500);
        assert_eq!(defaults.sync_cron, "0 */15 * * * *");
        assert_eq!(defaults.base_url, DEFAULT_BASE_URL);
        assert!(!defaults.scheduler_enabled);
        assert!(defaults.current_rms().is_none());

        let vars: HashMap<&str, &str> = [
            ("CURRENT_RMS_SUBDOMAIN", "acme"),
            ("CURRENT_RMS_API_KEY", "k"),
            ("RMSW_SCHEDULER_ENABLED", "true"),
            ("RMSW_SYNC_PAGE_SIZE", "0"),
        ]
        .into_iter()
        .collect();
        let cfg = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert!(cfg.scheduler_enabled);
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.current_rms().unwrap().subdomain, "acme");
    }

    #[tokio::test]
    async fn initial_sync_pages_until_short_page_and_counts_failures() {
        let store = Arc::new(MemoryStore::new());
        let mut records: Vec<_> = (1..=4).map(|i| record(i, "2026-10-01T00:00:00Z")).collect();
        records.push(json!({"id": 5, "charge_total": "n/a"}));
        let pipeline = SyncPipeline::with_source(
            config(2),
            store.clone(),
            Arc::new(FixtureSource::new(records)),
        );

        let outcome = pipeline.run(SyncType::InitialSync).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.run.records_synced, 4);
        assert_eq!(outcome.run.records_failed, 1);
        assert!(outcome.duration_secs.is_some());

        let last = store.last_sync_run().await.unwrap().unwrap();
        assert_eq!(last.id, outcome.run.id);
        assert_eq!(last.status, SyncStatus::Completed);

        let window = DateWindow {
            start: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end: None,
        };
        assert_eq!(store.forecast_rows(window).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn incremental_sync_only_pulls_records_changed_since_last_run() {
        let store = Arc::new(MemoryStore::new());
        let far_future = (Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        let records = vec![
            record(1, "2020-01-01T00:00:00Z"),
            record(2, &far_future),
        ];
        let pipeline = SyncPipeline::with_source(
            config(10),
            store.clone(),
            Arc::new(FixtureSource::new(records)),
        );

        let first = pipeline.run(SyncType::IncrementalSync).await.unwrap();
        assert_eq!(first.run.records_synced, 2);

        let second = pipeline.run(SyncType::IncrementalSync).await.unwrap();
        assert_eq!(second.run.sync_type, SyncType::IncrementalSync);
        assert_eq!(second.run.records_synced, 1);
    }

    struct BrokenSource;

    #[async_trait]
    impl OpportunitySource for BrokenSource {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn fetch_page(&self, _query: &PageQuery) -> Result<OpportunityPage, AdapterError> {
            Err(AdapterError::Decode("missing `opportunities` key".into()))
        }
    }

    #[tokio::test]
    async fn source_failure_marks_run_failed() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = SyncPipeline::with_source(config(10), store.clone(), Arc::new(BrokenSource));
        let outcome = pipeline.run(SyncType::InitialSync).await.unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.run.status, SyncStatus::Failed);
        assert!(outcome.run.error.as_deref().unwrap().contains("broken page 1"));
        assert!(store.last_completed_sync().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unconfigured_pipeline_fails_runs() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = SyncPipeline::new(SyncConfig::from_lookup(|_| None), store).unwrap();
        assert!(!pipeline.is_configured());
        let outcome = pipeline.run(SyncType::InitialSync).await.unwrap();
        assert_eq!(outcome.run.error.as_deref(), Some(NOT_CONFIGURED));
    }

    /// Blocks on its first page until released.
    struct GatedSource {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl OpportunitySource for GatedSource {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn fetch_page(&self, _query: &PageQuery) -> Result<OpportunityPage, AdapterError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(OpportunityPage {
                records: vec![record(1, "2026-10-01T00:00:00Z")],
                total_count: Some(1),
            })
        }
    }

    #[tokio::test]
    async fn overlapping_runs_are_refused() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(SyncPipeline::with_source(
            config(10),
            store.clone(),
            Arc::new(GatedSource {
                entered: entered.clone(),
                release: release.clone(),
            }),
        ));

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(SyncType::InitialSync).await }
        });
        entered.notified().await;

        let second = pipeline.run(SyncType::IncrementalSync).await;
        assert!(matches!(second, Err(SyncError::AlreadyRunning)));

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(first.succeeded());
        assert_eq!(first.run.records_synced, 1);
        assert_eq!(store.sync_history(10).await.unwrap().len(), 1);
    }

    #[test]
    fn five_field_cron_gains_seconds() {
        assert_eq!(normalize_cron("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize_cron(" 30 0 3 * * * "), "30 0 3 * * *");
        let vars: HashMap<&str, &str> = [("SYNC_CRON", "0 2 * * *")].into_iter().collect();
        let cfg = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.sync_cron, "0 0 2 * * *");
    }

    #[tokio::test]
    async fn scheduler_builds_with_default_cron() {
        let vars: HashMap<&str, &str> =
            [("RMSW_SCHEDULER_ENABLED", "true")].into_iter().collect();
        let cfg = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        let pipeline = Arc::new(SyncPipeline::with_source(
            cfg,
            Arc::new(MemoryStore::new()),
            Arc::new(FixtureSource::default()),
        ));
        let sched = pipeline.maybe_build_scheduler().await.unwrap();
        assert!(sched.is_some());
    }

    #[tokio::test]
    async fn scheduler_is_off_by_default() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(SyncPipeline::with_source(
            config(10),
            store,
            Arc::new(FixtureSource::default()),
        ));
        assert!(pipeline.maybe_build_scheduler().await.unwrap().is_none());
    }
}
