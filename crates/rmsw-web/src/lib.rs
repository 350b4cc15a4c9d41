//! Axum JSON API for the watcher: webhook intake, event log, health,
//! diagnostics, forecast editing, risk scoring and sync control.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use rmsw_storage::PipelineStore;
use rmsw_sync::{SyncConfig, SyncPipeline};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod diagnostics;
mod error;
mod events;
mod forecast;
mod risk;
mod sync;

pub use error::{ApiError, ApiResult};

pub const CRATE_NAME: &str = "rmsw-web";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub bind: String,
    pub port: u16,
    pub webhook_secret: Option<String>,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            bind: non_empty("RMSW_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: non_empty("RMSW_WEB_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(8000),
            webhook_secret: non_empty("CURRENT_RMS_WEBHOOK_SECRET"),
        }
    }
}

/// Which integration settings are present, reported by `/api/debug`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFlags {
    pub has_subdomain: bool,
    pub has_api_key: bool,
    pub has_webhook_secret: bool,
    pub has_database_url: bool,
}

impl EnvFlags {
    pub fn from_config(sync: &SyncConfig, web: &WebConfig) -> Self {
        Self {
            has_subdomain: sync.subdomain.is_some(),
            has_api_key: sync.api_key.is_some(),
            has_webhook_secret: web.webhook_secret.is_some(),
            has_database_url: sync.database_url.is_some(),
        }
    }
}

pub struct AppState {
    pub store: Arc<dyn PipelineStore>,
    pub sync: Arc<SyncPipeline>,
    pub env: EnvFlags,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn PipelineStore>, sync: Arc<SyncPipeline>, env: EnvFlags) -> Self {
        Self {
            store,
            sync,
            env,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/webhook", post(events::webhook_handler))
        .route("/api/events", get(events::events_handler))
        .route("/api/health", get(events::health_handler))
        .route("/api/debug", get(events::debug_handler))
        .route("/api/test-webhook", post(diagnostics::test_webhook_handler))
        .route("/api/quick-webhook-test", post(diagnostics::quick_test_handler))
        .route(
            "/api/webhook-test-detailed",
            post(diagnostics::detailed_test_handler),
        )
        .route(
            "/api/opportunities/{id}/forecast",
            get(forecast::get_handler)
                .post(forecast::save_handler)
                .patch(forecast::save_handler)
                .delete(forecast::delete_handler),
        )
        .route("/api/opportunities/{id}/risk", put(risk::assess_handler))
        .route("/api/forecast/summary", get(forecast::summary_handler))
        .route(
            "/api/forecast/commit-orders",
            post(forecast::commit_orders_handler),
        )
        .route("/api/risk/summary", get(risk::summary_handler))
        .route("/api/risk/opportunities", get(risk::opportunities_handler))
        .route("/api/sync/initial", post(sync::initial_handler))
        .route("/api/sync/incremental", post(sync::incremental_handler))
        .route("/api/sync/status", get(sync::status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let web = WebConfig::from_env();
    let sync_config = SyncConfig::from_env();
    let env = EnvFlags::from_config(&sync_config, &web);

    let store = rmsw_storage::connect_from_env().await?;
    let pipeline = Arc::new(SyncPipeline::new(sync_config, store.clone())?);
    if !pipeline.is_configured() {
        warn!("Current RMS credentials missing; sync endpoints will report failures");
    }
    let scheduler = pipeline.maybe_build_scheduler().await?;
    if let Some(scheduler) = &scheduler {
        scheduler.start().await.context("starting sync scheduler")?;
    }

    let state = AppState::new(store, pipeline, env);
    let listener = TcpListener::bind((web.bind.as_str(), web.port))
        .await
        .with_context(|| format!("binding {}:{}", web.bind, web.port))?;
    info!(addr = %listener.local_addr()?, "rmsw web listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut scheduler) = scheduler {
        if let Err(err) = scheduler.shutdown().await {
            warn!(error = %err, "scheduler shutdown failed");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use rmsw_adapters::{FixtureSource, OpportunitySource};
    use rmsw_storage::MemoryStore;
    use serde_json::Value;
    use tower::ServiceExt;

    pub fn fixture_source() -> FixtureSource {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures/current-rms/opportunities_page.json");
        FixtureSource::from_file(path).unwrap()
    }

    pub fn state_with_source(
        store: Arc<MemoryStore>,
        source: Arc<dyn OpportunitySource>,
    ) -> AppState {
        let dyn_store: Arc<dyn PipelineStore> = store;
        let config = SyncConfig::from_lookup(|_| None);
        let env = EnvFlags::from_config(&config, &WebConfig::from_lookup(|_| None));
        let pipeline = SyncPipeline::with_source(config, dyn_store.clone(), source);
        AppState::new(dyn_store, Arc::new(pipeline), env)
    }

    pub fn state_with_store(store: Arc<MemoryStore>) -> AppState {
        state_with_source(store, Arc::new(fixture_source()))
    }

    pub fn test_app() -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (app(state_with_store(store.clone())), store)
    }

    pub async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
