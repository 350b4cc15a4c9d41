use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use rmsw_core::SyncType;
use rmsw_sync::SyncError;
use serde_json::{json, Value};

use crate::{ApiError, ApiResult, AppState};

const HISTORY_LIMIT: usize = 10;

fn label(sync_type: SyncType) -> &'static str {
    match sync_type {
        SyncType::InitialSync => "Initial",
        SyncType::IncrementalSync => "Incremental",
    }
}

async fn run_sync(state: &AppState, sync_type: SyncType) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = match state.sync.run(sync_type).await {
        Ok(outcome) => outcome,
        Err(SyncError::AlreadyRunning) => {
            return Err(ApiError::Conflict("A sync is already in progress".into()))
        }
        Err(SyncError::Storage(err)) => return Err(err.into()),
    };
    let run = &outcome.run;
    let name = label(sync_type);

    if outcome.succeeded() {
        Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("{name} sync completed successfully"),
                "syncId": run.id,
                "recordsSynced": run.records_synced,
                "recordsFailed": run.records_failed,
                "duration": outcome.duration_secs,
            })),
        ))
    } else {
        Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": format!("{name} sync failed"),
                "syncId": run.id,
                "error": run.error,
                "recordsSynced": run.records_synced,
                "recordsFailed": run.records_failed,
            })),
        ))
    }
}

pub(crate) async fn initial_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    run_sync(&state, SyncType::InitialSync).await
}

pub(crate) async fn incremental_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    run_sync(&state, SyncType::IncrementalSync).await
}

pub(crate) async fn status_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let history = state.store.sync_history(HISTORY_LIMIT).await?;
    Ok(Json(json!({
        "success": true,
        "configured": state.sync.is_configured(),
        "lastSync": history.first(),
        "history": history,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use axum::http::Method;
    use rmsw_storage::{MemoryStore, PipelineStore};
    use crate::{EnvFlags, WebConfig};
    use async_trait::async_trait;
    use rmsw_adapters::{AdapterError, OpportunityPage, OpportunitySource, PageQuery};
    use rmsw_sync::{SyncConfig, SyncPipeline};
    use tokio::sync::Notify;

    /// Holds its first page until released.
    struct GatedSource {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl OpportunitySource for GatedSource {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn fetch_page(&self, _query: &PageQuery) -> Result<OpportunityPage, AdapterError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(OpportunityPage::default())
        }
    }

    #[tokio::test]
    async fn initial_sync_copies_fixture_and_reports_failures() {
        let (app, store) = test_app();
        let (status, body) = call(&app, Method::POST, "/api/sync/initial", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Initial sync completed successfully");
        assert_eq!(body["recordsSynced"], 5);
        assert_eq!(body["recordsFailed"], 1);
        assert!(store.opportunity(4101).await.unwrap().is_some());
        assert!(store.opportunity(4105).await.unwrap().is_none());

        let (status, body) = call(&app, Method::GET, "/api/sync/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["history"].as_array().unwrap().len(), 1);
        assert_eq!(body["lastSync"]["status"], "completed");
        assert_eq!(body["lastSync"]["sync_type"], "initial_sync");
    }

    #[tokio::test]
    async fn unconfigured_sync_returns_server_error() {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn PipelineStore> = store.clone();
        let config = SyncConfig::from_lookup(|_| None);
        let env = EnvFlags::from_config(&config, &WebConfig::from_lookup(|_| None));
        let pipeline = SyncPipeline::new(config, dyn_store.clone()).unwrap();
        let app = crate::app(AppState::new(dyn_store, Arc::new(pipeline), env));

        let (status, body) = call(&app, Method::POST, "/api/sync/incremental", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Incremental sync failed");
        assert!(body["error"].as_str().unwrap().contains("CURRENT_RMS_SUBDOMAIN"));
        assert_eq!(store.sync_history(10).await.unwrap()[0].error, body["error"].as_str().map(String::from));
    }

    #[tokio::test]
    async fn concurrent_sync_request_gets_conflict() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = GatedSource {
            entered: entered.clone(),
            release: release.clone(),
        };
        let app = crate::app(state_with_source(Arc::new(MemoryStore::new()), Arc::new(source)));

        let first = tokio::spawn({
            let app = app.clone();
            async move { call(&app, Method::POST, "/api/sync/initial", None).await }
        });
        entered.notified().await;

        let (status, body) = call(&app, Method::POST, "/api/sync/initial", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "A sync is already in progress");

        release.notify_one();
        let (status, body) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recordsSynced"], 0);
    }

    #[tokio::test]
    async fn status_is_empty_before_any_run() {
        let (app, _) = test_app();
        let (_, body) = call(&app, Method::GET, "/api/sync/status", None).await;
        assert!(body["lastSync"].is_null());
        assert_eq!(body["history"], json!([]));
        assert_eq!(body["configured"], true);
    }
}
