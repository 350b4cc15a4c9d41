use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap},
    Json,
};
use chrono::Utc;
use rmsw_adapters::WebhookPayload;
use rmsw_core::{HealthMetrics, ProcessedEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{ApiError, ApiResult, AppState};

pub(crate) const DEFAULT_EVENT_LIMIT: usize = 50;
pub(crate) const MAX_EVENT_LIMIT: usize = 500;

pub(crate) enum Ingestion {
    Recorded(ProcessedEvent),
    Ignored(String),
}

impl Ingestion {
    pub(crate) fn to_json(&self) -> Value {
        match self {
            Self::Recorded(event) => json!({
                "success": true,
                "message": "Webhook processed",
                "eventId": event.id,
                "processed": event.processed,
                "error": event.error,
            }),
            Self::Ignored(subject) => json!({
                "success": true,
                "ignored": true,
                "message": format!("Ignored {subject} webhook"),
            }),
        }
    }
}

/// Record one delivery. Non-opportunity subjects are acknowledged but not stored.
pub(crate) async fn ingest(state: &AppState, payload: WebhookPayload) -> ApiResult<Ingestion> {
    let action = payload.action;
    if !action.is_opportunity() {
        let subject = action.subject_type.unwrap_or_default();
        debug!(%subject, "ignoring non-opportunity webhook");
        return Ok(Ingestion::Ignored(subject));
    }

    let event = action.into_event(Utc::now());
    state.store.record_event(&event).await?;
    if event.processed {
        info!(
            event_id = %event.id,
            opportunity_id = event.opportunity_id,
            action_type = %event.action_type,
            "webhook event recorded"
        );
    } else {
        warn!(event_id = %event.id, error = ?event.error, "webhook event recorded with error");
    }
    Ok(Ingestion::Recorded(event))
}

pub(crate) async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {e}")))?;
    let outcome = ingest(&state, payload).await?;
    Ok(Json(outcome.to_json()))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventsQuery {
    limit: Option<String>,
}

pub(crate) fn event_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT)
}

pub(crate) async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let events = state
        .store
        .recent_events(event_limit(query.limit.as_deref()))
        .await?;
    Ok(Json(json!({
        "success": true,
        "count": events.len(),
        "events": events,
    })))
}

pub(crate) async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let counts = state.store.event_counts().await?;
    let metrics = HealthMetrics::from_counts(counts, state.uptime_secs());
    Ok(Json(json!({
        "status": "healthy",
        "metrics": metrics,
    })))
}

pub(crate) fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

pub(crate) async fn debug_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Value> {
    let base = base_url(&headers);
    Json(json!({
        "success": true,
        "diagnostics": {
            "timestamp": Utc::now(),
            "environment": state.env,
            "storeBackend": state.store.backend(),
            "syncConfigured": state.sync.is_configured(),
            "endpoints": {
                "webhook": format!("{base}/api/webhook"),
                "health": format!("{base}/api/health"),
                "events": format!("{base}/api/events"),
            },
            "server": {
                "host": headers.get(header::HOST).and_then(|v| v.to_str().ok()),
                "platform": std::env::consts::OS,
                "version": env!("CARGO_PKG_VERSION"),
                "uptime": state.uptime_secs(),
            },
        },
    }))
}
