//! Self-test endpoints. Each one pushes a synthetic opportunity delivery
//! through the same ingestion path as `/api/webhook` and reads it back.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rmsw_adapters::test_payload;
use rmsw_storage::StoreBackend;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::events::{ingest, Ingestion};
use crate::{ApiResult, AppState};

const QUICK_TEST_SUBJECT: i64 = 99_999;
const DETAILED_TEST_SUBJECT: i64 = 88_888;
const TEST_WEBHOOK_SUBJECT: i64 = 12_345;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum CheckStatus {
    Passed,
    Failed,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Check {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl Check {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self {
            name,
            status,
            details: details.into(),
        }
    }
}

pub(crate) async fn test_webhook_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    let payload = test_payload("update", TEST_WEBHOOK_SUBJECT);
    let outcome = ingest(&state, payload.clone()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Test webhook sent successfully",
        "webhookResponse": outcome.to_json(),
        "testPayload": payload,
    })))
}

fn next_steps(checks: &[Check]) -> Vec<&'static str> {
    let mut steps = Vec::new();
    for check in checks {
        match (check.name, check.status) {
            ("Database Configuration", CheckStatus::Warning) => {
                steps.push("Set DATABASE_URL so events survive a restart");
                steps.push("Run `rmsw-cli migrate` once the database is reachable");
            }
            ("Database Configuration", CheckStatus::Failed | CheckStatus::Error) => {
                steps.push("Check DATABASE_URL and that the database accepts connections");
                steps.push("Run `rmsw-cli migrate` to create the tables");
            }
            ("Webhook Endpoint", CheckStatus::Failed | CheckStatus::Error) => {
                steps.push("Inspect the server log for the webhook error");
            }
            ("Event Retrieval", CheckStatus::Warning) => {
                steps.push("The test event was stored but not returned; retry the test");
            }
            ("Event Retrieval", CheckStatus::Failed | CheckStatus::Error) => {
                steps.push("Events are not being read back; check the events table");
            }
            _ => {}
        }
    }
    if steps.is_empty() {
        steps.push("Point the Current RMS webhook at /api/webhook");
        steps.push("Watch /api/events for live deliveries");
    }
    steps
}

pub(crate) async fn quick_test_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<Value>) {
    let mut checks = Vec::with_capacity(3);

    let database = match (state.store.backend(), state.store.ping().await) {
        (_, Err(err)) => Check::new("Database Configuration", CheckStatus::Failed, err.to_string()),
        (StoreBackend::Postgres, Ok(())) => Check::new(
            "Database Configuration",
            CheckStatus::Passed,
            "Postgres connection is healthy",
        ),
        (StoreBackend::Memory, Ok(())) => Check::new(
            "Database Configuration",
            CheckStatus::Warning,
            "DATABASE_URL is not set; events are kept in memory only",
        ),
    };
    let database_failed = database.status == CheckStatus::Failed;
    checks.push(database);
    if database_failed {
        return (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "message": "Database not reachable; webhooks cannot be stored",
                "timestamp": Utc::now(),
                "nextSteps": next_steps(&checks),
                "tests": checks,
            })),
        );
    }

    let mut webhook_response = Value::Null;
    match ingest(&state, test_payload("quick_test", QUICK_TEST_SUBJECT)).await {
        Ok(outcome) => {
            webhook_response = outcome.to_json();
            let check = match outcome {
                Ingestion::Recorded(event) if event.processed => Check::new(
                    "Webhook Endpoint",
                    CheckStatus::Passed,
                    format!("Test event {} recorded", event.id),
                ),
                Ingestion::Recorded(event) => Check::new(
                    "Webhook Endpoint",
                    CheckStatus::Failed,
                    event.error.unwrap_or_else(|| "event not processed".into()),
                ),
                Ingestion::Ignored(_) => Check::new(
                    "Webhook Endpoint",
                    CheckStatus::Failed,
                    "Test delivery was ignored",
                ),
            };
            checks.push(check);
        }
        Err(err) => {
            warn!(error = %err, "quick webhook test failed");
            checks.push(Check::new("Webhook Endpoint", CheckStatus::Error, err.to_string()));
        }
    }

    let mut event_count = 0;
    match state.store.recent_events(10).await {
        Ok(events) => {
            event_count = events.len();
            let found = events
                .iter()
                .any(|e| e.opportunity_id == QUICK_TEST_SUBJECT && e.action_type == "quick_test");
            checks.push(if found {
                Check::new(
                    "Event Retrieval",
                    CheckStatus::Passed,
                    format!("Found {event_count} recent events including the test event"),
                )
            } else {
                Check::new(
                    "Event Retrieval",
                    CheckStatus::Warning,
                    format!("Found {event_count} recent events but not the test event"),
                )
            });
        }
        Err(err) => checks.push(Check::new("Event Retrieval", CheckStatus::Error, err.to_string())),
    }

    let all_passed = checks.iter().all(|c| c.status == CheckStatus::Passed);
    let any_failed = checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Failed | CheckStatus::Error));
    let message = if all_passed {
        "All tests passed. Webhooks are working."
    } else if any_failed {
        "Some tests failed. Check the details below."
    } else {
        "Tests completed with warnings."
    };

    (
        StatusCode::OK,
        Json(json!({
            "success": all_passed,
            "message": message,
            "timestamp": Utc::now(),
            "nextSteps": next_steps(&checks),
            "webhookResponse": webhook_response,
            "eventCount": event_count,
            "tests": checks,
        })),
    )
}

fn recommendations(has_database: bool, webhook_ok: bool, count: usize, found: bool) -> Vec<&'static str> {
    let mut out = Vec::new();
    if !has_database {
        out.push("Set DATABASE_URL to a Postgres instance and run `rmsw-cli migrate`");
    }
    if !webhook_ok {
        out.push("Webhook ingestion returned an error; check the server log");
    }
    if count == 0 {
        out.push("No events found; events may not be saving");
    } else if !found {
        out.push("Test event not found in recent events; retry the test");
    }
    if out.is_empty() {
        out.push("Everything looks good; events are received and stored");
    }
    out
}

pub(crate) async fn detailed_test_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<Value>) {
    let payload = test_payload("test_update", DETAILED_TEST_SUBJECT);
    let step1 = json!({ "status": "success", "payload": payload });

    let (webhook_ok, step2) = match ingest(&state, payload).await {
        Ok(outcome) => (
            true,
            json!({
                "status": "success",
                "status_code": 200,
                "status_ok": true,
                "response": outcome.to_json(),
            }),
        ),
        Err(err) => (
            false,
            json!({
                "status": "error",
                "status_code": err.status().as_u16(),
                "status_ok": false,
                "error": err.to_string(),
            }),
        ),
    };

    let has_database = state.store.backend() == StoreBackend::Postgres;
    let ping = state.store.ping().await;
    let ping_status = if ping.is_ok() { "success" } else { "error" };
    let step3 = json!({
        "status": ping_status,
        "has_database_url": state.env.has_database_url,
        "backend": state.store.backend(),
        "error": ping.as_ref().err().map(ToString::to_string),
    });

    let (count, found, step4) = match state.store.recent_events(10).await {
        Ok(events) => {
            let found = events.iter().any(|e| e.opportunity_id == DETAILED_TEST_SUBJECT);
            let count = events.len();
            (
                count,
                found,
                json!({
                    "status": "success",
                    "count": count,
                    "events": events,
                    "test_event_found": found,
                }),
            )
        }
        Err(err) => (
            0,
            false,
            json!({ "status": "error", "count": 0, "error": err.to_string() }),
        ),
    };

    let success = webhook_ok && has_database && ping.is_ok();
    (
        StatusCode::OK,
        Json(json!({
            "success": success,
            "timestamp": Utc::now(),
            "diagnostics": {
                "step1_payload_creation": step1,
                "step2_webhook_call": step2,
                "step3_database_check": step3,
                "step4_event_retrieval": step4,
            },
            "recommendations": recommendations(has_database, webhook_ok, count, found),
        })),
    )
}
