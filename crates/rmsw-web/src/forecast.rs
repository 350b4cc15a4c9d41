use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use chrono::{Days, NaiveDate, Utc};
use rmsw_core::forecast::{build_forecast_view, enrich, ForecastFilter};
use rmsw_core::ForecastInput;
use rmsw_storage::DateWindow;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::{ApiError, ApiResult, AppState};

/// Look-back used when the summary is requested without an explicit range.
const DEFAULT_LOOKBACK_DAYS: u64 = 30;

pub(crate) fn parse_opportunity_id(raw: &str) -> ApiResult<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::bad_request("Invalid opportunity ID"))
}

pub(crate) async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_opportunity_id(&raw_id)?;
    let body = match state.store.forecast(id).await? {
        Some(forecast) => json!({ "success": true, "forecast": forecast }),
        None => json!({
            "success": true,
            "forecast": null,
            "message": "No forecast metadata found for this opportunity",
        }),
    };
    Ok(Json(body))
}

pub(crate) async fn save_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let id = parse_opportunity_id(&raw_id)?;
    let input: ForecastInput = if body.is_empty() {
        ForecastInput::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };
    let metadata = input
        .into_metadata(id, Utc::now(), None)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let saved = state.store.save_forecast(&metadata).await?;
    info!(
        opportunity_id = id,
        probability = saved.probability,
        is_commit = saved.is_commit,
        "forecast metadata saved"
    );
    Ok(Json(json!({
        "success": true,
        "message": "Forecast metadata saved successfully",
        "forecast": saved,
    })))
}

pub(crate) async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_opportunity_id(&raw_id)?;
    if !state.store.delete_forecast(id).await? {
        return Err(ApiError::not_found("Forecast metadata not found"));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Forecast metadata deleted successfully",
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    owner: Option<String>,
    customer: Option<String>,
    include_excluded: Option<String>,
}

fn parse_date(field: &str, raw: &str) -> ApiResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("Invalid {field}; expected YYYY-MM-DD")))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// An explicit range needs both ends; anything less falls back to an
/// open window starting thirty days back.
pub(crate) fn summary_window(query: &SummaryQuery, today: NaiveDate) -> ApiResult<DateWindow> {
    match (query.start_date.as_deref(), query.end_date.as_deref()) {
        (Some(start), Some(end)) if !start.trim().is_empty() && !end.trim().is_empty() => {
            let start = parse_date("startDate", start)?;
            let end = parse_date("endDate", end)?;
            if end < start {
                return Err(ApiError::bad_request("endDate must not be before startDate"));
            }
            Ok(DateWindow {
                start,
                end: Some(end),
            })
        }
        _ => Ok(DateWindow {
            start: today
                .checked_sub_days(Days::new(DEFAULT_LOOKBACK_DAYS))
                .unwrap_or(today),
            end: None,
        }),
    }
}

pub(crate) async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<Value>> {
    let window = summary_window(&query, Utc::now().date_naive())?;
    let rows = state.store.forecast_rows(window).await?;
    let items = rows
        .into_iter()
        .map(|(opportunity, forecast)| enrich(opportunity, forecast))
        .collect();
    let filter = ForecastFilter {
        include_excluded: query.include_excluded.as_deref() == Some("true"),
        owner: non_blank(query.owner),
        customer: non_blank(query.customer),
    };
    let view = build_forecast_view(items, &filter);
    Ok(Json(json!({
        "success": true,
        "data": view,
        "dateRange": { "start": window.start, "end": window.end },
    })))
}

pub(crate) async fn commit_orders_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    let outcome = state.store.commit_orders(Utc::now()).await?;
    info!(
        created = outcome.created,
        updated = outcome.updated,
        total = outcome.total,
        "order opportunities committed"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Committed {} order opportunities to forecast", outcome.total),
        "details": {
            "newRecordsCreated": outcome.created,
            "existingRecordsUpdated": outcome.updated,
            "totalCommitOrders": outcome.total,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use axum::http::{Method, StatusCode};
    use chrono::{TimeZone, Utc};
    use rmsw_core::Opportunity;
    use rmsw_storage::{MemoryStore, PipelineStore};

    fn opportunity(id: i64, days_from_now: i64, owner: &str, status: &str) -> Opportunity {
        let mut opp = Opportunity::new(id, format!("Job {id}"));
        opp.owner_name = Some(owner.to_string());
        opp.organisation_name = Some("Harbour Hotel".to_string());
        opp.opportunity_status = Some(status.to_string());
        opp.starts_at = Some(Utc::now() + chrono::Duration::days(days_from_now));
        opp.charge_total = 1000.0;
        opp.predicted_cost_total = 400.0;
        opp
    }

    async fn seeded() -> (axum::Router, Arc<MemoryStore>) {
        let (app, store) = test_app();
        store.upsert_opportunity(&opportunity(1, 5, "Alex", "Provisional")).await.unwrap();
        store.upsert_opportunity(&opportunity(2, 10, "Blair", "Order")).await.unwrap();
        store.upsert_opportunity(&opportunity(3, -90, "Alex", "Provisional")).await.unwrap();
        (app, store)
    }

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_opportunity_id("42").unwrap(), 42);
        assert!(parse_opportunity_id("abc").is_err());
        assert!(parse_opportunity_id("-3").is_err());
        assert!(parse_opportunity_id("0").is_err());
    }

    #[test]
    fn window_defaults_to_thirty_days_back() {
        let today = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap().date_naive();
        let window = summary_window(&SummaryQuery::default(), today).unwrap();
        assert_eq!(window.start, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(window.end, None);

        let only_start = SummaryQuery {
            start_date: Some("2026-01-01".into()),
            ..Default::default()
        };
        assert_eq!(summary_window(&only_start, today).unwrap().end, None);

        let explicit = SummaryQuery {
            start_date: Some("2026-01-01".into()),
            end_date: Some("2026-01-31".into()),
            ..Default::default()
        };
        let window = summary_window(&explicit, today).unwrap();
        assert_eq!(window.end, NaiveDate::from_ymd_opt(2026, 1, 31));

        let reversed = SummaryQuery {
            start_date: Some("2026-02-01".into()),
            end_date: Some("2026-01-01".into()),
            ..Default::default()
        };
        assert!(summary_window(&reversed, today).is_err());
        let garbage = SummaryQuery {
            start_date: Some("01/02/2026".into()),
            end_date: Some("2026-01-01".into()),
            ..Default::default()
        };
        assert!(summary_window(&garbage, today).is_err());
    }

    #[tokio::test]
    async fn forecast_crud_round_trip() {
        let (app, _) = seeded().await;
        let uri = "/api/opportunities/1/forecast";

        let (status, body) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["forecast"].is_null());
        assert_eq!(body["message"], "No forecast metadata found for this opportunity");

        let (status, body) = call(
            &app,
            Method::POST,
            uri,
            Some(json!({"probability": 60, "is_commit": true, "notes": "verbal yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Forecast metadata saved successfully");
        assert_eq!(body["forecast"]["probability"], 60);
        let created_at = body["forecast"]["created_at"].clone();

        let (status, body) = call(&app, Method::PATCH, uri, Some(json!({"probability": 75}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["forecast"]["probability"], 75);
        assert_eq!(body["forecast"]["is_commit"], false);
        assert_eq!(body["forecast"]["created_at"], created_at);

        let (status, _) = call(&app, Method::DELETE, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::DELETE, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Forecast metadata not found");
    }

    #[tokio::test]
    async fn forecast_validation_errors_are_bad_requests() {
        let (app, _) = seeded().await;
        let uri = "/api/opportunities/1/forecast";

        let (status, body) = call(&app, Method::POST, uri, Some(json!({"probability": 140}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("between 0 and 100"));

        let (status, _) = call(&app, Method::POST, uri, Some(json!({"is_excluded": true}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, Method::GET, "/api/opportunities/xyz/forecast", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid opportunity ID");
    }

    #[tokio::test]
    async fn summary_uses_default_window_and_filters() {
        let (app, _) = seeded().await;
        call(
            &app,
            Method::POST,
            "/api/opportunities/1/forecast",
            Some(json!({"probability": 50})),
        )
        .await;

        let (status, body) = call(&app, Method::GET, "/api/forecast/summary", None).await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        // Opportunity 3 started ninety days ago and falls outside the window.
        assert_eq!(data["summary"]["total_pipeline_count"], 2);
        assert_eq!(data["opportunities"].as_array().unwrap().len(), 2);
        assert_eq!(data["filters"]["owners"], json!(["Alex", "Blair"]));
        assert!(body["dateRange"]["end"].is_null());

        let (_, body) = call(&app, Method::GET, "/api/forecast/summary?owner=Alex", None).await;
        assert_eq!(body["data"]["opportunities"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["opportunities"][0]["id"], 1);
    }

    #[tokio::test]
    async fn commit_orders_reports_created_and_updated() {
        let (app, store) = seeded().await;
        let (status, body) = call(&app, Method::POST, "/api/forecast/commit-orders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["details"]["newRecordsCreated"], 1);
        assert_eq!(body["details"]["existingRecordsUpdated"], 0);
        assert_eq!(body["details"]["totalCommitOrders"], 1);

        let forecast = store.forecast(2).await.unwrap().unwrap();
        assert!(forecast.is_commit);
        assert!(forecast.probability >= 90);
    }
}
