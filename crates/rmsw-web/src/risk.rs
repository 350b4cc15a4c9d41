use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use rmsw_core::risk::{approval_level, RiskInput};
use rmsw_core::RiskLevel;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::forecast::parse_opportunity_id;
use crate::{ApiError, ApiResult, AppState};

const DEFAULT_RISK_LIMIT: usize = 100;
const MAX_RISK_LIMIT: usize = 1000;

pub(crate) async fn assess_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let id = parse_opportunity_id(&raw_id)?;
    let input: RiskInput = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?;
    let assessment = input
        .assess(Utc::now())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if !state.store.save_risk_assessment(id, &assessment).await? {
        return Err(ApiError::not_found("Opportunity not found"));
    }
    info!(
        opportunity_id = id,
        score = assessment.risk_score,
        level = assessment.risk_level.map(RiskLevel::as_str).unwrap_or("unscored"),
        "risk assessment saved"
    );
    Ok(Json(json!({
        "success": true,
        "message": "Risk assessment saved",
        "approvalLevel": approval_level(assessment.risk_score),
        "data": assessment,
    })))
}

pub(crate) async fn summary_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let rows = state.store.risk_summary().await?;
    Ok(Json(json!({ "success": true, "data": rows })))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RiskListQuery {
    level: Option<String>,
    limit: Option<String>,
}

/// Absent, empty and `null` all select unscored opportunities.
pub(crate) fn parse_level(raw: Option<&str>) -> ApiResult<Option<RiskLevel>> {
    match raw.map(str::trim) {
        None | Some("") | Some("null") => Ok(None),
        Some(other) => RiskLevel::parse(other)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown risk level {other:?}"))),
    }
}

/// Unparseable or zero limits fall back to the default.
pub(crate) fn risk_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_RISK_LIMIT)
        .min(MAX_RISK_LIMIT)
}

pub(crate) async fn opportunities_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RiskListQuery>,
) -> ApiResult<Json<Value>> {
    let level = parse_level(query.level.as_deref())?;
    let limit = risk_limit(query.limit.as_deref());
    let rows = state.store.opportunities_by_risk_level(level, limit).await?;
    Ok(Json(json!({
        "success": true,
        "count": rows.len(),
        "data": rows,
    })))
}
