//! Current RMS REST source and record mapping.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use rmsw_core::Opportunity;
use serde_json::Value as JsonValue;

use crate::http::HttpFetcher;
use crate::{AdapterError, OpportunityPage, OpportunitySource, PageQuery};

pub const DEFAULT_BASE_URL: &str = "https://api.current-rms.com/api/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentRmsConfig {
    pub base_url: String,
    pub subdomain: String,
    pub api_key: String,
}

#[derive(Debug)]
pub struct CurrentRmsSource {
    config: CurrentRmsConfig,
    http: HttpFetcher,
}

impl CurrentRmsSource {
    pub fn new(config: CurrentRmsConfig, http: HttpFetcher) -> Self {
        Self { config, http }
    }

    pub fn page_url(&self, query: &PageQuery) -> Result<Url, AdapterError> {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/opportunities"))
            .map_err(|e| AdapterError::Config(format!("invalid base url {base}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("page", &query.page.to_string());
            pairs.append_pair("per_page", &query.per_page.to_string());
            if let Some(since) = query.updated_since {
                pairs.append_pair(
                    "q[updated_at_gt]",
                    &since.to_rfc3339_opts(SecondsFormat::Secs, true),
                );
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl OpportunitySource for CurrentRmsSource {
    fn name(&self) -> &'static str {
        "current-rms"
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<OpportunityPage, AdapterError> {
        let url = self.page_url(query)?;
        let body = self
            .http
            .get_json(
                url.as_str(),
                &[
                    ("X-SUBDOMAIN", self.config.subdomain.as_str()),
                    ("X-AUTH-TOKEN", self.config.api_key.as_str()),
                    ("Accept", "application/json"),
                ],
            )
            .await?;
        parse_page(body)
    }
}

/// Split an `/opportunities` response into raw records and the reported total.
pub fn parse_page(mut body: JsonValue) -> Result<OpportunityPage, AdapterError> {
    let total_count = body
        .pointer("/meta/total_row_count")
        .and_then(json_u64);
    let records = match body.get_mut("opportunities").map(JsonValue::take) {
        Some(JsonValue::Array(items)) => items,
        Some(other) => {
            return Err(AdapterError::Decode(format!(
                "`opportunities` is not an array: {other}"
            )))
        }
        None => return Err(AdapterError::Decode("missing `opportunities` key".into())),
    };
    Ok(OpportunityPage {
        records,
        total_count,
    })
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    (!cur.is_null()).then_some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_str(value, path).map(ToString::to_string)
}

/// Numbers may arrive as JSON numbers or as decimal strings ("1250.00").
fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_u64(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_time(value: &JsonValue, path: &[&str]) -> Result<Option<DateTime<Utc>>, AdapterError> {
    let Some(raw) = json_str(value, path) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| AdapterError::Mapping(format!("{}: bad timestamp {raw:?}: {e}", path.join("."))))
}

fn money(value: &JsonValue, field: &str) -> Result<f64, AdapterError> {
    match json_at(value, &[field]) {
        None => Ok(0.0),
        Some(_) => json_f64(value, &[field])
            .ok_or_else(|| AdapterError::Mapping(format!("{field} is not numeric"))),
    }
}

/// Map one remote opportunity record onto the local replica shape.
pub fn map_remote_opportunity(
    record: &JsonValue,
    synced_at: DateTime<Utc>,
) -> Result<Opportunity, AdapterError> {
    let id = json_i64(record, &["id"])
        .ok_or_else(|| AdapterError::Mapping("record has no usable id".into()))?;
    let subject = json_string(record, &["subject"]);
    let name = json_string(record, &["name"])
        .or_else(|| json_string(record, &["number"]))
        .or_else(|| subject.clone())
        .unwrap_or_else(|| format!("Opportunity {id}"));

    Ok(Opportunity {
        id,
        name,
        subject,
        organisation_name: json_string(record, &["organisation_name"])
            .or_else(|| json_string(record, &["member", "name"])),
        owner_name: json_string(record, &["owner_name"])
            .or_else(|| json_string(record, &["owner", "name"])),
        starts_at: json_time(record, &["starts_at"])?,
        ends_at: json_time(record, &["ends_at"])?,
        opportunity_status: json_string(record, &["opportunity_status"])
            .or_else(|| json_string(record, &["status_name"])),
        charge_total: money(record, "charge_total")?,
        provisional_cost_total: money(record, "provisional_cost_total")?,
        predicted_cost_total: money(record, "predicted_cost_total")?,
        actual_cost_total: money(record, "actual_cost_total")?,
        updated_at: json_time(record, &["updated_at"])?,
        synced_at: Some(synced_at),
    })
}
