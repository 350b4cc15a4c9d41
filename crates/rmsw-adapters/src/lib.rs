//! Inbound and outbound integration with Current RMS: webhook payloads, the
//! paged opportunity source contract, and a fixture-backed source for tests
//! and offline demos.

use std::fs;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod current_rms;
pub mod http;
pub mod webhook;

pub use current_rms::{map_remote_opportunity, CurrentRmsConfig, CurrentRmsSource};
pub use http::{FetchError, HttpClientConfig, HttpFetcher};
pub use webhook::{test_payload, WebhookAction, WebhookPayload};

pub const CRATE_NAME: &str = "rmsw-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected response shape: {0}")]
    Decode(String),
    #[error("unmappable record: {0}")]
    Mapping(String),
    #[error("source misconfigured: {0}")]
    Config(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
    pub updated_since: Option<DateTime<Utc>>,
}

/// Raw records of one page; mapping happens per record so a bad row does
/// not sink the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpportunityPage {
    pub records: Vec<JsonValue>,
    pub total_count: Option<u64>,
}

#[async_trait]
pub trait OpportunitySource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_page(&self, query: &PageQuery) -> Result<OpportunityPage, AdapterError>;
}

/// Serves a fixed list of remote-shaped records, honouring paging and the
/// `updated_since` filter the way the live API does.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    records: Vec<JsonValue>,
}

impl FixtureSource {
    pub fn new(records: Vec<JsonValue>) -> Self {
        Self { records }
    }

    /// Load a captured `/opportunities` response body.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let body: JsonValue =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        let page = current_rms::parse_page(body)
            .with_context(|| format!("decoding fixture {}", path.display()))?;
        Ok(Self::new(page.records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn updated_after(record: &JsonValue, since: DateTime<Utc>) -> bool {
        record
            .get("updated_at")
            .and_then(JsonValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .is_none_or(|t| t.with_timezone(&Utc) > since)
    }
}

#[async_trait]
impl OpportunitySource for FixtureSource {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, query: &PageQuery) -> Result<OpportunityPage, AdapterError> {
        if query.page == 0 || query.per_page == 0 {
            return Err(AdapterError::Config("page and per_page start at 1".into()));
        }
        let matching: Vec<&JsonValue> = self
            .records
            .iter()
            .filter(|r| query.updated_since.is_none_or(|since| Self::updated_after(r, since)))
            .collect();
        let per_page = query.per_page as usize;
        let start = (query.page as usize - 1) * per_page;
        let records = matching
            .iter()
            .skip(start)
            .take(per_page)
            .map(|r| (*r).clone())
            .collect();
        Ok(OpportunityPage {
            records,
            total_count: Some(matching.len() as u64),
        })
    }
}
