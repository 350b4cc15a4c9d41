//! JSON client tuned for the Current RMS API: paced to its request budget,
//! honouring `Retry-After` on throttling and surfacing its `errors` bodies.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info_span, warn, Instrument};

/// What to do with a non-success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 429; the API usually says how long to back off.
    Throttled { retry_after: Option<Duration> },
    /// 5xx, including maintenance 503s that may also carry `Retry-After`.
    Unavailable { retry_after: Option<Duration> },
    /// Bad credentials, unknown subdomain, validation errors.
    Rejected,
}

impl Verdict {
    pub fn from_response(status: StatusCode, headers: &HeaderMap, now: DateTime<Utc>) -> Self {
        let hint = || retry_after(headers, now);
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::Throttled { retry_after: hint() }
        } else if status.is_server_error() {
            Self::Unavailable { retry_after: hint() }
        } else {
            Self::Rejected
        }
    }

    fn server_hint(self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } | Self::Unavailable { retry_after } => retry_after,
            Self::Rejected => None,
        }
    }
}

/// `Retry-After` as delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Pull the human messages out of a Current RMS error body
/// (`{"errors": ["..."]}` or `{"errors": {"field": ["..."]}}`).
pub fn api_error_message(body: &str) -> Option<String> {
    let value: JsonValue = serde_json::from_str(body).ok()?;
    let mut messages = Vec::new();
    match value.get("errors")? {
        JsonValue::Array(items) => {
            messages.extend(items.iter().filter_map(JsonValue::as_str).map(str::to_string))
        }
        JsonValue::Object(fields) => {
            for (field, errs) in fields {
                let errs = errs.as_array().into_iter().flatten().filter_map(JsonValue::as_str);
                messages.extend(errs.map(|e| format!("{field} {e}")));
            }
        }
        JsonValue::String(message) => messages.push(message.clone()),
        _ => {}
    }
    (!messages.is_empty()).then(|| messages.join("; "))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Longest server-requested pause we are willing to sit through.
    pub max_server_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            max_server_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Server hint wins when present, otherwise doubling from `base_delay`.
    pub fn wait_before_retry(&self, attempt: usize, hint: Option<Duration>) -> Duration {
        match hint {
            Some(wait) => wait.min(self.max_server_wait),
            None => {
                let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

/// Spaces requests at least `interval` apart across all callers.
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn wait_turn(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Push every later request back, e.g. after a 429.
    pub async fn hold_for(&self, wait: Duration) {
        let mut next = self.next_slot.lock().await;
        *next = (*next).max(Instant::now() + wait);
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    /// Current RMS allows 60 requests a minute per API key.
    pub min_interval: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetryPolicy::default(),
            min_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Current RMS returned {status} for {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },
    #[error("invalid header {0}")]
    Header(String),
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    pacer: RequestPacer,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            pacer: RequestPacer::new(config.min_interval),
            retry: config.retry,
        })
    }

    /// GET `url` and decode the body as JSON, retrying throttling and
    /// outages.
    pub async fn get_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<JsonValue, FetchError> {
        let header_map = build_headers(headers)?;

        async {
            let mut attempt = 0;
            loop {
                self.pacer.wait_turn().await;
                let result = self
                    .client
                    .get(url)
                    .headers(header_map.clone())
                    .send()
                    .await;

                let (reason, hint) = match result {
                    Ok(resp) if resp.status().is_success() => {
                        return resp.json().await.map_err(FetchError::from);
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let verdict = Verdict::from_response(status, resp.headers(), Utc::now());
                        if verdict == Verdict::Rejected || attempt >= self.retry.max_retries {
                            let url = resp.url().to_string();
                            let body = resp.text().await.unwrap_or_default();
                            let message = api_error_message(&body).unwrap_or_else(|| {
                                status.canonical_reason().unwrap_or("error").to_string()
                            });
                            return Err(FetchError::Api {
                                status: status.as_u16(),
                                url,
                                message,
                            });
                        }
                        (format!("status {status}"), verdict.server_hint())
                    }
                    Err(err) => {
                        let transient = err.is_timeout() || err.is_connect();
                        if !transient || attempt >= self.retry.max_retries {
                            return Err(FetchError::Request(err));
                        }
                        (err.to_string(), None)
                    }
                };

                let wait = self.retry.wait_before_retry(attempt, hint);
                if hint.is_some() {
                    self.pacer.hold_for(wait).await;
                }
                warn!(attempt, ?wait, reason = %reason, "retrying Current RMS request");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
        .instrument(info_span!("http_get", url))
        .await
    }
}

fn build_headers(headers: &[(&str, &str)]) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::Header((*name).to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| FetchError::Header(name.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}
