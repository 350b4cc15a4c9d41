//! Core domain model for the Current RMS watcher: mirrored opportunities,
//! forecast overlays, risk assessments, webhook events and sync runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod forecast;
pub mod risk;

pub use forecast::{
    ForecastInput, ForecastMetadata, ForecastStatus, ForecastValidationError,
    OpportunityWithForecast,
};
pub use risk::{RiskAssessment, RiskLevel, RiskScores};

pub const CRATE_NAME: &str = "rmsw-core";

/// Opportunity status that marks a confirmed order in the remote system.
pub const ORDER_STATUS: &str = "order";

/// Read-mostly replica of an opportunity owned by the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: i64,
    pub name: String,
    pub subject: Option<String>,
    pub organisation_name: Option<String>,
    pub owner_name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub opportunity_status: Option<String>,
    pub charge_total: f64,
    pub provisional_cost_total: f64,
    pub predicted_cost_total: f64,
    pub actual_cost_total: f64,
    /// Last modification time reported by the remote system.
    pub updated_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    /// Minimal record; remaining fields default to empty/zero.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            subject: None,
            organisation_name: None,
            owner_name: None,
            starts_at: None,
            ends_at: None,
            opportunity_status: None,
            charge_total: 0.0,
            provisional_cost_total: 0.0,
            predicted_cost_total: 0.0,
            actual_cost_total: 0.0,
            updated_at: None,
            synced_at: None,
        }
    }

    pub fn is_order(&self) -> bool {
        self.opportunity_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(ORDER_STATUS))
    }

    pub fn display_name(&self) -> &str {
        self.subject
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

/// One inbound webhook delivery as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEvent {
    pub id: Uuid,
    pub opportunity_id: i64,
    pub opportunity_name: String,
    pub customer_name: String,
    pub user_id: i64,
    pub user_name: String,
    pub action_type: String,
    pub new_status: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    pub error: Option<String>,
}

/// Aggregate counts over the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventCounts {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub total_events: u64,
    pub successful_events: u64,
    pub failed_events: u64,
    /// Seconds since the server started.
    pub uptime: u64,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl HealthMetrics {
    pub fn from_counts(counts: EventCounts, uptime: u64) -> Self {
        Self {
            total_events: counts.total,
            successful_events: counts.successful,
            failed_events: counts.failed,
            uptime,
            last_event_time: counts.last_event_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    InitialSync,
    IncrementalSync,
}

impl SyncType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitialSync => "initial_sync",
            Self::IncrementalSync => "incremental_sync",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initial_sync" => Some(Self::InitialSync),
            "incremental_sync" => Some(Self::IncrementalSync),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Record of one bulk or incremental synchronization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_synced: u64,
    pub records_failed: u64,
    pub error: Option<String>,
}

impl SyncRun {
    pub fn start(sync_type: SyncType, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sync_type,
            status: SyncStatus::Running,
            started_at,
            completed_at: None,
            records_synced: 0,
            records_failed: 0,
            error: None,
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = SyncStatus::Completed;
        self.completed_at = Some(at);
    }

    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.completed_at = Some(at);
        self.error = Some(error.into());
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds().max(0) / 1000)
    }
}
