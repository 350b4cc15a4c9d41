//! Current RMS webhook payloads.
//!
//! Deliveries are parsed leniently: every field is optional so a partially
//! populated action still produces a logged event.

use chrono::{DateTime, Utc};
use rmsw_core::ProcessedEvent;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const OPPORTUNITY_SUBJECT: &str = "Opportunity";
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub action: WebhookAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookAction {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(deserialize_with = "lenient_id")]
    pub subject_id: Option<i64>,
    pub subject_type: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub member_id: Option<i64>,
    pub action_type: Option<String>,
    pub name: Option<String>,
    pub member: Option<WebhookMember>,
    pub subject: Option<WebhookSubject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookMember {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSubject {
    pub name: Option<String>,
    pub organisation_name: Option<String>,
    pub opportunity_status: Option<String>,
}

/// Ids arrive as numbers or numeric strings; anything else reads as absent.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        Some(JsonValue::Number(n)) => n.as_i64(),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

impl WebhookAction {
    /// Absent subject type is treated as an opportunity.
    pub fn is_opportunity(&self) -> bool {
        self.subject_type
            .as_deref()
            .is_none_or(|t| t.eq_ignore_ascii_case(OPPORTUNITY_SUBJECT))
    }

    pub fn into_event(self, now: DateTime<Utc>) -> ProcessedEvent {
        let subject = self.subject.unwrap_or_default();
        let member = self.member.unwrap_or_default();
        let error = match self.subject_id {
            Some(_) => None,
            None => Some("Missing subject_id in webhook payload".to_string()),
        };

        ProcessedEvent {
            id: Uuid::new_v4(),
            opportunity_id: self.subject_id.unwrap_or(0),
            opportunity_name: non_blank(subject.name.as_deref())
                .or(non_blank(self.name.as_deref()))
                .unwrap_or(UNKNOWN)
                .to_string(),
            customer_name: non_blank(subject.organisation_name.as_deref())
                .unwrap_or(UNKNOWN)
                .to_string(),
            user_id: member.id.or(self.member_id).unwrap_or(0),
            user_name: non_blank(member.name.as_deref())
                .unwrap_or(UNKNOWN)
                .to_string(),
            action_type: non_blank(self.action_type.as_deref())
                .unwrap_or("unknown")
                .to_string(),
            new_status: subject.opportunity_status,
            timestamp: now,
            processed: error.is_none(),
            error,
        }
    }
}

/// Synthetic opportunity delivery used by the diagnostics endpoints.
pub fn test_payload(action_type: &str, subject_id: i64) -> WebhookPayload {
    WebhookPayload {
        action: WebhookAction {
            id: Some(Utc::now().timestamp_subsec_micros() as i64 % 10_000),
            subject_id: Some(subject_id),
            subject_type: Some(OPPORTUNITY_SUBJECT.to_string()),
            member_id: Some(1),
            action_type: Some(action_type.to_string()),
            name: Some("Test Opportunity".to_string()),
            member: Some(WebhookMember {
                id: Some(1),
                name: Some("Test User".to_string()),
            }),
            subject: Some(WebhookSubject {
                name: Some("Test Opportunity".to_string()),
                organisation_name: Some("Test Customer".to_string()),
                opportunity_status: Some("Provisional".to_string()),
            }),
        },
    }
}
