//! Static weighted risk scoring over eight 1–5 factor scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl RiskLevel {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// `None` means not assessed (score of zero).
    pub fn from_score(score: f64) -> Option<Self> {
        if score == 0.0 {
            None
        } else if score <= 2.0 {
            Some(Self::Low)
        } else if score <= 3.0 {
            Some(Self::Medium)
        } else if score <= 4.0 {
            Some(Self::High)
        } else {
            Some(Self::Critical)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleStep {
    pub value: u8,
    pub label: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskFactor {
    pub id: &'static str,
    pub label: &'static str,
    pub weight: f64,
    pub scale: [ScaleStep; 5],
}

const fn step(value: u8, label: &'static str, description: &'static str) -> ScaleStep {
    ScaleStep {
        value,
        label,
        description,
    }
}

pub const RISK_FACTORS: [RiskFactor; 8] = [
    RiskFactor {
        id: "risk_project_novelty",
        label: "Project Type Familiarity",
        weight: 1.2,
        scale: [
            step(1, "Routine", "Standard project we do regularly"),
            step(2, "Familiar", "Similar to past projects"),
            step(3, "Moderate", "Some new elements"),
            step(4, "Novel", "Significantly different from usual"),
            step(5, "Entirely New", "Never done before"),
        ],
    },
    RiskFactor {
        id: "risk_technical_complexity",
        label: "Technical Complexity",
        weight: 1.3,
        scale: [
            step(1, "Simple", "Basic setup, standard equipment"),
            step(2, "Straightforward", "Minor technical challenges"),
            step(3, "Moderate", "Some complex systems"),
            step(4, "Complex", "Advanced technical requirements"),
            step(5, "Bleeding Edge", "Cutting-edge/experimental tech"),
        ],
    },
    RiskFactor {
        id: "risk_resource_utilization",
        label: "Resource Utilization",
        weight: 1.1,
        scale: [
            step(1, "0-25%", "Minimal resource commitment"),
            step(2, "25-50%", "Moderate resource use"),
            step(3, "50-65%", "Significant resource allocation"),
            step(4, "65-75%", "High resource utilization"),
            step(5, "75%+", "Near maximum capacity"),
        ],
    },
    RiskFactor {
        id: "risk_client_sophistication",
        label: "Client Experience Level",
        weight: 0.9,
        scale: [
            step(1, "Highly Experienced", "Knows exactly what they want"),
            step(2, "Experienced", "Familiar with events"),
            step(3, "Moderate", "Some event experience"),
            step(4, "Limited", "First few events"),
            step(5, "First-Time", "Never organized event before"),
        ],
    },
    RiskFactor {
        id: "risk_budget_size",
        label: "Budget Scale",
        weight: 1.0,
        scale: [
            step(1, "<$5,000", "Small budget"),
            step(2, "$5k-$20k", "Medium budget"),
            step(3, "$20k-$50k", "Large budget"),
            step(4, "$50k-$100k", "Very large budget"),
            step(5, "$100k+", "Major project"),
        ],
    },
    RiskFactor {
        id: "risk_timeframe_constraint",
        label: "Timeline Pressure",
        weight: 1.2,
        scale: [
            step(1, "Ample Time", "Plenty of lead time"),
            step(2, "Normal", "Standard timeline"),
            step(3, "Tight", "Limited preparation time"),
            step(4, "Very Tight", "Minimal lead time"),
            step(5, "Rush/Emergency", "Last minute request"),
        ],
    },
    RiskFactor {
        id: "risk_team_experience",
        label: "Team Capability",
        weight: 1.3,
        scale: [
            step(1, "Expert", "Highly experienced team"),
            step(2, "Experienced", "Competent team"),
            step(3, "Adequate", "Mixed experience levels"),
            step(4, "Limited", "Newer team members"),
            step(5, "Inexperienced", "Largely untrained team"),
        ],
    },
    RiskFactor {
        id: "risk_subhire_availability",
        label: "Sub-hire Availability",
        weight: 1.1,
        scale: [
            step(1, "Multiple Vendors", "Many options available"),
            step(2, "Several Options", "Good availability"),
            step(3, "Limited Options", "Few vendors available"),
            step(4, "Very Limited", "Scarce availability"),
            step(5, "None Available", "No sub-hire options"),
        ],
    },
];

/// Factor scores keyed by the factor ids in [`RISK_FACTORS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScores {
    pub risk_project_novelty: Option<u8>,
    pub risk_technical_complexity: Option<u8>,
    pub risk_resource_utilization: Option<u8>,
    pub risk_client_sophistication: Option<u8>,
    pub risk_budget_size: Option<u8>,
    pub risk_timeframe_constraint: Option<u8>,
    pub risk_team_experience: Option<u8>,
    pub risk_subhire_availability: Option<u8>,
}

impl RiskScores {
    pub fn get(&self, factor_id: &str) -> Option<u8> {
        match factor_id {
            "risk_project_novelty" => self.risk_project_novelty,
            "risk_technical_complexity" => self.risk_technical_complexity,
            "risk_resource_utilization" => self.risk_resource_utilization,
            "risk_client_sophistication" => self.risk_client_sophistication,
            "risk_budget_size" => self.risk_budget_size,
            "risk_timeframe_constraint" => self.risk_timeframe_constraint,
            "risk_team_experience" => self.risk_team_experience,
            "risk_subhire_availability" => self.risk_subhire_availability,
            _ => None,
        }
    }

    /// Scores in [`RISK_FACTORS`] order.
    pub fn as_array(&self) -> [Option<u8>; 8] {
        [
            self.risk_project_novelty,
            self.risk_technical_complexity,
            self.risk_resource_utilization,
            self.risk_client_sophistication,
            self.risk_budget_size,
            self.risk_timeframe_constraint,
            self.risk_team_experience,
            self.risk_subhire_availability,
        ]
    }

    pub fn from_array(values: [Option<u8>; 8]) -> Self {
        let [a, b, c, d, e, f, g, h] = values;
        Self {
            risk_project_novelty: a,
            risk_technical_complexity: b,
            risk_resource_utilization: c,
            risk_client_sophistication: d,
            risk_budget_size: e,
            risk_timeframe_constraint: f,
            risk_team_experience: g,
            risk_subhire_availability: h,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("risk score for {factor} must be an integer between 1 and 5 (got {value})")]
pub struct RiskScoreOutOfRange {
    pub factor: &'static str,
    pub value: u8,
}

pub fn validate_risk_scores(scores: &RiskScores) -> Result<(), RiskScoreOutOfRange> {
    for factor in &RISK_FACTORS {
        if let Some(value) = scores.get(factor.id) {
            if !(1..=5).contains(&value) {
                return Err(RiskScoreOutOfRange {
                    factor: factor.id,
                    value,
                });
            }
        }
    }
    Ok(())
}

/// Weighted average of the factors that carry a score, rounded to two decimals.
pub fn calculate_risk_score(scores: &RiskScores) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for factor in &RISK_FACTORS {
        if let Some(score) = scores.get(factor.id) {
            weighted += f64::from(score) * factor.weight;
            total_weight += factor.weight;
        }
    }
    if total_weight == 0.0 {
        return 0.0;
    }
    ((weighted / total_weight) * 100.0).round() / 100.0
}

pub fn approval_level(score: f64) -> &'static str {
    if score == 0.0 {
        "Not assessed"
    } else if score <= 2.0 {
        "Project Manager"
    } else if score <= 3.0 {
        "Senior Manager"
    } else if score <= 4.0 {
        "Operations Director"
    } else {
        "Executive Approval Required"
    }
}

/// True when never assessed or the opportunity changed after the last assessment.
pub fn needs_risk_review(
    opportunity_updated_at: DateTime<Utc>,
    risk_last_updated: Option<DateTime<Utc>>,
) -> bool {
    match risk_last_updated {
        None => true,
        Some(assessed) => opportunity_updated_at > assessed,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(flatten)]
    pub scores: RiskScores,
    pub risk_score: f64,
    pub risk_level: Option<RiskLevel>,
    pub risk_reviewed: Option<String>,
    pub risk_mitigation_plan: Option<i32>,
    pub risk_mitigation_notes: Option<String>,
    pub risk_last_updated: Option<DateTime<Utc>>,
}

/// Write payload for a risk assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskInput {
    #[serde(flatten)]
    pub scores: RiskScores,
    pub risk_reviewed: Option<String>,
    pub risk_mitigation_plan: Option<i32>,
    pub risk_mitigation_notes: Option<String>,
}

impl RiskInput {
    pub fn assess(self, now: DateTime<Utc>) -> Result<RiskAssessment, RiskScoreOutOfRange> {
        validate_risk_scores(&self.scores)?;
        let risk_score = calculate_risk_score(&self.scores);
        Ok(RiskAssessment {
            scores: self.scores,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            risk_reviewed: self.risk_reviewed,
            risk_mitigation_plan: self.risk_mitigation_plan,
            risk_mitigation_notes: self.risk_mitigation_notes,
            risk_last_updated: Some(now),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummaryRow {
    pub level: Option<RiskLevel>,
    pub count: u64,
    pub total_value: f64,
}
