//! Forecast math layered over mirrored opportunities.
//!
//! Weighted value = effective value × probability / 100, where an explicit
//! revenue/profit override always wins over the synced base figure.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Opportunity;

pub const UNASSIGNED: &str = "Unassigned";

/// User-entered forecast overlay, one row per opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetadata {
    pub opportunity_id: i64,
    pub probability: u8,
    pub is_commit: bool,
    pub revenue_override: Option<f64>,
    pub profit_override: Option<f64>,
    pub is_excluded: bool,
    pub exclusion_reason: Option<String>,
    pub notes: Option<String>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ForecastMetadata {
    /// Metadata created for confirmed orders: certain and committed.
    pub fn committed_order(opportunity_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            opportunity_id,
            probability: 100,
            is_commit: true,
            revenue_override: None,
            profit_override: None,
            is_excluded: false,
            exclusion_reason: None,
            notes: None,
            last_reviewed_at: None,
            reviewed_by: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

/// Write payload for the forecast endpoint. Absent fields fall back to
/// defaults on save; the stored row is fully replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastInput {
    pub probability: Option<i64>,
    pub is_commit: Option<bool>,
    pub revenue_override: Option<f64>,
    pub profit_override: Option<f64>,
    pub is_excluded: Option<bool>,
    pub exclusion_reason: Option<String>,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastValidationError {
    #[error("Probability must be between 0 and 100 (got {0})")]
    ProbabilityOutOfRange(i64),
    #[error("Exclusion reason is required when marking as excluded")]
    MissingExclusionReason,
}

impl ForecastInput {
    pub fn validate(&self) -> Result<u8, ForecastValidationError> {
        let probability = match self.probability {
            None => 0,
            Some(p) if (0..=100).contains(&p) => p as u8,
            Some(p) => return Err(ForecastValidationError::ProbabilityOutOfRange(p)),
        };
        let excluded = self.is_excluded.unwrap_or(false);
        let has_reason = self
            .exclusion_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if excluded && !has_reason {
            return Err(ForecastValidationError::MissingExclusionReason);
        }
        Ok(probability)
    }

    /// Validate and materialize the row that replaces any existing metadata.
    pub fn into_metadata(
        self,
        opportunity_id: i64,
        now: DateTime<Utc>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<ForecastMetadata, ForecastValidationError> {
        let probability = self.validate()?;
        Ok(ForecastMetadata {
            opportunity_id,
            probability,
            is_commit: self.is_commit.unwrap_or(false),
            revenue_override: self.revenue_override,
            profit_override: self.profit_override,
            is_excluded: self.is_excluded.unwrap_or(false),
            exclusion_reason: self.exclusion_reason,
            notes: self.notes,
            last_reviewed_at: Some(now),
            reviewed_by: self.reviewed_by,
            created_at: created_at.or(Some(now)),
            updated_at: Some(now),
        })
    }
}

pub fn base_profit(revenue: f64, cost: f64) -> f64 {
    revenue - cost
}

pub fn margin(profit: f64, revenue: f64) -> f64 {
    if revenue == 0.0 {
        0.0
    } else {
        profit / revenue
    }
}

pub fn weighted_value(value: f64, probability: u8) -> f64 {
    value * f64::from(probability) / 100.0
}

pub fn effective_revenue(base_revenue: f64, forecast: Option<&ForecastMetadata>) -> f64 {
    forecast
        .and_then(|f| f.revenue_override)
        .unwrap_or(base_revenue)
}

pub fn effective_profit(base_profit: f64, forecast: Option<&ForecastMetadata>) -> f64 {
    forecast
        .and_then(|f| f.profit_override)
        .unwrap_or(base_profit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastStatus {
    Commit,
    Upside,
    Unreviewed,
    Excluded,
}

impl ForecastStatus {
    pub fn of(forecast: Option<&ForecastMetadata>) -> Self {
        match forecast {
            None => Self::Unreviewed,
            Some(f) if f.is_excluded => Self::Excluded,
            Some(f) if f.is_commit => Self::Commit,
            Some(_) => Self::Upside,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Commit => "Commit",
            Self::Upside => "Upside",
            Self::Unreviewed => "Unreviewed",
            Self::Excluded => "Excluded",
        }
    }
}

/// An opportunity enriched with its forecast overlay and derived figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityWithForecast {
    #[serde(flatten)]
    pub opportunity: Opportunity,
    pub forecast: Option<ForecastMetadata>,
    pub status: ForecastStatus,
    pub base_profit: f64,
    pub base_margin: f64,
    pub effective_revenue: f64,
    pub effective_profit: f64,
    pub weighted_revenue: f64,
    pub weighted_profit: f64,
}

impl OpportunityWithForecast {
    pub fn probability(&self) -> u8 {
        self.forecast.as_ref().map_or(0, |f| f.probability)
    }

    pub fn is_excluded(&self) -> bool {
        self.status == ForecastStatus::Excluded
    }
}

pub fn enrich(opportunity: Opportunity, forecast: Option<ForecastMetadata>) -> OpportunityWithForecast {
    let profit = base_profit(opportunity.charge_total, opportunity.provisional_cost_total);
    let base_margin = margin(profit, opportunity.charge_total);
    let revenue = effective_revenue(opportunity.charge_total, forecast.as_ref());
    let eff_profit = effective_profit(profit, forecast.as_ref());
    let probability = forecast.as_ref().map_or(0, |f| f.probability);
    OpportunityWithForecast {
        status: ForecastStatus::of(forecast.as_ref()),
        base_profit: profit,
        base_margin,
        effective_revenue: revenue,
        effective_profit: eff_profit,
        weighted_revenue: weighted_value(revenue, probability),
        weighted_profit: weighted_value(eff_profit, probability),
        opportunity,
        forecast,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbabilityBand {
    Low,
    Possible,
    Likely,
    Probable,
}

impl ProbabilityBand {
    pub const ALL: [Self; 4] = [Self::Low, Self::Possible, Self::Likely, Self::Probable];

    pub fn of(probability: u8) -> Self {
        match probability {
            0..=24 => Self::Low,
            25..=49 => Self::Possible,
            50..=74 => Self::Likely,
            _ => Self::Probable,
        }
    }

    pub fn bounds(self) -> (u8, u8) {
        match self {
            Self::Low => (0, 24),
            Self::Possible => (25, 49),
            Self::Likely => (50, 74),
            Self::Probable => (75, 100),
        }
    }

    pub fn label(self) -> String {
        let (lo, hi) = self.bounds();
        format!("{lo}-{hi}%")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub total_pipeline_count: usize,
    pub total_pipeline_revenue: f64,
    pub weighted_revenue: f64,
    pub weighted_profit: f64,
    pub commit_count: usize,
    pub commit_revenue: f64,
    pub upside_count: usize,
    pub upside_revenue: f64,
    pub unreviewed_count: usize,
    pub unreviewed_revenue: f64,
    pub excluded_count: usize,
    pub excluded_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastByOwner {
    pub owner_name: String,
    pub pipeline_revenue: f64,
    pub weighted_revenue: f64,
    pub commit_revenue: f64,
    pub upside_revenue: f64,
    pub avg_probability: f64,
    pub opportunity_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastByCustomer {
    pub organisation_name: String,
    pub pipeline_revenue: f64,
    pub weighted_revenue: f64,
    pub avg_probability: f64,
    pub opportunity_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastByProbabilityBand {
    pub band: String,
    pub min_probability: u8,
    pub max_probability: u8,
    pub count: usize,
    pub revenue: f64,
    pub weighted_revenue: f64,
}

pub fn summarize(items: &[OpportunityWithForecast]) -> ForecastSummary {
    let mut summary = ForecastSummary::default();
    for item in items {
        let revenue = item.effective_revenue;
        match item.status {
            ForecastStatus::Excluded => {
                summary.excluded_count += 1;
                summary.excluded_revenue += revenue;
                continue;
            }
            ForecastStatus::Commit => {
                summary.commit_count += 1;
                summary.commit_revenue += revenue;
            }
            ForecastStatus::Upside => {
                summary.upside_count += 1;
                summary.upside_revenue += revenue;
            }
            ForecastStatus::Unreviewed => {
                summary.unreviewed_count += 1;
                summary.unreviewed_revenue += revenue;
            }
        }
        summary.total_pipeline_count += 1;
        summary.total_pipeline_revenue += revenue;
        summary.weighted_revenue += item.weighted_revenue;
        summary.weighted_profit += item.weighted_profit;
    }
    summary
}

#[derive(Default)]
struct GroupAcc {
    pipeline: f64,
    weighted: f64,
    commit: f64,
    upside: f64,
    probability_sum: f64,
    count: usize,
}

impl GroupAcc {
    fn push(&mut self, item: &OpportunityWithForecast) {
        self.pipeline += item.effective_revenue;
        self.weighted += item.weighted_revenue;
        match item.status {
            ForecastStatus::Commit => self.commit += item.effective_revenue,
            ForecastStatus::Upside => self.upside += item.effective_revenue,
            _ => {}
        }
        self.probability_sum += f64::from(item.probability());
        self.count += 1;
    }

    fn avg_probability(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.probability_sum / self.count as f64
        }
    }
}

fn group_by<'a>(
    items: &'a [OpportunityWithForecast],
    key: impl Fn(&'a OpportunityWithForecast) -> Option<&'a str>,
) -> Vec<(String, GroupAcc)> {
    let mut groups: BTreeMap<String, GroupAcc> = BTreeMap::new();
    for item in items.iter().filter(|i| !i.is_excluded()) {
        let name = key(item)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNASSIGNED);
        groups.entry(name.to_string()).or_default().push(item);
    }
    let mut out: Vec<_> = groups.into_iter().collect();
    // BTreeMap already yields names in order; a stable sort keeps ties alphabetical.
    out.sort_by(|a, b| b.1.pipeline.total_cmp(&a.1.pipeline));
    out
}

pub fn by_owner(items: &[OpportunityWithForecast]) -> Vec<ForecastByOwner> {
    group_by(items, |i| i.opportunity.owner_name.as_deref())
        .into_iter()
        .map(|(owner_name, acc)| ForecastByOwner {
            owner_name,
            pipeline_revenue: acc.pipeline,
            weighted_revenue: acc.weighted,
            commit_revenue: acc.commit,
            upside_revenue: acc.upside,
            avg_probability: acc.avg_probability(),
            opportunity_count: acc.count,
        })
        .collect()
}

pub fn by_customer(items: &[OpportunityWithForecast]) -> Vec<ForecastByCustomer> {
    group_by(items, |i| i.opportunity.organisation_name.as_deref())
        .into_iter()
        .map(|(organisation_name, acc)| ForecastByCustomer {
            organisation_name,
            pipeline_revenue: acc.pipeline,
            weighted_revenue: acc.weighted,
            avg_probability: acc.avg_probability(),
            opportunity_count: acc.count,
        })
        .collect()
}

pub fn by_probability_band(items: &[OpportunityWithForecast]) -> Vec<ForecastByProbabilityBand> {
    ProbabilityBand::ALL
        .iter()
        .map(|&band| {
            let (min_probability, max_probability) = band.bounds();
            let members = items
                .iter()
                .filter(|i| !i.is_excluded() && ProbabilityBand::of(i.probability()) == band);
            let mut row = ForecastByProbabilityBand {
                band: band.label(),
                min_probability,
                max_probability,
                count: 0,
                revenue: 0.0,
                weighted_revenue: 0.0,
            };
            for item in members {
                row.count += 1;
                row.revenue += item.effective_revenue;
                row.weighted_revenue += item.weighted_revenue;
            }
            row
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastFilter {
    pub owner: Option<String>,
    pub customer: Option<String>,
    pub include_excluded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub owners: Vec<String>,
    pub customers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastView {
    pub summary: ForecastSummary,
    pub by_owner: Vec<ForecastByOwner>,
    pub by_customer: Vec<ForecastByCustomer>,
    pub by_probability_band: Vec<ForecastByProbabilityBand>,
    pub opportunities: Vec<OpportunityWithForecast>,
    pub filters: FilterOptions,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Assemble the full forecast page data from enriched rows already limited
/// to the requested date window.
pub fn build_forecast_view(items: Vec<OpportunityWithForecast>, filter: &ForecastFilter) -> ForecastView {
    let filters = FilterOptions {
        owners: distinct(items.iter().map(|i| i.opportunity.owner_name.as_deref())),
        customers: distinct(items.iter().map(|i| i.opportunity.organisation_name.as_deref())),
    };

    let owner = non_blank(&filter.owner);
    let customer = non_blank(&filter.customer);
    let scoped: Vec<_> = items
        .into_iter()
        .filter(|i| owner.is_none_or(|o| i.opportunity.owner_name.as_deref() == Some(o)))
        .filter(|i| customer.is_none_or(|c| i.opportunity.organisation_name.as_deref() == Some(c)))
        .collect();

    let summary = summarize(&scoped);
    let by_owner = by_owner(&scoped);
    let by_customer = by_customer(&scoped);
    let by_probability_band = by_probability_band(&scoped);
    let opportunities = scoped
        .into_iter()
        .filter(|i| filter.include_excluded || !i.is_excluded())
        .collect();

    ForecastView {
        summary,
        by_owner,
        by_customer,
        by_probability_band,
        opportunities,
        filters,
    }
}

fn distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
    values
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opp(id: i64, revenue: f64, cost: f64, owner: &str, customer: &str) -> Opportunity {
        let mut o = Opportunity::new(id, format!("OPP-{id}"));
        o.charge_total = revenue;
        o.provisional_cost_total = cost;
        o.owner_name = Some(owner.to_string());
        o.organisation_name = Some(customer.to_string());
        o
    }

    fn meta(id: i64, probability: u8, commit: bool) -> ForecastMetadata {
        ForecastMetadata {
            opportunity_id: id,
            probability,
            is_commit: commit,
            revenue_override: None,
            profit_override: None,
            is_excluded: false,
            exclusion_reason: None,
            notes: None,
            last_reviewed_at: None,
            reviewed_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn margin_handles_zero_revenue() {
        assert!(approx(margin(250.0, 1000.0), 0.25));
        assert!(approx(margin(-50.0, 0.0), 0.0));
        assert!(approx(base_profit(1000.0, 750.0), 250.0));
    }

    #[test]
    fn overrides_take_precedence_and_drive_weighting() {
        let mut m = meta(1, 50, false);
        m.revenue_override = Some(2000.0);
        m.profit_override = Some(600.0);
        let enriched = enrich(opp(1, 1000.0, 700.0, "Ana", "Acme"), Some(m));

        assert!(approx(enriched.base_profit, 300.0));
        assert!(approx(enriched.base_margin, 0.3));
        assert!(approx(enriched.effective_revenue, 2000.0));
        assert!(approx(enriched.effective_profit, 600.0));
        assert!(approx(enriched.weighted_revenue, 1000.0));
        assert!(approx(enriched.weighted_profit, 300.0));
        assert_eq!(enriched.status, ForecastStatus::Upside);
    }

    #[test]
    fn unreviewed_opportunities_weigh_nothing() {
        let enriched = enrich(opp(2, 5000.0, 1000.0, "Ana", "Acme"), None);
        assert_eq!(enriched.status, ForecastStatus::Unreviewed);
        assert!(approx(enriched.effective_revenue, 5000.0));
        assert!(approx(enriched.weighted_revenue, 0.0));
    }

    #[test]
    fn status_precedence_puts_exclusion_first() {
        let mut m = meta(3, 90, true);
        assert_eq!(ForecastStatus::of(Some(&m)), ForecastStatus::Commit);
        m.is_excluded = true;
        assert_eq!(ForecastStatus::of(Some(&m)), ForecastStatus::Excluded);
        assert_eq!(ForecastStatus::of(None), ForecastStatus::Unreviewed);
    }

    #[test]
    fn input_validation_rejects_bad_probability_and_missing_reason() {
        let bad = ForecastInput {
            probability: Some(101),
            ..Default::default()
        };
        assert_eq!(bad.validate(), Err(ForecastValidationError::ProbabilityOutOfRange(101)));

        let negative = ForecastInput {
            probability: Some(-1),
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let excluded = ForecastInput {
            is_excluded: Some(true),
            exclusion_reason: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(excluded.validate(), Err(ForecastValidationError::MissingExclusionReason));

        let ok = ForecastInput {
            is_excluded: Some(true),
            exclusion_reason: Some("Duplicate".into()),
            ..Default::default()
        };
        assert_eq!(ok.validate(), Ok(0));
    }

    #[test]
    fn into_metadata_applies_defaults_and_keeps_creation_time() {
        let created = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let saved = ForecastInput {
            probability: Some(75),
            reviewed_by: Some("Jo".into()),
            ..Default::default()
        }
        .into_metadata(42, now, Some(created))
        .unwrap();

        assert_eq!(saved.probability, 75);
        assert!(!saved.is_commit);
        assert!(!saved.is_excluded);
        assert_eq!(saved.created_at, Some(created));
        assert_eq!(saved.last_reviewed_at, Some(now));
        assert_eq!(saved.updated_at, Some(now));
    }

    #[test]
    fn probability_bands_cover_boundaries() {
        assert_eq!(ProbabilityBand::of(0), ProbabilityBand::Low);
        assert_eq!(ProbabilityBand::of(24), ProbabilityBand::Low);
        assert_eq!(ProbabilityBand::of(25), ProbabilityBand::Possible);
        assert_eq!(ProbabilityBand::of(74), ProbabilityBand::Likely);
        assert_eq!(ProbabilityBand::of(75), ProbabilityBand::Probable);
        assert_eq!(ProbabilityBand::of(100), ProbabilityBand::Probable);
        assert_eq!(ProbabilityBand::Likely.label(), "50-74%");
    }

    fn sample_items() -> Vec<OpportunityWithForecast> {
        let mut excluded = meta(4, 80, false);
        excluded.is_excluded = true;
        excluded.exclusion_reason = Some("Lost to competitor".into());
        vec![
            enrich(opp(1, 1000.0, 400.0, "Ana", "Acme"), Some(meta(1, 100, true))),
            enrich(opp(2, 2000.0, 1500.0, "Ana", "Globex"), Some(meta(2, 50, false))),
            enrich(opp(3, 500.0, 100.0, "Ben", "Acme"), None),
            enrich(opp(4, 9000.0, 1000.0, "Ben", "Initech"), Some(excluded)),
        ]
    }

    #[test]
    fn summary_buckets_by_status_and_skips_excluded_from_pipeline() {
        let summary = summarize(&sample_items());
        assert_eq!(summary.total_pipeline_count, 3);
        assert!(approx(summary.total_pipeline_revenue, 3500.0));
        assert!(approx(summary.weighted_revenue, 2000.0));
        assert!(approx(summary.weighted_profit, 600.0 + 250.0));
        assert_eq!(summary.commit_count, 1);
        assert!(approx(summary.commit_revenue, 1000.0));
        assert_eq!(summary.upside_count, 1);
        assert_eq!(summary.unreviewed_count, 1);
        assert_eq!(summary.excluded_count, 1);
        assert!(approx(summary.excluded_revenue, 9000.0));
    }

    #[test]
    fn groupings_order_by_pipeline_and_average_probability() {
        let items = sample_items();
        let owners = by_owner(&items);
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[0].owner_name, "Ana");
        assert!(approx(owners[0].pipeline_revenue, 3000.0));
        assert!(approx(owners[0].commit_revenue, 1000.0));
        assert!(approx(owners[0].upside_revenue, 2000.0));
        assert!(approx(owners[0].avg_probability, 75.0));
        assert_eq!(owners[1].owner_name, "Ben");
        assert_eq!(owners[1].opportunity_count, 1);

        let customers = by_customer(&items);
        assert_eq!(customers[0].organisation_name, "Globex");
        assert_eq!(customers[1].organisation_name, "Acme");
        assert_eq!(customers[1].opportunity_count, 2);
        assert!(customers.iter().all(|c| c.organisation_name != "Initech"));
    }

    #[test]
    fn bands_are_always_reported() {
        let bands = by_probability_band(&sample_items());
        assert_eq!(bands.len(), 4);
        assert_eq!(bands[0].count, 1);
        assert_eq!(bands[1].count, 0);
        assert_eq!(bands[2].count, 1);
        assert_eq!(bands[3].count, 1);
        assert!(approx(bands[3].weighted_revenue, 1000.0));
    }

    #[test]
    fn view_filters_owner_and_hides_excluded_by_default() {
        let view = build_forecast_view(
            sample_items(),
            &ForecastFilter {
                owner: Some("Ben".into()),
                ..Default::default()
            },
        );
        assert_eq!(view.filters.owners, vec!["Ana", "Ben"]);
        assert_eq!(view.filters.customers, vec!["Acme", "Globex", "Initech"]);
        assert_eq!(view.opportunities.len(), 1);
        assert_eq!(view.opportunities[0].opportunity.id, 3);
        assert_eq!(view.summary.excluded_count, 1);

        let with_excluded = build_forecast_view(
            sample_items(),
            &ForecastFilter {
                owner: Some("Ben".into()),
                include_excluded: true,
                ..Default::default()
            },
        );
        assert_eq!(with_excluded.opportunities.len(), 2);
    }

    #[test]
    fn missing_owner_groups_as_unassigned() {
        let mut o = opp(9, 100.0, 0.0, "x", "y");
        o.owner_name = None;
        let owners = by_owner(&[enrich(o, None)]);
        assert_eq!(owners[0].owner_name, UNASSIGNED);
    }
}
