//! Per-variant metrics normalization for ad experiments.
//!
//! Accepts raw insight counters as reported by the ad platform (numbers or
//! numeric strings, missing fields allowed) and produces a canonical
//! [`VariantMetrics`] record with every derived rate precomputed.
//!
//! **Key rule:** a derived rate whose denominator is zero is `None`, never
//! `NaN`, `inf` or a sentinel zero. Ranking and testing treat `None` as
//! "undefined" and exclude the variant from leadership.

use serde::{Deserialize, Serialize};

use super::config::{ExperimentError, Objective};

// ── Raw input ───────────────────────────────────────────────────────

/// A counter as it arrives on the wire: `1200`, `1200.0` or `"1200"`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Counter {
    Number(f64),
    Text(String),
}

impl From<f64> for Counter {
    fn from(v: f64) -> Self {
        Counter::Number(v)
    }
}

impl From<u64> for Counter {
    fn from(v: u64) -> Self {
        Counter::Number(v as f64)
    }
}

impl From<&str> for Counter {
    fn from(v: &str) -> Self {
        Counter::Text(v.to_string())
    }
}

/// One entry of an insights `actions` or `purchase_roas` list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RawAction {
    pub action_type: String,
    pub value: Counter,
}

/// Raw counters for one variant. Any counter may be omitted.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawVariantCounters {
    #[serde(alias = "variant_id")]
    pub variant_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub spend: Option<Counter>,
    #[serde(default)]
    pub impressions: Option<Counter>,
    #[serde(default)]
    pub clicks: Option<Counter>,
    #[serde(default)]
    pub conversions: Option<Counter>,
    #[serde(default)]
    pub revenue: Option<Counter>,
    /// Consulted only when `conversions` is absent.
    #[serde(default)]
    pub actions: Vec<RawAction>,
    /// Consulted only when `revenue` is absent.
    #[serde(default, alias = "purchase_roas")]
    pub purchase_roas: Vec<RawAction>,
}

impl RawVariantCounters {
    /// Convenience constructor for the common all-numeric case.
    pub fn new(
        variant_id: impl Into<String>,
        spend: f64,
        impressions: u64,
        clicks: u64,
        conversions: u64,
    ) -> Self {
        Self {
            variant_id: variant_id.into(),
            spend: Some(spend.into()),
            impressions: Some(impressions.into()),
            clicks: Some(clicks.into()),
            conversions: Some(conversions.into()),
            ..Default::default()
        }
    }

    pub fn with_revenue(mut self, revenue: f64) -> Self {
        self.revenue = Some(revenue.into());
        self
    }
}

/// Action types that count as a conversion.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Purchase,
    Lead,
    #[serde(rename = "offsite_conversion.fb_pixel_purchase")]
    OffsitePixelPurchase,
}

impl ActionType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "purchase" => Some(ActionType::Purchase),
            "lead" => Some(ActionType::Lead),
            "offsite_conversion.fb_pixel_purchase" => Some(ActionType::OffsitePixelPurchase),
            _ => None,
        }
    }
}

// ── Normalized output ───────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantMetrics {
    pub variant_id: String,
    pub name: Option<String>,
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub revenue: f64,
    /// clicks / impressions × 100
    pub ctr: Option<f64>,
    /// conversions / clicks × 100
    pub conversion_rate: Option<f64>,
    /// spend / conversions
    pub cpa: Option<f64>,
    /// spend / clicks
    pub cpc: Option<f64>,
    /// spend / impressions × 1000
    pub cpm: Option<f64>,
    /// revenue / spend
    pub roas: Option<f64>,
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let r = numerator / denominator;
    r.is_finite().then_some(r)
}

impl VariantMetrics {
    /// Build from already-validated counters, deriving every rate.
    pub fn from_counts(
        variant_id: impl Into<String>,
        spend: f64,
        impressions: u64,
        clicks: u64,
        conversions: u64,
        revenue: f64,
    ) -> Self {
        let imps = impressions as f64;
        let clk = clicks as f64;
        let conv = conversions as f64;
        Self {
            variant_id: variant_id.into(),
            name: None,
            spend,
            impressions,
            clicks,
            conversions,
            revenue,
            ctr: ratio(clk, imps).map(|r| r * 100.0),
            conversion_rate: ratio(conv, clk).map(|r| r * 100.0),
            cpa: ratio(spend, conv),
            cpc: ratio(spend, clk),
            cpm: ratio(spend, imps).map(|r| r * 1000.0),
            roas: ratio(revenue, spend),
        }
    }

    /// The objective's primary metric, `None` when undefined.
    pub fn metric(&self, objective: Objective) -> Option<f64> {
        match objective {
            Objective::CostPerResult => self.cpa,
            Objective::Ctr => self.ctr,
            Objective::ConversionRate => self.conversion_rate,
            Objective::Roas => self.roas,
            Objective::Cpc => self.cpc,
            Objective::Cpm => self.cpm,
        }
    }
}

// ── Normalization ───────────────────────────────────────────────────

fn invalid(variant_id: &str, reason: String) -> ExperimentError {
    ExperimentError::InvalidMetric {
        variant_id: variant_id.to_string(),
        reason,
    }
}

fn parse_counter(variant_id: &str, field: &str, value: &Counter) -> Result<f64, ExperimentError> {
    let parsed = match value {
        Counter::Number(n) => *n,
        Counter::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| invalid(variant_id, format!("{field} is not a number: {s:?}")))?
        }
    };
    if !parsed.is_finite() {
        return Err(invalid(variant_id, format!("{field} is not finite")));
    }
    if parsed < 0.0 {
        return Err(invalid(variant_id, format!("{field} is negative ({parsed})")));
    }
    Ok(parsed)
}

fn optional_counter(
    variant_id: &str,
    field: &str,
    value: &Option<Counter>,
) -> Result<f64, ExperimentError> {
    match value {
        Some(v) => parse_counter(variant_id, field, v),
        None => Ok(0.0),
    }
}

fn count(value: f64) -> u64 {
    value.trunc() as u64
}

/// First conversion-type entry of the actions list, or 0.
fn conversions_from_actions(variant_id: &str, actions: &[RawAction]) -> Result<f64, ExperimentError> {
    for action in actions {
        match ActionType::parse(&action.action_type) {
            Some(_) => return parse_counter(variant_id, "actions.value", &action.value),
            None => {
                tracing::debug!(
                    variant_id,
                    action_type = %action.action_type,
                    "ignoring non-conversion action type"
                );
            }
        }
    }
    Ok(0.0)
}

/// Normalize one variant's raw counters.
///
/// Missing counters are 0. Negative, non-finite or unparseable values fail
/// with [`ExperimentError::InvalidMetric`] naming the variant and field.
pub fn normalize(raw: &RawVariantCounters) -> Result<VariantMetrics, ExperimentError> {
    let id = raw.variant_id.as_str();
    if id.trim().is_empty() {
        return Err(invalid(id, "variant id must not be empty".to_string()));
    }

    let spend = optional_counter(id, "spend", &raw.spend)?;
    let impressions = count(optional_counter(id, "impressions", &raw.impressions)?);
    let clicks = count(optional_counter(id, "clicks", &raw.clicks)?);
    let conversions = match &raw.conversions {
        Some(v) => count(parse_counter(id, "conversions", v)?),
        None => count(conversions_from_actions(id, &raw.actions)?),
    };
    let revenue = match (&raw.revenue, raw.purchase_roas.first()) {
        (Some(v), _) => parse_counter(id, "revenue", v)?,
        (None, Some(roas)) => parse_counter(id, "purchase_roas.value", &roas.value)? * spend,
        (None, None) => 0.0,
    };

    let mut metrics = VariantMetrics::from_counts(id, spend, impressions, clicks, conversions, revenue);
    metrics.name = raw.name.clone();
    Ok(metrics)
}
