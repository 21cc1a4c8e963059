use serde::{Deserialize, Serialize};

use super::config::Objective;
use super::metrics::VariantMetrics;

/// σ surrogate for two-mean tests, as a fraction of the arm's mean.
const MEAN_STD_DEV_RATIO: f64 = 0.3;

// ── Result Structs ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    TwoProportion,
    TwoMean,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonNote {
    /// At least one side is below the minimum viable sample.
    InsufficientData,
    /// Successes exceed trials on at least one side.
    InvalidProportion,
    /// The tested rate favours the lower-ranked variant, as when the cheaper
    /// variant on CPA or CPC converts or clicks significantly less often.
    DirectionMismatch,
}

/// Raw z-test output before rounding and gating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTest {
    pub z_score: f64,
    pub p_value: f64,
}

impl ZTest {
    fn from_z(z: f64) -> Self {
        Self {
            z_score: z,
            p_value: two_tailed_p(z),
        }
    }

    fn null() -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
        }
    }
}

/// One pairwise test between the better-ranked `variant_a` and `variant_b`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub variant_a: String,
    pub variant_b: String,
    pub metric_a: f64,
    pub metric_b: f64,
    /// Rounded to 3 decimal places.
    pub z_score: f64,
    /// Two-tailed, rounded to 4 decimal places.
    pub p_value: f64,
    /// Signed percent change of `variant_a` against `variant_b`, `None` when
    /// `metric_b` is 0.
    pub lift_percent: Option<f64>,
    pub significant: bool,
    pub note: Option<ComparisonNote>,
    pub trials_a: u64,
    pub trials_b: u64,
    pub test: TestKind,
}

// ── Normal tail ─────────────────────────────────────────────────────

/// Upper tail P(Z > z) of the standard normal, via the Abramowitz & Stegun
/// 26.2.17 polynomial (absolute error below 7.5e-8). Defined for `z >= 0`.
pub fn normal_sf(z: f64) -> f64 {
    debug_assert!(z >= 0.0, "normal_sf requires z >= 0, got {}", z);

    let t = 1.0 / (1.0 + 0.2316419 * z);
    let d = 0.3989422804014327; // 1/sqrt(2*pi)
    let p = d * (-z * z / 2.0).exp();

    let poly = t
        * (0.319381530
            + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429))));

    p * poly
}

/// 2 × (1 − Φ(|z|)), clamped to [0, 1].
pub fn two_tailed_p(z: f64) -> f64 {
    (2.0 * normal_sf(z.abs())).clamp(0.0, 1.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ── Two-Proportion Z-Test ───────────────────────────────────────────

/// Pooled two-proportion z-test of `s_a/n_a` against `s_b/n_b`.
///
/// Returns `None` when successes exceed trials on either side. A zero
/// standard error (including an empty arm) yields z = 0.
pub fn two_proportion_z_test(s_a: u64, n_a: u64, s_b: u64, n_b: u64) -> Option<ZTest> {
    if s_a > n_a || s_b > n_b {
        return None;
    }
    if n_a == 0 || n_b == 0 {
        return Some(ZTest::null());
    }

    let (sa, na, sb, nb) = (s_a as f64, n_a as f64, s_b as f64, n_b as f64);
    let p_a = sa / na;
    let p_b = sb / nb;
    let pooled = (sa + sb) / (na + nb);
    let se = (pooled * (1.0 - pooled) * (1.0 / na + 1.0 / nb)).sqrt();

    if se == 0.0 || !se.is_finite() {
        return Some(ZTest::null());
    }
    Some(ZTest::from_z((p_a - p_b) / se))
}

// ── Two-Mean Z-Test ─────────────────────────────────────────────────

fn surrogate_std_dev(mean: f64) -> f64 {
    if mean == 0.0 {
        1.0
    } else {
        (mean * MEAN_STD_DEV_RATIO).abs()
    }
}

/// Two-mean z-test with σ = 0.3 × mean standing in for the unobserved
/// per-event variance (σ = 1 when the mean is 0).
pub fn two_mean_z_test(mean_a: f64, n_a: u64, mean_b: f64, n_b: u64) -> ZTest {
    if n_a == 0 || n_b == 0 {
        return ZTest::null();
    }
    let sd_a = surrogate_std_dev(mean_a);
    let sd_b = surrogate_std_dev(mean_b);
    let se = (sd_a * sd_a / n_a as f64 + sd_b * sd_b / n_b as f64).sqrt();

    if se == 0.0 || !se.is_finite() {
        return ZTest::null();
    }
    ZTest::from_z((mean_a - mean_b) / se)
}

// ── Test Inputs ─────────────────────────────────────────────────────

/// What a variant contributes to a pairwise test for a given objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestInput {
    Proportion { successes: u64, trials: u64 },
    Mean { mean: f64, n: u64 },
}

impl TestInput {
    /// Extract the test input, `None` when the objective's metric is undefined.
    ///
    /// CPA shares the conversion-rate engine and CPC the CTR engine; CPM and
    /// ROAS have no count rate and fall back to the two-mean test with
    /// n = conversions, or clicks when there are none.
    pub fn for_objective(metrics: &VariantMetrics, objective: Objective) -> Option<Self> {
        let value = metrics.metric(objective)?;
        let input = match objective {
            Objective::Ctr | Objective::Cpc => TestInput::Proportion {
                successes: metrics.clicks,
                trials: metrics.impressions,
            },
            Objective::ConversionRate | Objective::CostPerResult => TestInput::Proportion {
                successes: metrics.conversions,
                trials: metrics.clicks,
            },
            Objective::Cpm | Objective::Roas => TestInput::Mean {
                mean: value,
                n: if metrics.conversions > 0 {
                    metrics.conversions
                } else {
                    metrics.clicks
                },
            },
        };
        Some(input)
    }

    pub fn trials(&self) -> u64 {
        match *self {
            TestInput::Proportion { trials, .. } => trials,
            TestInput::Mean { n, .. } => n,
        }
    }

    pub fn kind(&self) -> TestKind {
        match self {
            TestInput::Proportion { .. } => TestKind::TwoProportion,
            TestInput::Mean { .. } => TestKind::TwoMean,
        }
    }
}

// ── Pairwise Comparison ─────────────────────────────────────────────

/// Test `a` (the better-ranked variant) against `b`.
///
/// Returns `None` when either variant's primary metric is undefined. The
/// result is significant only when both sides reach `min_sample` trials, no
/// note was raised and the reported p-value is at most `alpha`. For proportion
/// tests the tested rate must also favour `a`.
pub fn compare(
    a: &VariantMetrics,
    b: &VariantMetrics,
    objective: Objective,
    alpha: f64,
    min_sample: u64,
) -> Option<Comparison> {
    let metric_a = a.metric(objective)?;
    let metric_b = b.metric(objective)?;
    let input_a = TestInput::for_objective(a, objective)?;
    let input_b = TestInput::for_objective(b, objective)?;

    let (test, mut note) = match (input_a, input_b) {
        (
            TestInput::Proportion {
                successes: s_a,
                trials: n_a,
            },
            TestInput::Proportion {
                successes: s_b,
                trials: n_b,
            },
        ) => match two_proportion_z_test(s_a, n_a, s_b, n_b) {
            Some(t) => (t, None),
            None => (ZTest::null(), Some(ComparisonNote::InvalidProportion)),
        },
        (TestInput::Mean { mean: m_a, n: n_a }, TestInput::Mean { mean: m_b, n: n_b }) => {
            (two_mean_z_test(m_a, n_a, m_b, n_b), None)
        }
        // Both inputs come from the same objective.
        _ => return None,
    };

    let trials_a = input_a.trials();
    let trials_b = input_b.trials();
    if note.is_none() && (trials_a < min_sample || trials_b < min_sample) {
        note = Some(ComparisonNote::InsufficientData);
    }
    // A proportion test always measures a higher-is-better rate, so evidence
    // for `a` must come with a positive z.
    if note.is_none() && input_a.kind() == TestKind::TwoProportion && test.z_score < 0.0 {
        note = Some(ComparisonNote::DirectionMismatch);
    }

    let z_score = round_to(test.z_score, 3);
    let p_value = round_to(test.p_value, 4);
    let lift_percent = if metric_b == 0.0 {
        None
    } else {
        Some(round_to((metric_a - metric_b) / metric_b.abs() * 100.0, 2))
    };

    Some(Comparison {
        variant_a: a.variant_id.clone(),
        variant_b: b.variant_id.clone(),
        metric_a,
        metric_b,
        z_score,
        p_value,
        lift_percent,
        significant: note.is_none() && p_value <= alpha,
        note,
        trials_a,
        trials_b,
        test: input_a.kind(),
    })
}

/// Every unordered pair among `order` (indices best-first), better-ranked
/// variant first. Pairs with an undefined metric are skipped.
pub fn compare_all_pairs(
    variants: &[VariantMetrics],
    order: &[usize],
    objective: Objective,
    alpha: f64,
    min_sample: u64,
) -> Vec<Comparison> {
    let mut comparisons = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        for &j in &order[pos + 1..] {
            if let Some(c) = compare(&variants[i], &variants[j], objective, alpha, min_sample) {
                comparisons.push(c);
            }
        }
    }
    comparisons
}

// ── Sample Size Estimator ───────────────────────────────────────────

/// Two-proportion power analysis.
/// Returns the per-arm sample size needed to detect the difference between
/// `p1` and `p2` at the given power and two-sided alpha, `None` when they
/// are equal.
pub fn required_sample_size(p1: f64, p2: f64, alpha: f64, power: f64) -> Option<u64> {
    let delta = (p2 - p1).abs();
    if delta == 0.0 || !delta.is_finite() {
        return None;
    }

    let z_alpha = z_from_p(1.0 - alpha / 2.0);
    let z_power = z_from_p(power);
    let p_bar = (p1 + p2) / 2.0;

    // n = (z_alpha * sqrt(2*p_bar*(1-p_bar)) + z_power * sqrt(p1*(1-p1) + p2*(1-p2)))^2 / delta^2
    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_power * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let n = (numerator.powi(2) / delta.powi(2)).ceil();
    n.is_finite().then_some(n as u64)
}

/// Two-mean analogue of [`required_sample_size`] under the σ = 0.3 × mean
/// surrogate.
pub fn required_sample_size_means(mean_a: f64, mean_b: f64, alpha: f64, power: f64) -> Option<u64> {
    let delta = (mean_a - mean_b).abs();
    if delta == 0.0 || !delta.is_finite() {
        return None;
    }

    let z_alpha = z_from_p(1.0 - alpha / 2.0);
    let z_power = z_from_p(power);
    let sd_a = surrogate_std_dev(mean_a);
    let sd_b = surrogate_std_dev(mean_b);

    let n = ((z_alpha + z_power).powi(2) * (sd_a * sd_a + sd_b * sd_b) / delta.powi(2)).ceil();
    n.is_finite().then_some(n as u64)
}

/// Per-arm trials needed for the observed effect between `a` and `b`,
/// never below `min_sample`. `None` when the observed effect is 0 or the
/// inputs are not testable.
pub fn sample_size_needed(
    a: &TestInput,
    b: &TestInput,
    alpha: f64,
    power: f64,
    min_sample: u64,
) -> Option<u64> {
    let needed = match (*a, *b) {
        (
            TestInput::Proportion {
                successes: s_a,
                trials: n_a,
            },
            TestInput::Proportion {
                successes: s_b,
                trials: n_b,
            },
        ) => {
            if n_a == 0 || n_b == 0 || s_a > n_a || s_b > n_b {
                return None;
            }
            required_sample_size(s_a as f64 / n_a as f64, s_b as f64 / n_b as f64, alpha, power)?
        }
        (TestInput::Mean { mean: m_a, .. }, TestInput::Mean { mean: m_b, .. }) => {
            required_sample_size_means(m_a, m_b, alpha, power)?
        }
        _ => return None,
    };
    Some(needed.max(min_sample))
}

/// Standard normal quantile Φ⁻¹(p) from A&S 26.2.23, accurate to about
/// 4.5e-4. Saturates to ±∞ outside (0, 1).
fn z_from_p(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    // Use symmetry around p=0.5.
    let (p_adj, sign) = if p < 0.5 { (p, -1.0) } else { (1.0 - p, 1.0) };

    let t = (-2.0 * p_adj.ln()).sqrt();

    // Rational approximation (Abramowitz & Stegun 26.2.23)
    let c0 = 2.515517;
    let c1 = 0.802853;
    let c2 = 0.010328;
    let d1 = 1.432788;
    let d2 = 0.189269;
    let d3 = 0.001308;

    let z = t - (c0 + c1 * t + c2 * t * t) / (1.0 + d1 * t + d2 * t * t + d3 * t * t * t);

    sign * z
}
