//! Variant ordering by an objective's primary metric.

use std::cmp::Ordering;

use super::config::{Direction, Objective};
use super::metrics::VariantMetrics;

/// Compare two defined metric values so that the better one sorts first.
pub fn compare_metric(direction: Direction, a: f64, b: f64) -> Ordering {
    match direction {
        Direction::LowerIsBetter => a.total_cmp(&b),
        Direction::HigherIsBetter => b.total_cmp(&a),
    }
}

/// Indices into `variants` from best to worst.
///
/// Ties fall back to more impressions, then more spend, then input order.
/// Variants whose primary metric is undefined come last, in input order.
pub fn rank(variants: &[VariantMetrics], objective: Objective) -> Vec<usize> {
    let direction = objective.direction();
    let (mut defined, undefined): (Vec<usize>, Vec<usize>) =
        (0..variants.len()).partition(|&i| variants[i].metric(objective).is_some());

    // sort_by is stable, so input order is the final tie-break.
    defined.sort_by(|&i, &j| {
        let (a, b) = (&variants[i], &variants[j]);
        let (ma, mb) = (
            a.metric(objective).unwrap_or_default(),
            b.metric(objective).unwrap_or_default(),
        );
        compare_metric(direction, ma, mb)
            .then_with(|| b.impressions.cmp(&a.impressions))
            .then_with(|| b.spend.total_cmp(&a.spend))
    });

    defined.extend(undefined);
    defined
}
