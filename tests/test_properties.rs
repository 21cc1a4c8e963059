use adsplit::experiments::ranking::rank;
use adsplit::experiments::stats::{compare, two_mean_z_test, two_proportion_z_test};
use adsplit::{
    build_plan, normalize, Analyzer, ConfidenceLevel, DryRunCampaignControl, EngineConfig,
    EvaluationOptions, ExperimentError, ExperimentOutcome, ExperimentStatus, LifecycleController,
    Objective, PlanRequest, RawVariantCounters, TestVariable, VariantMetrics, WinnerAction,
};
use std::sync::Arc;

fn metrics(id: &str, spend: f64, impressions: u64, clicks: u64, conversions: u64) -> VariantMetrics {
    VariantMetrics::from_counts(id, spend, impressions, clicks, conversions, 0.0)
}

fn plan(objective: Objective, refs: &[&str], confidence_level: u32) -> PlanRequest {
    PlanRequest {
        name: Some("property test".to_string()),
        test_variable: TestVariable::Creative,
        objective,
        variant_refs: refs.iter().map(|r| r.to_string()).collect(),
        duration_days: 7,
        confidence_level,
        daily_budget_per_variant: None,
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn scenario_cost_per_result_winner() {
    let analyzer = Analyzer::new(EngineConfig::default());
    let raw = vec![
        RawVariantCounters::new("A", 500.0, 100000, 2000, 80),
        RawVariantCounters::new("B", 500.0, 100000, 1000, 20),
    ];
    let results = analyzer.analyze_raw(&raw, Objective::CostPerResult, ConfidenceLevel::P90);

    assert_eq!(results.leader.as_deref(), Some("A"));
    assert_eq!(results.outcome, ExperimentOutcome::WinnerFound);
    assert!(results.statistical_significance);
    assert_eq!(results.variants[0].primary_metric, Some(6.25));
    assert_eq!(results.variants[1].primary_metric, Some(25.0));

    for policy in [
        WinnerAction::ScaleBudget,
        WinnerAction::PauseLosers,
        WinnerAction::ApplyAndEnd,
    ] {
        let recommendation = analyzer.recommend(&results, policy);
        assert!(!recommendation.is_report_only(), "{policy:?}");
        assert_eq!(recommendation.winner_id(), Some("A"));
    }
}

#[test]
fn scenario_identical_variants_report_only() {
    let analyzer = Analyzer::new(EngineConfig::default());
    let raw = vec![
        RawVariantCounters::new("A", 300.0, 50000, 1000, 40),
        RawVariantCounters::new("B", 300.0, 50000, 1000, 40),
    ];
    for objective in Objective::ALL {
        let results = analyzer.analyze_raw(&raw, objective, ConfidenceLevel::P90);
        assert!(results.winner.is_none(), "{objective:?}");
        let recommendation = analyzer.recommend(&results, WinnerAction::ScaleBudget);
        assert!(recommendation.is_report_only(), "{objective:?}");
    }
}

#[test]
fn scenario_zero_impressions_variant() {
    let analyzer = Analyzer::new(EngineConfig::default());
    let variants = vec![
        metrics("empty", 0.0, 0, 0, 0),
        metrics("a", 100.0, 20000, 400, 10),
        metrics("b", 100.0, 20000, 300, 10),
    ];
    let results = analyzer.analyze(variants, Objective::Ctr, ConfidenceLevel::P90);

    let last = results.variants.last().unwrap();
    assert_eq!(last.metrics.variant_id, "empty");
    assert_eq!(last.metrics.ctr, None);
    assert!(!last.eligible);
    assert!(!last.is_winner);
    assert_eq!(results.variants.len(), 3);
    assert_eq!(results.leader.as_deref(), Some("a"));
}

#[test]
fn scenario_end_completed_experiment_is_closed() {
    let controller = LifecycleController::new(
        EngineConfig::default(),
        Arc::new(DryRunCampaignControl::new()),
    );
    let experiment = controller
        .create(&plan(Objective::Ctr, &["ad_1", "ad_2"], 90))
        .unwrap();
    let raw = vec![
        RawVariantCounters::new("variant_a", 10.0, 1000, 10, 0),
        RawVariantCounters::new("variant_b", 10.0, 1000, 10, 0),
    ];
    let options = EvaluationOptions::default();

    let ended = controller.end(&experiment.id, &raw, &options).unwrap();
    assert_eq!(ended.experiment.status, ExperimentStatus::Completed);
    let snapshot = controller.get(&experiment.id).unwrap();

    let err = controller.end(&experiment.id, &raw, &options).unwrap_err();
    assert!(matches!(err, ExperimentError::Closed(_)));
    assert_eq!(controller.get(&experiment.id).unwrap(), snapshot);
}

#[test]
fn scenario_unsupported_confidence_level() {
    let err = build_plan(
        &plan(Objective::Ctr, &["ad_1", "ad_2"], 77),
        &EngineConfig::default(),
        0,
    )
    .unwrap_err();
    assert!(matches!(err, ExperimentError::InvalidConfig(_)));
}

// ── Properties ──────────────────────────────────────────────────────

#[test]
fn derived_rates_are_finite_or_absent() {
    let counts = [0u64, 1, 7, 1000];
    let spends = [0.0, 0.01, 250.0];
    for &impressions in &counts {
        for &clicks in &counts {
            for &conversions in &counts {
                for &spend in &spends {
                    let raw = RawVariantCounters::new("v", spend, impressions, clicks, conversions)
                        .with_revenue(spend * 2.0);
                    let m = normalize(&raw).unwrap();
                    for objective in Objective::ALL {
                        if let Some(value) = m.metric(objective) {
                            assert!(value.is_finite(), "{objective:?} on {m:?}");
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn ranking_is_idempotent() {
    let variants = vec![
        metrics("a", 100.0, 10000, 200, 5),
        metrics("b", 80.0, 10000, 200, 8),
        metrics("c", 0.0, 0, 0, 0),
        metrics("d", 120.0, 12000, 300, 5),
        metrics("e", 90.0, 9000, 90, 0),
    ];
    for objective in Objective::ALL {
        let order = rank(&variants, objective);
        let ranked: Vec<VariantMetrics> = order.iter().map(|&i| variants[i].clone()).collect();
        let again = rank(&ranked, objective);
        assert_eq!(again, (0..ranked.len()).collect::<Vec<_>>(), "{objective:?}");
    }
}

#[test]
fn z_score_is_antisymmetric() {
    let cases = [(200, 10000, 150, 9000), (5, 40, 9, 41), (0, 100, 3, 100)];
    for (s_a, n_a, s_b, n_b) in cases {
        let ab = two_proportion_z_test(s_a, n_a, s_b, n_b).unwrap();
        let ba = two_proportion_z_test(s_b, n_b, s_a, n_a).unwrap();
        assert!((ab.z_score + ba.z_score).abs() < 1e-12);
        assert!((ab.p_value - ba.p_value).abs() < 1e-12);
    }

    let ab = two_mean_z_test(10.0, 200, 9.0, 150);
    let ba = two_mean_z_test(9.0, 150, 10.0, 200);
    assert!((ab.z_score + ba.z_score).abs() < 1e-12);
}

#[test]
fn larger_samples_at_same_rates_never_weaken_evidence() {
    let mut previous_z = 0.0;
    let mut previous_p = 1.0;
    for scale in [1u64, 2, 4, 8, 16] {
        let t = two_proportion_z_test(30 * scale, 1000 * scale, 20 * scale, 1000 * scale).unwrap();
        assert!(t.z_score.abs() >= previous_z);
        assert!(t.p_value <= previous_p);
        previous_z = t.z_score.abs();
        previous_p = t.p_value;
    }
}

#[test]
fn growing_only_the_leaders_sample_never_weakens_evidence() {
    // B fixed at 2% CTR on 5000 impressions; A keeps a 3% CTR as it grows.
    let b = metrics("b", 50.0, 5000, 100, 0);
    let mut previous_raw = 0.0;
    let mut previous_compared = 0.0;
    for impressions in [500u64, 1000, 2000, 5000, 10000, 50000, 200000] {
        let clicks = impressions * 3 / 100;

        let raw = two_proportion_z_test(clicks, impressions, 100, 5000).unwrap();
        assert!(
            raw.z_score.abs() >= previous_raw,
            "|z| fell to {} at {impressions} impressions",
            raw.z_score.abs()
        );
        previous_raw = raw.z_score.abs();

        let a = metrics("a", 50.0, impressions, clicks, 0);
        let compared = compare(&a, &b, Objective::Ctr, 0.10, 30).unwrap();
        assert!(
            compared.z_score.abs() >= previous_compared,
            "rounded |z| fell to {} at {impressions} impressions",
            compared.z_score.abs()
        );
        previous_compared = compared.z_score.abs();
    }
}

#[test]
fn significance_is_monotonic_in_confidence() {
    let a = metrics("a", 50.0, 10000, 260, 0);
    let b = metrics("b", 50.0, 10000, 220, 0);

    let significant: Vec<bool> = ConfidenceLevel::ALL
        .iter()
        .map(|level| {
            compare(&a, &b, Objective::Ctr, level.alpha(), 30)
                .unwrap()
                .significant
        })
        .collect();
    // Ordered from 65% to 95%: once it stops being significant it stays so.
    assert!(significant.windows(2).all(|w| w[0] || !w[1]));
    assert_eq!(significant, vec![true, true, true, false]);
}

#[test]
fn winners_require_every_eligible_comparison() {
    let analyzer = Analyzer::new(EngineConfig::default());
    let variants = vec![
        metrics("a", 10.0, 10000, 400, 0),
        metrics("b", 10.0, 10000, 395, 0),
        metrics("c", 10.0, 10000, 200, 0),
    ];
    let results = analyzer.analyze(variants, Objective::Ctr, ConfidenceLevel::P90);
    assert_eq!(results.outcome, ExperimentOutcome::PartialSignificance);
    assert!(results.winner.is_none());
    assert!(results.variants.iter().all(|v| !v.is_winner));
}
