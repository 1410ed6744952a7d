// Unit tests for the lendmatch evaluator and generator

use chrono::{DateTime, Duration, TimeZone, Utc};
use lendmatch::core::{
    evaluate,
    filters::match_location,
    scoring::{calculate_loan_fit, calculate_ltv_headroom},
    Evaluation, LocationMatch, MatchGenerator,
};
use lendmatch::models::{
    AssetType, CapitalType, DealType, LendingCriteria, Match, MatchStatus, Policy, Project,
    ProjectStatus, RateRange, ScoringWeights,
};

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn create_test_project(id: &str, debt_request: u64, completed_value: u64) -> Project {
    Project {
        id: id.into(),
        borrower_id: "borrower".to_string(),
        location: "Austin, TX".to_string(),
        asset_type: AssetType::Office,
        deal_type: DealType::Acquisition,
        capital_type: CapitalType::Debt,
        debt_request,
        total_cost: debt_request,
        completed_value,
        proposed_rate: None,
        description: String::new(),
        status: ProjectStatus::Pending,
        progress: 0,
        created_at: at(0),
        updated_at: at(0),
    }
}

fn create_test_criteria(lender: &str) -> LendingCriteria {
    LendingCriteria {
        lender_id: lender.into(),
        asset_types: Policy::RestrictedTo(vec![AssetType::Office]),
        deal_types: Policy::Unrestricted,
        capital_types: Policy::Unrestricted,
        min_loan_amount: 1_000_000,
        max_loan_amount: 10_000_000,
        locations: Policy::Unrestricted,
        max_ltv: Some(0.75),
        rate_range: None,
        created_at: at(0),
        updated_at: at(0),
    }
}

#[test]
fn test_loan_fit_peaks_at_midpoint() {
    assert_eq!(calculate_loan_fit(2_000_000, 1_000_000, 3_000_000), 1.0);
    assert_eq!(calculate_loan_fit(1_000_000, 1_000_000, 3_000_000), 0.0);
    assert_eq!(calculate_loan_fit(3_000_000, 1_000_000, 3_000_000), 0.0);
    assert!((calculate_loan_fit(2_500_000, 1_000_000, 3_000_000) - 0.5).abs() < 1e-9);
}

#[test]
fn test_loan_fit_single_point_range() {
    assert_eq!(calculate_loan_fit(5_000_000, 5_000_000, 5_000_000), 1.0);
}

#[test]
fn test_ltv_headroom() {
    assert!((calculate_ltv_headroom(0.6, 0.8) - 0.25).abs() < 1e-9);
    assert_eq!(calculate_ltv_headroom(0.8, 0.8), 0.0);
    assert_eq!(calculate_ltv_headroom(0.0, 0.8), 1.0);
}

#[test]
fn test_location_matching_modes() {
    let policy = Policy::RestrictedTo(vec!["Austin".to_string(), "Denver, CO".to_string()]);

    assert_eq!(match_location("denver, co", &policy), LocationMatch::Exact);
    assert_eq!(match_location("Downtown Austin, TX", &policy), LocationMatch::Partial);
    assert_eq!(match_location("Boise, ID", &policy), LocationMatch::NoMatch);
    assert_eq!(match_location("anywhere", &Policy::Unrestricted), LocationMatch::NotRequired);
}

#[test]
fn test_scenario_office_within_ltv() {
    let project = create_test_project("p", 5_000_000, 8_000_000);
    let criteria = create_test_criteria("l");

    let evaluation = evaluate(&project, &criteria, &ScoringWeights::default());

    let Evaluation::Eligible(breakdown) = evaluation else {
        panic!("expected eligible, got {:?}", evaluation);
    };
    // loan fit 1 - 0.5/4.5, headroom (0.75 - 0.625) / 0.75, location weight redistributed
    let expected = 0.625 * (1.0 - 0.5 / 4.5) + 0.375 * (0.125 / 0.75);
    assert!((breakdown.score - expected).abs() < 1e-9);
}

#[test]
fn test_scenario_office_over_ltv() {
    let project = create_test_project("p", 5_000_000, 8_000_000);
    let mut criteria = create_test_criteria("l");
    criteria.max_ltv = Some(0.5);

    let evaluation = evaluate(&project, &criteria, &ScoringWeights::default());
    assert!(evaluation.has_reason("ltv-exceeded"));
}

#[test]
fn test_scenario_retail_against_office_lender() {
    let mut project = create_test_project("p", 50_000_000, 80_000_000);
    project.asset_type = AssetType::Retail;
    let mut criteria = create_test_criteria("l");
    criteria.asset_types = Policy::RestrictedTo(vec![AssetType::Office, AssetType::Industrial]);

    let evaluation = evaluate(&project, &criteria, &ScoringWeights::default());

    assert!(evaluation.has_reason("asset-type-mismatch"));
    // Failing filters are all reported, not just the first
    assert!(evaluation.has_reason("loan-amount-out-of-range"));
}

#[test]
fn test_scores_stay_in_unit_interval() {
    let weights = ScoringWeights::default();
    let mut criteria = create_test_criteria("l");
    criteria.locations = Policy::RestrictedTo(vec!["Austin, TX".to_string()]);
    criteria.rate_range = Some(RateRange { min: 0.05, max: 0.09 });

    for debt in (1_000_000..=10_000_000).step_by(450_000) {
        for ltv_max in [None, Some(0.75), Some(1.0)] {
            criteria.max_ltv = ltv_max;
            let mut project = create_test_project("p", debt, 20_000_000);
            project.proposed_rate = Some(0.07);

            if let Some(score) = evaluate(&project, &criteria, &weights).score() {
                assert!((0.0..=1.0).contains(&score), "score {score} for debt {debt}");
            }
        }
    }
}

#[test]
fn test_exact_location_outranks_partial() {
    let project = create_test_project("p", 5_500_000, 20_000_000);
    let mut exact = create_test_criteria("exact");
    exact.locations = Policy::RestrictedTo(vec!["austin, tx".to_string()]);
    let mut partial = create_test_criteria("partial");
    partial.locations = Policy::RestrictedTo(vec!["Austin".to_string()]);

    let weights = ScoringWeights::default();
    let exact_score = evaluate(&project, &exact, &weights).score().unwrap();
    let partial_score = evaluate(&project, &partial, &weights).score().unwrap();

    assert!((exact_score - partial_score - 0.2).abs() < 1e-9);
}

#[test]
fn test_generate_twice_creates_nothing_new() {
    let generator = MatchGenerator::with_default_weights();
    let projects = vec![
        create_test_project("p1", 5_000_000, 8_000_000),
        create_test_project("p2", 2_000_000, 8_000_000),
    ];
    let criteria = vec![create_test_criteria("l1"), create_test_criteria("l2")];

    let first = generator.generate(&projects, &criteria, &[], at(5));
    assert_eq!(first.matches.len(), 4);

    let second = generator.generate(&projects, &criteria, &first.matches, at(6));
    assert!(second.matches.is_empty());
    assert_eq!(second.stats.covered, 4);
}

#[test]
fn test_changed_criteria_reopen_rejected_pair() {
    let generator = MatchGenerator::with_default_weights();
    let projects = vec![create_test_project("p1", 5_000_000, 8_000_000)];
    let mut criteria = vec![create_test_criteria("l1")];

    let mut rejected = Match::pending("p1".into(), "l1".into(), 0.6, at(1));
    rejected.status = MatchStatus::Rejected;
    rejected.updated_at = at(2);

    let suppressed = generator.generate(&projects, &criteria, &[rejected.clone()], at(3));
    assert!(suppressed.matches.is_empty());

    criteria[0].max_ltv = Some(0.8);
    criteria[0].updated_at = at(4);
    let reopened = generator.generate(&projects, &criteria, &[rejected], at(5));
    assert_eq!(reopened.matches.len(), 1);
    assert_eq!(reopened.matches[0].status, MatchStatus::Pending);
}
