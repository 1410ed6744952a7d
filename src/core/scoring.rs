use serde::{Deserialize, Serialize};

use crate::core::filters::LocationMatch;
use crate::models::{LendingCriteria, Project, ScoringWeights};

/// LTV headroom value used when the lender sets no LTV cap
pub const NEUTRAL_LTV_HEADROOM: f64 = 0.5;

/// Weights actually applied to one pair after redistribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedWeights {
    pub loan_fit: f64,
    pub ltv_headroom: f64,
    pub location_bonus: f64,
}

/// Fitness score of an eligible pair and the components behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub score: f64,
    pub loan_fit: f64,
    /// None when the lender sets no LTV cap
    pub ltv_headroom: Option<f64>,
    pub location: LocationMatch,
    pub weights: AppliedWeights,
}

/// Calculate the fitness score (0-1) of an eligible pair
///
/// Scoring formula:
/// score = (
///     loan_fit * 0.5 +           # closer to the middle of [min, max] = higher
///     ltv_headroom * 0.3 +       # unused LTV capacity, 0.5 when uncapped
///     location_bonus * 0.2       # 1.0 on an exact location match
/// )
///
/// When the lender accepts any location the location weight is spread
/// proportionally over the other two dimensions.
pub fn calculate_fitness(
    project: &Project,
    criteria: &LendingCriteria,
    location: LocationMatch,
    weights: &ScoringWeights,
) -> ScoreBreakdown {
    let loan_fit = calculate_loan_fit(
        project.debt_request,
        criteria.min_loan_amount,
        criteria.max_loan_amount,
    );

    let ltv_headroom = criteria
        .max_ltv
        .map(|max_ltv| calculate_ltv_headroom(project.ltv(), max_ltv));

    let location_applies = criteria.locations.is_restricted();
    let location_bonus = if location == LocationMatch::Exact { 1.0 } else { 0.0 };

    let weights = apply_weights(weights, location_applies);

    let score = loan_fit * weights.loan_fit
        + ltv_headroom.unwrap_or(NEUTRAL_LTV_HEADROOM) * weights.ltv_headroom
        + location_bonus * weights.location_bonus;

    ScoreBreakdown {
        score: score.clamp(0.0, 1.0),
        loan_fit,
        ltv_headroom,
        location,
        weights,
    }
}

/// Normalize weights over the dimensions present for this pair
fn apply_weights(weights: &ScoringWeights, location_applies: bool) -> AppliedWeights {
    let location_weight = if location_applies {
        weights.location_bonus.max(0.0)
    } else {
        0.0
    };
    let loan_weight = weights.loan_fit.max(0.0);
    let ltv_weight = weights.ltv_headroom.max(0.0);

    let total = loan_weight + ltv_weight + location_weight;
    if total <= 0.0 {
        return AppliedWeights {
            loan_fit: 0.0,
            ltv_headroom: 0.0,
            location_bonus: 0.0,
        };
    }

    AppliedWeights {
        loan_fit: loan_weight / total,
        ltv_headroom: ltv_weight / total,
        location_bonus: location_weight / total,
    }
}

/// Calculate loan-amount fit (0-1)
/// Requests closer to the middle of [min, max] score higher, boundaries score 0
#[inline]
pub fn calculate_loan_fit(requested: u64, min: u64, max: u64) -> f64 {
    if max <= min {
        return 1.0;
    }

    let mid = (min as f64 + max as f64) / 2.0;
    let half_range = (max - min) as f64 / 2.0;

    let deviation = (requested as f64 - mid).abs();
    let normalized_deviation = deviation / half_range;

    1.0 - normalized_deviation.min(1.0)
}

/// Calculate LTV headroom (0-1): the fraction of the LTV cap left unused
#[inline]
pub fn calculate_ltv_headroom(ltv: f64, max_ltv: f64) -> f64 {
    if max_ltv <= 0.0 || !ltv.is_finite() {
        return 0.0;
    }

    ((max_ltv - ltv) / max_ltv).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetType, CapitalType, DealType, Policy, ProjectStatus};
    use chrono::Utc;

    fn create_test_project(debt_request: u64, completed_value: u64) -> Project {
        let now = Utc::now();
        Project {
            id: "p".into(),
            borrower_id: "b".to_string(),
            location: "Austin".to_string(),
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
            created_at: now,
            updated_at: now,
        }
    }

    fn create_test_criteria(max_ltv: Option<f64>, locations: Policy<String>) -> LendingCriteria {
        let now = Utc::now();
        LendingCriteria {
            lender_id: "l".into(),
            asset_types: Policy::Unrestricted,
            deal_types: Policy::Unrestricted,
            capital_types: Policy::Unrestricted,
            min_loan_amount: 1_000_000,
            max_loan_amount: 10_000_000,
            locations,
            max_ltv,
            rate_range: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_loan_fit() {
        // Middle of range = max score
        assert_eq!(calculate_loan_fit(5_500_000, 1_000_000, 10_000_000), 1.0);

        // At edge of range = zero, still a valid value
        assert_eq!(calculate_loan_fit(1_000_000, 1_000_000, 10_000_000), 0.0);

        // Degenerate range
        assert_eq!(calculate_loan_fit(3, 3, 3), 1.0);
    }

    #[test]
    fn test_ltv_headroom() {
        let headroom = calculate_ltv_headroom(0.625, 0.75);
        assert!((headroom - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(calculate_ltv_headroom(0.75, 0.75), 0.0);
        assert_eq!(calculate_ltv_headroom(0.0, 0.75), 1.0);
    }

    #[test]
    fn test_location_weight_redistributed_when_unrestricted() {
        let project = create_test_project(5_000_000, 8_000_000);
        let criteria = create_test_criteria(Some(0.75), Policy::Unrestricted);

        let breakdown = calculate_fitness(
            &project,
            &criteria,
            LocationMatch::NotRequired,
            &ScoringWeights::default(),
        );

        assert_eq!(breakdown.weights.location_bonus, 0.0);
        assert!((breakdown.weights.loan_fit - 0.625).abs() < 1e-9);
        assert!((breakdown.weights.ltv_headroom - 0.375).abs() < 1e-9);

        let expected = (1.0 - 0.5 / 4.5) * 0.625 + (1.0 / 6.0) * 0.375;
        assert!((breakdown.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_exact_location_scores_higher_than_partial() {
        let project = create_test_project(5_000_000, 8_000_000);
        let criteria = create_test_criteria(None, Policy::RestrictedTo(vec!["Austin".to_string()]));
        let weights = ScoringWeights::default();

        let exact = calculate_fitness(&project, &criteria, LocationMatch::Exact, &weights);
        let partial = calculate_fitness(&project, &criteria, LocationMatch::Partial, &weights);

        assert!(exact.score > partial.score);
        assert!((exact.score - partial.score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_uncapped_ltv_is_neutral() {
        let project = create_test_project(5_500_000, 8_000_000);
        let criteria = create_test_criteria(None, Policy::Unrestricted);

        let breakdown = calculate_fitness(
            &project,
            &criteria,
            LocationMatch::NotRequired,
            &ScoringWeights::default(),
        );

        assert_eq!(breakdown.ltv_headroom, None);
        let expected = 1.0 * 0.625 + NEUTRAL_LTV_HEADROOM * 0.375;
        assert!((breakdown.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weights_score_zero() {
        let project = create_test_project(5_000_000, 8_000_000);
        let criteria = create_test_criteria(Some(0.75), Policy::Unrestricted);
        let weights = ScoringWeights {
            loan_fit: 0.0,
            ltv_headroom: 0.0,
            location_bonus: 0.0,
        };

        let breakdown =
            calculate_fitness(&project, &criteria, LocationMatch::NotRequired, &weights);
        assert_eq!(breakdown.score, 0.0);
    }
}
