use serde::{Deserialize, Serialize};

use crate::core::filters::{check_hard_filters, IneligibleReason};
use crate::core::scoring::{calculate_fitness, ScoreBreakdown};
use crate::models::{LendingCriteria, Project, ScoringWeights, ValidationError};

/// Outcome of evaluating one project against one lender's criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Evaluation {
    Eligible(ScoreBreakdown),
    Ineligible { reasons: Vec<IneligibleReason> },
}

impl Evaluation {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Evaluation::Eligible(_))
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Evaluation::Eligible(breakdown) => Some(breakdown.score),
            Evaluation::Ineligible { .. } => None,
        }
    }

    pub fn reasons(&self) -> &[IneligibleReason] {
        match self {
            Evaluation::Eligible(_) => &[],
            Evaluation::Ineligible { reasons } => reasons,
        }
    }

    pub fn has_reason(&self, code: &str) -> bool {
        self.reasons().iter().any(|r| r.code() == code)
    }
}

/// Decide whether a project satisfies a lender's criteria
///
/// Pure: the same inputs always give the same evaluation. Every hard filter
/// is checked so an ineligible result carries all failing reasons; the
/// score is computed only when all of them pass.
pub fn evaluate(
    project: &Project,
    criteria: &LendingCriteria,
    weights: &ScoringWeights,
) -> Evaluation {
    let (reasons, location) = check_hard_filters(project, criteria);

    if !reasons.is_empty() {
        return Evaluation::Ineligible { reasons };
    }

    Evaluation::Eligible(calculate_fitness(project, criteria, location, weights))
}

/// Validate both records, then evaluate
pub fn evaluate_checked(
    project: &Project,
    criteria: &LendingCriteria,
    weights: &ScoringWeights,
) -> Result<Evaluation, ValidationError> {
    project.validate()?;
    criteria.validate()?;
    Ok(evaluate(project, criteria, weights))
}
