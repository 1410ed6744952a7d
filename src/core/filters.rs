use serde::{Deserialize, Serialize};

use crate::models::{AssetType, CapitalType, DealType, LendingCriteria, Policy, Project};

/// Why a project failed one of a lender's hard filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum IneligibleReason {
    AssetTypeMismatch { asset_type: AssetType },
    DealTypeMismatch { deal_type: DealType },
    CapitalTypeMismatch { capital_type: CapitalType },
    LoanAmountOutOfRange { requested: u64, min: u64, max: u64 },
    LtvExceeded { ltv: f64, max_ltv: f64 },
    RateOutOfRange { rate: f64, min: f64, max: f64 },
    LocationMismatch { location: String },
}

impl IneligibleReason {
    /// Stable code naming the failing dimension
    pub const fn code(&self) -> &'static str {
        match self {
            IneligibleReason::AssetTypeMismatch { .. } => "asset-type-mismatch",
            IneligibleReason::DealTypeMismatch { .. } => "deal-type-mismatch",
            IneligibleReason::CapitalTypeMismatch { .. } => "capital-type-mismatch",
            IneligibleReason::LoanAmountOutOfRange { .. } => "loan-amount-out-of-range",
            IneligibleReason::LtvExceeded { .. } => "ltv-exceeded",
            IneligibleReason::RateOutOfRange { .. } => "rate-out-of-range",
            IneligibleReason::LocationMismatch { .. } => "location-mismatch",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            IneligibleReason::AssetTypeMismatch { asset_type } => {
                format!("asset type {} not accepted", asset_type.as_str())
            }
            IneligibleReason::DealTypeMismatch { deal_type } => {
                format!("deal type {} not accepted", deal_type.as_str())
            }
            IneligibleReason::CapitalTypeMismatch { capital_type } => {
                format!("capital type {} not accepted", capital_type.as_str())
            }
            IneligibleReason::LoanAmountOutOfRange { requested, min, max } => {
                format!("debt request {requested} outside [{min}, {max}]")
            }
            IneligibleReason::LtvExceeded { ltv, max_ltv } => {
                format!("ltv {:.3} exceeds maximum {:.3}", ltv, max_ltv)
            }
            IneligibleReason::RateOutOfRange { rate, min, max } => {
                format!("proposed rate {:.4} outside [{:.4}, {:.4}]", rate, min, max)
            }
            IneligibleReason::LocationMismatch { location } => {
                format!("location {location:?} not in accepted locations")
            }
        }
    }
}

/// How a project location met the lender's location policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationMatch {
    /// Lender accepts any location
    NotRequired,
    /// An accepted entry equals the project location (case-insensitive)
    Exact,
    /// An accepted entry appears inside the project location
    Partial,
    NoMatch,
}

impl LocationMatch {
    pub const fn passes(self) -> bool {
        !matches!(self, LocationMatch::NoMatch)
    }
}

/// Match a project location against the accepted locations
///
/// Comparison is case-insensitive on trimmed strings. An entry matches
/// exactly when equal to the project location, partially when it is a
/// substring of it ("austin" inside "500 Congress Ave, Austin, TX").
pub fn match_location(location: &str, policy: &Policy<String>) -> LocationMatch {
    let entries = match policy {
        Policy::Unrestricted => return LocationMatch::NotRequired,
        Policy::RestrictedTo(entries) => entries,
    };

    let location = location.trim().to_lowercase();
    let mut best = LocationMatch::NoMatch;

    for entry in entries {
        let entry = entry.trim().to_lowercase();
        if entry.is_empty() {
            continue;
        }
        if entry == location {
            return LocationMatch::Exact;
        }
        if location.contains(&entry) {
            best = LocationMatch::Partial;
        }
    }

    best
}

/// Run every hard filter without short-circuiting
///
/// Returns all failing reasons (empty when eligible) and the location
/// outcome the scorer needs.
pub fn check_hard_filters(
    project: &Project,
    criteria: &LendingCriteria,
) -> (Vec<IneligibleReason>, LocationMatch) {
    let mut reasons = Vec::new();

    if !criteria.asset_types.admits(&project.asset_type) {
        reasons.push(IneligibleReason::AssetTypeMismatch {
            asset_type: project.asset_type,
        });
    }

    if !criteria.deal_types.admits(&project.deal_type) {
        reasons.push(IneligibleReason::DealTypeMismatch {
            deal_type: project.deal_type,
        });
    }

    if !criteria.capital_types.admits(&project.capital_type) {
        reasons.push(IneligibleReason::CapitalTypeMismatch {
            capital_type: project.capital_type,
        });
    }

    if project.debt_request < criteria.min_loan_amount
        || project.debt_request > criteria.max_loan_amount
    {
        reasons.push(IneligibleReason::LoanAmountOutOfRange {
            requested: project.debt_request,
            min: criteria.min_loan_amount,
            max: criteria.max_loan_amount,
        });
    }

    if let Some(max_ltv) = criteria.max_ltv {
        let ltv = project.ltv();
        if ltv > max_ltv {
            reasons.push(IneligibleReason::LtvExceeded { ltv, max_ltv });
        }
    }

    // Inactive until the project proposes a rate
    if let (Some(range), Some(rate)) = (criteria.rate_range, project.proposed_rate) {
        if !range.contains(rate) {
            reasons.push(IneligibleReason::RateOutOfRange {
                rate,
                min: range.min,
                max: range.max,
            });
        }
    }

    let location = match_location(&project.location, &criteria.locations);
    if !location.passes() {
        reasons.push(IneligibleReason::LocationMismatch {
            location: project.location.clone(),
        });
    }

    (reasons, location)
}
