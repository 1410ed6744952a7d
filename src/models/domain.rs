use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a borrower's project
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

/// Identifier of a lender (and of the lender's single criteria record)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LenderId(pub String);

/// Identifier of a match record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub Uuid);

impl MatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for LenderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Raised when a stored or submitted label does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetType {
    Multifamily,
    Office,
    Retail,
    Industrial,
    Hotel,
    Land,
    MixedUse,
}

impl AssetType {
    pub const ALL: [AssetType; 7] = [
        AssetType::Multifamily,
        AssetType::Office,
        AssetType::Retail,
        AssetType::Industrial,
        AssetType::Hotel,
        AssetType::Land,
        AssetType::MixedUse,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AssetType::Multifamily => "multifamily",
            AssetType::Office => "office",
            AssetType::Retail => "retail",
            AssetType::Industrial => "industrial",
            AssetType::Hotel => "hotel",
            AssetType::Land => "land",
            AssetType::MixedUse => "mixed-use",
        }
    }
}

impl FromStr for AssetType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "asset type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DealType {
    Acquisition,
    Refinance,
    Development,
    Construction,
    Bridge,
    ValueAdd,
}

impl DealType {
    pub const ALL: [DealType; 6] = [
        DealType::Acquisition,
        DealType::Refinance,
        DealType::Development,
        DealType::Construction,
        DealType::Bridge,
        DealType::ValueAdd,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            DealType::Acquisition => "acquisition",
            DealType::Refinance => "refinance",
            DealType::Development => "development",
            DealType::Construction => "construction",
            DealType::Bridge => "bridge",
            DealType::ValueAdd => "value-add",
        }
    }
}

impl FromStr for DealType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DealType::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "deal type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapitalType {
    Debt,
    Equity,
    Mezzanine,
}

impl CapitalType {
    pub const ALL: [CapitalType; 3] =
        [CapitalType::Debt, CapitalType::Equity, CapitalType::Mezzanine];

    pub const fn as_str(self) -> &'static str {
        match self {
            CapitalType::Debt => "debt",
            CapitalType::Equity => "equity",
            CapitalType::Mezzanine => "mezzanine",
        }
    }
}

impl FromStr for CapitalType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapitalType::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "capital type",
                value: s.to_string(),
            })
    }
}

/// Lifecycle of a borrower's financing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Matched,
    Funded,
    Closed,
    Rejected,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 5] = [
        ProjectStatus::Pending,
        ProjectStatus::Matched,
        ProjectStatus::Funded,
        ProjectStatus::Closed,
        ProjectStatus::Rejected,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Matched => "matched",
            ProjectStatus::Funded => "funded",
            ProjectStatus::Closed => "closed",
            ProjectStatus::Rejected => "rejected",
        }
    }

    /// Projects still seeking capital take part in matching
    pub const fn seeks_capital(self) -> bool {
        matches!(self, ProjectStatus::Pending | ProjectStatus::Matched)
    }

    pub const fn is_terminated(self) -> bool {
        matches!(self, ProjectStatus::Closed | ProjectStatus::Rejected)
    }
}

impl FromStr for ProjectStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProjectStatus::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "project status",
                value: s.to_string(),
            })
    }
}

/// A borrower's financing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub borrower_id: String,
    pub location: String,
    pub asset_type: AssetType,
    pub deal_type: DealType,
    pub capital_type: CapitalType,
    /// Requested loan amount in whole currency units
    pub debt_request: u64,
    pub total_cost: u64,
    /// Completed / after-repair value
    pub completed_value: u64,
    /// Rate the borrower proposes, as a decimal fraction
    #[serde(default)]
    pub proposed_rate: Option<f64>,
    #[serde(default)]
    pub description: String,
    pub status: ProjectStatus,
    #[serde(default)]
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Loan-to-value of the request against the completed value
    pub fn ltv(&self) -> f64 {
        if self.completed_value == 0 {
            return f64::INFINITY;
        }
        self.debt_request as f64 / self.completed_value as f64
    }
}

/// Admission rule for one criteria dimension
///
/// `Unrestricted` admits every value. `RestrictedTo` admits only the listed
/// values and must list at least one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "values", rename_all = "snake_case")]
pub enum Policy<T> {
    Unrestricted,
    RestrictedTo(Vec<T>),
}

impl<T: PartialEq> Policy<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Policy::Unrestricted => true,
            Policy::RestrictedTo(values) => values.contains(value),
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, Policy::RestrictedTo(_))
    }
}

impl<T> Default for Policy<T> {
    fn default() -> Self {
        Policy::Unrestricted
    }
}

/// Acceptable interest rates as decimal fractions, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateRange {
    pub min: f64,
    pub max: f64,
}

impl RateRange {
    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.min && rate <= self.max
    }
}

/// A lender's standing preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LendingCriteria {
    pub lender_id: LenderId,
    #[serde(default)]
    pub asset_types: Policy<AssetType>,
    #[serde(default)]
    pub deal_types: Policy<DealType>,
    #[serde(default)]
    pub capital_types: Policy<CapitalType>,
    pub min_loan_amount: u64,
    pub max_loan_amount: u64,
    /// Matched case-insensitively against the project location
    #[serde(default)]
    pub locations: Policy<String>,
    #[serde(default)]
    pub max_ltv: Option<f64>,
    #[serde(default)]
    pub rate_range: Option<RateRange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a proposed pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "match_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
}

impl MatchStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Rejected => "rejected",
        }
    }

    /// Pending and accepted matches occupy their (project, lender) pair
    pub const fn is_active(self) -> bool {
        matches!(self, MatchStatus::Pending | MatchStatus::Accepted)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Accepted | MatchStatus::Rejected)
    }

    pub const fn can_transition(self, to: MatchStatus) -> bool {
        matches!(
            (self, to),
            (MatchStatus::Pending, MatchStatus::Accepted)
                | (MatchStatus::Pending, MatchStatus::Rejected)
        )
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(MatchStatus::Pending),
            "accepted" => Ok(MatchStatus::Accepted),
            "rejected" => Ok(MatchStatus::Rejected),
            _ => Err(UnknownVariant {
                kind: "match status",
                value: s.to_string(),
            }),
        }
    }
}

/// Party able to withdraw from a pending match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Borrower,
    Lender,
}

/// Who moved a match into its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    MediatorApproved,
    MediatorRejected,
    BorrowerWithdrew,
    LenderWithdrew,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Resolution::MediatorApproved => "mediator-approved",
            Resolution::MediatorRejected => "mediator-rejected",
            Resolution::BorrowerWithdrew => "borrower-withdrew",
            Resolution::LenderWithdrew => "lender-withdrew",
        }
    }

    pub const fn target_status(self) -> MatchStatus {
        match self {
            Resolution::MediatorApproved => MatchStatus::Accepted,
            _ => MatchStatus::Rejected,
        }
    }

    pub const fn withdrawal_by(party: Party) -> Self {
        match party {
            Party::Borrower => Resolution::BorrowerWithdrew,
            Party::Lender => Resolution::LenderWithdrew,
        }
    }
}

impl FromStr for Resolution {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Resolution::MediatorApproved,
            Resolution::MediatorRejected,
            Resolution::BorrowerWithdrew,
            Resolution::LenderWithdrew,
        ]
        .into_iter()
        .find(|r| r.as_str() == s.trim())
        .ok_or_else(|| UnknownVariant {
            kind: "resolution",
            value: s.to_string(),
        })
    }
}

/// The (project, lender) pair a match occupies
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairKey {
    pub project_id: ProjectId,
    pub lender_id: LenderId,
}

impl PairKey {
    pub fn new(project_id: ProjectId, lender_id: LenderId) -> Self {
        Self { project_id, lender_id }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.lender_id)
    }
}

/// A proposed pairing between one project and one lender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub project_id: ProjectId,
    pub lender_id: LenderId,
    pub score: f64,
    pub status: MatchStatus,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn pending(
        project_id: ProjectId,
        lender_id: LenderId,
        score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MatchId::new(),
            project_id,
            lender_id,
            score,
            status: MatchStatus::Pending,
            resolution: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.project_id.clone(), self.lender_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Which side of the marketplace a query is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchScope {
    Project(ProjectId),
    Lender(LenderId),
}

impl MatchScope {
    pub fn covers(&self, m: &Match) -> bool {
        match self {
            MatchScope::Project(id) => &m.project_id == id,
            MatchScope::Lender(id) => &m.lender_id == id,
        }
    }
}

impl fmt::Display for MatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchScope::Project(id) => write!(f, "project {}", id),
            MatchScope::Lender(id) => write!(f, "lender {}", id),
        }
    }
}

/// Scoring weights
///
/// Weights of dimensions that do not apply to a pair are redistributed
/// proportionally over the dimensions that do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    pub loan_fit: f64,
    pub ltv_headroom: f64,
    pub location_bonus: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.loan_fit + self.ltv_headroom + self.location_bonus
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            loan_fit: 0.5,
            ltv_headroom: 0.3,
            location_bonus: 0.2,
        }
    }
}
