// Model exports
pub mod domain;
pub mod requests;
pub mod responses;
pub mod validation;

pub use domain::{
    AssetType, CapitalType, DealType, LenderId, LendingCriteria, Match, MatchId, MatchScope,
    MatchStatus, PairKey, Party, Policy, Project, ProjectId, ProjectStatus, RateRange, Resolution,
    ScoringWeights, UnknownVariant,
};
pub use requests::{DecisionRequest, ExplainRequest, ScopeQuery, SweepRequest};
pub use responses::{ErrorResponse, HealthResponse, MatchListResponse};
pub use validation::{ValidationError, MAX_AMOUNT};
