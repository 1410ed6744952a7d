use thiserror::Error;

use crate::models::{LenderId, MatchId, MatchStatus, ProjectId, ValidationError};
use crate::services::StoreError;

/// Errors surfaced by the matching engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("match {match_id} was already moved: it is {actual}")]
    Conflict { match_id: MatchId, actual: MatchStatus },

    #[error("active match already exists for project {project_id} and lender {lender_id}")]
    ActiveMatchExists {
        project_id: ProjectId,
        lender_id: LenderId,
    },

    #[error("transition {from} -> {to} is not permitted")]
    InvalidTransition { from: MatchStatus, to: MatchStatus },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ActiveMatchExists(pair) => EngineError::ActiveMatchExists {
                project_id: pair.project_id,
                lender_id: pair.lender_id,
            },
            StoreError::StatusConflict { match_id, actual } => {
                EngineError::Conflict { match_id, actual }
            }
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Unavailable(reason) => EngineError::UpstreamUnavailable(reason),
            StoreError::Invalid(err) => EngineError::Validation(err),
        }
    }
}
