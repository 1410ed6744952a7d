use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    LenderId, LendingCriteria, Match, MatchId, MatchScope, MatchStatus, PairKey, Project,
    ProjectId, ProjectStatus, Resolution, ValidationError,
};

/// Errors raised at the repository boundary
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("active match already exists for {0}")]
    ActiveMatchExists(PairKey),

    #[error("match {match_id} is {actual}")]
    StatusConflict { match_id: MatchId, actual: MatchStatus },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The record cannot be represented by the backing store
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Read side for borrower projects
#[async_trait]
pub trait ProjectSource: Send + Sync {
    /// Projects still seeking capital, in no particular order
    async fn list_active(&self) -> Result<Vec<Project>, StoreError>;

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StoreError>;

    /// Compare-and-set on project status; `Ok(false)` when it was not `from`
    async fn advance_status(
        &self,
        id: &ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<bool, StoreError>;
}

/// Read side for lender criteria
#[async_trait]
pub trait CriteriaSource: Send + Sync {
    async fn list_all(&self) -> Result<Vec<LendingCriteria>, StoreError>;

    async fn get_criteria(
        &self,
        lender_id: &LenderId,
    ) -> Result<Option<LendingCriteria>, StoreError>;
}

/// Storage for match records
///
/// Implementations must keep at most one active match per (project, lender)
/// pair and apply transitions as a compare-and-set on the current status.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn load_active_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError>;

    /// Every match for the scope, rejected history included
    async fn load_all_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError>;

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError>;

    /// Fails with `ActiveMatchExists` when the pair already has an active match
    async fn create(&self, record: Match) -> Result<Match, StoreError>;

    /// Fails with `StatusConflict` naming the actual status when it is not `from`
    async fn transition(
        &self,
        id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        resolution: Resolution,
    ) -> Result<Match, StoreError>;
}

/// Notification dispatch error
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Fire-and-forget hooks for messaging and dashboard refresh
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_match_created(&self, record: &Match) -> Result<(), NotifyError>;

    async fn on_match_transitioned(
        &self,
        record: &Match,
        previous: MatchStatus,
    ) -> Result<(), NotifyError>;
}

/// The collaborator-provided implementations the engine works against
#[derive(Clone)]
pub struct Repositories {
    pub projects: Arc<dyn ProjectSource>,
    pub criteria: Arc<dyn CriteriaSource>,
    pub matches: Arc<dyn MatchStore>,
    pub notifier: Arc<dyn Notifier>,
}
