use crate::core::error::EngineError;
use crate::models::{Match, MatchId, MatchStatus, Party, ProjectId, ProjectStatus, Resolution};
use crate::services::{dispatch_transitioned, Repositories};

/// Drives matches through `pending -> accepted | rejected`
///
/// Every transition is a compare-and-set on the stored status, so of two
/// concurrent decisions on one match exactly one wins. The loser gets
/// `EngineError::Conflict` naming the status the match was left in.
#[derive(Clone)]
pub struct MatchLifecycle {
    repos: Repositories,
}

impl MatchLifecycle {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Mediator approval
    pub async fn approve(&self, id: MatchId) -> Result<Match, EngineError> {
        self.resolve(id, Resolution::MediatorApproved).await
    }

    /// Mediator rejection
    pub async fn reject(&self, id: MatchId) -> Result<Match, EngineError> {
        self.resolve(id, Resolution::MediatorRejected).await
    }

    /// Borrower or lender walks away from a pending match
    pub async fn withdraw(&self, id: MatchId, party: Party) -> Result<Match, EngineError> {
        self.resolve(id, Resolution::withdrawal_by(party)).await
    }

    pub async fn resolve(&self, id: MatchId, resolution: Resolution) -> Result<Match, EngineError> {
        self.transition(id, MatchStatus::Pending, resolution.target_status(), resolution)
            .await
    }

    /// Apply one transition
    ///
    /// Refused up front when the state machine does not allow `from -> to` or
    /// when the resolution leads somewhere else.
    pub async fn transition(
        &self,
        id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        resolution: Resolution,
    ) -> Result<Match, EngineError> {
        if !from.can_transition(to) || resolution.target_status() != to {
            return Err(EngineError::InvalidTransition { from, to });
        }

        let updated = match self.repos.matches.transition(id, from, to, resolution).await {
            Ok(updated) => updated,
            Err(err) => {
                let err = EngineError::from(err);
                if let EngineError::Conflict { actual, .. } = &err {
                    tracing::info!(
                        match_id = %id,
                        actual = %actual,
                        "transition lost to a concurrent decision"
                    );
                }
                return Err(err);
            }
        };

        tracing::info!(
            match_id = %id,
            project_id = %updated.project_id,
            lender_id = %updated.lender_id,
            from = %from,
            to = %to,
            resolution = resolution.as_str(),
            "match transitioned"
        );

        if to == MatchStatus::Accepted {
            self.mark_project_matched(&updated.project_id).await;
        }

        dispatch_transitioned(&self.repos.notifier, updated.clone(), from);

        Ok(updated)
    }

    /// First acceptance moves the project from pending to matched
    ///
    /// The match is already accepted at this point, so a failure here is
    /// logged and left for the project owner to reconcile.
    async fn mark_project_matched(&self, project_id: &ProjectId) {
        match self
            .repos
            .projects
            .advance_status(project_id, ProjectStatus::Pending, ProjectStatus::Matched)
            .await
        {
            Ok(true) => tracing::info!(project_id = %project_id, "project advanced to matched"),
            Ok(false) => tracing::debug!(project_id = %project_id, "project already past pending"),
            Err(err) => tracing::error!(
                project_id = %project_id,
                error = %err,
                "failed to advance project status"
            ),
        }
    }
}
