use async_trait::async_trait;
use std::sync::Arc;

use super::repository::{NotifyError, Notifier};
use crate::models::{Match, MatchStatus};

/// Notifier that only records events in the log
///
/// Stands in for the messaging collaborator when none is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn on_match_created(&self, record: &Match) -> Result<(), NotifyError> {
        tracing::info!(
            match_id = %record.id,
            project_id = %record.project_id,
            lender_id = %record.lender_id,
            score = record.score,
            "match created"
        );
        Ok(())
    }

    async fn on_match_transitioned(
        &self,
        record: &Match,
        previous: MatchStatus,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            match_id = %record.id,
            from = %previous,
            to = %record.status,
            resolution = record.resolution.map(|r| r.as_str()).unwrap_or("none"),
            "match transitioned"
        );
        Ok(())
    }
}

/// Hand a creation event to the notifier on its own task
///
/// The caller never waits on delivery; failures are logged at `warn`.
pub fn dispatch_created(notifier: &Arc<dyn Notifier>, record: Match) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(err) = notifier.on_match_created(&record).await {
            tracing::warn!(match_id = %record.id, error = %err, "creation notification failed");
        }
    });
}

/// Hand a transition event to the notifier on its own task
pub fn dispatch_transitioned(notifier: &Arc<dyn Notifier>, record: Match, previous: MatchStatus) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(err) = notifier.on_match_transitioned(&record, previous).await {
            tracing::warn!(match_id = %record.id, error = %err, "transition notification failed");
        }
    });
}
