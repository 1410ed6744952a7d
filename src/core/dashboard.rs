use serde::Serialize;

use crate::models::{Match, MatchScope, MatchStatus};

/// Read-only aggregate over the matches of one project or lender
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub scope: MatchScope,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Highest score among pending matches
    pub best_pending_score: Option<f64>,
}

/// Fold match records into counts; records outside `scope` are ignored
pub fn summarize(scope: MatchScope, matches: &[Match]) -> MatchSummary {
    let in_scope: Vec<&Match> = matches.iter().filter(|m| scope.covers(m)).collect();
    let mut summary = MatchSummary {
        scope,
        pending: 0,
        accepted: 0,
        rejected: 0,
        best_pending_score: None,
    };

    for m in in_scope {
        match m.status {
            MatchStatus::Pending => {
                summary.pending += 1;
                let best = summary.best_pending_score.map_or(m.score, |s| s.max(m.score));
                summary.best_pending_score = Some(best);
            }
            MatchStatus::Accepted => summary.accepted += 1,
            MatchStatus::Rejected => summary.rejected += 1,
        }
    }

    summary
}
