use serde::{Deserialize, Serialize};
use validator::Validate;

use super::domain::{LenderId, MatchScope, ProjectId};

/// Request to run a matching sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SweepRequest {
    /// Resume after this project id (cursor from a previous report)
    #[validate(length(min = 1))]
    #[serde(alias = "resume_after", rename = "resumeAfter", default)]
    pub resume_after: Option<String>,
}

/// Request to explain how a project fares against one lender's criteria
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExplainRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "project_id", rename = "projectId")]
    pub project_id: String,
    #[validate(length(min = 1))]
    #[serde(alias = "lender_id", rename = "lenderId")]
    pub lender_id: String,
}

/// Mediator decision or party withdrawal on a pending match
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DecisionRequest {
    /// One of: approve, reject, withdraw
    #[validate(length(min = 1))]
    pub decision: String,
    /// Required for withdraw: borrower or lender
    #[serde(default)]
    pub party: Option<String>,
}

/// Query selecting matches by project or by lender
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeQuery {
    #[serde(rename = "projectId", default)]
    pub project_id: Option<String>,
    #[serde(rename = "lenderId", default)]
    pub lender_id: Option<String>,
}

impl ScopeQuery {
    /// Exactly one of the two ids must be given
    pub fn scope(&self) -> Option<MatchScope> {
        match (&self.project_id, &self.lender_id) {
            (Some(project), None) if !project.is_empty() => {
                Some(MatchScope::Project(ProjectId(project.clone())))
            }
            (None, Some(lender)) if !lender.is_empty() => {
                Some(MatchScope::Lender(LenderId(lender.clone())))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_query_requires_exactly_one_id() {
        let both = ScopeQuery {
            project_id: Some("p".to_string()),
            lender_id: Some("l".to_string()),
        };
        assert!(both.scope().is_none());
        assert!(ScopeQuery::default().scope().is_none());

        let lender = ScopeQuery {
            project_id: None,
            lender_id: Some("l".to_string()),
        };
        assert_eq!(lender.scope(), Some(MatchScope::Lender(LenderId::from("l"))));
    }

    #[test]
    fn test_explain_request_validation() {
        let req = ExplainRequest {
            project_id: String::new(),
            lender_id: "l".to_string(),
        };
        assert!(req.validate().is_err());
    }
}
