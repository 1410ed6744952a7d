use chrono::Utc;
use serde::Serialize;

use crate::core::dashboard::{summarize, MatchSummary};
use crate::core::error::EngineError;
use crate::core::evaluator::{evaluate_checked, Evaluation};
use crate::core::generator::{GenerationStats, MatchGenerator, PreparedCriteria};
use crate::core::lifecycle::MatchLifecycle;
use crate::core::sweep::{persist_matches, Sweep, SweepOptions, SweepReport};
use crate::models::{LenderId, Match, MatchScope, ProjectId, ScoringWeights};
use crate::services::Repositories;

/// Result of matching one project on demand
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMatches {
    pub project_id: ProjectId,
    /// Matches written by this call, best first
    pub created: Vec<Match>,
    pub stats: GenerationStats,
    pub conflicts: usize,
}

/// Entry point tying evaluator, generator and lifecycle to the repositories
#[derive(Clone)]
pub struct MatchingEngine {
    repos: Repositories,
    generator: MatchGenerator,
    workers: usize,
}

impl MatchingEngine {
    pub fn new(repos: Repositories, weights: ScoringWeights, workers: usize) -> Self {
        Self {
            repos,
            generator: MatchGenerator::new(weights),
            workers: workers.max(1),
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn lifecycle(&self) -> MatchLifecycle {
        MatchLifecycle::new(self.repos.clone())
    }

    /// Why a project does or does not fit a lender, without writing anything
    pub async fn explain(
        &self,
        project_id: &ProjectId,
        lender_id: &LenderId,
    ) -> Result<Evaluation, EngineError> {
        let project = self
            .repos
            .projects
            .get_project(project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("project {project_id}")))?;
        let criteria = self
            .repos
            .criteria
            .get_criteria(lender_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("criteria for lender {lender_id}")))?;

        let evaluation = evaluate_checked(&project, &criteria, self.generator.weights())?;
        tracing::debug!(
            project_id = %project_id,
            lender_id = %lender_id,
            eligible = evaluation.is_eligible(),
            "explained pair"
        );
        Ok(evaluation)
    }

    /// Generate and persist matches for a single project
    pub async fn generate_for_project(
        &self,
        project_id: &ProjectId,
    ) -> Result<ProjectMatches, EngineError> {
        let project = self
            .repos
            .projects
            .get_project(project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("project {project_id}")))?;
        let criteria = self.repos.criteria.list_all().await?;
        let prepared = PreparedCriteria::new(&criteria);
        let existing = self
            .repos
            .matches
            .load_all_for(&MatchScope::Project(project_id.clone()))
            .await?;

        let batch = self
            .generator
            .generate_for_project(&project, &prepared, &existing, Utc::now())?;
        let persisted = persist_matches(&self.repos, batch.matches, None).await;

        if let Some(halt) = persisted.halt {
            tracing::warn!(
                project_id = %project_id,
                halt = ?halt,
                written = persisted.written.len(),
                "generation interrupted"
            );
            return Err(EngineError::UpstreamUnavailable(format!(
                "{} of the generated matches for project {project_id} were not written",
                persisted.unwritten.len()
            )));
        }

        tracing::info!(
            project_id = %project_id,
            created = persisted.written.len(),
            "generated matches for project"
        );
        Ok(ProjectMatches {
            project_id: project_id.clone(),
            created: persisted.written,
            stats: batch.stats,
            conflicts: persisted.conflicts,
        })
    }

    /// Match every active project against every lender
    pub async fn sweep(&self, options: SweepOptions) -> Result<SweepReport, EngineError> {
        Sweep::new(self.repos.clone(), self.generator.clone(), self.workers)
            .run(options)
            .await
    }

    /// Active matches for one project or lender
    pub async fn matches_for(&self, scope: &MatchScope) -> Result<Vec<Match>, EngineError> {
        let mut matches = self.repos.matches.load_active_for(scope).await?;
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(matches)
    }

    /// Dashboard counts, derived from stored matches on every call
    pub async fn summary_for(&self, scope: MatchScope) -> Result<MatchSummary, EngineError> {
        let matches = self.repos.matches.load_all_for(&scope).await?;
        Ok(summarize(scope, &matches))
    }
}
