use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::core::evaluator::{evaluate, Evaluation};
use crate::models::{LendingCriteria, Match, PairKey, Project, ScoringWeights, ValidationError};

/// Counters describing one generation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    /// Pairs the evaluator ran on
    pub evaluated: usize,
    /// Pairs skipped because an active match already covers them
    pub covered: usize,
    /// Pairs skipped because they were rejected and nothing changed since
    pub suppressed: usize,
    pub ineligible: usize,
}

impl GenerationStats {
    pub fn absorb(&mut self, other: &GenerationStats) {
        self.evaluated += other.evaluated;
        self.covered += other.covered;
        self.suppressed += other.suppressed;
        self.ineligible += other.ineligible;
    }
}

/// Result of the generation pipeline
#[derive(Debug, Default)]
pub struct GeneratedBatch {
    /// New pending matches, grouped by project and ranked within each group
    pub matches: Vec<Match>,
    pub stats: GenerationStats,
    /// Records refused before evaluation
    pub invalid: Vec<ValidationError>,
}

/// What existing matches say about one pair
#[derive(Debug, Clone, Copy, Default)]
struct PairHistory {
    active: bool,
    last_rejected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Open,
    Active,
    RejectedUnchanged,
}

fn index_history(existing: &[Match]) -> HashMap<PairKey, PairHistory> {
    let mut index: HashMap<PairKey, PairHistory> = HashMap::new();
    for m in existing {
        let entry = index.entry(m.pair()).or_default();
        if m.is_active() {
            entry.active = true;
        } else {
            entry.last_rejected_at = entry.last_rejected_at.max(Some(m.updated_at));
        }
    }
    index
}

fn coverage(
    history: Option<&PairHistory>,
    project: &Project,
    criteria: &LendingCriteria,
) -> Coverage {
    let Some(history) = history else {
        return Coverage::Open;
    };
    if history.active {
        return Coverage::Active;
    }
    match history.last_rejected_at {
        // A rejected pair comes back only once either side changed after the rejection
        Some(rejected_at) if project.updated_at.max(criteria.updated_at) <= rejected_at => {
            Coverage::RejectedUnchanged
        }
        _ => Coverage::Open,
    }
}

/// Keep the most recently updated record per key, in first-seen order
fn latest_by_key<'a, T, K, F, U>(records: &'a [T], key: F, updated: U) -> Vec<&'a T>
where
    K: Ord,
    F: Fn(&T) -> K,
    U: Fn(&T) -> DateTime<Utc>,
{
    let mut chosen: BTreeMap<K, (usize, &'a T)> = BTreeMap::new();
    for (position, record) in records.iter().enumerate() {
        chosen
            .entry(key(record))
            .and_modify(|slot| {
                if updated(record) > updated(slot.1) {
                    slot.1 = record;
                }
            })
            .or_insert((position, record));
    }
    let mut kept: Vec<(usize, &T)> = chosen.into_values().collect();
    kept.sort_by_key(|(position, _)| *position);
    kept.into_iter().map(|(_, record)| record).collect()
}

/// Criteria validated, de-duplicated per lender and ordered by creation time
#[derive(Debug, Clone, Default)]
pub struct PreparedCriteria {
    pub records: Vec<LendingCriteria>,
    pub invalid: Vec<ValidationError>,
}

impl PreparedCriteria {
    pub fn new(criteria: &[LendingCriteria]) -> Self {
        let mut prepared = PreparedCriteria::default();

        for c in latest_by_key(criteria, |c| c.lender_id.clone(), |c| c.updated_at) {
            match c.validate() {
                Ok(()) => prepared.records.push(c.clone()),
                Err(err) => {
                    tracing::warn!(
                        lender_id = %c.lender_id,
                        error = %err,
                        "skipping invalid criteria"
                    );
                    prepared.invalid.push(err);
                }
            }
        }

        // Creation order is the ranking tie-breaker
        prepared.records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.lender_id.cmp(&b.lender_id))
        });
        prepared
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Match generation orchestrator
///
/// # Pipeline Stages
/// 1. Validation and de-duplication of projects and criteria
/// 2. Coverage check against existing matches
/// 3. Hard filters and scoring
/// 4. Ranking per project
#[derive(Debug, Clone)]
pub struct MatchGenerator {
    weights: ScoringWeights,
}

impl MatchGenerator {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn with_default_weights() -> Self {
        Self {
            weights: ScoringWeights::default(),
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Produce new pending matches for every eligible, uncovered pair
    ///
    /// # Arguments
    /// * `projects` - Projects to match; those no longer seeking capital are skipped
    /// * `criteria` - One record per lender; duplicates keep the latest update
    /// * `existing` - Matches already stored for these projects, any status
    /// * `now` - Creation timestamp for the new matches
    pub fn generate(
        &self,
        projects: &[Project],
        criteria: &[LendingCriteria],
        existing: &[Match],
        now: DateTime<Utc>,
    ) -> GeneratedBatch {
        let prepared = PreparedCriteria::new(criteria);
        let mut batch = GeneratedBatch {
            invalid: prepared.invalid.clone(),
            ..GeneratedBatch::default()
        };
        let mut history = index_history(existing);

        for project in latest_by_key(projects, |p| p.id.clone(), |p| p.updated_at) {
            if let Err(err) = project.validate() {
                tracing::warn!(project_id = %project.id, error = %err, "skipping invalid project");
                batch.invalid.push(err);
                continue;
            }

            let ranked = self.rank_for_project(
                project,
                &prepared.records,
                &mut history,
                &mut batch.stats,
                now,
            );
            batch.matches.extend(ranked);
        }

        batch
    }

    /// Generate for one project against criteria prepared once per sweep
    pub fn generate_for_project(
        &self,
        project: &Project,
        prepared: &PreparedCriteria,
        existing: &[Match],
        now: DateTime<Utc>,
    ) -> Result<GeneratedBatch, ValidationError> {
        project.validate()?;

        let mut batch = GeneratedBatch::default();
        let mut history = index_history(existing);
        batch.matches = self.rank_for_project(
            project,
            &prepared.records,
            &mut history,
            &mut batch.stats,
            now,
        );
        Ok(batch)
    }

    /// Evaluate one validated project against prepared criteria and rank the result
    fn rank_for_project(
        &self,
        project: &Project,
        criteria: &[LendingCriteria],
        history: &mut HashMap<PairKey, PairHistory>,
        stats: &mut GenerationStats,
        now: DateTime<Utc>,
    ) -> Vec<Match> {
        if !project.status.seeks_capital() {
            return Vec::new();
        }

        let mut candidates: Vec<(Match, DateTime<Utc>)> = Vec::new();

        for c in criteria {
            let pair = PairKey::new(project.id.clone(), c.lender_id.clone());
            match coverage(history.get(&pair), project, c) {
                Coverage::Active => {
                    stats.covered += 1;
                    continue;
                }
                Coverage::RejectedUnchanged => {
                    stats.suppressed += 1;
                    continue;
                }
                Coverage::Open => {}
            }

            stats.evaluated += 1;
            match evaluate(project, c, &self.weights) {
                Evaluation::Eligible(breakdown) => {
                    history.entry(pair).or_default().active = true;
                    let record = Match::pending(
                        project.id.clone(),
                        c.lender_id.clone(),
                        breakdown.score,
                        now,
                    );
                    candidates.push((record, c.created_at));
                }
                Evaluation::Ineligible { reasons } => {
                    stats.ineligible += 1;
                    tracing::trace!(
                        project_id = %project.id,
                        lender_id = %c.lender_id,
                        reasons = reasons.len(),
                        "pair ineligible"
                    );
                }
            }
        }

        // Sort by score (descending), then by criteria age (oldest first), then lender id
        candidates.sort_by(|(a, a_created), (b, b_created)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_created.cmp(b_created))
                .then_with(|| a.lender_id.cmp(&b.lender_id))
        });

        candidates.into_iter().map(|(m, _)| m).collect()
    }
}

impl Default for MatchGenerator {
    fn default() -> Self {
        Self::with_default_weights()
    }
}
