use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::core::error::EngineError;
use crate::core::generator::{GenerationStats, MatchGenerator, PreparedCriteria};
use crate::models::{Match, MatchScope, PairKey, Project, ProjectId};
use crate::services::{dispatch_created, Repositories, StoreError};

/// Cooperative cancellation shared between an operator and a running sweep
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Skip projects up to and including this id
    pub resume_after: Option<ProjectId>,
    pub cancel: CancelFlag,
}

/// Why a sweep stopped before covering every project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SweepHalt {
    Cancelled,
    UpstreamUnavailable { detail: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Matches written by this sweep
    pub created: usize,
    pub stats: GenerationStats,
    /// Creations lost to a concurrent writer on the same pair
    pub conflicts: usize,
    pub invalid: Vec<String>,
    /// Pass as `resume_after` to continue; every project up to it is done
    pub cursor: Option<ProjectId>,
    pub projects_completed: usize,
    /// Pairs that were not evaluated or whose match was not written
    pub unevaluated: Vec<PairKey>,
    pub halted: Option<SweepHalt>,
}

/// Result of writing a batch of generated matches
#[derive(Debug, Default)]
pub(crate) struct PersistOutcome {
    pub written: Vec<Match>,
    pub conflicts: usize,
    /// Pairs left unwritten after a halt
    pub unwritten: Vec<PairKey>,
    pub halt: Option<SweepHalt>,
}

/// Write matches one pair at a time, notifying after each successful write
///
/// Each write is atomic on its own, so stopping between writes leaves a
/// consistent store.
pub(crate) async fn persist_matches(
    repos: &Repositories,
    matches: Vec<Match>,
    cancel: Option<&CancelFlag>,
) -> PersistOutcome {
    let mut outcome = PersistOutcome::default();
    let mut pending = matches.into_iter();

    while let Some(record) = pending.next() {
        if cancel.is_some_and(CancelFlag::is_cancelled) {
            outcome.halt = Some(SweepHalt::Cancelled);
            outcome.unwritten.push(record.pair());
        } else {
            match repos.matches.create(record.clone()).await {
                Ok(created) => {
                    dispatch_created(&repos.notifier, created.clone());
                    outcome.written.push(created);
                }
                Err(StoreError::ActiveMatchExists(pair)) => {
                    tracing::info!(pair = %pair, "pair claimed by a concurrent writer");
                    outcome.conflicts += 1;
                }
                Err(err) => {
                    tracing::error!(pair = %record.pair(), error = %err, "match write failed");
                    outcome.halt = Some(SweepHalt::UpstreamUnavailable {
                        detail: err.to_string(),
                    });
                    outcome.unwritten.push(record.pair());
                }
            }
        }

        if outcome.halt.is_some() {
            outcome.unwritten.extend(pending.by_ref().map(|m| m.pair()));
        }
    }

    outcome
}

/// What one worker reports back for its project
#[derive(Debug, Default)]
struct ProjectOutcome {
    created: usize,
    conflicts: usize,
    stats: GenerationStats,
    invalid: Option<String>,
    unevaluated: Vec<PairKey>,
    completed: bool,
    halt: Option<SweepHalt>,
}

fn all_pairs(project_id: &ProjectId, prepared: &PreparedCriteria) -> Vec<PairKey> {
    prepared
        .records
        .iter()
        .map(|c| PairKey::new(project_id.clone(), c.lender_id.clone()))
        .collect()
}

fn skipped(project_id: &ProjectId, prepared: &PreparedCriteria) -> ProjectOutcome {
    ProjectOutcome {
        unevaluated: all_pairs(project_id, prepared),
        ..ProjectOutcome::default()
    }
}

struct SweepContext {
    repos: Repositories,
    generator: MatchGenerator,
    prepared: Arc<PreparedCriteria>,
    cancel: CancelFlag,
    /// Raised by the first worker that loses the repository
    upstream_lost: AtomicBool,
}

impl SweepContext {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.upstream_lost.load(Ordering::SeqCst)
    }

    async fn process(&self, project: Project) -> ProjectOutcome {
        if self.should_stop() {
            return skipped(&project.id, &self.prepared);
        }

        let existing = match self
            .repos
            .matches
            .load_all_for(&MatchScope::Project(project.id.clone()))
            .await
        {
            Ok(existing) => existing,
            Err(err) => {
                tracing::error!(
                    project_id = %project.id,
                    error = %err,
                    "failed to load existing matches"
                );
                self.upstream_lost.store(true, Ordering::SeqCst);
                return ProjectOutcome {
                    halt: Some(SweepHalt::UpstreamUnavailable {
                        detail: err.to_string(),
                    }),
                    ..skipped(&project.id, &self.prepared)
                };
            }
        };

        let batch = match self
            .generator
            .generate_for_project(&project, &self.prepared, &existing, Utc::now())
        {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(project_id = %project.id, error = %err, "skipping invalid project");
                return ProjectOutcome {
                    invalid: Some(err.to_string()),
                    completed: true,
                    ..ProjectOutcome::default()
                };
            }
        };

        let persisted = persist_matches(&self.repos, batch.matches, Some(&self.cancel)).await;
        if matches!(persisted.halt, Some(SweepHalt::UpstreamUnavailable { .. })) {
            self.upstream_lost.store(true, Ordering::SeqCst);
        }

        tracing::debug!(
            project_id = %project.id,
            created = persisted.written.len(),
            evaluated = batch.stats.evaluated,
            "project swept"
        );

        ProjectOutcome {
            created: persisted.written.len(),
            conflicts: persisted.conflicts,
            stats: batch.stats,
            invalid: None,
            completed: persisted.halt.is_none(),
            unevaluated: persisted.unwritten,
            halt: persisted.halt,
        }
    }
}

/// Full-population matching pass over every active project
///
/// Projects are handled in id order on at most `workers` concurrent tasks.
/// A failing repository or a raised cancel flag stops new work; writes
/// already made stay in place and the report says where to resume.
pub struct Sweep {
    repos: Repositories,
    generator: MatchGenerator,
    workers: usize,
}

impl Sweep {
    pub fn new(repos: Repositories, generator: MatchGenerator, workers: usize) -> Self {
        Self {
            repos,
            generator,
            workers: workers.max(1),
        }
    }

    pub async fn run(&self, options: SweepOptions) -> Result<SweepReport, EngineError> {
        let projects = self.repos.projects.list_active().await?;
        let criteria = self.repos.criteria.list_all().await?;

        let prepared = Arc::new(PreparedCriteria::new(&criteria));
        let mut report = SweepReport {
            invalid: prepared.invalid.iter().map(ToString::to_string).collect(),
            cursor: options.resume_after.clone(),
            ..SweepReport::default()
        };

        // One record per project id, latest update wins
        let mut by_id: BTreeMap<ProjectId, Project> = BTreeMap::new();
        for project in projects {
            if options.resume_after.as_ref().is_some_and(|after| &project.id <= after) {
                continue;
            }
            match by_id.get(&project.id) {
                Some(seen) if seen.updated_at >= project.updated_at => {}
                _ => {
                    by_id.insert(project.id.clone(), project);
                }
            }
        }

        tracing::info!(
            projects = by_id.len(),
            lenders = prepared.len(),
            workers = self.workers,
            resume_after = ?options.resume_after,
            "starting sweep"
        );

        let context = Arc::new(SweepContext {
            repos: self.repos.clone(),
            generator: self.generator.clone(),
            prepared: prepared.clone(),
            cancel: options.cancel.clone(),
            upstream_lost: AtomicBool::new(false),
        });
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(by_id.len());

        for (id, project) in by_id {
            if context.should_stop() {
                handles.push((id.clone(), None, all_pairs(&id, &prepared)));
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    handles.push((id.clone(), None, all_pairs(&id, &prepared)));
                    continue;
                }
            };
            let context = context.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                context.process(project).await
            });
            handles.push((id, Some(handle), Vec::new()));
        }

        let mut prefix_intact = true;
        let mut upstream_halt = None;

        for (id, handle, never_started) in handles {
            let outcome = match handle {
                Some(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::error!(project_id = %id, error = %err, "sweep worker failed");
                        ProjectOutcome {
                            halt: Some(SweepHalt::UpstreamUnavailable {
                                detail: format!("worker for project {id} failed"),
                            }),
                            ..skipped(&id, &prepared)
                        }
                    }
                },
                None => ProjectOutcome {
                    unevaluated: never_started,
                    ..ProjectOutcome::default()
                },
            };

            report.created += outcome.created;
            report.conflicts += outcome.conflicts;
            report.stats.absorb(&outcome.stats);
            report.invalid.extend(outcome.invalid);
            report.unevaluated.extend(outcome.unevaluated);

            if let Some(halt @ SweepHalt::UpstreamUnavailable { .. }) = outcome.halt {
                upstream_halt.get_or_insert(halt);
            }

            if outcome.completed {
                report.projects_completed += 1;
                if prefix_intact {
                    report.cursor = Some(id);
                }
            } else {
                prefix_intact = false;
            }
        }

        report.halted = match upstream_halt {
            Some(halt) => Some(halt),
            None if !prefix_intact && options.cancel.is_cancelled() => Some(SweepHalt::Cancelled),
            None => None,
        };

        match &report.halted {
            Some(halt) => tracing::warn!(
                halt = ?halt,
                created = report.created,
                cursor = ?report.cursor,
                unevaluated = report.unevaluated.len(),
                "sweep halted early"
            ),
            None => tracing::info!(
                created = report.created,
                evaluated = report.stats.evaluated,
                conflicts = report.conflicts,
                "sweep complete"
            ),
        }

        Ok(report)
    }
}
