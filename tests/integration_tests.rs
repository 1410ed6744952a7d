// Integration tests: engine against the in-memory repositories

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use lendmatch::core::{CancelFlag, EngineError, MatchingEngine, SweepHalt, SweepOptions};
use lendmatch::models::{
    AssetType, CapitalType, DealType, LenderId, LendingCriteria, Match, MatchId, MatchScope,
    MatchStatus, Policy, Project, ProjectId, ProjectStatus, ScoringWeights,
};
use lendmatch::services::{
    InMemoryBackend, InMemoryMatchStore, MatchStore, ProjectSource, Repositories, StoreError,
    TracingNotifier,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn create_project(id: &str) -> Project {
    let created = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    Project {
        id: id.into(),
        borrower_id: format!("borrower-{id}"),
        location: "Phoenix, AZ".to_string(),
        asset_type: AssetType::Multifamily,
        deal_type: DealType::Bridge,
        capital_type: CapitalType::Debt,
        debt_request: 4_000_000,
        total_cost: 5_000_000,
        completed_value: 6_000_000,
        proposed_rate: None,
        description: String::new(),
        status: ProjectStatus::Pending,
        progress: 0,
        created_at: created,
        updated_at: created,
    }
}

fn create_criteria(lender: &str, created_minute: i64) -> LendingCriteria {
    let created =
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(created_minute);
    LendingCriteria {
        lender_id: lender.into(),
        asset_types: Policy::RestrictedTo(vec![AssetType::Multifamily, AssetType::MixedUse]),
        deal_types: Policy::Unrestricted,
        capital_types: Policy::RestrictedTo(vec![CapitalType::Debt]),
        min_loan_amount: 1_000_000,
        max_loan_amount: 8_000_000,
        locations: Policy::Unrestricted,
        max_ltv: Some(0.8),
        rate_range: None,
        created_at: created,
        updated_at: created,
    }
}

fn seed(projects: usize, lenders: usize) -> InMemoryBackend {
    let backend = InMemoryBackend::new();
    for p in 0..projects {
        backend.projects.upsert(create_project(&format!("p{p:02}"))).unwrap();
    }
    for l in 0..lenders {
        backend.criteria.upsert(create_criteria(&format!("l{l:02}"), l as i64)).unwrap();
    }
    backend
}

fn engine_over(repos: Repositories, workers: usize) -> MatchingEngine {
    MatchingEngine::new(repos, ScoringWeights::default(), workers)
}

async fn all_matches(store: &InMemoryMatchStore, projects: usize) -> Vec<Match> {
    let mut found = Vec::new();
    for p in 0..projects {
        let scope = MatchScope::Project(ProjectId(format!("p{p:02}")));
        found.extend(store.load_all_for(&scope).await.unwrap());
    }
    found
}

fn assert_one_active_per_pair(matches: &[Match]) {
    let mut seen = HashSet::new();
    for m in matches.iter().filter(|m| m.is_active()) {
        assert!(seen.insert(m.pair()), "second active match for {}", m.pair());
    }
}

/// Match store that fails reads for one project until told otherwise
struct FlakyMatchStore {
    inner: Arc<InMemoryMatchStore>,
    failing_project: Mutex<Option<ProjectId>>,
}

impl FlakyMatchStore {
    fn heal(&self) {
        *self.failing_project.lock().unwrap() = None;
    }
}

#[async_trait]
impl MatchStore for FlakyMatchStore {
    async fn load_active_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.inner.load_active_for(scope).await
    }

    async fn load_all_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        let failing = self.failing_project.lock().unwrap().clone();
        if let (Some(failing), MatchScope::Project(id)) = (failing, scope) {
            if &failing == id {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
        }
        self.inner.load_all_for(scope).await
    }

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
        self.inner.get_match(id).await
    }

    async fn create(&self, record: Match) -> Result<Match, StoreError> {
        self.inner.create(record).await
    }

    async fn transition(
        &self,
        id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        resolution: lendmatch::models::Resolution,
    ) -> Result<Match, StoreError> {
        self.inner.transition(id, from, to, resolution).await
    }
}

/// Raises the cancel flag as soon as the first match is written
struct CancelOnFirstWrite {
    inner: Arc<InMemoryMatchStore>,
    flag: CancelFlag,
}

#[async_trait]
impl MatchStore for CancelOnFirstWrite {
    async fn load_active_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.inner.load_active_for(scope).await
    }

    async fn load_all_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.inner.load_all_for(scope).await
    }

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
        self.inner.get_match(id).await
    }

    async fn create(&self, record: Match) -> Result<Match, StoreError> {
        let created = self.inner.create(record).await?;
        self.flag.cancel();
        Ok(created)
    }

    async fn transition(
        &self,
        id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        resolution: lendmatch::models::Resolution,
    ) -> Result<Match, StoreError> {
        self.inner.transition(id, from, to, resolution).await
    }
}

#[tokio::test]
async fn test_sweep_covers_every_pair_once() {
    let backend = seed(6, 3);
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 4);

    let report = engine.sweep(SweepOptions::default()).await.unwrap();

    assert_eq!(report.created, 18);
    assert_eq!(report.projects_completed, 6);
    assert_eq!(report.cursor, Some(ProjectId::from("p05")));
    assert!(report.halted.is_none());
    assert!(report.unevaluated.is_empty());

    // Second sweep with no data change is a no-op
    let again = engine.sweep(SweepOptions::default()).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.stats.covered, 18);

    assert_one_active_per_pair(&all_matches(&backend.matches, 6).await);
}

#[tokio::test]
async fn test_direct_create_on_covered_pair_conflicts() {
    let backend = seed(1, 1);
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 1);
    engine.sweep(SweepOptions::default()).await.unwrap();

    let duplicate = Match::pending("p00".into(), "l00".into(), 0.9, Utc::now());
    let err: EngineError = backend.matches.create(duplicate).await.unwrap_err().into();

    assert!(matches!(err, EngineError::ActiveMatchExists { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generation_never_duplicates_active_pairs() {
    let backend = seed(3, 5);
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 4);

    let mut handles = Vec::new();
    for round in 0..12 {
        let engine = engine.clone();
        let project = ProjectId(format!("p{:02}", round % 3));
        handles.push(tokio::spawn(async move {
            engine.generate_for_project(&project).await.map(|_| ())
        }));
    }
    for _ in 0..3 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.sweep(SweepOptions::default()).await.map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = all_matches(&backend.matches, 3).await;
    assert_eq!(stored.len(), 15);
    assert_one_active_per_pair(&stored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_have_one_winner() {
    let backend = seed(1, 1);
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 1);
    let created = engine.generate_for_project(&"p00".into()).await.unwrap();
    let id = created.created[0].id;

    let approver = engine.lifecycle();
    let rejecter = engine.lifecycle();
    let (approved, rejected) = tokio::join!(
        tokio::spawn(async move { approver.approve(id).await }),
        tokio::spawn(async move { rejecter.reject(id).await }),
    );
    let outcomes = [approved.unwrap(), rejected.unwrap()];

    let winners: Vec<&Match> = outcomes.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let final_status = winners[0].status;

    let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    match loser {
        EngineError::Conflict { actual, .. } => assert_eq!(*actual, final_status),
        other => panic!("expected conflict, got {other:?}"),
    }

    let stored = backend.matches.get_match(id).await.unwrap().unwrap();
    assert_eq!(stored.status, final_status);
}

#[tokio::test]
async fn test_accepted_match_is_terminal_and_advances_project() {
    let backend = seed(1, 2);
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 1);
    let created = engine.generate_for_project(&"p00".into()).await.unwrap();
    let lifecycle = engine.lifecycle();

    lifecycle.approve(created.created[0].id).await.unwrap();
    lifecycle.approve(created.created[1].id).await.unwrap();

    let project = backend.projects.get_project(&"p00".into()).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Matched);

    let err = lifecycle.reject(created.created[0].id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict {
            actual: MatchStatus::Accepted,
            ..
        }
    ));

    // Matched projects still take part in matching but every pair is covered
    let again = engine.generate_for_project(&"p00".into()).await.unwrap();
    assert!(again.created.is_empty());
}

#[tokio::test]
async fn test_rejected_pair_stays_closed_until_data_changes() {
    let backend = seed(1, 1);
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 1);
    let created = engine.generate_for_project(&"p00".into()).await.unwrap();
    let rejected = engine.lifecycle().reject(created.created[0].id).await.unwrap();

    let unchanged = engine.generate_for_project(&"p00".into()).await.unwrap();
    assert!(unchanged.created.is_empty());
    assert_eq!(unchanged.stats.suppressed, 1);

    let mut project = create_project("p00");
    project.debt_request = 3_500_000;
    project.updated_at = rejected.updated_at + Duration::seconds(1);
    backend.projects.upsert(project).unwrap();

    let changed = engine.generate_for_project(&"p00".into()).await.unwrap();
    assert_eq!(changed.created.len(), 1);

    let summary = engine.summary_for(MatchScope::Project("p00".into())).await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.pending, 1);
}

#[tokio::test]
async fn test_upstream_failure_halts_and_resumes() {
    let backend = seed(5, 2);
    let flaky = Arc::new(FlakyMatchStore {
        inner: backend.matches.clone(),
        failing_project: Mutex::new(Some(ProjectId::from("p02"))),
    });
    let repos = Repositories {
        projects: backend.projects.clone(),
        criteria: backend.criteria.clone(),
        matches: flaky.clone(),
        notifier: Arc::new(TracingNotifier),
    };
    let engine = engine_over(repos, 1);

    let report = engine.sweep(SweepOptions::default()).await.unwrap();

    assert!(matches!(report.halted, Some(SweepHalt::UpstreamUnavailable { .. })));
    assert_eq!(report.cursor, Some(ProjectId::from("p01")));
    assert_eq!(report.created, 4);
    let stranded: HashSet<ProjectId> =
        report.unevaluated.iter().map(|p| p.project_id.clone()).collect();
    assert!(stranded.contains(&ProjectId::from("p02")));
    assert!(!stranded.contains(&ProjectId::from("p00")));

    flaky.heal();
    let resumed = engine
        .sweep(SweepOptions {
            resume_after: report.cursor.clone(),
            ..SweepOptions::default()
        })
        .await
        .unwrap();

    assert!(resumed.halted.is_none());
    assert_eq!(resumed.created, 6);
    assert_eq!(resumed.cursor, Some(ProjectId::from("p04")));
    assert_one_active_per_pair(&all_matches(&backend.matches, 5).await);
}

#[tokio::test]
async fn test_cancelled_sweep_leaves_consistent_partial_progress() {
    let backend = seed(3, 2);
    let flag = CancelFlag::new();
    let repos = Repositories {
        matches: Arc::new(CancelOnFirstWrite {
            inner: backend.matches.clone(),
            flag: flag.clone(),
        }),
        ..backend.repositories(Arc::new(TracingNotifier))
    };
    let engine = engine_over(repos, 1);

    let report = engine
        .sweep(SweepOptions {
            resume_after: None,
            cancel: flag,
        })
        .await
        .unwrap();

    assert_eq!(report.halted, Some(SweepHalt::Cancelled));
    assert_eq!(report.created, 1);
    assert_eq!(report.cursor, None);
    assert_eq!(report.unevaluated.len(), 5);

    // A fresh run picks up exactly what was left
    let finisher = engine_over(backend.repositories(Arc::new(TracingNotifier)), 2);
    let rest = finisher.sweep(SweepOptions::default()).await.unwrap();
    assert_eq!(rest.created, 5);
    assert_eq!(rest.stats.covered, 1);
}

#[tokio::test]
async fn test_listing_failure_aborts_sweep() {
    struct DownProjects;

    #[async_trait]
    impl ProjectSource for DownProjects {
        async fn list_active(&self) -> Result<Vec<Project>, StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }

        async fn get_project(&self, _: &ProjectId) -> Result<Option<Project>, StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }

        async fn advance_status(
            &self,
            _: &ProjectId,
            _: ProjectStatus,
            _: ProjectStatus,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("timeout".to_string()))
        }
    }

    let backend = seed(0, 1);
    let repos = Repositories {
        projects: Arc::new(DownProjects),
        criteria: backend.criteria.clone(),
        matches: backend.matches.clone(),
        notifier: Arc::new(TracingNotifier),
    };

    let err = engine_over(repos, 2).sweep(SweepOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_matches_for_lender_ranked_by_score() {
    let backend = seed(2, 1);
    let mut closer = create_project("p01");
    closer.debt_request = 4_500_000;
    backend.projects.upsert(closer).unwrap();
    let engine = engine_over(backend.repositories(Arc::new(TracingNotifier)), 2);
    engine.sweep(SweepOptions::default()).await.unwrap();

    let matches = engine
        .matches_for(&MatchScope::Lender(LenderId::from("l00")))
        .await
        .unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].project_id, ProjectId::from("p01"));
    assert!(matches[0].score >= matches[1].score);
}
