use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::repository::{
    CriteriaSource, MatchStore, Notifier, ProjectSource, Repositories, StoreError,
};
use crate::models::{
    LenderId, LendingCriteria, Match, MatchId, MatchScope, MatchStatus, PairKey, Project,
    ProjectId, ProjectStatus, Resolution,
};

const SHARD_COUNT: usize = 16;

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("in-memory lock poisoned".to_string())
}

/// In-memory project records
#[derive(Debug, Default)]
pub struct InMemoryProjects {
    records: RwLock<BTreeMap<ProjectId, Project>>,
}

impl InMemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project
    pub fn upsert(&self, project: Project) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(poisoned)?
            .insert(project.id.clone(), project);
        Ok(())
    }
}

#[async_trait]
impl ProjectSource for InMemoryProjects {
    async fn list_active(&self) -> Result<Vec<Project>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|p| p.status.seeks_capital())
            .cloned()
            .collect())
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn advance_status(
        &self,
        id: &ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let project = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))?;

        if project.status != from {
            return Ok(false);
        }
        project.status = to;
        Ok(true)
    }
}

/// In-memory lender criteria, one record per lender
#[derive(Debug, Default)]
pub struct InMemoryCriteria {
    records: RwLock<BTreeMap<LenderId, LendingCriteria>>,
}

impl InMemoryCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, criteria: LendingCriteria) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(poisoned)?
            .insert(criteria.lender_id.clone(), criteria);
        Ok(())
    }
}

#[async_trait]
impl CriteriaSource for InMemoryCriteria {
    async fn list_all(&self) -> Result<Vec<LendingCriteria>, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.values().cloned().collect())
    }

    async fn get_criteria(
        &self,
        lender_id: &LenderId,
    ) -> Result<Option<LendingCriteria>, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.get(lender_id).cloned())
    }
}

#[derive(Debug, Default)]
struct Shard {
    by_pair: HashMap<PairKey, Vec<Match>>,
}

/// In-memory match store sharded by (project, lender) pair
///
/// Creation and transition on one pair serialize on that pair's shard;
/// pairs in other shards proceed without contention.
#[derive(Debug)]
pub struct InMemoryMatchStore {
    shards: Vec<Mutex<Shard>>,
    index: RwLock<HashMap<MatchId, PairKey>>,
}

impl Default for InMemoryMatchStore {
    fn default() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            index: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard_for(&self, pair: &PairKey) -> Result<MutexGuard<'_, Shard>, StoreError> {
        let mut hasher = DefaultHasher::new();
        pair.hash(&mut hasher);
        let slot = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[slot].lock().map_err(poisoned)
    }

    fn collect(&self, scope: &MatchScope, active_only: bool) -> Result<Vec<Match>, StoreError> {
        let mut found = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().map_err(poisoned)?;
            found.extend(
                shard
                    .by_pair
                    .values()
                    .flatten()
                    .filter(|m| scope.covers(m) && (!active_only || m.is_active()))
                    .cloned(),
            );
        }
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    /// Number of stored matches, all statuses
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.index.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn load_active_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.collect(scope, true)
    }

    async fn load_all_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.collect(scope, false)
    }

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
        let pair = match self.index.read().map_err(poisoned)?.get(&id) {
            Some(pair) => pair.clone(),
            None => return Ok(None),
        };
        let shard = self.shard_for(&pair)?;
        Ok(shard
            .by_pair
            .get(&pair)
            .and_then(|history| history.iter().find(|m| m.id == id))
            .cloned())
    }

    async fn create(&self, record: Match) -> Result<Match, StoreError> {
        let pair = record.pair();
        let mut shard = self.shard_for(&pair)?;
        let history = shard.by_pair.entry(pair.clone()).or_default();

        if history.iter().any(Match::is_active) {
            return Err(StoreError::ActiveMatchExists(pair));
        }

        // Index guard first: a record is never stored without being reachable by id
        let mut index = self.index.write().map_err(poisoned)?;
        index.insert(record.id, pair);
        history.push(record.clone());
        Ok(record)
    }

    async fn transition(
        &self,
        id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        resolution: Resolution,
    ) -> Result<Match, StoreError> {
        let pair = self
            .index
            .read()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("match {id}")))?;

        let mut shard = self.shard_for(&pair)?;
        let record = shard
            .by_pair
            .get_mut(&pair)
            .and_then(|history| history.iter_mut().find(|m| m.id == id))
            .ok_or_else(|| StoreError::NotFound(format!("match {id}")))?;

        if record.status != from {
            return Err(StoreError::StatusConflict {
                match_id: id,
                actual: record.status,
            });
        }

        record.status = to;
        record.resolution = Some(resolution);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

/// Concrete in-memory stores, kept so callers can load records directly
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    pub projects: Arc<InMemoryProjects>,
    pub criteria: Arc<InMemoryCriteria>,
    pub matches: Arc<InMemoryMatchStore>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repositories(&self, notifier: Arc<dyn Notifier>) -> Repositories {
        Repositories {
            projects: self.projects.clone(),
            criteria: self.criteria.clone(),
            matches: self.matches.clone(),
            notifier,
        }
    }
}

/// Seed file layout for running without a database
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub criteria: Vec<LendingCriteria>,
}

impl SeedData {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Unavailable(format!("parsing {}: {e}", path.display())))
    }

    pub fn apply(self, backend: &InMemoryBackend) -> Result<(), StoreError> {
        let (projects, criteria) = (self.projects.len(), self.criteria.len());
        for project in self.projects {
            backend.projects.upsert(project)?;
        }
        for c in self.criteria {
            backend.criteria.upsert(c)?;
        }
        tracing::info!(projects, criteria, "seeded in-memory repositories");
        Ok(())
    }
}
