use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;

use super::repository::{CriteriaSource, MatchStore, ProjectSource, StoreError};
use crate::models::{
    LenderId, LendingCriteria, Match, MatchId, MatchScope, MatchStatus, PairKey, Policy, Project,
    ProjectId, ProjectStatus, RateRange, Resolution, ValidationError,
};

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unavailable(format!("migration failed: {value}"))
    }
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("corrupt {what} row: {detail}"))
}

fn amount(row: &PgRow, column: &str) -> Result<u64, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u64::try_from(raw).map_err(|_| corrupt(column, raw))
}

/// Amounts are BIGINT columns; refuse values that would wrap
fn column_amount(
    record: &'static str,
    id: &str,
    column: &str,
    value: u64,
) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| {
        StoreError::Invalid(ValidationError {
            record,
            id: id.to_string(),
            violations: vec![format!("{column} {value} exceeds the storable range")],
        })
    })
}

fn parse<T: FromStr>(what: &str, raw: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| corrupt(what, e))
}

/// NULL array means no restriction
fn policy<T: FromStr>(row: &PgRow, column: &str) -> Result<Policy<T>, StoreError>
where
    T::Err: std::fmt::Display,
{
    let raw: Option<Vec<String>> = row.try_get(column)?;
    match raw {
        None => Ok(Policy::Unrestricted),
        Some(values) => values
            .iter()
            .map(|v| parse::<T>(column, v))
            .collect::<Result<Vec<_>, _>>()
            .map(Policy::RestrictedTo),
    }
}

fn policy_column<T>(policy: &Policy<T>, label: impl Fn(&T) -> String) -> Option<Vec<String>> {
    match policy {
        Policy::Unrestricted => None,
        Policy::RestrictedTo(values) => Some(values.iter().map(label).collect()),
    }
}

fn project_from_row(row: &PgRow) -> Result<Project, StoreError> {
    let progress: i16 = row.try_get("progress")?;
    Ok(Project {
        id: ProjectId(row.try_get("id")?),
        borrower_id: row.try_get("borrower_id")?,
        location: row.try_get("location")?,
        asset_type: parse("asset_type", row.try_get::<&str, _>("asset_type")?)?,
        deal_type: parse("deal_type", row.try_get::<&str, _>("deal_type")?)?,
        capital_type: parse("capital_type", row.try_get::<&str, _>("capital_type")?)?,
        debt_request: amount(row, "debt_request")?,
        total_cost: amount(row, "total_cost")?,
        completed_value: amount(row, "completed_value")?,
        proposed_rate: row.try_get("proposed_rate")?,
        description: row.try_get("description")?,
        status: parse("status", row.try_get::<&str, _>("status")?)?,
        progress: u8::try_from(progress).map_err(|_| corrupt("progress", progress))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn criteria_from_row(row: &PgRow) -> Result<LendingCriteria, StoreError> {
    let min_rate: Option<f64> = row.try_get("min_rate")?;
    let max_rate: Option<f64> = row.try_get("max_rate")?;
    let locations: Option<Vec<String>> = row.try_get("locations")?;

    Ok(LendingCriteria {
        lender_id: LenderId(row.try_get("lender_id")?),
        asset_types: policy(row, "asset_types")?,
        deal_types: policy(row, "deal_types")?,
        capital_types: policy(row, "capital_types")?,
        min_loan_amount: amount(row, "min_loan_amount")?,
        max_loan_amount: amount(row, "max_loan_amount")?,
        locations: locations.map_or(Policy::Unrestricted, Policy::RestrictedTo),
        max_ltv: row.try_get("max_ltv")?,
        rate_range: match (min_rate, max_rate) {
            (Some(min), Some(max)) => Some(RateRange { min, max }),
            _ => None,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn match_from_row(row: &PgRow) -> Result<Match, StoreError> {
    let resolution: Option<String> = row.try_get("resolution")?;
    Ok(Match {
        id: MatchId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        lender_id: LenderId(row.try_get("lender_id")?),
        score: row.try_get("score")?,
        status: row.try_get("status")?,
        resolution: resolution
            .as_deref()
            .map(|r| parse::<Resolution>("resolution", r))
            .transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const PROJECT_COLUMNS: &str = r#"
    id, borrower_id, location, asset_type, deal_type, capital_type,
    debt_request, total_cost, completed_value, proposed_rate, description,
    status, progress, created_at, updated_at
"#;

const MATCH_COLUMNS: &str =
    "id, project_id, lender_id, score, status, resolution, created_at, updated_at";

/// PostgreSQL-backed repositories
///
/// The partial unique index on active pairs enforces one active match per
/// (project, lender); transitions are conditional updates on the current status.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run migrations
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(max_connections, "connected to PostgreSQL");

        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }

    /// Insert or replace a project record
    pub async fn upsert_project(&self, project: &Project) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO projects (
                id, borrower_id, location, asset_type, deal_type, capital_type,
                debt_request, total_cost, completed_value, proposed_rate, description,
                status, progress, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                borrower_id = EXCLUDED.borrower_id,
                location = EXCLUDED.location,
                asset_type = EXCLUDED.asset_type,
                deal_type = EXCLUDED.deal_type,
                capital_type = EXCLUDED.capital_type,
                debt_request = EXCLUDED.debt_request,
                total_cost = EXCLUDED.total_cost,
                completed_value = EXCLUDED.completed_value,
                proposed_rate = EXCLUDED.proposed_rate,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                updated_at = EXCLUDED.updated_at
        "#;

        let amount =
            |column: &str, value: u64| column_amount("project", &project.id.0, column, value);
        let debt_request = amount("debt_request", project.debt_request)?;
        let total_cost = amount("total_cost", project.total_cost)?;
        let completed_value = amount("completed_value", project.completed_value)?;

        sqlx::query(query)
            .bind(&project.id.0)
            .bind(&project.borrower_id)
            .bind(&project.location)
            .bind(project.asset_type.as_str())
            .bind(project.deal_type.as_str())
            .bind(project.capital_type.as_str())
            .bind(debt_request)
            .bind(total_cost)
            .bind(completed_value)
            .bind(project.proposed_rate)
            .bind(&project.description)
            .bind(project.status.as_str())
            .bind(i16::from(project.progress))
            .bind(project.created_at)
            .bind(project.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a lender's criteria record
    pub async fn upsert_criteria(&self, criteria: &LendingCriteria) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO lending_criteria (
                lender_id, asset_types, deal_types, capital_types,
                min_loan_amount, max_loan_amount, locations, max_ltv,
                min_rate, max_rate, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (lender_id) DO UPDATE SET
                asset_types = EXCLUDED.asset_types,
                deal_types = EXCLUDED.deal_types,
                capital_types = EXCLUDED.capital_types,
                min_loan_amount = EXCLUDED.min_loan_amount,
                max_loan_amount = EXCLUDED.max_loan_amount,
                locations = EXCLUDED.locations,
                max_ltv = EXCLUDED.max_ltv,
                min_rate = EXCLUDED.min_rate,
                max_rate = EXCLUDED.max_rate,
                updated_at = EXCLUDED.updated_at
        "#;

        let lender = criteria.lender_id.0.as_str();
        let amount = |column: &str, value: u64| column_amount("criteria", lender, column, value);
        let min_loan_amount = amount("min_loan_amount", criteria.min_loan_amount)?;
        let max_loan_amount = amount("max_loan_amount", criteria.max_loan_amount)?;

        sqlx::query(query)
            .bind(&criteria.lender_id.0)
            .bind(policy_column(&criteria.asset_types, |v| v.as_str().to_string()))
            .bind(policy_column(&criteria.deal_types, |v| v.as_str().to_string()))
            .bind(policy_column(&criteria.capital_types, |v| v.as_str().to_string()))
            .bind(min_loan_amount)
            .bind(max_loan_amount)
            .bind(policy_column(&criteria.locations, String::clone))
            .bind(criteria.max_ltv)
            .bind(criteria.rate_range.map(|r| r.min))
            .bind(criteria.rate_range.map(|r| r.max))
            .bind(criteria.created_at)
            .bind(criteria.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_matches(
        &self,
        scope: &MatchScope,
        active_only: bool,
    ) -> Result<Vec<Match>, StoreError> {
        let (column, id) = match scope {
            MatchScope::Project(id) => ("project_id", id.0.as_str()),
            MatchScope::Lender(id) => ("lender_id", id.0.as_str()),
        };
        let active_filter = if active_only {
            "AND status IN ('pending', 'accepted')"
        } else {
            ""
        };
        let query = format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE {column} = $1 {active_filter} \
             ORDER BY created_at, id"
        );

        let rows = sqlx::query(&query).bind(id).fetch_all(&self.pool).await?;
        rows.iter().map(match_from_row).collect()
    }
}

#[async_trait]
impl ProjectSource for PgRepository {
    async fn list_active(&self) -> Result<Vec<Project>, StoreError> {
        let query = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects \
             WHERE status IN ('pending', 'matched') ORDER BY id"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StoreError> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
        let row = sqlx::query(&query).bind(&id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn advance_status(
        &self,
        id: &ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> Result<bool, StoreError> {
        // updated_at is left alone: a status advance is not a data change
        let query = r#"
            UPDATE projects SET status = $3
            WHERE id = $1 AND status = $2
        "#;

        let result = sqlx::query(query)
            .bind(&id.0)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM projects WHERE id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("project {id}"))),
        }
    }
}

#[async_trait]
impl CriteriaSource for PgRepository {
    async fn list_all(&self) -> Result<Vec<LendingCriteria>, StoreError> {
        let rows = sqlx::query("SELECT * FROM lending_criteria ORDER BY created_at, lender_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(criteria_from_row).collect()
    }

    async fn get_criteria(
        &self,
        lender_id: &LenderId,
    ) -> Result<Option<LendingCriteria>, StoreError> {
        let row = sqlx::query("SELECT * FROM lending_criteria WHERE lender_id = $1")
            .bind(&lender_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(criteria_from_row).transpose()
    }
}

#[async_trait]
impl MatchStore for PgRepository {
    async fn load_active_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.load_matches(scope, true).await
    }

    async fn load_all_for(&self, scope: &MatchScope) -> Result<Vec<Match>, StoreError> {
        self.load_matches(scope, false).await
    }

    async fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
        let query = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1");
        let row = sqlx::query(&query).bind(id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn create(&self, record: Match) -> Result<Match, StoreError> {
        let query = r#"
            INSERT INTO matches (
                id, project_id, lender_id, score, status, resolution, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        let result = sqlx::query(query)
            .bind(record.id.0)
            .bind(&record.project_id.0)
            .bind(&record.lender_id.0)
            .bind(record.score)
            .bind(record.status)
            .bind(record.resolution.map(Resolution::as_str))
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::ActiveMatchExists(PairKey::new(
                    record.project_id.clone(),
                    record.lender_id.clone(),
                )))
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn transition(
        &self,
        id: MatchId,
        from: MatchStatus,
        to: MatchStatus,
        resolution: Resolution,
    ) -> Result<Match, StoreError> {
        let now: DateTime<Utc> = Utc::now();
        let query = format!(
            r#"
            UPDATE matches SET status = $3, resolution = $4, updated_at = $5
            WHERE id = $1 AND status = $2
            RETURNING {MATCH_COLUMNS}
            "#
        );

        let updated = sqlx::query(&query)
            .bind(id.0)
            .bind(from)
            .bind(to)
            .bind(resolution.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return match_from_row(&row);
        }

        // Lost the compare-and-set: report what the record is now
        let current = sqlx::query("SELECT status FROM matches WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        match current {
            Some(row) => Err(StoreError::StatusConflict {
                match_id: id,
                actual: row.try_get("status")?,
            }),
            None => Err(StoreError::NotFound(format!("match {id}"))),
        }
    }
}
