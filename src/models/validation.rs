use chrono::{DateTime, Utc};
use thiserror::Error;

use super::domain::{LendingCriteria, Policy, Project};

/// A malformed input record, rejected before evaluation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {record} {id}: {}", .violations.join("; "))]
pub struct ValidationError {
    pub record: &'static str,
    pub id: String,
    pub violations: Vec<String>,
}

impl ValidationError {
    fn collect(record: &'static str, id: String, violations: Vec<String>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self {
                record,
                id,
                violations,
            })
        }
    }
}

/// Largest amount a record may carry; amounts are stored as signed 64-bit
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

fn check_amount(name: &str, value: u64, violations: &mut Vec<String>) {
    if value > MAX_AMOUNT {
        violations.push(format!("{name} {value} exceeds {MAX_AMOUNT}"));
    }
}

fn check_policy<T>(name: &str, policy: &Policy<T>, violations: &mut Vec<String>) {
    if let Policy::RestrictedTo(values) = policy {
        if values.is_empty() {
            violations.push(format!("{name} restricted to an empty set"));
        }
    }
}

impl Project {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if self.id.0.trim().is_empty() {
            violations.push("id is empty".to_string());
        }
        if self.borrower_id.trim().is_empty() {
            violations.push("borrower id is empty".to_string());
        }
        if self.debt_request == 0 {
            violations.push("debt request must be positive".to_string());
        }
        if self.completed_value == 0 {
            violations.push("completed value must be positive".to_string());
        }
        if self.debt_request > self.total_cost {
            violations.push(format!(
                "debt request {} exceeds total cost {}",
                self.debt_request, self.total_cost
            ));
        }
        check_amount("debt request", self.debt_request, &mut violations);
        check_amount("total cost", self.total_cost, &mut violations);
        check_amount("completed value", self.completed_value, &mut violations);
        if self.progress > 100 {
            violations.push(format!("progress {} exceeds 100", self.progress));
        }
        if let Some(rate) = self.proposed_rate {
            if !rate.is_finite() || rate < 0.0 {
                violations.push(format!("proposed rate {rate} is not a non-negative fraction"));
            }
        }

        ValidationError::collect("project", self.id.0.clone(), violations)
    }

    /// Advance progress; decreases are refused while the project is live
    pub fn record_progress(
        &mut self,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if progress > 100 {
            violations.push(format!("progress {progress} exceeds 100"));
        }
        if progress < self.progress && !self.status.is_terminated() {
            violations.push(format!(
                "progress cannot move back from {} to {progress}",
                self.progress
            ));
        }
        ValidationError::collect("project", self.id.0.clone(), violations)?;

        self.progress = progress;
        self.updated_at = now;
        Ok(())
    }
}

impl LendingCriteria {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if self.lender_id.0.trim().is_empty() {
            violations.push("lender id is empty".to_string());
        }
        if self.min_loan_amount > self.max_loan_amount {
            violations.push(format!(
                "min loan amount {} exceeds max loan amount {}",
                self.min_loan_amount, self.max_loan_amount
            ));
        }
        if self.max_loan_amount == 0 {
            violations.push("max loan amount must be positive".to_string());
        }
        check_amount("max loan amount", self.max_loan_amount, &mut violations);
        if let Some(ltv) = self.max_ltv {
            if !(ltv > 0.0 && ltv <= 1.0) {
                violations.push(format!("max ltv {ltv} outside (0, 1]"));
            }
        }
        if let Some(range) = self.rate_range {
            if !range.min.is_finite() || !range.max.is_finite() || range.min < 0.0 {
                violations.push("rate range must hold non-negative fractions".to_string());
            } else if range.min > range.max {
                violations.push(format!(
                    "min rate {} exceeds max rate {}",
                    range.min, range.max
                ));
            }
        }

        check_policy("asset types", &self.asset_types, &mut violations);
        check_policy("deal types", &self.deal_types, &mut violations);
        check_policy("capital types", &self.capital_types, &mut violations);
        check_policy("locations", &self.locations, &mut violations);
        if let Policy::RestrictedTo(locations) = &self.locations {
            if locations.iter().any(|l| l.trim().is_empty()) {
                violations.push("locations contain a blank entry".to_string());
            }
        }

        ValidationError::collect("criteria", self.lender_id.0.clone(), violations)
    }
}
