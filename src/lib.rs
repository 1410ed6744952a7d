//! Lendmatch - matching engine for real-estate borrowers and lenders
//!
//! Evaluates borrower projects against lender criteria, generates ranked
//! match records without duplicating active pairs, and drives each match
//! through its mediator-controlled lifecycle.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{
    evaluate, CancelFlag, EngineError, Evaluation, MatchGenerator, MatchLifecycle, MatchingEngine,
    SweepOptions, SweepReport,
};
pub use models::{LendingCriteria, Match, MatchStatus, Project, ScoringWeights};
pub use services::{Repositories, StoreError};
