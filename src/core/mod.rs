// Core matching exports
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod filters;
pub mod generator;
pub mod lifecycle;
pub mod scoring;
pub mod sweep;

pub use dashboard::{summarize, MatchSummary};
pub use engine::{MatchingEngine, ProjectMatches};
pub use error::EngineError;
pub use evaluator::{evaluate, evaluate_checked, Evaluation};
pub use filters::{check_hard_filters, IneligibleReason, LocationMatch};
pub use generator::{GeneratedBatch, GenerationStats, MatchGenerator, PreparedCriteria};
pub use lifecycle::MatchLifecycle;
pub use scoring::{calculate_fitness, ScoreBreakdown};
pub use sweep::{CancelFlag, Sweep, SweepHalt, SweepOptions, SweepReport};
