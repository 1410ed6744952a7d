// Repository boundary and adapters
pub mod memory;
pub mod notifier;
pub mod postgres;
pub mod repository;

pub use memory::{InMemoryBackend, InMemoryCriteria, InMemoryMatchStore, InMemoryProjects, SeedData};
pub use notifier::{dispatch_created, dispatch_transitioned, TracingNotifier};
pub use postgres::PgRepository;
pub use repository::{
    CriteriaSource, MatchStore, NotifyError, Notifier, ProjectSource, Repositories, StoreError,
};
