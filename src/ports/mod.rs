pub mod cache;
pub mod persistence;
pub mod queue;

pub use cache::CachePort;
pub use persistence::{AdvanceOutcome, AppendOutcome, CandidateUrl, LeaseOutcome, PersistencePort};
pub use queue::{QueuePort, QueueStats};
