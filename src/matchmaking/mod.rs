pub mod queue;
pub mod service;

pub use queue::{MatchQueue, QueueEntry};
pub use service::{EnqueueError, MatchmakingService};
