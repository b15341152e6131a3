pub mod app;
pub mod destination;
pub mod jobs;
pub mod locks;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use app::{SharedState, SyncApplication};
pub use destination::Destination;
pub use locks::ServerLockCoordinator;
pub use stats::SyncStats;
