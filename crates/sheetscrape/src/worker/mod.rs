pub mod execution;
pub mod partial;
pub mod pool;

pub use partial::{Finding, ResultJournal};
pub use pool::{JobRunner, WorkerPool};
