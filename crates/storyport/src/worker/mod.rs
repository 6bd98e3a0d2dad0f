pub mod pool;
pub mod task;

pub use pool::{WorkerError, WorkerPool};
pub use task::ImportTask;
