//! 出站同步：队列、操作与 Worker

pub mod operations;
pub mod queue;
pub mod worker;

pub use operations::{SyncExecutor, SyncOperations};
pub use queue::SyncQueue;
pub use worker::SyncWorker;
