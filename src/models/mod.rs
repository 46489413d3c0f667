//! Data models for tasks, results and proxies

mod proxy;
mod task;

pub use proxy::{validate_endpoint, PoolStats, ProxyUsage};
pub use task::{round_progress, ProbeParams, ResultRow, TaskRecord, TaskStatus};
