//! Per-task proxy pool with checkout/release semantics

mod pool;

pub use pool::ProxyPool;
