//! Warden - URL status probing and remediation agent
//!
//! Two cooperating cores:
//!
//! - A probe engine that classifies large sets of profile URLs
//!   (banned / private / public / unexpected / error) through a two-level
//!   bounded worker pool with per-batch proxy rotation, retries and live
//!   progress reporting.
//! - An agent runtime that tails append-only log sinks, matches compiled
//!   trigger patterns, enriches captures through an HTTP control plane and
//!   dispatches parameterized remediation scripts.

pub mod agent;
pub mod config;
pub mod error;
pub mod models;
pub mod probe;
pub mod proxy;
pub mod store;

pub use config::AgentConfig;
pub use error::{Result, WardenError};
