//! Event-to-action runtime: log tailing, trigger matching, enrichment and
//! script dispatch

pub mod api_client;
pub mod dispatcher;
pub mod monitor;
pub mod script;

pub use api_client::ControlPlaneClient;
pub use dispatcher::ActionDispatcher;
pub use monitor::{LogTailMonitor, MatchedEvent, Monitor, TriggerSet};
pub use script::{ScriptOutcome, ScriptRunner};
