//! Two-level concurrent probe engine
//!
//! The outer scheduler keeps a bounded number of batches in flight, each
//! batch fans its URLs out to a bounded inner worker pool, and every worker
//! reports into one shared progress counter.

pub mod batch;
pub mod classifier;
pub mod prober;
pub mod scheduler;
pub mod status;

pub use batch::BatchRow;
pub use prober::UrlProber;
pub use scheduler::{ProbeScheduler, ProgressTracker};
pub use status::{interpret, to_result_row, RawStatus};
