use serde::{Deserialize, Serialize};

use super::PoolStats;

/// Lifecycle state of a probe task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Terminal states are sticky; only a non-terminal task may transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One classified URL in the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    /// Segment of the URL after the last `/`
    pub steam_id: String,
    pub status_summary: String,
    pub details: String,
    /// Endpoint string handed to the batch, or `"None"`
    pub proxy_used: String,
    /// 1-based batch id in input order
    pub batch_id: u64,
}

/// Live record of a probe task, readable while the task runs
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    /// Percentage in [0, 100], rounded to 2 decimals, monotone non-decreasing
    pub progress: f64,
    pub message: String,
    /// Empty until the task completes
    pub results: Vec<ResultRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_stats: Option<PoolStats>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Processing,
            progress: 0.0,
            message: "Starting URL checks...".to_string(),
            results: Vec::new(),
            proxy_stats: None,
        }
    }
}

/// Concurrency and retry parameters for one probe submission
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeParams {
    /// URLs per logical batch
    pub logical_batch_size: usize,
    /// Outer pool size (may be reduced to the proxy count)
    pub max_concurrent_batches: usize,
    /// Inner pool size (bounded by batch length)
    pub max_workers_per_batch: usize,
    /// Seconds between per-URL submissions within a batch
    pub inter_request_submit_delay: f64,
    pub max_retries_per_url: u32,
    pub retry_delay_seconds: f64,
}

impl Default for ProbeParams {
    fn default() -> Self {
        Self {
            logical_batch_size: 10,
            max_concurrent_batches: 2,
            max_workers_per_batch: 5,
            inter_request_submit_delay: 0.0,
            max_retries_per_url: 0,
            retry_delay_seconds: 5.0,
        }
    }
}

impl ProbeParams {
    /// Clamp parameters to their documented floors
    pub fn normalized(mut self) -> Self {
        self.logical_batch_size = self.logical_batch_size.max(1);
        self.max_concurrent_batches = self.max_concurrent_batches.max(1);
        self.max_workers_per_batch = self.max_workers_per_batch.max(1);
        self.inter_request_submit_delay = self.inter_request_submit_delay.max(0.0);
        self.retry_delay_seconds = self.retry_delay_seconds.max(0.0);
        self
    }
}

/// Round a progress percentage to 2 decimals
pub fn round_progress(progress: f64) -> f64 {
    (progress * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert_eq!(TaskStatus::Processing.to_string(), "PROCESSING");
    }

    #[test]
    fn test_new_record_defaults() {
        let record = TaskRecord::new("task-1");
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(record.progress, 0.0);
        assert!(record.results.is_empty());
        assert!(record.proxy_stats.is_none());
    }

    #[test]
    fn test_params_normalized_floors() {
        let params = ProbeParams {
            logical_batch_size: 0,
            max_concurrent_batches: 0,
            max_workers_per_batch: 0,
            inter_request_submit_delay: -1.0,
            max_retries_per_url: 0,
            retry_delay_seconds: -2.0,
        }
        .normalized();

        assert_eq!(params.logical_batch_size, 1);
        assert_eq!(params.max_concurrent_batches, 1);
        assert_eq!(params.max_workers_per_batch, 1);
        assert_eq!(params.inter_request_submit_delay, 0.0);
        assert_eq!(params.retry_delay_seconds, 0.0);
    }

    #[test]
    fn test_round_progress() {
        assert_eq!(round_progress(33.333333), 33.33);
        assert_eq!(round_progress(66.666666), 66.67);
        assert_eq!(round_progress(100.0), 100.0);
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }
}
