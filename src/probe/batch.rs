//! Inner worker pool: probes a contiguous slice of URLs with one proxy

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::prober::UrlProber;
use super::scheduler::ProgressTracker;
use super::status::RawStatus;

/// Scheduler-internal outcome of one URL within a batch
#[derive(Debug, Clone)]
pub struct BatchRow {
    pub url: String,
    pub raw_status: RawStatus,
    /// Endpoint handed to the batch, or `"None"`
    pub proxy_used: String,
    pub batch_id: u64,
}

/// Probe every URL of one batch, sharing `proxy` across workers.
///
/// The effective worker count is `min(workers, urls.len())` with a floor of
/// one. Rows come back in completion order and the returned list always has
/// one row per input URL; worker crashes are folded into
/// `ERROR_INNER_THREAD_EXCEPTION` rows rather than aborting the batch.
/// `progress` is ticked exactly once per completed URL.
#[allow(clippy::too_many_arguments)]
pub async fn process_batch(
    prober: UrlProber,
    batch_id: u64,
    urls: Vec<String>,
    proxy: Option<String>,
    workers: usize,
    submit_delay: Duration,
    max_retries: u32,
    retry_delay: Duration,
    progress: Arc<ProgressTracker>,
) -> Vec<BatchRow> {
    let total = urls.len();
    let effective_workers = workers.min(total).max(1);
    let proxy_label = match proxy.as_deref() {
        Some(endpoint) if !endpoint.is_empty() => endpoint.to_string(),
        _ => "None".to_string(),
    };

    info!(
        batch_id,
        urls = total,
        proxy = %proxy_label,
        workers = effective_workers,
        "Batch starting"
    );

    let mut rows = Vec::with_capacity(total);

    if effective_workers == 1 {
        for (idx, url) in urls.into_iter().enumerate() {
            if idx > 0 && !submit_delay.is_zero() {
                tokio::time::sleep(submit_delay).await;
            }
            let raw_status = prober
                .probe(
                    &url,
                    proxy.as_deref(),
                    max_retries,
                    retry_delay,
                    batch_id,
                    idx + 1,
                    total,
                )
                .await;
            rows.push(BatchRow {
                url,
                raw_status,
                proxy_used: proxy_label.clone(),
                batch_id,
            });
            progress.record_one();
        }
    } else {
        let limiter = Arc::new(Semaphore::new(effective_workers));
        let mut inflight = FuturesUnordered::new();

        for (idx, url) in urls.into_iter().enumerate() {
            if idx > 0 && !submit_delay.is_zero() {
                tokio::time::sleep(submit_delay).await;
            }

            let limiter = Arc::clone(&limiter);
            let prober = prober.clone();
            let proxy = proxy.clone();
            let worker_url = url.clone();
            let handle = tokio::spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                prober
                    .probe(
                        &worker_url,
                        proxy.as_deref(),
                        max_retries,
                        retry_delay,
                        batch_id,
                        idx + 1,
                        total,
                    )
                    .await
            });
            inflight.push(async move { (url, handle.await) });
        }

        while let Some((url, joined)) = inflight.next().await {
            let raw_status = match joined {
                Ok(raw) => raw,
                Err(err) => {
                    error!(batch_id, url = %url, "Inner worker crashed: {err}");
                    RawStatus::WorkerPanic(err.to_string())
                }
            };
            rows.push(BatchRow {
                url,
                raw_status,
                proxy_used: proxy_label.clone(),
                batch_id,
            });
            progress.record_one();
        }
    }

    info!(batch_id, results = rows.len(), "Batch finished");
    rows
}
