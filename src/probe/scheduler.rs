//! Outer scheduler: bounded pool of batches with shared progress accounting

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use super::batch::{process_batch, BatchRow};
use super::prober::UrlProber;
use super::status::to_result_row;
use crate::models::{round_progress, ProbeParams, TaskRecord};
use crate::proxy::ProxyPool;
use crate::store::{PoolRegistry, TaskStore};

/// Publish progress on every Nth completed URL (and on the last one)
const PROGRESS_PUBLISH_EVERY: usize = 5;

/// Single authoritative progress counter for one task.
///
/// Workers report through `record_one`; the tracker owns the atomic and
/// publishes boundary ticks into the task store. In-flight progress is
/// capped at 99; only the terminal completion writes 100.
pub struct ProgressTracker {
    store: Arc<TaskStore>,
    task_id: String,
    total: usize,
    processed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(store: Arc<TaskStore>, task_id: String, total: usize) -> Self {
        Self {
            store,
            task_id,
            total,
            processed: AtomicUsize::new(0),
        }
    }

    /// Count one completed URL, returning the new total.
    pub fn record_one(&self) -> usize {
        let done = self.processed.fetch_add(1, Ordering::SeqCst) + 1;

        if done % PROGRESS_PUBLISH_EVERY == 0 || done == self.total {
            let percent =
                round_progress(((done as f64 / self.total as f64) * 100.0).min(99.0));
            self.store.publish_progress(&self.task_id, percent);
            debug!(
                task_id = %self.task_id,
                processed = done,
                total = self.total,
                percent,
                "Progress published"
            );
        }

        done
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

/// Runs probe tasks: partitions URLs into batches, keeps at most
/// `max_concurrent_batches` in flight, pairs each batch with a pool proxy,
/// and drives the task record through its lifecycle.
#[derive(Clone)]
pub struct ProbeScheduler {
    store: Arc<TaskStore>,
    pools: Arc<PoolRegistry>,
    prober: UrlProber,
}

impl ProbeScheduler {
    pub fn new(store: Arc<TaskStore>, pools: Arc<PoolRegistry>) -> Self {
        Self::with_prober(store, pools, UrlProber::new())
    }

    pub fn with_prober(
        store: Arc<TaskStore>,
        pools: Arc<PoolRegistry>,
        prober: UrlProber,
    ) -> Self {
        Self {
            store,
            pools,
            prober,
        }
    }

    /// Register the task and run it in the background.
    ///
    /// The record is visible in the task store before this returns; the
    /// caller polls it for progress and the final report.
    pub fn submit(
        &self,
        task_id: String,
        urls: Vec<String>,
        proxies: Vec<String>,
        params: ProbeParams,
    ) {
        self.store.put(TaskRecord::new(&task_id));
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_task(task_id, urls, proxies, params).await;
        });
    }

    /// Run one probe task to its terminal transition.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn run_task(
        &self,
        task_id: String,
        urls: Vec<String>,
        proxies: Vec<String>,
        params: ProbeParams,
    ) {
        self.store.put(TaskRecord::new(&task_id));

        let total = urls.len();
        if total == 0 {
            self.store
                .mark_failed_at(&task_id, "No valid URLs to process.", 100.0);
            return;
        }

        let mut params = params.normalized();
        let pool = Arc::new(ProxyPool::new(proxies));
        self.pools.insert(&task_id, Arc::clone(&pool));

        let proxy_count = pool.len();
        if proxy_count > 0 {
            info!(proxies = proxy_count, "Using proxy pool");
        } else {
            info!("No proxies provided, running without proxies");
        }

        // One proxy per in-flight batch; more batches than proxies would
        // break per-batch exclusivity.
        if proxy_count > 0 && params.max_concurrent_batches > proxy_count {
            warn!(
                requested = params.max_concurrent_batches,
                proxies = proxy_count,
                "Reducing max_concurrent_batches to proxy count"
            );
            self.store.set_message(
                &task_id,
                format!("Concurrent batches reduced to {proxy_count} to match proxy count"),
            );
            params.max_concurrent_batches = proxy_count;
        }

        let tracker = Arc::new(ProgressTracker::new(
            Arc::clone(&self.store),
            task_id.clone(),
            total,
        ));

        let run = self.run_batches(&task_id, urls, &params, &pool, &tracker);
        match std::panic::AssertUnwindSafe(run).catch_unwind().await {
            Ok(rows) => {
                let results = rows
                    .iter()
                    .map(|row| to_result_row(&row.url, &row.raw_status, &row.proxy_used, row.batch_id))
                    .collect();
                self.store.mark_completed(&task_id, results, pool.stats());
                info!(processed = tracker.processed(), total, "Task completed");
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("Critical error during background processing: {msg}");
                self.store
                    .mark_failed(&task_id, format!("Critical error: {msg}"));
            }
        }

        self.pools.remove(&task_id);
    }

    async fn run_batches(
        &self,
        task_id: &str,
        urls: Vec<String>,
        params: &ProbeParams,
        pool: &Arc<ProxyPool>,
        tracker: &Arc<ProgressTracker>,
    ) -> Vec<BatchRow> {
        let batches: Vec<Vec<String>> = urls
            .chunks(params.logical_batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        info!(batches = batches.len(), "Partitioned URLs into logical batches");

        let submit_delay = Duration::from_secs_f64(params.inter_request_submit_delay);
        let retry_delay = Duration::from_secs_f64(params.retry_delay_seconds);

        let mut queue = batches.into_iter().enumerate();
        let mut inflight = FuturesUnordered::new();

        let submit_batch = |(idx, batch_urls): (usize, Vec<String>),
                            inflight: &mut FuturesUnordered<_>| {
            let batch_id = (idx + 1) as u64;
            let proxy = pool.checkout();
            let handle = tokio::spawn(process_batch(
                self.prober.clone(),
                batch_id,
                batch_urls,
                proxy.clone(),
                params.max_workers_per_batch,
                submit_delay,
                params.max_retries_per_url,
                retry_delay,
                Arc::clone(tracker),
            ));
            inflight.push(async move { (batch_id, proxy, handle.await) });
        };

        for _ in 0..params.max_concurrent_batches {
            match queue.next() {
                Some(item) => submit_batch(item, &mut inflight),
                None => break,
            }
        }

        let mut all_rows = Vec::new();
        while let Some((batch_id, proxy, joined)) = inflight.next().await {
            match joined {
                Ok(rows) => {
                    if let Some(endpoint) = proxy.as_deref() {
                        pool.release(endpoint, true);
                    }
                    all_rows.extend(rows);
                }
                Err(err) => {
                    // One crashed batch does not abort the task.
                    error!(task_id, batch_id, "Batch task failed: {err}");
                    if let Some(endpoint) = proxy.as_deref() {
                        pool.release(endpoint, false);
                    }
                }
            }

            if let Some(item) = queue.next() {
                submit_batch(item, &mut inflight);
            }
        }

        all_rows
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
