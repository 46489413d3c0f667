use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::models::{PoolStats, ProxyUsage};

/// Cooldown grows linearly with consecutive failures, capped short.
const COOLDOWN_STEP_SECS: i64 = 5;
const COOLDOWN_CAP_SECS: i64 = 30;

#[derive(Debug)]
struct ProxyEntry {
    endpoint: String,
    in_use: bool,
    use_count: u64,
    failures: u64,
    last_error_at: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl ProxyEntry {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            in_use: false,
            use_count: 0,
            failures: 0,
            last_error_at: None,
            cooldown_until: None,
        }
    }

    fn available(&self, now: DateTime<Utc>) -> bool {
        !self.in_use && self.cooldown_until.map_or(true, |until| now >= until)
    }
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<ProxyEntry>,
    cursor: usize,
    checkouts: u64,
    releases: u64,
    failures: u64,
}

/// Fair, insertion-ordered pool of proxy endpoints.
///
/// A batch holds one checked-out proxy exclusively for its whole duration;
/// multiple batches completing at once may race on `release` + `checkout`,
/// so every operation takes the single internal lock.
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Build a pool from endpoint strings, keeping insertion order.
    /// An empty list is legal; `checkout` then always returns `None`.
    pub fn new(endpoints: Vec<String>) -> Self {
        let entries = endpoints.into_iter().map(ProxyEntry::new).collect();
        Self {
            state: Mutex::new(PoolState {
                entries,
                ..PoolState::default()
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check out the next available proxy in round-robin order.
    ///
    /// Skips entries that are in use or cooling down after an error.
    /// Returns `None` when nothing is available; the scheduler treats that
    /// as "run this batch without a proxy".
    pub fn checkout(&self) -> Option<String> {
        let mut state = self.state.lock();
        let count = state.entries.len();
        if count == 0 {
            return None;
        }

        let now = Utc::now();
        for offset in 0..count {
            let idx = (state.cursor + offset) % count;
            if state.entries[idx].available(now) {
                let entry = &mut state.entries[idx];
                entry.in_use = true;
                entry.use_count += 1;
                let endpoint = entry.endpoint.clone();
                state.cursor = (idx + 1) % count;
                state.checkouts += 1;
                debug!(endpoint = %endpoint, "Checked out proxy");
                return Some(endpoint);
            }
        }

        None
    }

    /// Return a proxy to the pool.
    ///
    /// `ok = false` records an error and puts the proxy on cooldown.
    /// Releasing an endpoint the pool never issued is ignored; releasing
    /// one that is not checked out is a warned no-op.
    pub fn release(&self, endpoint: &str, ok: bool) {
        let mut state = self.state.lock();

        let Some(idx) = state.entries.iter().position(|e| e.endpoint == endpoint) else {
            warn!(endpoint = %endpoint, "Release of unknown proxy ignored");
            return;
        };

        if !state.entries[idx].in_use {
            warn!(endpoint = %endpoint, "Double release of proxy ignored");
            return;
        }

        state.entries[idx].in_use = false;
        state.releases += 1;

        if !ok {
            let now = Utc::now();
            state.failures += 1;
            let entry = &mut state.entries[idx];
            entry.failures += 1;
            entry.last_error_at = Some(now);
            entry.cooldown_until = Some(now + cooldown_for(entry.failures));
            debug!(
                endpoint = %endpoint,
                failures = entry.failures,
                "Proxy released with error, cooling down"
            );
        }
    }

    /// Number of proxies currently checked out
    pub fn in_use_count(&self) -> usize {
        self.state.lock().entries.iter().filter(|e| e.in_use).count()
    }

    /// Snapshot of pool counters and per-proxy usage
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            checkouts: state.checkouts,
            releases: state.releases,
            failures: state.failures,
            proxies: state
                .entries
                .iter()
                .map(|e| ProxyUsage {
                    endpoint: e.endpoint.clone(),
                    use_count: e.use_count,
                    in_use: e.in_use,
                    last_error_at: e.last_error_at,
                })
                .collect(),
        }
    }
}

fn cooldown_for(failures: u64) -> Duration {
    let secs = (COOLDOWN_STEP_SECS * failures as i64).min(COOLDOWN_CAP_SECS);
    Duration::seconds(secs)
}
