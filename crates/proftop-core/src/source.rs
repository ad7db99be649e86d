//! Snapshot sources.
//!
//! Every worker the dashboard watches is a [`SnapshotSource`]. A fetch
//! returns a `'static + Send` future so the poller can spawn each one as its
//! own task and observe them through [`crate::fanin::fan_in`].

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::{ReportEntry, snapshot_from_entries};
use crate::stat::{CallKey, RawCallStat, SnapshotError, WorkerSnapshot};

/// Future returned by [`SnapshotSource::fetch`].
pub type FetchFuture = BoxFuture<'static, Result<WorkerSnapshot, FetchError>>;

/// A worker whose cumulative call statistics can be fetched.
pub trait SnapshotSource: Send + Sync {
    /// Human-readable worker name, used in logs and errors.
    fn name(&self) -> &str;

    /// Start fetching the worker's current table.
    fn fetch(&self) -> FetchFuture;
}

/// A single fetch that did not produce a table.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode worker report: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed worker report: {0}")]
    Malformed(#[from] SnapshotError),

    #[error("fetch task failed: {0}")]
    TaskFailed(String),
}

/// Decode a worker report body into a table.
pub fn parse_worker_report(body: &[u8]) -> Result<WorkerSnapshot, FetchError> {
    let entries: Vec<ReportEntry> = serde_json::from_slice(body)?;
    Ok(snapshot_from_entries(entries)?)
}

// ---------------------------------------------------------------------------
// Report files
// ---------------------------------------------------------------------------

/// A worker that dumps its profiler report to a file.
///
/// The file is re-read on every fetch, so a worker that rewrites it in place
/// is watched live.
#[derive(Debug, Clone)]
pub struct ReportFileSource {
    name: String,
    path: PathBuf,
}

impl ReportFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl SnapshotSource for ReportFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> FetchFuture {
        let path = self.path.clone();
        async move {
            let body = tokio::fs::read(&path)
                .await
                .map_err(|source| FetchError::Io {
                    path: path.clone(),
                    source,
                })?;
            parse_worker_report(&body)
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Synthetic workers
// ---------------------------------------------------------------------------

/// Call sites a synthetic worker reports, with mean exclusive cost per call
/// (seconds) and the most calls one fetch can add.
const CALL_SITES: &[(&str, &str, u32, f64, u64)] = &[
    ("app/views.py", "index", 14, 0.0008, 40),
    ("app/views.py", "search", 52, 0.0040, 12),
    ("app/db/session.py", "execute", 88, 0.0025, 90),
    ("app/db/session.py", "fetch_all", 131, 0.0011, 60),
    ("app/cache.py", "get", 23, 0.00005, 400),
    ("app/cache.py", "set", 47, 0.00009, 80),
    ("app/serializers.py", "to_json", 9, 0.0003, 120),
    ("app/templates/render.py", "render", 66, 0.0060, 30),
    ("app/auth/tokens.py", "verify", 31, 0.0004, 45),
    ("lib/http/client.py", "request", 203, 0.0150, 8),
    ("~", "<built-in method select.epoll.poll>", 0, 0.0200, 20),
    ("~", "<built-in method builtins.len>", 0, 0.000001, 2000),
    ("~", "<method 'join' of 'str' objects>", 0, 0.000004, 600),
    ("lib/log/handlers.py", "emit", 112, 0.0002, 150),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Number of call sites the worker reports, capped at the catalog size.
    pub sites: usize,
    /// RNG seed. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Probability per fetch that the worker restarts and its counters reset.
    pub restart_chance: f64,
    /// Upper bound of the simulated fetch latency.
    pub max_latency: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sites: CALL_SITES.len(),
            seed: None,
            restart_chance: 0.0,
            max_latency: Duration::from_millis(20),
        }
    }
}

struct SyntheticState {
    rng: StdRng,
    counters: Vec<RawCallStat>,
    restarts: u64,
}

/// A simulated worker whose cumulative counters advance on every fetch.
pub struct SyntheticSource {
    name: String,
    keys: Vec<CallKey>,
    restart_chance: f64,
    max_latency: Duration,
    state: Mutex<SyntheticState>,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, config: &SyntheticConfig) -> Self {
        let sites = config.sites.clamp(1, CALL_SITES.len());
        let keys: Vec<CallKey> = CALL_SITES[..sites]
            .iter()
            .map(|&(file, function, line, _, _)| CallKey::new(file, function, line))
            .collect();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let restart_chance = if config.restart_chance.is_finite() {
            config.restart_chance.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            name: name.into(),
            keys,
            restart_chance,
            max_latency: config.max_latency,
            state: Mutex::new(SyntheticState {
                rng,
                counters: vec![RawCallStat::default(); sites],
                restarts: 0,
            }),
        }
    }

    /// `workers` synthetic sources named `worker-0..`, each with its own seed
    /// derived from `config.seed`.
    pub fn fleet(workers: usize, config: &SyntheticConfig) -> Vec<SyntheticSource> {
        (0..workers)
            .map(|i| {
                let config = SyntheticConfig {
                    seed: config.seed.map(|s| s.wrapping_add(i as u64)),
                    ..config.clone()
                };
                SyntheticSource::new(format!("worker-{i}"), &config)
            })
            .collect()
    }

    /// Number of simulated restarts so far.
    pub fn restarts(&self) -> u64 {
        self.lock().restarts
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance every counter by one fetch worth of activity.
    fn advance(&self) -> (WorkerSnapshot, Duration) {
        let mut state = self.lock();
        let state = &mut *state;

        if self.restart_chance > 0.0 && state.rng.random_bool(self.restart_chance) {
            state.counters.fill(RawCallStat::default());
            state.restarts += 1;
        }

        for (counter, &(_, _, _, cost, max_calls)) in state.counters.iter_mut().zip(CALL_SITES) {
            let calls = state.rng.random_range(0..=max_calls);
            let inline = calls as f64 * cost * state.rng.random_range(0.5..1.5);
            let children = inline * state.rng.random_range(0.0..0.8);
            counter.accumulate(&RawCallStat::new(inline + children, inline, calls));
        }

        let snapshot = self
            .keys
            .iter()
            .cloned()
            .zip(state.counters.iter().copied())
            .collect();

        let max_ms = self.max_latency.as_millis() as u64;
        let latency = if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(state.rng.random_range(0..=max_ms))
        };
        (snapshot, latency)
    }
}

impl SnapshotSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> FetchFuture {
        let (snapshot, latency) = self.advance();
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok(snapshot)
        }
        .boxed()
    }
}
