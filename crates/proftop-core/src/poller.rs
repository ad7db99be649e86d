//! Polling loop.
//!
//! One [`Poller`] owns the sources, the [`Aggregator`] and a [`Clock`]. Each
//! cycle spawns a fetch task per source, drains them through
//! [`fan_in`](crate::fanin::fan_in) as they settle, reads the clock once the
//! whole batch is in, and merges.
//!
//! [`Poller::run`] repeats that until shutdown, publishing a [`PollerStatus`]
//! on a watch channel after every cycle. Shutdown is only observed between
//! cycles, so the aggregator never stops halfway through a merge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::aggregate::{
    AggregateError, Aggregator, AggregatorConfig, SortKey, ViewOptions, cumulative_view,
    merge_workers,
};
use crate::fanin::{Settled, fan_in};
use crate::source::{FetchError, SnapshotSource};
use crate::stat::{DerivedCallStat, WorkerSnapshot};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic time source for cycle timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Reads tokio's clock, so paused-time runtimes control it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What a cycle does when one of its fetches fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// The first failure aborts the cycle. Remaining fetches are abandoned.
    #[default]
    SkipCycle,
    /// A failed worker's last accepted table stands in for it. A worker
    /// that has never answered is left out.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Wait between cycles once a baseline exists.
    pub interval: Duration,
    /// Wait after the baseline cycle before the first rated cycle.
    pub settle_delay: Duration,
    pub fetch_policy: FetchPolicy,
    pub aggregator: AggregatorConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            fetch_policy: FetchPolicy::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A ranked view published by one rated cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileView {
    pub cycle: u64,
    pub interval_secs: f64,
    pub sort_key: SortKey,
    pub limit: usize,
    pub workers: usize,
    pub merged_keys: usize,
    pub rows: Vec<DerivedCallStat>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Counters recorded, nothing to rate yet: the first cycle, or the
    /// first after the set of merged workers changed.
    Baseline { workers: usize, merged_keys: usize },
    View(ProfileView),
}

/// Latest state of a running poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerStatus {
    /// Completed cycles, baseline included.
    pub cycles: u64,
    /// True while the latest accepted cycle recorded a baseline.
    pub collecting: bool,
    /// Last good view. Kept when a later cycle fails.
    pub view: Option<ProfileView>,
    pub last_error: Option<String>,
}

impl Default for PollerStatus {
    fn default() -> Self {
        Self {
            cycles: 0,
            collecting: true,
            view: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no snapshot sources configured")]
    NoSources,

    #[error("fetch from {worker} failed: {error}")]
    Fetch {
        worker: String,
        #[source]
        error: FetchError,
    },

    #[error("every fetch failed, nothing to merge")]
    NoSnapshots,

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    sources: Vec<Arc<dyn SnapshotSource>>,
    aggregator: Aggregator,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    cycles: u64,
    /// Last table each source returned in an accepted cycle.
    last_good: Vec<Option<WorkerSnapshot>>,
    /// Sources merged into the aggregator's baseline.
    merged_from: Vec<usize>,
}

impl Poller {
    pub fn new(sources: Vec<Arc<dyn SnapshotSource>>, config: PollerConfig) -> Self {
        Self::with_clock(sources, config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        sources: Vec<Arc<dyn SnapshotSource>>,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            last_good: vec![None; sources.len()],
            sources,
            aggregator: Aggregator::new(config.aggregator),
            clock,
            config,
            cycles: 0,
            merged_from: Vec::new(),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Completed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Fetch every source concurrently. Slot `i` holds source `i`'s table, or
    /// `None` if it failed under [`FetchPolicy::Partial`].
    async fn fetch_all(&self) -> Result<Vec<Option<WorkerSnapshot>>, CycleError> {
        if self.sources.is_empty() {
            return Err(CycleError::NoSources);
        }

        let tasks: Vec<JoinHandle<Result<WorkerSnapshot, FetchError>>> = self
            .sources
            .iter()
            .map(|source| tokio::spawn(source.fetch()))
            .collect();

        let mut slots: Vec<Option<WorkerSnapshot>> = vec![None; tasks.len()];
        let mut settled = fan_in(tasks);
        while let Some(Settled { index, output }) = settled.next().await {
            let result = output.unwrap_or_else(|e| Err(FetchError::TaskFailed(e.to_string())));
            match result {
                Ok(snapshot) => slots[index] = Some(snapshot),
                Err(error) => {
                    let worker = self.sources[index].name().to_string();
                    match self.config.fetch_policy {
                        FetchPolicy::SkipCycle => {
                            // Dropping `settled` detaches the fetches still in flight.
                            return Err(CycleError::Fetch { worker, error });
                        }
                        FetchPolicy::Partial => {
                            warn!("fetch from {worker} failed: {error}");
                        }
                    }
                }
            }
        }

        if slots.iter().all(Option::is_none) {
            return Err(CycleError::NoSnapshots);
        }
        Ok(slots)
    }

    /// Stand in each source's last accepted table for a missing one, so both
    /// sides of every delta cover the same workers. Returns the tables and
    /// the sources they came from.
    fn fill_missing(
        &self,
        slots: Vec<Option<WorkerSnapshot>>,
    ) -> (Vec<WorkerSnapshot>, Vec<usize>) {
        let mut tables = Vec::with_capacity(slots.len());
        let mut merged_from = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            let table = match slot {
                Some(table) => table,
                None => match &self.last_good[index] {
                    Some(stale) => {
                        debug!("reusing last table from {}", self.sources[index].name());
                        stale.clone()
                    }
                    None => continue,
                },
            };
            tables.push(table);
            merged_from.push(index);
        }
        (tables, merged_from)
    }

    /// Run one cycle: fetch, merge, derive, rank.
    ///
    /// When the set of merged sources differs from the baseline's (a source
    /// answers for the first time, or fails before it ever answered), the
    /// cycle records a new baseline instead of rating counters that the
    /// previous table never included.
    pub async fn poll_cycle(&mut self, options: &ViewOptions) -> Result<CycleOutcome, CycleError> {
        let slots = self.fetch_all().await?;
        let now = self.clock.now();
        let fresh: Vec<bool> = slots.iter().map(Option::is_some).collect();
        let (tables, merged_from) = self.fill_missing(slots);

        let rebase = self.aggregator.state().has_baseline() && merged_from != self.merged_from;
        let view = if rebase {
            debug!(
                "merged workers changed from {:?} to {merged_from:?}, rebasing",
                self.merged_from
            );
            let mut aggregator = Aggregator::new(*self.aggregator.config());
            let view = aggregator.merge_cycle(&tables, now, options)?;
            self.aggregator = aggregator;
            view
        } else {
            self.aggregator.merge_cycle(&tables, now, options)?
        };

        self.cycles += 1;
        for (&index, table) in merged_from.iter().zip(&tables) {
            if fresh[index] {
                self.last_good[index] = Some(table.clone());
            }
        }
        self.merged_from = merged_from;

        let workers = tables.len();
        Ok(match view.period {
            None => CycleOutcome::Baseline {
                workers,
                merged_keys: view.merged_keys,
            },
            Some(period) => CycleOutcome::View(ProfileView {
                cycle: self.cycles,
                interval_secs: period.as_secs_f64(),
                sort_key: options.sort_key,
                limit: options.limit,
                workers,
                merged_keys: view.merged_keys,
                rows: view.rows,
            }),
        })
    }

    /// Fetch once and rank the merged cumulative counters. Leaves the rolling
    /// state alone.
    pub async fn cumulative_report(
        &self,
        options: &ViewOptions,
    ) -> Result<Vec<DerivedCallStat>, CycleError> {
        let tables: Vec<WorkerSnapshot> = self.fetch_all().await?.into_iter().flatten().collect();
        let merged = merge_workers(&tables)?;
        Ok(cumulative_view(&merged, options))
    }

    /// Poll until `shutdown` turns true or its sender goes away.
    ///
    /// `view_options` and `interval` are read at the start of every cycle.
    pub async fn run(
        mut self,
        status: watch::Sender<PollerStatus>,
        mut view_options: watch::Receiver<ViewOptions>,
        interval: watch::Receiver<Duration>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let options = *view_options.borrow_and_update();
            let wait = *interval.borrow();

            let delay = match self.poll_cycle(&options).await {
                Ok(CycleOutcome::Baseline {
                    workers,
                    merged_keys,
                }) => {
                    debug!("baseline from {workers} workers ({merged_keys} call sites)");
                    let cycles = self.cycles;
                    status.send_modify(|s| {
                        s.cycles = cycles;
                        s.collecting = true;
                        s.last_error = None;
                    });
                    self.config.settle_delay
                }
                Ok(CycleOutcome::View(view)) => {
                    let cycles = self.cycles;
                    status.send_modify(|s| {
                        s.cycles = cycles;
                        s.collecting = false;
                        s.view = Some(view);
                        s.last_error = None;
                    });
                    wait
                }
                Err(e) => {
                    warn!("cycle skipped: {e}");
                    status.send_modify(|s| s.last_error = Some(e.to_string()));
                    wait
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("poller stopped after {} cycles", self.cycles);
    }

    /// Run on a background task and return a handle to it.
    pub fn spawn(self, options: ViewOptions) -> PollerHandle {
        let (status_tx, status_rx) = watch::channel(PollerStatus::default());
        let (view_tx, view_rx) = watch::channel(options);
        let (interval_tx, interval_rx) = watch::channel(self.config.interval);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(status_tx, view_rx, interval_rx, shutdown_rx));
        PollerHandle {
            status: status_rx,
            view_options: view_tx,
            interval: interval_tx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Control side of a spawned [`Poller`].
pub struct PollerHandle {
    status: watch::Receiver<PollerStatus>,
    view_options: watch::Sender<ViewOptions>,
    interval: watch::Sender<Duration>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Snapshot of the latest status.
    pub fn status(&self) -> PollerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerStatus> {
        self.status.clone()
    }

    pub fn view_options(&self) -> ViewOptions {
        *self.view_options.borrow()
    }

    /// Takes effect from the next cycle.
    pub fn set_view_options(&self, options: ViewOptions) {
        self.view_options.send_replace(options);
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Wait between rated cycles, from the next cycle on.
    pub fn set_interval(&self, interval: Duration) {
        self.interval.send_replace(interval);
    }

    /// Stop after the current cycle and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.shutdown.send_replace(true);
        self.task.await
    }
}
