//! # proftop-core
//!
//! **Live per-interval call statistics from a fleet of profiled workers.**
//!
//! Each worker keeps cumulative profiler counters per call site (total time,
//! exclusive time, call count). `proftop-core` polls every worker, merges
//! their tables, and differences consecutive merges to get what happened
//! during the last interval: CPU share, calls per second and time per call.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use proftop_core::{Poller, PollerConfig, SnapshotSource, SyntheticConfig, SyntheticSource, ViewOptions};
//!
//! # async fn demo() {
//! let sources: Vec<Arc<dyn SnapshotSource>> = SyntheticSource::fleet(4, &SyntheticConfig::default())
//!     .into_iter()
//!     .map(|s| Arc::new(s) as Arc<dyn SnapshotSource>)
//!     .collect();
//!
//! let handle = Poller::new(sources, PollerConfig::default()).spawn(ViewOptions::default());
//! tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//! if let Some(view) = handle.status().view {
//!     for row in view.rows {
//!         println!("{} {:.1}%", row.key, row.cpu_percent * 100.0);
//!     }
//! }
//! # }
//! ```
//!
//! ## Architecture
//!
//! Sources → fan-in (completion order) → merge → delta → rank → view
//!
//! - [`fanin`]: yields concurrent fetch results as they settle.
//! - [`aggregate`]: merge, rate derivation, ranking and the rolling state.
//! - [`source`]: the [`SnapshotSource`] trait, report files and synthetic workers.
//! - [`poller`]: the cycle loop and its watch-channel status.

pub mod aggregate;
pub mod fanin;
pub mod poller;
pub mod report;
pub mod source;
pub mod stat;

pub use aggregate::{
    AggregateError, Aggregator, AggregatorConfig, AggregatorState, CallDeltaPolicy, CycleView,
    DEFAULT_VIEW_LIMIT, MergedSnapshot, SortKey, ViewOptions, cumulative_view, derive_rates,
    merge_workers, rank,
};
pub use fanin::{FanIn, Settled, fan_in};
pub use poller::{
    Clock, CycleError, CycleOutcome, FetchPolicy, MonotonicClock, Poller, PollerConfig,
    PollerHandle, PollerStatus, ProfileView,
};
pub use report::{ReportEntry, entries_from_snapshot, snapshot_from_entries};
pub use source::{
    FetchError, FetchFuture, ReportFileSource, SnapshotSource, SyntheticConfig, SyntheticSource,
    parse_worker_report,
};
pub use stat::{CallKey, DerivedCallStat, RawCallStat, SnapshotError, WorkerSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
