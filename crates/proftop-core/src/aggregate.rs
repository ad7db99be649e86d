//! Sampling aggregator.
//!
//! Each polling cycle hands the aggregator one table per worker. The tables
//! are summed into a merged snapshot, compared against the merged snapshot
//! of the previous cycle, and turned into per-interval rates:
//!
//! - `cpu_percent = max(Δinline, 0) / period`
//! - `call_rate   = Δcalls / period`
//! - `per_call_time_us = Δinline / Δcalls * 1e6` (0 when `Δcalls == 0`)
//!
//! The first cycle only records a baseline and returns no rows. Rows are
//! ranked by a [`SortKey`] and truncated to the caller's limit, but the full
//! merged snapshot is kept as history so call sites can re-enter the top-N
//! later with correct deltas.
//!
//! A rejected cycle (malformed table, non-positive period) leaves the
//! rolling state exactly as it was.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stat::{CallKey, DerivedCallStat, RawCallStat, SnapshotError, WorkerSnapshot};

/// Default number of rows in a ranked view.
pub const DEFAULT_VIEW_LIMIT: usize = 25;

/// Call-site counters summed across every worker of one cycle.
pub type MergedSnapshot = HashMap<CallKey, RawCallStat>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Field a view is ranked by, always descending.
///
/// The default is [`SortKey::InlineTime`], the *cumulative* exclusive time,
/// even though the rate columns are per-interval. Pick [`SortKey::CpuPercent`]
/// to rank by what happened during the last interval only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[serde(rename = "totaltime")]
    TotalTime,
    #[default]
    #[serde(rename = "inlinetime")]
    InlineTime,
    #[serde(rename = "callcount")]
    CallCount,
    #[serde(rename = "cpu")]
    CpuPercent,
    #[serde(rename = "callrate")]
    CallRate,
    #[serde(rename = "percall")]
    PerCallTime,
}

impl SortKey {
    pub const ALL: [SortKey; 6] = [
        Self::TotalTime,
        Self::InlineTime,
        Self::CallCount,
        Self::CpuPercent,
        Self::CallRate,
        Self::PerCallTime,
    ];

    pub fn next(self) -> Self {
        match self {
            Self::TotalTime => Self::InlineTime,
            Self::InlineTime => Self::CallCount,
            Self::CallCount => Self::CpuPercent,
            Self::CpuPercent => Self::CallRate,
            Self::CallRate => Self::PerCallTime,
            Self::PerCallTime => Self::TotalTime,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TotalTime => "totaltime",
            Self::InlineTime => "inlinetime",
            Self::CallCount => "callcount",
            Self::CpuPercent => "cpu",
            Self::CallRate => "callrate",
            Self::PerCallTime => "percall",
        }
    }

    /// Whether this key ranks by a counter that accumulates since worker start.
    pub fn is_cumulative(self) -> bool {
        matches!(self, Self::TotalTime | Self::InlineTime | Self::CallCount)
    }

    /// The value a row is ranked by.
    pub fn value(self, row: &DerivedCallStat) -> f64 {
        match self {
            Self::TotalTime => row.stat.total_time,
            Self::InlineTime => row.stat.inline_time,
            Self::CallCount => row.stat.call_count as f64,
            Self::CpuPercent => row.cpu_percent,
            Self::CallRate => row.call_rate,
            Self::PerCallTime => row.per_call_time_us,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "totaltime" | "total" => Ok(Self::TotalTime),
            "inlinetime" | "inline" => Ok(Self::InlineTime),
            "callcount" | "calls" => Ok(Self::CallCount),
            "cpu" | "cpu_percent" => Ok(Self::CpuPercent),
            "callrate" | "call_rate" => Ok(Self::CallRate),
            "percall" | "percall_time" => Ok(Self::PerCallTime),
            other => Err(format!(
                "unknown sort key '{other}' (expected one of: {})",
                Self::ALL.map(Self::as_str).join(", ")
            )),
        }
    }
}

/// How a shrinking call count between cycles is reported.
///
/// A worker restart resets its cumulative counters. Exclusive time deltas are
/// always clamped at zero; call deltas are not unless asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDeltaPolicy {
    /// Negative call deltas flow into `call_rate` and `per_call_time_us`.
    #[default]
    Signed,
    /// Negative call deltas are treated as zero calls.
    Clamped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub call_delta: CallDeltaPolicy,
}

/// Ranking and truncation applied to each cycle's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOptions {
    pub limit: usize,
    pub sort_key: SortKey,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_VIEW_LIMIT,
            sort_key: SortKey::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a whole cycle is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("sampling period since the previous cycle is not positive")]
    NonPositivePeriod,

    #[error("worker {worker} sent a malformed snapshot: {source}")]
    MalformedSnapshot {
        worker: usize,
        #[source]
        source: SnapshotError,
    },
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Rolling history: the previous cycle's merged snapshot and when it was taken.
///
/// `previous_timestamp()` is `None` until the first cycle records a baseline,
/// and `Some` from then on. It is *not* tied to the snapshot being non-empty:
/// a first cycle that merges no call sites still records its timestamp, so
/// `has_baseline()` can be true while `previous_snapshot()` is empty.
#[derive(Debug, Clone, Default)]
pub struct AggregatorState {
    previous: MergedSnapshot,
    previous_at: Option<Instant>,
}

impl AggregatorState {
    pub fn previous_snapshot(&self) -> &MergedSnapshot {
        &self.previous
    }

    pub fn previous_timestamp(&self) -> Option<Instant> {
        self.previous_at
    }

    pub fn has_baseline(&self) -> bool {
        self.previous_at.is_some()
    }
}

/// Result of one accepted cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleView {
    /// Interval since the previous cycle. `None` for the baseline cycle.
    pub period: Option<Duration>,
    /// Distinct call sites in the merged snapshot, before truncation.
    pub merged_keys: usize,
    /// Ranked, truncated rows. Empty for the baseline cycle.
    pub rows: Vec<DerivedCallStat>,
}

impl CycleView {
    pub fn is_baseline(&self) -> bool {
        self.period.is_none()
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Owns the rolling state between cycles. Driven from a single control loop.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregatorConfig,
    state: AggregatorState,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            state: AggregatorState::default(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn state(&self) -> &AggregatorState {
        &self.state
    }

    /// Merge one cycle's worker tables, derive rates against the previous
    /// cycle, and return the ranked top rows.
    pub fn merge_cycle(
        &mut self,
        workers: &[WorkerSnapshot],
        now: Instant,
        options: &ViewOptions,
    ) -> Result<CycleView, AggregateError> {
        let merged = merge_workers(workers)?;
        let merged_keys = merged.len();

        let Some(previous_at) = self.state.previous_at else {
            debug!("baseline recorded: {merged_keys} call sites from {} workers", workers.len());
            self.state = AggregatorState {
                previous: merged,
                previous_at: Some(now),
            };
            return Ok(CycleView {
                period: None,
                merged_keys,
                rows: Vec::new(),
            });
        };

        let period = now
            .checked_duration_since(previous_at)
            .filter(|p| !p.is_zero())
            .ok_or(AggregateError::NonPositivePeriod)?;

        let mut rows = derive_rates(&merged, &self.state.previous, period, self.config.call_delta);
        rank(&mut rows, options.sort_key);
        rows.truncate(options.limit);

        debug!(
            "cycle merged {merged_keys} call sites over {:.3}s, {} rows kept",
            period.as_secs_f64(),
            rows.len()
        );

        self.state = AggregatorState {
            previous: merged,
            previous_at: Some(now),
        };

        Ok(CycleView {
            period: Some(period),
            merged_keys,
            rows,
        })
    }
}

// ---------------------------------------------------------------------------
// Merge / delta / rank
// ---------------------------------------------------------------------------

/// Sum worker tables per call site. Any invalid counter rejects the batch.
pub fn merge_workers(workers: &[WorkerSnapshot]) -> Result<MergedSnapshot, AggregateError> {
    let mut merged = MergedSnapshot::new();
    for (worker, table) in workers.iter().enumerate() {
        for (key, stat) in table {
            stat.validate(key)
                .map_err(|source| AggregateError::MalformedSnapshot { worker, source })?;
            match merged.get_mut(key) {
                Some(total) => total.accumulate(stat),
                None => {
                    merged.insert(key.clone(), *stat);
                }
            }
        }
    }
    Ok(merged)
}

/// Annotate every call site of `current` with rates against `previous`.
pub fn derive_rates(
    current: &MergedSnapshot,
    previous: &MergedSnapshot,
    period: Duration,
    policy: CallDeltaPolicy,
) -> Vec<DerivedCallStat> {
    let secs = period.as_secs_f64();
    current
        .iter()
        .map(|(key, stat)| {
            let mut row = DerivedCallStat::cumulative(key.clone(), *stat);
            if let Some(prev) = previous.get(key) {
                let sample_inline = (stat.inline_time - prev.inline_time).max(0.0);
                let mut sample_calls = stat.call_count as i128 - prev.call_count as i128;
                if policy == CallDeltaPolicy::Clamped {
                    sample_calls = sample_calls.max(0);
                }
                row.cpu_percent = sample_inline / secs;
                row.call_rate = sample_calls as f64 / secs;
                row.per_call_time_us = if sample_calls != 0 {
                    sample_inline / sample_calls as f64 * 1_000_000.0
                } else {
                    0.0
                };
            }
            row
        })
        .collect()
}

/// Sort rows descending by `key`, breaking ties by call site.
pub fn rank(rows: &mut [DerivedCallStat], key: SortKey) {
    rows.sort_by(|a, b| {
        key.value(b)
            .partial_cmp(&key.value(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Rank a merged snapshot on its cumulative counters alone.
pub fn cumulative_view(merged: &MergedSnapshot, options: &ViewOptions) -> Vec<DerivedCallStat> {
    let mut rows: Vec<DerivedCallStat> = merged
        .iter()
        .map(|(key, stat)| DerivedCallStat::cumulative(key.clone(), *stat))
        .collect();
    rank(&mut rows, options.sort_key);
    rows.truncate(options.limit);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CallKey {
        CallKey::new("app/handlers.py", name, 10)
    }

    fn worker(entries: &[(&str, f64, u64)]) -> WorkerSnapshot {
        entries
            .iter()
            .map(|&(name, inline, calls)| (key(name), RawCallStat::new(inline * 2.0, inline, calls)))
            .collect()
    }

    fn opts(limit: usize, sort_key: SortKey) -> ViewOptions {
        ViewOptions { limit, sort_key }
    }

    fn row<'a>(view: &'a CycleView, name: &str) -> &'a DerivedCallStat {
        view.rows
            .iter()
            .find(|r| r.key.function == name)
            .unwrap_or_else(|| panic!("no row for {name}"))
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    #[test]
    fn merge_sums_counters_across_workers() {
        let merged = merge_workers(&[
            worker(&[("handle", 0.5, 5)]),
            worker(&[("handle", 0.25, 3)]),
            worker(&[("handle", 0.25, 2)]),
        ])
        .unwrap();
        assert_eq!(merged.len(), 1);
        let stat = &merged[&key("handle")];
        assert_eq!(stat.call_count, 10);
        assert_eq!(stat.inline_time, 1.0);
        assert_eq!(stat.total_time, 2.0);
    }

    #[test]
    fn merge_treats_absent_keys_as_zero() {
        let merged = merge_workers(&[
            worker(&[("a", 1.0, 1), ("b", 2.0, 2)]),
            worker(&[("b", 3.0, 3)]),
            worker(&[]),
        ])
        .unwrap();
        assert_eq!(merged[&key("a")].call_count, 1);
        assert_eq!(merged[&key("b")].call_count, 5);
    }

    #[test]
    fn merge_rejects_invalid_counter_with_worker_index() {
        let mut bad = worker(&[("a", 1.0, 1)]);
        bad.insert(key("b"), RawCallStat::new(f64::INFINITY, 0.0, 1));
        let err = merge_workers(&[worker(&[("a", 1.0, 1)]), bad]).unwrap_err();
        assert!(matches!(
            err,
            AggregateError::MalformedSnapshot { worker: 1, .. }
        ));
    }

    // -----------------------------------------------------------------------
    // First cycle
    // -----------------------------------------------------------------------

    #[test]
    fn first_cycle_records_baseline_and_returns_nothing() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        let view = agg
            .merge_cycle(&[worker(&[("a", 1.0, 4)])], t0, &ViewOptions::default())
            .unwrap();
        assert!(view.is_baseline());
        assert!(view.rows.is_empty());
        assert_eq!(view.merged_keys, 1);
        assert_eq!(agg.state().previous_timestamp(), Some(t0));
        assert_eq!(agg.state().previous_snapshot().len(), 1);
    }

    #[test]
    fn empty_first_cycle_still_records_timestamp() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        let view = agg
            .merge_cycle(&[WorkerSnapshot::new()], t0, &ViewOptions::default())
            .unwrap();
        assert!(view.is_baseline());
        assert!(agg.state().has_baseline());
        assert!(agg.state().previous_snapshot().is_empty());

        // The next cycle is rated against the empty table.
        let later = agg
            .merge_cycle(
                &[worker(&[("a", 1.0, 4)])],
                t0 + Duration::from_secs(1),
                &ViewOptions::default(),
            )
            .unwrap();
        assert_eq!(later.period, Some(Duration::from_secs(1)));
        assert_eq!(later.rows[0].call_rate, 0.0);
    }

    // -----------------------------------------------------------------------
    // Deltas
    // -----------------------------------------------------------------------

    #[test]
    fn second_cycle_derives_rates() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 1.5, 20)])], t0, &ViewOptions::default())
            .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("a", 3.5, 30)])],
                t0 + Duration::from_secs(1),
                &ViewOptions::default(),
            )
            .unwrap();

        assert_eq!(view.period, Some(Duration::from_secs(1)));
        let a = row(&view, "a");
        assert!((a.call_rate - 10.0).abs() < 1e-9);
        assert!((a.cpu_percent - 2.0).abs() < 1e-9);
        assert!((a.per_call_time_us - 200_000.0).abs() < 1e-6);
    }

    #[test]
    fn rates_scale_with_period() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 1.0, 0)])], t0, &ViewOptions::default())
            .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("a", 2.0, 40)])],
                t0 + Duration::from_millis(500),
                &ViewOptions::default(),
            )
            .unwrap();
        let a = row(&view, "a");
        assert!((a.call_rate - 80.0).abs() < 1e-9);
        assert!((a.cpu_percent - 2.0).abs() < 1e-9);
        assert!((a.per_call_time_us - 25_000.0).abs() < 1e-6);
    }

    #[test]
    fn new_key_has_zero_rates() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 1.0, 1)])], t0, &ViewOptions::default())
            .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("a", 2.0, 2), ("fresh", 9.0, 90)])],
                t0 + Duration::from_secs(1),
                &ViewOptions::default(),
            )
            .unwrap();
        let fresh = row(&view, "fresh");
        assert_eq!(fresh.cpu_percent, 0.0);
        assert_eq!(fresh.call_rate, 0.0);
        assert_eq!(fresh.per_call_time_us, 0.0);
        assert_eq!(fresh.stat.call_count, 90);
    }

    #[test]
    fn zero_call_delta_gives_zero_per_call_time() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 1.0, 7)])], t0, &ViewOptions::default())
            .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("a", 1.5, 7)])],
                t0 + Duration::from_secs(1),
                &ViewOptions::default(),
            )
            .unwrap();
        let a = row(&view, "a");
        assert_eq!(a.call_rate, 0.0);
        assert_eq!(a.per_call_time_us, 0.0);
        assert!((a.cpu_percent - 0.5).abs() < 1e-9);
    }

    #[test]
    fn counter_reset_clamps_cpu_but_keeps_signed_call_rate() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 5.0, 100)])], t0, &ViewOptions::default())
            .unwrap();
        // Worker restarted: counters start again from a smaller value.
        let view = agg
            .merge_cycle(
                &[worker(&[("a", 1.0, 40)])],
                t0 + Duration::from_secs(2),
                &ViewOptions::default(),
            )
            .unwrap();
        let a = row(&view, "a");
        assert_eq!(a.cpu_percent, 0.0);
        assert!((a.call_rate - -30.0).abs() < 1e-9);
        // Clamped inline over a negative call delta.
        assert_eq!(a.per_call_time_us, 0.0);
    }

    #[test]
    fn clamped_policy_zeroes_negative_call_delta() {
        let mut agg = Aggregator::new(AggregatorConfig {
            call_delta: CallDeltaPolicy::Clamped,
        });
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 5.0, 100)])], t0, &ViewOptions::default())
            .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("a", 1.0, 40)])],
                t0 + Duration::from_secs(2),
                &ViewOptions::default(),
            )
            .unwrap();
        let a = row(&view, "a");
        assert_eq!(a.cpu_percent, 0.0);
        assert_eq!(a.call_rate, 0.0);
        assert_eq!(a.per_call_time_us, 0.0);
    }

    // -----------------------------------------------------------------------
    // Rejected cycles
    // -----------------------------------------------------------------------

    #[test]
    fn identical_timestamps_are_rejected_without_state_change() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 1.0, 1)])], t0, &ViewOptions::default())
            .unwrap();
        let before = agg.state().previous_snapshot().clone();

        let err = agg
            .merge_cycle(&[worker(&[("a", 9.0, 9)])], t0, &ViewOptions::default())
            .unwrap_err();
        assert_eq!(err, AggregateError::NonPositivePeriod);
        assert_eq!(agg.state().previous_timestamp(), Some(t0));
        assert_eq!(agg.state().previous_snapshot(), &before);
    }

    #[test]
    fn backwards_timestamp_is_rejected() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now() + Duration::from_secs(5);
        agg.merge_cycle(&[worker(&[("a", 1.0, 1)])], t0, &ViewOptions::default())
            .unwrap();
        let err = agg
            .merge_cycle(
                &[worker(&[("a", 2.0, 2)])],
                t0 - Duration::from_secs(1),
                &ViewOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err, AggregateError::NonPositivePeriod);
        assert_eq!(agg.state().previous_timestamp(), Some(t0));
    }

    #[test]
    fn malformed_cycle_keeps_previous_state() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(&[worker(&[("a", 1.0, 1)])], t0, &ViewOptions::default())
            .unwrap();

        let mut bad = worker(&[("a", 2.0, 2)]);
        bad.insert(key("b"), RawCallStat::new(1.0, f64::NAN, 1));
        let err = agg
            .merge_cycle(&[bad], t0 + Duration::from_secs(1), &ViewOptions::default())
            .unwrap_err();
        assert!(matches!(err, AggregateError::MalformedSnapshot { .. }));
        assert_eq!(agg.state().previous_timestamp(), Some(t0));
        assert_eq!(agg.state().previous_snapshot()[&key("a")].call_count, 1);
    }

    #[test]
    fn malformed_first_cycle_records_no_baseline() {
        let mut agg = Aggregator::default();
        let mut bad = WorkerSnapshot::new();
        bad.insert(key("a"), RawCallStat::new(-1.0, 0.0, 1));
        assert!(agg
            .merge_cycle(&[bad], Instant::now(), &ViewOptions::default())
            .is_err());
        assert!(!agg.state().has_baseline());
    }

    // -----------------------------------------------------------------------
    // Rank / truncate / history
    // -----------------------------------------------------------------------

    #[test]
    fn limit_keeps_highest_by_default_key() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        let table = worker(&[("w", 1.0, 1), ("x", 4.0, 1), ("y", 2.0, 1), ("z", 3.0, 1)]);
        agg.merge_cycle(&[table.clone()], t0, &ViewOptions::default())
            .unwrap();
        let view = agg
            .merge_cycle(
                &[table],
                t0 + Duration::from_secs(1),
                &opts(2, SortKey::default()),
            )
            .unwrap();
        let inline: Vec<f64> = view.rows.iter().map(|r| r.stat.inline_time).collect();
        assert_eq!(inline, vec![4.0, 3.0]);
        assert_eq!(view.merged_keys, 4);
    }

    #[test]
    fn default_sort_key_is_cumulative_inline_time() {
        assert_eq!(SortKey::default(), SortKey::InlineTime);
        assert!(SortKey::default().is_cumulative());
        assert!(!SortKey::CpuPercent.is_cumulative());
    }

    #[test]
    fn rank_by_interval_metric() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        agg.merge_cycle(
            &[worker(&[("busy_before", 100.0, 1), ("busy_now", 1.0, 1)])],
            t0,
            &ViewOptions::default(),
        )
        .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("busy_before", 100.1, 2), ("busy_now", 3.0, 2)])],
                t0 + Duration::from_secs(1),
                &opts(1, SortKey::CpuPercent),
            )
            .unwrap();
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].key.function, "busy_now");
    }

    #[test]
    fn ties_break_by_call_key() {
        let mut rows = vec![
            DerivedCallStat::cumulative(key("b"), RawCallStat::new(1.0, 1.0, 1)),
            DerivedCallStat::cumulative(key("a"), RawCallStat::new(1.0, 1.0, 1)),
        ];
        rank(&mut rows, SortKey::InlineTime);
        assert_eq!(rows[0].key.function, "a");
    }

    #[test]
    fn truncated_rows_stay_in_history() {
        let mut agg = Aggregator::default();
        let t0 = Instant::now();
        let view_one = opts(1, SortKey::InlineTime);
        agg.merge_cycle(&[worker(&[("big", 10.0, 1), ("small", 1.0, 1)])], t0, &view_one)
            .unwrap();
        let view = agg
            .merge_cycle(
                &[worker(&[("big", 10.0, 1), ("small", 2.0, 11)])],
                t0 + Duration::from_secs(1),
                &view_one,
            )
            .unwrap();
        assert_eq!(view.rows[0].key.function, "big");
        assert_eq!(agg.state().previous_snapshot().len(), 2);

        // "small" overtakes "big" and shows a delta against the hidden history.
        let view = agg
            .merge_cycle(
                &[worker(&[("big", 10.0, 1), ("small", 12.0, 21)])],
                t0 + Duration::from_secs(2),
                &view_one,
            )
            .unwrap();
        let small = &view.rows[0];
        assert_eq!(small.key.function, "small");
        assert!((small.call_rate - 10.0).abs() < 1e-9);
        assert!((small.cpu_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cumulative_view_ranks_without_rates() {
        let merged = merge_workers(&[worker(&[("a", 1.0, 9), ("b", 2.0, 1)])]).unwrap();
        let rows = cumulative_view(&merged, &opts(10, SortKey::CallCount));
        assert_eq!(rows[0].key.function, "a");
        assert!(rows.iter().all(|r| r.cpu_percent == 0.0));
    }

    // -----------------------------------------------------------------------
    // SortKey parsing
    // -----------------------------------------------------------------------

    #[test]
    fn sort_key_parses_and_cycles() {
        for key in SortKey::ALL {
            assert_eq!(key.as_str().parse::<SortKey>().unwrap(), key);
        }
        assert_eq!("calls".parse::<SortKey>().unwrap(), SortKey::CallCount);
        assert!("bogus".parse::<SortKey>().is_err());

        let mut k = SortKey::TotalTime;
        for _ in 0..SortKey::ALL.len() {
            k = k.next();
        }
        assert_eq!(k, SortKey::TotalTime);
    }
}
