//! Worker profiler report wire format.
//!
//! A worker answers a report request with a JSON array, one entry per
//! profiled call site:
//!
//! ```json
//! [{"call": {"file": "app/db.py", "function": "query", "lineno": 40},
//!   "stats": {"callcount": 12, "reccallcount": 0, "totaltime": 0.8, "inlinetime": 0.3},
//!   "callers": []}]
//! ```
//!
//! Every field is decoded as optional so a missing counter is reported as a
//! [`SnapshotError::MissingField`] naming the entry, instead of a generic
//! decode failure.

use serde::{Deserialize, Serialize};

use crate::stat::{CallKey, RawCallStat, SnapshotError, WorkerSnapshot};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportCall {
    pub file: Option<String>,
    pub function: Option<String>,
    pub lineno: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportStats {
    pub callcount: Option<u64>,
    pub reccallcount: Option<u64>,
    pub totaltime: Option<f64>,
    pub inlinetime: Option<f64>,
}

/// One call site as emitted by a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportEntry {
    #[serde(default)]
    pub call: ReportCall,
    #[serde(default)]
    pub stats: ReportStats,
    /// Per-caller breakdown. Accepted for compatibility, not aggregated.
    #[serde(default)]
    pub callers: Vec<serde_json::Value>,
}

impl ReportEntry {
    pub fn new(key: &CallKey, stat: &RawCallStat) -> Self {
        Self {
            call: ReportCall {
                file: Some(key.file.clone()),
                function: Some(key.function.clone()),
                lineno: Some(key.line),
            },
            stats: ReportStats {
                callcount: Some(stat.call_count),
                reccallcount: Some(stat.recursive_call_count),
                totaltime: Some(stat.total_time),
                inlinetime: Some(stat.inline_time),
            },
            callers: Vec::new(),
        }
    }

    fn into_parts(self, index: usize) -> Result<(CallKey, RawCallStat), SnapshotError> {
        let missing = |field| SnapshotError::MissingField { index, field };
        let key = CallKey {
            file: self.call.file.ok_or_else(|| missing("file"))?,
            function: self.call.function.ok_or_else(|| missing("function"))?,
            line: self.call.lineno.ok_or_else(|| missing("lineno"))?,
        };
        let stat = RawCallStat {
            total_time: self.stats.totaltime.ok_or_else(|| missing("totaltime"))?,
            inline_time: self.stats.inlinetime.ok_or_else(|| missing("inlinetime"))?,
            call_count: self.stats.callcount.ok_or_else(|| missing("callcount"))?,
            recursive_call_count: self.stats.reccallcount.unwrap_or(0),
        };
        stat.validate(&key)?;
        Ok((key, stat))
    }
}

/// Build a worker table from decoded report entries.
///
/// Entries that share a call site within one report are summed.
pub fn snapshot_from_entries(entries: Vec<ReportEntry>) -> Result<WorkerSnapshot, SnapshotError> {
    let mut snapshot = WorkerSnapshot::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let (key, stat) = entry.into_parts(index)?;
        snapshot.entry(key).or_default().accumulate(&stat);
    }
    Ok(snapshot)
}

/// Render a worker table back into report entries, sorted by call site.
pub fn entries_from_snapshot(snapshot: &WorkerSnapshot) -> Vec<ReportEntry> {
    let mut keys: Vec<&CallKey> = snapshot.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| ReportEntry::new(key, &snapshot[key]))
        .collect()
}
