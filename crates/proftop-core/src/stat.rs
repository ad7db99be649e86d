//! Call-site statistics.
//!
//! Workers report [`RawCallStat`] counters that are cumulative since the
//! worker started. The aggregator turns two consecutive merged tables of
//! those counters into a [`DerivedCallStat`] carrying per-interval rates.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of one instrumented call site.
///
/// Built-in functions have no source file; profilers report them with
/// `file = "~"` and `line = 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallKey {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl CallKey {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }

    /// Whether this key names a built-in function rather than a source location.
    pub fn is_builtin(&self) -> bool {
        self.file == "~" && self.line == 0
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.function, self.line)
    }
}

/// One worker's cumulative counters for a call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCallStat {
    /// Cumulative inclusive time in seconds.
    pub total_time: f64,
    /// Cumulative exclusive time in seconds.
    pub inline_time: f64,
    /// Cumulative invocation count.
    pub call_count: u64,
    /// Cumulative count of recursive invocations. Reported, never rated.
    #[serde(default)]
    pub recursive_call_count: u64,
}

impl RawCallStat {
    pub fn new(total_time: f64, inline_time: f64, call_count: u64) -> Self {
        Self {
            total_time,
            inline_time,
            call_count,
            recursive_call_count: 0,
        }
    }

    /// Add another set of counters for the same call site.
    pub fn accumulate(&mut self, other: &RawCallStat) {
        self.total_time += other.total_time;
        self.inline_time += other.inline_time;
        self.call_count = self.call_count.saturating_add(other.call_count);
        self.recursive_call_count = self
            .recursive_call_count
            .saturating_add(other.recursive_call_count);
    }

    /// Reject times that cannot come from a real profiler.
    pub fn validate(&self, key: &CallKey) -> Result<(), SnapshotError> {
        for (field, value) in [
            ("totaltime", self.total_time),
            ("inlinetime", self.inline_time),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SnapshotError::InvalidCounter {
                    key: key.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Cumulative counters reported by a single worker, keyed by call site.
pub type WorkerSnapshot = HashMap<CallKey, RawCallStat>;

/// A merged call-site entry with interval-local rates.
///
/// The three rate fields are zero until the call site has been seen in a
/// previous cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedCallStat {
    pub key: CallKey,
    #[serde(flatten)]
    pub stat: RawCallStat,
    /// Fraction of wall time spent in exclusive time during the interval.
    pub cpu_percent: f64,
    /// Calls per second during the interval.
    pub call_rate: f64,
    /// Exclusive time per call during the interval, in microseconds.
    pub per_call_time_us: f64,
}

impl DerivedCallStat {
    /// An entry with cumulative counters only.
    pub fn cumulative(key: CallKey, stat: RawCallStat) -> Self {
        Self {
            key,
            stat,
            cpu_percent: 0.0,
            call_rate: 0.0,
            per_call_time_us: 0.0,
        }
    }
}

/// A worker table that cannot be merged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    #[error("report entry {index} is missing `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("{key}: `{field}` must be finite and non-negative, got {value}")]
    InvalidCounter {
        key: CallKey,
        field: &'static str,
        value: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_key_display_joins_fields() {
        let key = CallKey::new("app/db.py", "query", 40);
        assert_eq!(key.to_string(), "app/db.py:query:40");
    }

    #[test]
    fn call_key_is_structural() {
        // "a:b" + "c" and "a" + "b:c" collide when joined with ':' but not as keys.
        let a = CallKey::new("a:b", "c", 1);
        let b = CallKey::new("a", "b:c", 1);
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);

        let mut table = WorkerSnapshot::new();
        table.insert(a, RawCallStat::new(1.0, 1.0, 1));
        table.insert(b, RawCallStat::new(1.0, 1.0, 1));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn builtin_detection() {
        assert!(CallKey::new("~", "<built-in method select>", 0).is_builtin());
        assert!(!CallKey::new("~", "odd", 3).is_builtin());
    }

    #[test]
    fn accumulate_sums_every_counter() {
        let mut a = RawCallStat {
            total_time: 1.0,
            inline_time: 0.5,
            call_count: 5,
            recursive_call_count: 1,
        };
        a.accumulate(&RawCallStat {
            total_time: 2.0,
            inline_time: 0.25,
            call_count: 3,
            recursive_call_count: 2,
        });
        assert_eq!(a.total_time, 3.0);
        assert_eq!(a.inline_time, 0.75);
        assert_eq!(a.call_count, 8);
        assert_eq!(a.recursive_call_count, 3);
    }

    #[test]
    fn validate_rejects_nan_and_negative_times() {
        let key = CallKey::new("f.py", "g", 1);
        assert!(RawCallStat::new(1.0, 0.5, 1).validate(&key).is_ok());

        let err = RawCallStat::new(f64::NAN, 0.5, 1)
            .validate(&key)
            .unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::InvalidCounter {
                field: "totaltime",
                ..
            }
        ));

        let err = RawCallStat::new(1.0, -0.1, 1).validate(&key).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::InvalidCounter {
                field: "inlinetime",
                ..
            }
        ));
    }

    #[test]
    fn derived_serializes_flat() {
        let row = DerivedCallStat::cumulative(
            CallKey::new("f.py", "g", 1),
            RawCallStat::new(1.0, 0.5, 2),
        );
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["call_count"], 2);
        assert_eq!(json["key"]["function"], "g");
        assert_eq!(json["cpu_percent"], 0.0);
    }
}
