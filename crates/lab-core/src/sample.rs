//! Polled data records and slice arguments.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{LabError, LabResult};

/// One polled record: wall-clock timestamp, a monotonic tick within its
/// measurement, and named float readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// Nanoseconds since the Unix epoch at poll time.
    pub timestamp_ns: u64,
    /// Zero-based position within the measurement that produced it.
    pub tick: u64,
    /// Named readings, e.g. `temperature` or `voltage`.
    pub fields: BTreeMap<String, f64>,
}

impl Sample {
    /// A sample stamped with the current wall clock at the given tick.
    pub fn at_tick(tick: u64) -> Self {
        Sample {
            timestamp_ns: now_ns(),
            tick,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Look up a single reading by name.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

/// Nanoseconds since the Unix epoch, zero for a pre-epoch clock.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Python-style slice over an indexed sequence of records.
///
/// Negative `start`/`stop` count from the end; absent bounds mean the
/// whole range. `step` defaults to 1 and must be at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SliceArg {
    /// First index, inclusive.
    pub start: Option<i64>,
    /// Last index, exclusive.
    pub stop: Option<i64>,
    /// Stride between returned records.
    pub step: Option<u32>,
}

impl SliceArg {
    /// The whole sequence.
    pub fn all() -> Self {
        SliceArg::default()
    }

    /// The last `n` records.
    pub fn tail(n: u64) -> Self {
        SliceArg {
            start: Some(-(n as i64)),
            stop: None,
            step: None,
        }
    }

    /// `start..stop` with unit stride.
    pub fn range(start: i64, stop: i64) -> Self {
        SliceArg {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    /// Resolve against a sequence of `len` records into
    /// `(start, stop, step)` suitable for `(start..stop).step_by(step)`.
    pub fn resolve(&self, len: usize) -> LabResult<(usize, usize, usize)> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(LabError::InvalidSlice("step must be at least 1".into()));
        }
        let clamp = |idx: i64| -> usize {
            let idx = if idx < 0 { idx + len as i64 } else { idx };
            idx.clamp(0, len as i64) as usize
        };
        let start = self.start.map(clamp).unwrap_or(0);
        let stop = self.stop.map(clamp).unwrap_or(len);
        Ok((start, stop.max(start), step as usize))
    }
}
