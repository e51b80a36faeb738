use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InputError;

/// Width of one scheduling interval.
pub const INTERVAL_MINUTES: i64 = 15;

// ============================================================================
// Time Grid
// ============================================================================

/// Ordered, gap-free sequence of fixed-width intervals.
///
/// Every per-interval quantity of a horizon is indexed `0..len`. The grid is
/// described by its first timestamp and step, so two grids are equal exactly
/// when all of their timestamps are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGrid {
    start: NaiveDateTime,
    step_minutes: i64,
    len: usize,
}

impl TimeGrid {
    /// Create a grid of `len` 15-minute intervals starting at `start`
    pub fn new(start: NaiveDateTime, len: usize) -> Self {
        Self {
            start,
            step_minutes: INTERVAL_MINUTES,
            len,
        }
    }

    /// Rebuild a grid from explicit timestamps.
    ///
    /// Rejects empty input, non-increasing timestamps, uneven spacing and any
    /// step other than [`INTERVAL_MINUTES`]: shift windows and kW to kWh
    /// conversion are defined on the 15-minute grid.
    pub fn from_timestamps(timestamps: &[NaiveDateTime]) -> Result<Self, InputError> {
        let first = *timestamps.first().ok_or(InputError::EmptyHorizon)?;
        if timestamps.len() == 1 {
            return Ok(Self::new(first, 1));
        }

        let step = timestamps[1] - first;
        if step <= Duration::zero() || step.num_seconds() % 60 != 0 {
            return Err(InputError::IrregularGrid { index: 1 });
        }
        for (index, pair) in timestamps.windows(2).enumerate() {
            if pair[1] - pair[0] != step {
                return Err(InputError::IrregularGrid { index: index + 1 });
            }
        }

        if step != Duration::minutes(INTERVAL_MINUTES) {
            return Err(InputError::UnsupportedStep {
                expected: INTERVAL_MINUTES,
                actual: step.num_minutes(),
            });
        }

        Ok(Self::new(first, timestamps.len()))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn step_minutes(&self) -> i64 {
        self.step_minutes
    }

    /// Interval width in hours
    pub fn step_hours(&self) -> f64 {
        self.step_minutes as f64 / 60.0
    }

    /// Start timestamp of interval `index`
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::minutes(self.step_minutes * index as i64)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        (0..self.len).map(move |i| self.timestamp(i))
    }

    /// Length of an interval offset in hours
    pub fn offset_hours(&self, offset: i64) -> f64 {
        offset as f64 * self.step_hours()
    }

    /// Check that another series carries exactly this grid's timestamps.
    pub fn ensure_aligned(&self, series: &str, timestamps: &[NaiveDateTime]) -> Result<(), InputError> {
        if timestamps.len() != self.len {
            return Err(InputError::LengthMismatch {
                series: series.to_string(),
                expected: self.len,
                actual: timestamps.len(),
            });
        }
        for (index, (expected, found)) in self.timestamps().zip(timestamps).enumerate() {
            if expected != *found {
                return Err(InputError::TimestampMismatch {
                    series: series.to_string(),
                    index,
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check that a plain series has one value per interval.
    pub fn ensure_len(&self, series: &str, len: usize) -> Result<(), InputError> {
        if len != self.len {
            return Err(InputError::LengthMismatch {
                series: series.to_string(),
                expected: self.len,
                actual: len,
            });
        }
        Ok(())
    }
}

impl fmt::Display for TimeGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {}min from {}",
            self.len,
            self.step_minutes,
            self.start.format("%Y-%m-%d %H:%M")
        )
    }
}
