//! Expansion of a parsed range into discrete check-in/check-out pairs.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dates::parse::DateRangeSpec;

/// One concrete stay to price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayWindow {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayWindow {
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

/// Lazy, restartable sequence of stay windows: one per valid check-in day.
///
/// For `d` in `start ..= end - nights` the window `(d, d + nights)` is
/// emitted. A range shorter than the stay simply yields nothing: zero
/// windows is a well-defined answer, not an error.
#[derive(Debug, Clone)]
pub struct StayWindows {
    cursor: NaiveDate,
    last_check_in: NaiveDate,
    nights: i64,
}

pub fn windows(spec: &DateRangeSpec, nights: u32) -> StayWindows {
    let nights = i64::from(nights.max(1));
    StayWindows {
        cursor: spec.start,
        last_check_in: spec.end - Duration::days(nights),
        nights,
    }
}

impl Iterator for StayWindows {
    type Item = StayWindow;

    fn next(&mut self) -> Option<StayWindow> {
        if self.cursor > self.last_check_in {
            return None;
        }
        let window = StayWindow {
            check_in: self.cursor,
            check_out: self.cursor + Duration::days(self.nights),
        };
        self.cursor += Duration::days(1);
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.last_check_in - self.cursor).num_days() + 1;
        let left = left.max(0) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for StayWindows {}
