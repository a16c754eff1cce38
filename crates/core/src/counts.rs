//! Per-day activity count tuples.

use serde::{Deserialize, Serialize};
use time::Date;

/// Cumulative activity counts strictly before a snapshot date.
///
/// Every component counts items whose relevant timestamp falls before the
/// date the tuple is attached to (the date itself is not yet included), so
/// each component is non-decreasing from one day to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub issues_created: u64,
    pub issues_closed: u64,
    pub prs_created: u64,
    pub prs_closed: u64,
    pub prs_merged: u64,
}

impl ActivityCounts {
    /// The five components in a fixed order.
    pub fn components(&self) -> [u64; 5] {
        [
            self.issues_created,
            self.issues_closed,
            self.prs_created,
            self.prs_closed,
            self.prs_merged,
        ]
    }

    /// Largest absolute per-component difference between two tuples.
    pub fn max_component_delta(&self, other: &Self) -> u64 {
        self.components()
            .iter()
            .zip(other.components().iter())
            .map(|(a, b)| a.abs_diff(*b))
            .max()
            .unwrap_or(0)
    }

    /// Issues still open (created minus closed). Derived at render time,
    /// never persisted; negative only under cache inconsistencies.
    pub fn open_issues(&self) -> i64 {
        self.issues_created as i64 - self.issues_closed as i64
    }

    /// Pull requests still open (created minus closed).
    pub fn open_prs(&self) -> i64 {
        self.prs_created as i64 - self.prs_closed as i64
    }

    /// True when every component is at least the corresponding one in `prev`.
    pub fn is_monotone_from(&self, prev: &Self) -> bool {
        self.components()
            .iter()
            .zip(prev.components().iter())
            .all(|(cur, old)| cur >= old)
    }
}

/// One emitted point of a repository timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: Date,
    pub counts: ActivityCounts,
}
