//! Domain partitioning types: windows, pages and the partitioner's state.

use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::Entity;

/// A contiguous span of creation dates, `[start, end)` in whole days.
///
/// Successive windows produced by the partitioner share no day and leave no
/// day uncovered: the next window always starts at the previous `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    /// Window of `width_days` starting at `start`, clipped to `limit`.
    pub fn clipped(start: NaiveDate, width_days: u32, limit: NaiveDate) -> Self {
        let end = start
            .checked_add_days(Days::new(u64::from(width_days)))
            .map_or(limit, |end| end.min(limit));
        Self { start, end }
    }

    /// Number of days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Last day inside the window (the inclusive upper bound for queries).
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start).max(self.start)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.last_day().format("%Y-%m-%d")
        )
    }
}

/// One page of results for a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub entities: Vec<Entity>,

    /// Continuation token, `None` once the window is exhausted
    pub next_cursor: Option<String>,

    /// Upstream count for the whole window. Informational only: the service
    /// may cap it as well.
    pub range_total_count: u64,
}

/// Mutable crawl state threaded through every window iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionState {
    /// First day not yet accepted
    pub position: NaiveDate,

    /// Width of the next window in days
    pub window_days: u32,

    /// Entities credited toward the target
    pub total_collected: usize,

    /// Entities credited within the window in progress
    pub chunk_collected: usize,
}

impl PartitionState {
    pub fn new(position: NaiveDate, window_days: u32) -> Self {
        Self {
            position,
            window_days,
            total_collected: 0,
            chunk_collected: 0,
        }
    }

    /// Open the next window at the current position.
    pub fn begin_window(&mut self, domain_end: NaiveDate) -> Window {
        self.chunk_collected = 0;
        Window::clipped(self.position, self.window_days, domain_end)
    }

    /// Credit entities from one page.
    pub fn credit(&mut self, count: usize) {
        self.chunk_collected += count;
        self.total_collected += count;
    }

    /// Undo the credit of the window in progress.
    pub fn rollback(&mut self) {
        self.total_collected = self.total_collected.saturating_sub(self.chunk_collected);
        self.chunk_collected = 0;
    }

    /// Move past an accepted window.
    pub fn advance_past(&mut self, window: &Window) {
        self.position = window.end;
    }

    pub fn remaining(&self, target: usize) -> usize {
        target.saturating_sub(self.total_collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_is_clipped_to_limit() {
        let w = Window::clipped(day(2024, 12, 1), 180, day(2025, 1, 1));
        assert_eq!(w.end, day(2025, 1, 1));
        assert_eq!(w.days(), 31);
        assert_eq!(w.last_day(), day(2024, 12, 31));
    }

    #[test]
    fn single_day_window_displays_same_bounds() {
        let w = Window::clipped(day(2020, 2, 29), 1, day(2030, 1, 1));
        assert_eq!(w.days(), 1);
        assert_eq!(w.to_string(), "2020-02-29..2020-02-29");
        assert_eq!(w.end, day(2020, 3, 1));
    }

    #[test]
    fn consecutive_windows_are_contiguous() {
        let limit = day(2010, 1, 1);
        let mut state = PartitionState::new(day(2008, 1, 1), 45);
        let mut covered = 0;
        let mut previous_end = state.position;

        while state.position < limit {
            let w = state.begin_window(limit);
            assert_eq!(w.start, previous_end);
            covered += w.days();
            previous_end = w.end;
            state.advance_past(&w);
        }

        assert_eq!(covered, (limit - day(2008, 1, 1)).num_days());
    }

    #[test]
    fn rollback_undoes_only_the_chunk() {
        let mut state = PartitionState::new(day(2015, 1, 1), 30);
        state.begin_window(day(2016, 1, 1));
        state.credit(100);
        state.begin_window(day(2016, 1, 1));
        state.credit(60);
        state.credit(40);

        state.rollback();

        assert_eq!(state.total_collected, 100);
        assert_eq!(state.chunk_collected, 0);
        assert_eq!(state.remaining(150), 50);
    }
}
