//! Date window planning
//!
//! Splits a requested date range into bounded half-open windows sized to a
//! source's per-call limits. Planning is a pure function of the range and
//! configuration; it performs no I/O and is cheap enough to re-run on every
//! sync.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::source::{Source, TraversalOrder};

/// One bounded fetch range: `[start_date, end_date)`.
///
/// Windows are created by the planner, consumed by the orchestrator and then
/// discarded; only their outcome is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub source: Source,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl SyncWindow {
    pub fn len_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date < self.end_date
    }
}

impl std::fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start_date, self.end_date)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("empty or inverted date range: {start} to {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("window size must be at least one day")]
    ZeroWindowSize,

    #[error("requested range ends before the source history horizon {horizon}")]
    OutsideHistory { horizon: NaiveDate },
}

/// Pure planner producing the window sequence for one sync run.
pub struct WindowPlanner;

impl WindowPlanner {
    /// Split `[start, end)` into consecutive windows of at most
    /// `window_days` days, covering the range exactly once.
    ///
    /// Ranges reaching past the source's documented history depth are
    /// clamped to the horizon `today - max_history_days`; a range entirely
    /// behind the horizon is an error. The returned sequence is ordered per
    /// `traversal`.
    pub fn plan(
        source: Source,
        start: NaiveDate,
        end: NaiveDate,
        window_days: u32,
        max_history_days: Option<u32>,
        traversal: TraversalOrder,
        today: NaiveDate,
    ) -> Result<Vec<SyncWindow>, PlanError> {
        if window_days == 0 {
            return Err(PlanError::ZeroWindowSize);
        }
        if start >= end {
            return Err(PlanError::InvalidRange { start, end });
        }

        let mut start = start;
        if let Some(depth) = max_history_days {
            let horizon = today - Duration::days(i64::from(depth));
            if end <= horizon {
                return Err(PlanError::OutsideHistory { horizon });
            }
            if start < horizon {
                tracing::debug!(
                    source = %source,
                    requested_start = %start,
                    horizon = %horizon,
                    "clamping range start to source history horizon"
                );
                start = horizon;
            }
        }

        let step = Duration::days(i64::from(window_days));
        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let window_end = (cursor + step).min(end);
            windows.push(SyncWindow {
                source,
                start_date: cursor,
                end_date: window_end,
            });
            cursor = window_end;
        }

        if traversal == TraversalOrder::NewestFirst {
            windows.reverse();
        }

        Ok(windows)
    }
}
