//! Position/date lookup helpers.
//!
//! Thin wrappers over [`expand`](crate::expand::expand) answering "what
//! date is occurrence N" and "what occurrence number is date D". Both
//! ignore exceptions — position numbering counts excluded occurrences as
//! having occurred — and both fail rather than guess when the rule cannot
//! be expanded.

use crate::error::{RecurrenceError, Result};
use crate::expand::{expand, ExpandOptions, RecurringResult};
use crate::rule::{normalize_ms, ExceptionSet, RecurrenceRule};

/// The occurrence at a 1-based series position.
///
/// # Errors
///
/// [`RecurrenceError::PositionNotFound`] when the series ends before the
/// requested position, plus whatever [`expand`] rejects (missing start
/// date, unexpandable rule).
pub fn position_to_date(rule: &RecurrenceRule, position: u32) -> Result<RecurringResult> {
    let opts = ExpandOptions {
        position: Some(position),
        max_results: 1,
        ignore_exceptions: true,
        ..ExpandOptions::default()
    };
    let results = expand(rule, &ExceptionSet::default(), &opts)?;
    results
        .first()
        .copied()
        .ok_or(RecurrenceError::PositionNotFound(position))
}

/// The 1-based series position of the occurrence at `instant` (any
/// instant within the occurrence's day matches — comparison is by
/// normalized instant).
///
/// # Errors
///
/// [`RecurrenceError::DateNotInSeries`] when no occurrence falls on that
/// day within the hard result ceiling, plus whatever [`expand`] rejects.
pub fn date_to_position(rule: &RecurrenceRule, instant: i64) -> Result<u32> {
    let opts = ExpandOptions {
        ignore_exceptions: true,
        ..ExpandOptions::default()
    };
    let results = expand(rule, &ExceptionSet::default(), &opts)?;
    let normalized = normalize_ms(instant, rule.timezone);
    results
        .position_of(normalized)
        .ok_or(RecurrenceError::DateNotInSeries(instant))
}

// ── Tests ───────────────────────────────────────────────────────────────────
