//! The strict rule validator.
//!
//! Used on the write path only: a rule freshly built from user input must
//! pass here before it is encoded and persisted. Accepting bad data on
//! read (the codec's auto-correction) is a different contract from
//! accepting bad data on write — the validator rejects what the codec
//! would quietly repair, one specific error per offending field.

use crate::error::{RecurrenceError, Result};
use crate::rule::{RecurrenceKind, RecurrenceRule};

/// Check that every field the rule's kind requires is present and in
/// range.
///
/// # Errors
///
/// [`RecurrenceError::MissingStartDate`] without a start, otherwise
/// [`RecurrenceError::InvalidRuleField`] naming the first offending
/// field and the rejected value (a missing required field reports
/// value `-1`).
pub fn validate(rule: &RecurrenceRule) -> Result<()> {
    if rule.start.is_none() || rule.recurring_start.is_none() {
        return Err(RecurrenceError::MissingStartDate);
    }
    if rule.interval < 1 {
        return Err(RecurrenceError::InvalidRuleField {
            field: "interval",
            value: i64::from(rule.interval),
        });
    }

    match rule.kind {
        RecurrenceKind::Daily => {}
        RecurrenceKind::Weekly => {
            let weekdays = rule.weekdays.ok_or(RecurrenceError::InvalidRuleField {
                field: "weekdays",
                value: -1,
            })?;
            if weekdays.is_empty() {
                return Err(RecurrenceError::InvalidRuleField {
                    field: "weekdays",
                    value: 0,
                });
            }
        }
        RecurrenceKind::MonthlyByDayOfMonth | RecurrenceKind::YearlyByDayOfMonth => {
            check_range(rule.day_in_month, "day_in_month", 1, 31)?;
        }
        RecurrenceKind::MonthlyByWeekday | RecurrenceKind::YearlyByWeekday => {
            if rule.weekday.is_none() {
                return Err(RecurrenceError::InvalidRuleField {
                    field: "weekday",
                    value: -1,
                });
            }
            check_range(rule.day_in_month, "day_in_month", 1, 5)?;
        }
    }
    if rule.kind.is_yearly() {
        check_range(rule.month, "month", 0, 11)?;
    }
    Ok(())
}

fn check_range(value: Option<u32>, field: &'static str, min: u32, max: u32) -> Result<()> {
    match value {
        Some(value) if (min..=max).contains(&value) => Ok(()),
        Some(value) => Err(RecurrenceError::InvalidRuleField {
            field,
            value: i64::from(value),
        }),
        None => Err(RecurrenceError::InvalidRuleField { field, value: -1 }),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
