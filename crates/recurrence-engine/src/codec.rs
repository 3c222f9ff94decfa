//! The compact pattern codec.
//!
//! A recurrence rule persists as a pipe-framed sequence of `key=value`
//! pairs with a one-letter key alphabet:
//!
//! ```text
//! |t=2|i=1|a=10|s=1771286400000|e=1772496000000|
//! ```
//!
//! | key | field                                         |
//! |-----|-----------------------------------------------|
//! | `t` | kind code (1–6)                               |
//! | `i` | interval                                      |
//! | `a` | weekday mask / weekday selector               |
//! | `b` | day-in-month (1–31) or ordinal (1–5)          |
//! | `c` | month (0–11, yearly kinds)                    |
//! | `s` | normalized recurring start, epoch ms          |
//! | `e` | inclusive until, epoch ms                     |
//! | `o` | occurrence count                              |
//!
//! Decoding is strict about *keys* (an unknown key is a malformed
//! pattern) but lenient about *values*: out-of-range values of recognized
//! keys are silently repaired so previously-persisted bad data keeps
//! loading. The asymmetry is intentional. The strict write-path contract
//! lives in [`crate::validate`].
//!
//! The pattern string does not carry the event's start/end instants or
//! its timezone; the caller supplies those to [`decode`] from the event
//! row.

use chrono::Weekday;
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{RecurrenceError, Result};
use crate::expand::{expand, ExpandOptions};
use crate::rule::{ExceptionSet, RecurrenceKind, RecurrenceRule, WeekdaySelector, WeekdaySet};

// ── Kind codes ──────────────────────────────────────────────────────────────

// The by-weekday monthly/yearly forms carry distinct codes from their
// day-of-month siblings so the kind reconstructs from `t` alone.
const fn kind_code(kind: RecurrenceKind) -> i64 {
    match kind {
        RecurrenceKind::Daily => 1,
        RecurrenceKind::Weekly => 2,
        RecurrenceKind::MonthlyByDayOfMonth => 3,
        RecurrenceKind::YearlyByDayOfMonth => 4,
        RecurrenceKind::MonthlyByWeekday => 5,
        RecurrenceKind::YearlyByWeekday => 6,
    }
}

fn kind_from_code(code: i64) -> Option<RecurrenceKind> {
    match code {
        1 => Some(RecurrenceKind::Daily),
        2 => Some(RecurrenceKind::Weekly),
        3 => Some(RecurrenceKind::MonthlyByDayOfMonth),
        4 => Some(RecurrenceKind::YearlyByDayOfMonth),
        5 => Some(RecurrenceKind::MonthlyByWeekday),
        6 => Some(RecurrenceKind::YearlyByWeekday),
        _ => None,
    }
}

// ── Encode ──────────────────────────────────────────────────────────────────

/// Serialize a rule into its persisted pattern string.
///
/// When the rule is bounded by an occurrence count but has no explicit
/// `until`, the expansion algorithm is run forward (ignoring exceptions
/// and the cap) to locate the Nth occurrence, and its normalized instant
/// is persisted as `e=` so future decodes never recompute it. Open-ended
/// rules stay open — no `e=` is invented.
///
/// # Errors
///
/// Returns [`RecurrenceError::MissingStartDate`] if the rule has no
/// normalized start.
pub fn encode(rule: &RecurrenceRule) -> Result<String> {
    let anchor = rule.anchor()?;

    let mut fields: Vec<(char, i64)> =
        vec![('t', kind_code(rule.kind)), ('i', i64::from(rule.interval))];

    match rule.kind {
        RecurrenceKind::Daily => {}
        RecurrenceKind::Weekly => {
            if let Some(set) = rule.weekdays {
                fields.push(('a', i64::from(set.bits())));
            }
        }
        RecurrenceKind::MonthlyByDayOfMonth => {
            if let Some(day) = rule.day_in_month {
                fields.push(('b', i64::from(day)));
            }
        }
        RecurrenceKind::YearlyByDayOfMonth => {
            if let Some(day) = rule.day_in_month {
                fields.push(('b', i64::from(day)));
            }
            if let Some(month) = rule.month {
                fields.push(('c', i64::from(month)));
            }
        }
        RecurrenceKind::MonthlyByWeekday => {
            if let Some(selector) = rule.weekday {
                fields.push(('a', i64::from(selector.to_mask())));
            }
            if let Some(ordinal) = rule.day_in_month {
                fields.push(('b', i64::from(ordinal)));
            }
        }
        RecurrenceKind::YearlyByWeekday => {
            if let Some(selector) = rule.weekday {
                fields.push(('a', i64::from(selector.to_mask())));
            }
            if let Some(ordinal) = rule.day_in_month {
                fields.push(('b', i64::from(ordinal)));
            }
            if let Some(month) = rule.month {
                fields.push(('c', i64::from(month)));
            }
        }
    }

    fields.push(('s', anchor));

    let until = match (rule.until, rule.occurrence_count) {
        (Some(until), _) => Some(until),
        (None, Some(_)) => locate_count_until(rule)?,
        (None, None) => None,
    };
    if let Some(until) = until {
        fields.push(('e', until));
    }
    if let Some(count) = rule.occurrence_count {
        fields.push(('o', i64::from(count)));
    }

    let mut pattern = String::from("|");
    for (key, value) in fields {
        pattern.push(key);
        pattern.push('=');
        pattern.push_str(&value.to_string());
        pattern.push('|');
    }
    Ok(pattern)
}

/// Locate the normalized instant of the Nth occurrence of a
/// count-bounded rule. `None` when the count lies beyond the implicit
/// search horizon.
fn locate_count_until(rule: &RecurrenceRule) -> Result<Option<i64>> {
    let opts = ExpandOptions {
        ignore_exceptions: true,
        compute_until_only: true,
        ..ExpandOptions::default()
    };
    let results = expand(rule, &ExceptionSet::default(), &opts)?;
    Ok(results.last().map(|occurrence| occurrence.normalized))
}

// ── Decode ──────────────────────────────────────────────────────────────────

/// Raw field values as they appear in the pattern, before any repair.
#[derive(Debug, Default)]
struct RawPattern {
    kind: Option<i64>,
    interval: Option<i64>,
    mask: Option<i64>,
    day: Option<i64>,
    month: Option<i64>,
    start: Option<i64>,
    until: Option<i64>,
    count: Option<i64>,
}

/// Deserialize a persisted pattern string.
///
/// `start` and `end` are the event's first-occurrence instants (the
/// pattern persists neither time-of-day nor duration), and `timezone` is
/// the zone calendar stepping happens in.
///
/// # Errors
///
/// Returns [`RecurrenceError::MalformedPattern`] for an unknown key, a
/// non-numeric value, or an unknown kind code, and
/// [`RecurrenceError::MissingStartDate`] when the pattern has no `s=`.
/// Out-of-range values of recognized keys never fail: they are repaired
/// in place (and logged) so old data keeps decoding.
pub fn decode(
    pattern: &str,
    start: Option<i64>,
    end: Option<i64>,
    timezone: Tz,
) -> Result<RecurrenceRule> {
    let mut raw = RawPattern::default();

    for token in pattern.split('|') {
        if token.is_empty() {
            continue;
        }
        let (key, value) = token.split_once('=').ok_or_else(|| {
            RecurrenceError::MalformedPattern(format!("expected key=value, got '{token}'"))
        })?;
        let value: i64 = value.parse().map_err(|_| {
            RecurrenceError::MalformedPattern(format!(
                "field '{key}' has non-numeric value '{value}'"
            ))
        })?;
        match key {
            "t" => raw.kind = Some(value),
            "i" => raw.interval = Some(value),
            "a" => raw.mask = Some(value),
            "b" => raw.day = Some(value),
            "c" => raw.month = Some(value),
            "s" => raw.start = Some(value),
            "e" => raw.until = Some(value),
            "o" => raw.count = Some(value),
            other => {
                return Err(RecurrenceError::MalformedPattern(format!(
                    "unrecognized recurrence field '{other}'"
                )));
            }
        }
    }

    let kind_value = raw
        .kind
        .ok_or_else(|| RecurrenceError::MalformedPattern("pattern has no kind".into()))?;
    let kind = kind_from_code(kind_value).ok_or_else(|| {
        RecurrenceError::MalformedPattern(format!("unknown recurrence kind code {kind_value}"))
    })?;

    let recurring_start = raw.start.ok_or(RecurrenceError::MissingStartDate)?;

    let mut rule = RecurrenceRule::new(kind, corrected_interval(raw.interval), timezone);
    rule.start = start;
    rule.end = end;
    rule.recurring_start = Some(recurring_start);
    rule.until = raw.until;
    rule.occurrence_count = raw.count.and_then(|value| u32::try_from(value).ok());

    match kind {
        RecurrenceKind::Daily => {}
        RecurrenceKind::Weekly => rule.weekdays = Some(corrected_weekday_set(raw.mask)),
        RecurrenceKind::MonthlyByDayOfMonth | RecurrenceKind::YearlyByDayOfMonth => {
            rule.day_in_month = Some(corrected_day(raw.day, 31));
        }
        RecurrenceKind::MonthlyByWeekday | RecurrenceKind::YearlyByWeekday => {
            rule.weekday = Some(corrected_selector(raw.mask));
            rule.day_in_month = Some(corrected_day(raw.day, 5));
        }
    }
    if kind.is_yearly() {
        rule.month = Some(corrected_month(raw.month));
    }

    Ok(rule)
}

// ── Auto-correction ─────────────────────────────────────────────────────────
//
// Each repair is local and silent (logged, never surfaced). This path
// exists to tolerate previously-persisted bad data and must never fail.

fn corrected_interval(raw: Option<i64>) -> u32 {
    match raw {
        Some(value) if value >= 1 => u32::try_from(value).unwrap_or(u32::MAX),
        Some(value) => {
            warn!(value, "auto-correcting non-positive interval to 1");
            1
        }
        None => 1,
    }
}

fn corrected_weekday_set(raw: Option<i64>) -> WeekdaySet {
    let set = WeekdaySet::from_bits((raw.unwrap_or(0) & 0x7f) as u8);
    if set.is_empty() {
        warn!(mask = raw, "auto-correcting empty weekly mask to Monday");
        WeekdaySet::MONDAY
    } else {
        set
    }
}

fn corrected_selector(raw: Option<i64>) -> WeekdaySelector {
    let selector = raw
        .and_then(|value| u8::try_from(value).ok())
        .and_then(WeekdaySelector::from_mask);
    match selector {
        Some(selector) => selector,
        None => {
            warn!(mask = raw, "auto-correcting unrecognized weekday value to Monday");
            WeekdaySelector::Fixed(Weekday::Mon)
        }
    }
}

fn corrected_day(raw: Option<i64>, max: i64) -> u32 {
    match raw {
        Some(value) if (1..=max).contains(&value) => value as u32,
        other => {
            warn!(value = other, max, "auto-correcting out-of-range day field to 1");
            1
        }
    }
}

fn corrected_month(raw: Option<i64>) -> u32 {
    match raw {
        Some(value) if (0..=11).contains(&value) => value as u32,
        other => {
            warn!(value = other, "auto-correcting out-of-range month to January");
            0
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
