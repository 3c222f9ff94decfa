//! The recurrence data model.
//!
//! A [`RecurrenceRule`] is the fully-resolved description of a repeating
//! series: the kind of repetition, its interval, the fields that pin the
//! pattern to concrete calendar days, the first occurrence's start/end
//! (which fix the time-of-day and duration for every occurrence), and an
//! optional end bound. Rules are constructed transiently per request —
//! decoded from storage or assembled from a submission — and are immutable
//! once handed to the expansion algorithm.
//!
//! Calendar stepping is timezone-relative: day, week, and month boundaries
//! are computed in the rule's timezone via `chrono-tz`, never by dividing
//! UTC milliseconds.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{RecurrenceError, Result};

// ── Calendar constants ──────────────────────────────────────────────────────

/// One day in milliseconds.
pub const DAY_MS: i64 = 86_400_000;
/// One week in milliseconds.
pub const WEEK_MS: i64 = 604_800_000;
/// One 30-day month-step unit in milliseconds. Used only to pad the
/// implicit-until search window, never for real month arithmetic.
pub const MONTH_STEP_MS: i64 = 2_678_400_000;
/// One 365-day year unit in milliseconds.
pub const YEAR_MS: i64 = 31_536_000_000;

/// Hard ceiling on the number of occurrences a single expansion emits.
pub const MAX_RESULTS: u32 = 999;

/// Open-ended horizon for non-yearly rules, in year units past the start.
pub const DEFAULT_HORIZON_YEARS: i64 = 4;
/// Open-ended horizon for yearly rules, in year units past the start.
pub const YEARLY_HORIZON_YEARS: i64 = 99;

// ── Recurrence kind ─────────────────────────────────────────────────────────

/// The six families of repetition.
///
/// "No recurrence" is not a seventh variant; callers model it as
/// `Option<RecurrenceKind>` at the edges. The persisted integer codes for
/// these variants live only inside the pattern codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecurrenceKind {
    /// Every `interval` days.
    Daily,
    /// Selected weekdays of every `interval`-th week.
    Weekly,
    /// A fixed day number of every `interval`-th month.
    MonthlyByDayOfMonth,
    /// The nth (or last) matching weekday of every `interval`-th month.
    MonthlyByWeekday,
    /// A fixed day number of a fixed month, every `interval`-th year.
    YearlyByDayOfMonth,
    /// The nth (or last) matching weekday of a fixed month, every
    /// `interval`-th year.
    YearlyByWeekday,
}

impl RecurrenceKind {
    /// Whether the kind steps in years (and therefore gets the long
    /// open-ended horizon).
    pub fn is_yearly(self) -> bool {
        matches!(self, Self::YearlyByDayOfMonth | Self::YearlyByWeekday)
    }

    /// Whether the kind resolves occurrences through an (ordinal, weekday)
    /// pair rather than a plain day number.
    pub fn is_by_weekday(self) -> bool {
        matches!(self, Self::MonthlyByWeekday | Self::YearlyByWeekday)
    }
}

// ── Weekday set (weekly rules) ──────────────────────────────────────────────

/// The set of weekdays a weekly rule fires on.
///
/// Internally the persisted 7-bit mask (`Sun=1, Mon=2, … Sat=64`), but the
/// raw bits only cross into public view at the codec boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// The full mask space a weekly rule may occupy.
    pub const ALL_BITS: u8 = 0x7f;

    /// Just Monday — the repair target for an empty weekly mask.
    pub const MONDAY: WeekdaySet = WeekdaySet(1 << 1);

    /// Build a set from persisted mask bits, keeping only the seven
    /// weekday bits.
    pub fn from_bits(bits: u8) -> WeekdaySet {
        WeekdaySet(bits & Self::ALL_BITS)
    }

    pub fn from_weekdays(days: &[Weekday]) -> WeekdaySet {
        let mut bits = 0u8;
        for day in days {
            bits |= bit_of(*day);
        }
        WeekdaySet(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & bit_of(day) != 0
    }

    /// The selected weekdays in ascending offset-from-Monday order — the
    /// order the weekly expansion visits them within a week.
    pub fn iter_from_monday(self) -> impl Iterator<Item = Weekday> {
        (0..7u32)
            .map(|offset| weekday_from_monday_offset(offset))
            .filter(move |day| self.contains(*day))
    }
}

fn bit_of(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

fn weekday_from_monday_offset(offset: u32) -> Weekday {
    match offset % 7 {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

// ── Weekday selector (by-weekday monthly/yearly rules) ──────────────────────

/// Which day an (ordinal, weekday) rule selects within its target month.
///
/// The three pseudo-days share the persisted mask space with the seven
/// real weekdays; internally they are distinct variants and the mask
/// conversion happens only in the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeekdaySelector {
    /// One concrete weekday (e.g. "second Tuesday").
    Fixed(Weekday),
    /// Any calendar day ("the 3rd day of the month").
    AnyDay,
    /// Any Monday–Friday day.
    AnyWeekday,
    /// Any Saturday or Sunday.
    AnyWeekendDay,
}

/// Mask value for the "any day" pseudo-day.
pub const MASK_ANY_DAY: u8 = 0x7f;
/// Mask value for the "any weekday" (Mon–Fri) pseudo-day.
pub const MASK_ANY_WEEKDAY: u8 = 0x3e;
/// Mask value for the "any weekend day" (Sat/Sun) pseudo-day.
pub const MASK_ANY_WEEKEND_DAY: u8 = 0x41;

impl WeekdaySelector {
    /// Decode a persisted mask value. `None` for anything that is neither
    /// a single weekday bit nor one of the three pseudo-day values.
    pub fn from_mask(bits: u8) -> Option<WeekdaySelector> {
        match bits {
            MASK_ANY_DAY => Some(WeekdaySelector::AnyDay),
            MASK_ANY_WEEKDAY => Some(WeekdaySelector::AnyWeekday),
            MASK_ANY_WEEKEND_DAY => Some(WeekdaySelector::AnyWeekendDay),
            _ => {
                if bits.count_ones() == 1 {
                    (0..7u32)
                        .map(weekday_from_monday_offset)
                        .find(|day| bit_of(*day) == bits)
                        .map(WeekdaySelector::Fixed)
                } else {
                    None
                }
            }
        }
    }

    pub fn to_mask(self) -> u8 {
        match self {
            WeekdaySelector::Fixed(day) => bit_of(day),
            WeekdaySelector::AnyDay => MASK_ANY_DAY,
            WeekdaySelector::AnyWeekday => MASK_ANY_WEEKDAY,
            WeekdaySelector::AnyWeekendDay => MASK_ANY_WEEKEND_DAY,
        }
    }

    /// Whether `date` is one of the days this selector matches.
    pub fn matches(self, date: NaiveDate) -> bool {
        match self {
            WeekdaySelector::Fixed(day) => date.weekday() == day,
            WeekdaySelector::AnyDay => true,
            WeekdaySelector::AnyWeekday => !is_weekend(date.weekday()),
            WeekdaySelector::AnyWeekendDay => is_weekend(date.weekday()),
        }
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

// ── Recurrence rule ─────────────────────────────────────────────────────────

/// A fully-resolved recurrence rule.
///
/// Field presence depends on the kind; the strict validator enforces the
/// per-kind requirements on the write path, while decode-time
/// auto-correction repairs out-of-range values on the read path. Exactly
/// one of `until` / `occurrence_count` is authoritative for termination;
/// with neither, expansion is bounded by an implicit horizon that exists
/// purely for loop termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub kind: RecurrenceKind,
    /// Steps of the kind's unit between occurrences, ≥ 1.
    pub interval: u32,
    /// Weekly rules: the weekdays that fire within each selected week.
    pub weekdays: Option<WeekdaySet>,
    /// By-weekday rules: which day the ordinal counts.
    pub weekday: Option<WeekdaySelector>,
    /// Day-of-month rules: 1–31. By-weekday rules: ordinal 1–5, where 5
    /// means "last".
    pub day_in_month: Option<u32>,
    /// Yearly rules: target month, 0–11.
    pub month: Option<u32>,
    /// Start of the first occurrence, epoch ms. Fixes the time-of-day of
    /// every occurrence.
    pub start: Option<i64>,
    /// End of the first occurrence, epoch ms. Fixes the duration.
    pub end: Option<i64>,
    /// `start` stripped to local midnight — the stepping anchor.
    pub recurring_start: Option<i64>,
    /// Inclusive end instant of the series.
    pub until: Option<i64>,
    /// Occurrence cap, mutually substitutable with `until`.
    pub occurrence_count: Option<u32>,
    /// Timezone the calendar stepping happens in.
    pub timezone: Tz,
}

impl RecurrenceRule {
    /// A rule skeleton with nothing but kind, interval, and timezone set.
    pub fn new(kind: RecurrenceKind, interval: u32, timezone: Tz) -> RecurrenceRule {
        RecurrenceRule {
            kind,
            interval,
            weekdays: None,
            weekday: None,
            day_in_month: None,
            month: None,
            start: None,
            end: None,
            recurring_start: None,
            until: None,
            occurrence_count: None,
            timezone,
        }
    }

    /// Set the first occurrence's start/end and derive the normalized
    /// stepping anchor from the start.
    pub fn with_dates(mut self, start: i64, end: i64) -> RecurrenceRule {
        self.start = Some(start);
        self.end = Some(end);
        self.recurring_start = Some(normalize_ms(start, self.timezone));
        self
    }

    /// The stepping anchor, or `MissingStartDate`.
    pub fn anchor(&self) -> Result<i64> {
        self.recurring_start.ok_or(RecurrenceError::MissingStartDate)
    }

    /// Milliseconds from local midnight to the occurrence start.
    pub fn time_of_day_offset(&self) -> i64 {
        match (self.start, self.recurring_start) {
            (Some(start), Some(anchor)) => start - anchor,
            _ => 0,
        }
    }

    /// The first occurrence's duration in milliseconds.
    pub fn duration(&self) -> i64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end - start,
            _ => 0,
        }
    }

    /// The instant the expansion loop must not step past. The explicit
    /// `until` when present, otherwise the implicit horizon (4 year units,
    /// 99 for yearly kinds) padded by one month-step unit so a
    /// count-derived boundary occurrence is never cut off.
    pub fn effective_until(&self) -> Result<i64> {
        let anchor = self.anchor()?;
        Ok(match self.until {
            Some(until) => until,
            None => {
                let years = if self.kind.is_yearly() {
                    YEARLY_HORIZON_YEARS
                } else {
                    DEFAULT_HORIZON_YEARS
                };
                anchor + years * YEAR_MS + MONTH_STEP_MS
            }
        })
    }
}

// ── Exception set ───────────────────────────────────────────────────────────

/// Per-occurrence exceptions, keyed by normalized instant.
///
/// `changes` are occurrences replaced by a standalone modified event
/// elsewhere; `deletes` are occurrences removed entirely. Membership in
/// either set excludes the occurrence from expansion output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionSet {
    pub changes: BTreeSet<i64>,
    pub deletes: BTreeSet<i64>,
}

impl ExceptionSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }

    /// Whether a normalized instant is excluded by either set.
    pub fn contains(&self, normalized: i64) -> bool {
        self.changes.contains(&normalized) || self.deletes.contains(&normalized)
    }
}

// ── Timezone-relative calendar helpers ──────────────────────────────────────

/// Parse an IANA timezone identifier into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| RecurrenceError::InvalidTimezone(format!("'{s}'")))
}

/// The local calendar date an instant falls on.
pub fn local_date(ms: i64, tz: Tz) -> NaiveDate {
    match tz.timestamp_millis_opt(ms).earliest() {
        Some(dt) => dt.date_naive(),
        None => chrono::DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.date_naive())
            .unwrap_or(NaiveDate::MIN),
    }
}

/// The instant of local midnight on `date`, in epoch ms.
///
/// Midnight can fall inside a DST gap in a few zones; the first valid
/// instant of the day is used then, probing forward by whole hours.
pub fn local_midnight_ms(date: NaiveDate, tz: Tz) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&midnight).earliest() {
        return dt.timestamp_millis();
    }
    for hour in 1..=3 {
        let probe = midnight + chrono::Duration::hours(hour);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return dt.timestamp_millis();
        }
    }
    midnight.and_utc().timestamp_millis()
}

/// Strip the time-of-day from an instant: the local midnight of the local
/// date it falls on. This is the canonical key for exception membership
/// and position lookup.
pub fn normalize_ms(ms: i64, tz: Tz) -> i64 {
    local_midnight_ms(local_date(ms, tz), tz)
}

/// The Monday of the week `date` falls in.
pub fn monday_of_week(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Number of days in a month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
        NaiveDate::from_ymd_opt(year, month, 1),
    ) {
        (Some(first_next), Some(first)) => (first_next - first).num_days() as u32,
        _ => 0,
    }
}

/// Step `(year, month)` forward by `months`, with `month` 1-based.
pub fn add_months(year: i32, month: u32, months: u32) -> (i32, u32) {
    let index = year as i64 * 12 + i64::from(month) - 1 + i64::from(months);
    ((index.div_euclid(12)) as i32, (index.rem_euclid(12) + 1) as u32)
}

// ── Tests ───────────────────────────────────────────────────────────────────
