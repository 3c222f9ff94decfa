//! The occurrence expansion algorithm.
//!
//! Expansion turns a [`RecurrenceRule`] plus an [`ExceptionSet`] into the
//! ordered, finite sequence of concrete occurrences the rule describes.
//! All five stepping families share one loop shape: a timezone-local
//! midnight cursor advances by `interval` units of the kind's period, and
//! every candidate that lies within the rule's own bounds increments a
//! 1-based position counter — whether or not the candidate survives the
//! range/position filters or the exception test. Position numbering is
//! therefore stable across limited queries: asking for a narrow range
//! yields the same positions those occurrences have in the full series.
//!
//! The loop stops at whichever limit comes first: the effective until,
//! the hard result ceiling, the single requested position, or the
//! occurrence-count cap. Open-ended rules are bounded by an implicit
//! horizon that exists purely for termination (see
//! [`RecurrenceRule::effective_until`]).

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{RecurrenceError, Result};
use crate::rule::{
    add_months, days_in_month, local_date, local_midnight_ms, monday_of_week, ExceptionSet,
    RecurrenceKind, RecurrenceRule, WeekdaySelector, MAX_RESULTS,
};

// ── Options and results ─────────────────────────────────────────────────────

/// Knobs for a single expansion call.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Emit only occurrences starting at or after this instant.
    pub range_start: Option<i64>,
    /// Emit only occurrences starting at or before this instant.
    pub range_end: Option<i64>,
    /// Emit only the occurrence at this 1-based series position.
    pub position: Option<u32>,
    /// Hard ceiling on emitted occurrences.
    pub max_results: u32,
    /// Skip the exception test (used by lookups and the encoder).
    pub ignore_exceptions: bool,
    /// Walk past every filter and the occurrence cap, emitting only the
    /// occurrence the cap points at. The encoder uses this to materialize
    /// an explicit until for count-bounded rules.
    pub compute_until_only: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        ExpandOptions {
            range_start: None,
            range_end: None,
            position: None,
            max_results: MAX_RESULTS,
            ignore_exceptions: false,
            compute_until_only: false,
        }
    }
}

/// One expanded occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecurringResult {
    /// 1-based position within the series, counted over all in-bounds
    /// candidates regardless of exception status.
    pub position: u32,
    /// Occurrence start, epoch ms.
    pub start: i64,
    /// Occurrence end (start + the series' first-occurrence duration).
    pub end: i64,
    /// Start stripped to local midnight — the exception/lookup key.
    pub normalized: i64,
}

/// The ordered, finite outcome of one expansion call.
///
/// A derived, disposable computation: recomputed on every query, never a
/// live view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecurringResults {
    results: Vec<RecurringResult>,
}

impl RecurringResults {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecurringResult> {
        self.results.iter()
    }

    pub fn as_slice(&self) -> &[RecurringResult] {
        &self.results
    }

    pub fn first(&self) -> Option<&RecurringResult> {
        self.results.first()
    }

    pub fn last(&self) -> Option<&RecurringResult> {
        self.results.last()
    }

    /// The occurrence at a series position, if it was emitted by this
    /// expansion.
    pub fn by_position(&self, position: u32) -> Option<&RecurringResult> {
        self.results.iter().find(|result| result.position == position)
    }

    /// Reverse lookup: the position of the occurrence with this
    /// normalized instant.
    pub fn position_of(&self, normalized: i64) -> Option<u32> {
        self.results
            .iter()
            .find(|result| result.normalized == normalized)
            .map(|result| result.position)
    }
}

impl<'a> IntoIterator for &'a RecurringResults {
    type Item = &'a RecurringResult;
    type IntoIter = std::slice::Iter<'a, RecurringResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

// ── Expansion entry point ───────────────────────────────────────────────────

/// Expand a rule into its concrete occurrences.
///
/// Never mutates its inputs; the same rule may be expanded concurrently
/// by independent callers. Returns a complete, internally consistent
/// result set or fails — there is no partial output.
///
/// # Errors
///
/// [`RecurrenceError::MissingStartDate`] without a stepping anchor, and
/// [`RecurrenceError::InvalidRuleField`] when a field the kind requires
/// is absent or out of range (rules decoded from storage never trip
/// this: the codec repairs them first).
pub fn expand(
    rule: &RecurrenceRule,
    exceptions: &ExceptionSet,
    opts: &ExpandOptions,
) -> Result<RecurringResults> {
    if rule.interval < 1 {
        return Err(RecurrenceError::InvalidRuleField {
            field: "interval",
            value: i64::from(rule.interval),
        });
    }
    let mut walk = Walker::new(rule, exceptions, opts)?;
    match rule.kind {
        RecurrenceKind::Daily => walk_daily(&mut walk),
        RecurrenceKind::Weekly => walk_weekly(&mut walk)?,
        RecurrenceKind::MonthlyByDayOfMonth => walk_monthly_by_day(&mut walk)?,
        RecurrenceKind::YearlyByDayOfMonth => walk_yearly_by_day(&mut walk)?,
        RecurrenceKind::MonthlyByWeekday | RecurrenceKind::YearlyByWeekday => {
            walk_by_weekday(&mut walk)?;
        }
    }
    Ok(RecurringResults {
        results: walk.results,
    })
}

// ── The shared walk ─────────────────────────────────────────────────────────

/// Candidate filtering and emission, shared by all five stepping
/// families. Steppers feed candidates in chronological order through
/// [`Walker::offer`] until it reports the walk is over.
struct Walker<'a> {
    rule: &'a RecurrenceRule,
    exceptions: &'a ExceptionSet,
    opts: &'a ExpandOptions,
    series_start: i64,
    until: i64,
    time_offset: i64,
    duration: i64,
    position: u32,
    results: Vec<RecurringResult>,
}

impl<'a> Walker<'a> {
    fn new(
        rule: &'a RecurrenceRule,
        exceptions: &'a ExceptionSet,
        opts: &'a ExpandOptions,
    ) -> Result<Walker<'a>> {
        Ok(Walker {
            rule,
            exceptions,
            opts,
            series_start: rule.anchor()?,
            until: rule.effective_until()?,
            time_offset: rule.time_of_day_offset(),
            duration: rule.duration(),
            position: 0,
            results: Vec::new(),
        })
    }

    /// Whether a normalized instant lies past the effective until.
    /// Steppers use this to fence month/year steps that produce no
    /// candidate at all (skipped short months, non-leap years).
    fn past_until(&self, normalized: i64) -> bool {
        normalized > self.until
    }

    /// Offer the next candidate. Returns `false` when the walk is over.
    fn offer(&mut self, normalized: i64) -> bool {
        // Candidates before the series anchor are not occurrences and do
        // not count toward positions.
        if normalized < self.series_start {
            return true;
        }
        if normalized > self.until {
            return false;
        }
        self.position += 1;

        if self.opts.compute_until_only {
            // Walk past the cap and every filter; only the landing on the
            // Nth position matters.
            if let Some(count) = self.rule.occurrence_count {
                if self.position == count {
                    self.emit(normalized);
                    return false;
                }
            }
            return true;
        }

        if let Some(count) = self.rule.occurrence_count {
            if self.position > count {
                return false;
            }
        }

        let start = normalized + self.time_offset;

        let selected = match self.opts.position {
            Some(wanted) => wanted == self.position,
            None => {
                // Past the right edge of a requested range nothing
                // further can match.
                if let Some(range_end) = self.opts.range_end {
                    if start > range_end {
                        return false;
                    }
                }
                self.opts.range_start.is_none_or(|lo| start >= lo)
            }
        };

        if selected && (self.opts.ignore_exceptions || !self.exceptions.contains(normalized)) {
            self.emit(normalized);
            if self.opts.position.is_some() {
                return false;
            }
            if self.results.len() >= self.opts.max_results as usize {
                return false;
            }
        }
        true
    }

    fn emit(&mut self, normalized: i64) {
        let start = normalized + self.time_offset;
        self.results.push(RecurringResult {
            position: self.position,
            start,
            end: start + self.duration,
            normalized,
        });
    }
}

// ── Per-kind steppers ───────────────────────────────────────────────────────

fn walk_daily(walk: &mut Walker) {
    let tz = walk.rule.timezone;
    let step = i64::from(walk.rule.interval);
    let mut date = local_date(walk.series_start, tz);
    loop {
        if !walk.offer(local_midnight_ms(date, tz)) {
            return;
        }
        date = date + chrono::Duration::days(step);
    }
}

fn walk_weekly(walk: &mut Walker) -> Result<()> {
    let weekdays = required(walk.rule.weekdays, "weekdays")?;
    if weekdays.is_empty() {
        return Err(RecurrenceError::InvalidRuleField {
            field: "weekdays",
            value: 0,
        });
    }
    let tz = walk.rule.timezone;
    let mut monday = monday_of_week(local_date(walk.series_start, tz));
    loop {
        for weekday in weekdays.iter_from_monday() {
            let date =
                monday + chrono::Duration::days(i64::from(weekday.num_days_from_monday()));
            if !walk.offer(local_midnight_ms(date, tz)) {
                return Ok(());
            }
        }
        monday = monday + chrono::Duration::days(7 * i64::from(walk.rule.interval));
    }
}

fn walk_monthly_by_day(walk: &mut Walker) -> Result<()> {
    let day = required_in_range(walk.rule.day_in_month, "day_in_month", 1..=31)?;
    let tz = walk.rule.timezone;
    let start_date = local_date(walk.series_start, tz);
    let (mut year, mut month) = (start_date.year(), start_date.month());
    loop {
        // A month shorter than the requested day is skipped outright; the
        // fence keeps skip-only sequences (day 31 with a 30-day stride)
        // from walking forever.
        if !month_within_until(walk, year, month) {
            return Ok(());
        }
        if day <= days_in_month(year, month) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                if !walk.offer(local_midnight_ms(date, tz)) {
                    return Ok(());
                }
            }
        }
        (year, month) = add_months(year, month, walk.rule.interval);
    }
}

fn walk_yearly_by_day(walk: &mut Walker) -> Result<()> {
    let day = required_in_range(walk.rule.day_in_month, "day_in_month", 1..=31)?;
    let month = required_in_range(walk.rule.month, "month", 0..=11)? + 1;
    let tz = walk.rule.timezone;
    let start_date = local_date(walk.series_start, tz);
    let mut year = start_date.year();
    loop {
        // Feb 29 in a non-leap year is skipped, same as short months.
        if !month_within_until(walk, year, month) {
            return Ok(());
        }
        if day <= days_in_month(year, month) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                if !walk.offer(local_midnight_ms(date, tz)) {
                    return Ok(());
                }
            }
        }
        year += walk.rule.interval as i32;
    }
}

fn walk_by_weekday(walk: &mut Walker) -> Result<()> {
    let selector = required(walk.rule.weekday, "weekday")?;
    let ordinal = required_in_range(walk.rule.day_in_month, "day_in_month", 1..=5)?;
    let tz = walk.rule.timezone;
    let start_date = local_date(walk.series_start, tz);

    if walk.rule.kind == RecurrenceKind::YearlyByWeekday {
        let month = required_in_range(walk.rule.month, "month", 0..=11)? + 1;
        let mut year = start_date.year();
        loop {
            if !month_within_until(walk, year, month) {
                return Ok(());
            }
            if let Some(date) = nth_matching_day(year, month, selector, ordinal) {
                if !walk.offer(local_midnight_ms(date, tz)) {
                    return Ok(());
                }
            }
            year += walk.rule.interval as i32;
        }
    }

    let (mut year, mut month) = (start_date.year(), start_date.month());
    loop {
        if !month_within_until(walk, year, month) {
            return Ok(());
        }
        if let Some(date) = nth_matching_day(year, month, selector, ordinal) {
            if !walk.offer(local_midnight_ms(date, tz)) {
                return Ok(());
            }
        }
        (year, month) = add_months(year, month, walk.rule.interval);
    }
}

/// Whether the month beginning at `(year, month)` still lies within the
/// effective until. Checked before any day inside the month is resolved,
/// so skip-only sequences cannot walk forever.
fn month_within_until(walk: &Walker, year: i32, month: u32) -> bool {
    match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(first) => !walk.past_until(local_midnight_ms(first, walk.rule.timezone)),
        None => false,
    }
}

/// Resolve "the nth matching day of a month".
///
/// Ordinals 1–4 count forward from the month's first matching day;
/// ordinal 5 always means the last matching day, counted backward from
/// the month's final day (authoritative even when it coincides with what
/// the 4th would give).
fn nth_matching_day(
    year: i32,
    month: u32,
    selector: WeekdaySelector,
    ordinal: u32,
) -> Option<NaiveDate> {
    let last_day = days_in_month(year, month);
    if ordinal >= 5 {
        let mut date = NaiveDate::from_ymd_opt(year, month, last_day)?;
        while !selector.matches(date) {
            date = date.pred_opt()?;
            if date.month() != month {
                return None;
            }
        }
        return Some(date);
    }

    if let WeekdaySelector::Fixed(weekday) = selector {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let offset = (i64::from(weekday.num_days_from_monday())
            - i64::from(first.weekday().num_days_from_monday())
            + 7)
            % 7;
        let target = first + chrono::Duration::days(offset + 7 * (i64::from(ordinal) - 1));
        return (target.month() == month).then_some(target);
    }

    // Pseudo-days resolve by scanning forward from the 1st.
    let mut seen = 0;
    for day in 1..=last_day {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        if selector.matches(date) {
            seen += 1;
            if seen == ordinal {
                return Some(date);
            }
        }
    }
    None
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(RecurrenceError::InvalidRuleField { field, value: -1 })
}

fn required_in_range(
    value: Option<u32>,
    field: &'static str,
    range: std::ops::RangeInclusive<u32>,
) -> Result<u32> {
    let value = required(value, field)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(RecurrenceError::InvalidRuleField {
            field,
            value: i64::from(value),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{WeekdaySet, DAY_MS};
    use chrono::{TimeZone, Weekday};
    use chrono_tz::Tz;
    use proptest::prelude::*;

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    fn ms(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        tz.with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("unambiguous test instant")
            .timestamp_millis()
    }

    fn daily(count: Option<u32>) -> RecurrenceRule {
        let start = ms(utc(), 2026, 2, 16, 10, 0);
        let mut rule =
            RecurrenceRule::new(RecurrenceKind::Daily, 1, utc()).with_dates(start, start + 3_600_000);
        rule.occurrence_count = count;
        rule
    }

    fn weekly_mon_wed(count: Option<u32>) -> RecurrenceRule {
        // Monday 2026-02-16, 10:00 UTC.
        let start = ms(utc(), 2026, 2, 16, 10, 0);
        let mut rule =
            RecurrenceRule::new(RecurrenceKind::Weekly, 1, utc()).with_dates(start, start + 3_600_000);
        rule.weekdays = Some(WeekdaySet::from_weekdays(&[Weekday::Mon, Weekday::Wed]));
        rule.occurrence_count = count;
        rule
    }

    fn expand_plain(rule: &RecurrenceRule) -> RecurringResults {
        expand(rule, &ExceptionSet::default(), &ExpandOptions::default()).unwrap()
    }

    // ── Count-bounded expansion (every kind) ────────────────────────────

    #[test]
    fn test_daily_count_yields_exactly_n() {
        let results = expand_plain(&daily(Some(7)));
        assert_eq!(results.len(), 7);
        let positions: Vec<u32> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, (1..=7).collect::<Vec<u32>>());
    }

    #[test]
    fn test_weekly_count_yields_exactly_n() {
        let results = expand_plain(&weekly_mon_wed(Some(6)));
        assert_eq!(results.len(), 6);
        let positions: Vec<u32> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, (1..=6).collect::<Vec<u32>>());
    }

    #[test]
    fn test_monthly_by_day_count_yields_exactly_n() {
        let start = ms(utc(), 2026, 1, 15, 9, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::MonthlyByDayOfMonth, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.day_in_month = Some(15);
        rule.occurrence_count = Some(5);
        let results = expand_plain(&rule);
        assert_eq!(results.len(), 5);
        assert_eq!(results.last().unwrap().start, ms(utc(), 2026, 5, 15, 9, 0));
    }

    #[test]
    fn test_monthly_by_weekday_count_yields_exactly_n() {
        // Second Tuesday of each month; start January 2026.
        let start = ms(utc(), 2026, 1, 13, 9, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::MonthlyByWeekday, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.weekday = Some(WeekdaySelector::Fixed(Weekday::Tue));
        rule.day_in_month = Some(2);
        rule.occurrence_count = Some(4);
        let results = expand_plain(&rule);
        assert_eq!(results.len(), 4);
        // Second Tuesdays: Jan 13, Feb 10, Mar 10, Apr 14.
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 1, 13, 9, 0),
                ms(utc(), 2026, 2, 10, 9, 0),
                ms(utc(), 2026, 3, 10, 9, 0),
                ms(utc(), 2026, 4, 14, 9, 0),
            ]
        );
    }

    #[test]
    fn test_yearly_by_day_count_yields_exactly_n() {
        let start = ms(utc(), 2026, 7, 4, 12, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::YearlyByDayOfMonth, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.day_in_month = Some(4);
        rule.month = Some(6); // July
        rule.occurrence_count = Some(3);
        let results = expand_plain(&rule);
        assert_eq!(results.len(), 3);
        assert_eq!(results.last().unwrap().start, ms(utc(), 2028, 7, 4, 12, 0));
    }

    #[test]
    fn test_yearly_by_weekday_count_yields_exactly_n() {
        // First Monday of September, yearly.
        let start = ms(utc(), 2026, 9, 7, 9, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::YearlyByWeekday, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.weekday = Some(WeekdaySelector::Fixed(Weekday::Mon));
        rule.day_in_month = Some(1);
        rule.month = Some(8); // September
        rule.occurrence_count = Some(3);
        let results = expand_plain(&rule);
        assert_eq!(results.len(), 3);
        // First Mondays of September: 2026-09-07, 2027-09-06, 2028-09-04.
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 9, 7, 9, 0),
                ms(utc(), 2027, 9, 6, 9, 0),
                ms(utc(), 2028, 9, 4, 9, 0),
            ]
        );
    }

    // ── The weekly walk in detail ───────────────────────────────────────

    #[test]
    fn test_weekly_mon_wed_concrete_dates_and_times() {
        let results = expand_plain(&weekly_mon_wed(Some(4)));
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 2, 16, 10, 0), // Mon
                ms(utc(), 2026, 2, 18, 10, 0), // Wed
                ms(utc(), 2026, 2, 23, 10, 0), // next Mon
                ms(utc(), 2026, 2, 25, 10, 0), // next Wed
            ]
        );
        for result in &results {
            assert_eq!(result.end - result.start, 3_600_000);
        }
    }

    #[test]
    fn test_weekly_start_mid_week_skips_earlier_days_uncounted() {
        // Start Wednesday; Monday of the same week is not an occurrence
        // and must not consume a position.
        let start = ms(utc(), 2026, 2, 18, 10, 0);
        let mut rule =
            RecurrenceRule::new(RecurrenceKind::Weekly, 1, utc()).with_dates(start, start + 3_600_000);
        rule.weekdays = Some(WeekdaySet::from_weekdays(&[Weekday::Mon, Weekday::Wed]));
        rule.occurrence_count = Some(3);
        let results = expand_plain(&rule);
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 2, 18, 10, 0), // Wed (position 1)
                ms(utc(), 2026, 2, 23, 10, 0), // Mon
                ms(utc(), 2026, 2, 25, 10, 0), // Wed
            ]
        );
        assert_eq!(results.first().unwrap().position, 1);
    }

    #[test]
    fn test_weekly_interval_two_skips_weeks() {
        let start = ms(utc(), 2026, 2, 16, 10, 0);
        let mut rule =
            RecurrenceRule::new(RecurrenceKind::Weekly, 2, utc()).with_dates(start, start + 3_600_000);
        rule.weekdays = Some(WeekdaySet::from_weekdays(&[Weekday::Mon]));
        rule.occurrence_count = Some(3);
        let results = expand_plain(&rule);
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 2, 16, 10, 0),
                ms(utc(), 2026, 3, 2, 10, 0),
                ms(utc(), 2026, 3, 16, 10, 0),
            ]
        );
    }

    // ── Month-skip semantics ────────────────────────────────────────────

    #[test]
    fn test_monthly_day_31_skips_short_months() {
        let start = ms(utc(), 2026, 1, 31, 8, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::MonthlyByDayOfMonth, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.day_in_month = Some(31);
        rule.occurrence_count = Some(4);
        let results = expand_plain(&rule);
        // Feb, Apr, Jun are skipped entirely — no clamp to their last day.
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 1, 31, 8, 0),
                ms(utc(), 2026, 3, 31, 8, 0),
                ms(utc(), 2026, 5, 31, 8, 0),
                ms(utc(), 2026, 7, 31, 8, 0),
            ]
        );
    }

    #[test]
    fn test_yearly_feb_29_emits_leap_years_only() {
        let start = ms(utc(), 2028, 2, 29, 8, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::YearlyByDayOfMonth, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.day_in_month = Some(29);
        rule.month = Some(1); // February
        rule.occurrence_count = Some(3);
        let results = expand_plain(&rule);
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2028, 2, 29, 8, 0),
                ms(utc(), 2032, 2, 29, 8, 0),
                ms(utc(), 2036, 2, 29, 8, 0),
            ]
        );
    }

    // ── Nth-weekday resolution ──────────────────────────────────────────

    #[test]
    fn test_last_friday_across_february() {
        let start = ms(utc(), 2026, 1, 30, 15, 0);
        let mut rule = RecurrenceRule::new(RecurrenceKind::MonthlyByWeekday, 1, utc())
            .with_dates(start, start + 3_600_000);
        rule.weekday = Some(WeekdaySelector::Fixed(Weekday::Fri));
        rule.day_in_month = Some(5); // last
        rule.occurrence_count = Some(3);
        let results = expand_plain(&rule);
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        // February's own last Friday, not January's or March's.
        assert_eq!(
            starts,
            vec![
                ms(utc(), 2026, 1, 30, 15, 0),
                ms(utc(), 2026, 2, 27, 15, 0),
                ms(utc(), 2026, 3, 27, 15, 0),
            ]
        );
    }

    #[test]
    fn test_nth_matching_day_pseudo_days() {
        // February 2026 starts on a Sunday.
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyWeekday, 1),
            NaiveDate::from_ymd_opt(2026, 2, 2)
        );
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyWeekendDay, 1),
            NaiveDate::from_ymd_opt(2026, 2, 1)
        );
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyWeekendDay, 2),
            NaiveDate::from_ymd_opt(2026, 2, 7)
        );
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyDay, 3),
            NaiveDate::from_ymd_opt(2026, 2, 3)
        );
        // Ordinal 5 is "last".
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyDay, 5),
            NaiveDate::from_ymd_opt(2026, 2, 28)
        );
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyWeekday, 5),
            NaiveDate::from_ymd_opt(2026, 2, 27)
        );
        assert_eq!(
            nth_matching_day(2026, 2, WeekdaySelector::AnyWeekendDay, 5),
            NaiveDate::from_ymd_opt(2026, 2, 28)
        );
    }

    #[test]
    fn test_nth_matching_day_fixed_weekday() {
        // Fridays of February 2026: 6, 13, 20, 27.
        for (ordinal, day) in [(1, 6), (2, 13), (3, 20), (4, 27), (5, 27)] {
            assert_eq!(
                nth_matching_day(2026, 2, WeekdaySelector::Fixed(Weekday::Fri), ordinal),
                NaiveDate::from_ymd_opt(2026, 2, day)
            );
        }
    }

    // ── Exceptions ──────────────────────────────────────────────────────

    #[test]
    fn test_delete_exception_removes_one_keeps_numbering() {
        let rule = weekly_mon_wed(Some(4));
        let mut exceptions = ExceptionSet::default();
        // Delete the second occurrence (Wednesday Feb 18).
        exceptions.deletes.insert(ms(utc(), 2026, 2, 18, 0, 0));
        let results = expand(&rule, &exceptions, &ExpandOptions::default()).unwrap();
        // The cap still counts the deleted occurrence: 3 emitted, 4 walked.
        assert_eq!(results.len(), 3);
        let positions: Vec<u32> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 3, 4]);
    }

    #[test]
    fn test_change_exception_also_excluded() {
        let rule = weekly_mon_wed(Some(4));
        let mut exceptions = ExceptionSet::default();
        exceptions.changes.insert(ms(utc(), 2026, 2, 16, 0, 0));
        let results = expand(&rule, &exceptions, &ExpandOptions::default()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.first().unwrap().position, 2);
    }

    #[test]
    fn test_ignore_exceptions_flag() {
        let rule = weekly_mon_wed(Some(4));
        let mut exceptions = ExceptionSet::default();
        exceptions.deletes.insert(ms(utc(), 2026, 2, 18, 0, 0));
        let opts = ExpandOptions {
            ignore_exceptions: true,
            ..ExpandOptions::default()
        };
        let results = expand(&rule, &exceptions, &opts).unwrap();
        assert_eq!(results.len(), 4);
    }

    // ── Range and position filters ──────────────────────────────────────

    #[test]
    fn test_range_query_preserves_positions() {
        let rule = daily(Some(10));
        let opts = ExpandOptions {
            range_start: Some(ms(utc(), 2026, 2, 19, 0, 0)),
            range_end: Some(ms(utc(), 2026, 2, 21, 23, 0)),
            ..ExpandOptions::default()
        };
        let results = expand(&rule, &ExceptionSet::default(), &opts).unwrap();
        let positions: Vec<u32> = results.iter().map(|r| r.position).collect();
        // Feb 19, 20, 21 are the 4th, 5th, 6th occurrences.
        assert_eq!(positions, vec![4, 5, 6]);
    }

    #[test]
    fn test_position_filter_yields_single_result() {
        let rule = daily(None);
        let opts = ExpandOptions {
            position: Some(3),
            max_results: 1,
            ..ExpandOptions::default()
        };
        let results = expand(&rule, &ExceptionSet::default(), &opts).unwrap();
        assert_eq!(results.len(), 1);
        let only = results.first().unwrap();
        assert_eq!(only.position, 3);
        assert_eq!(only.start, ms(utc(), 2026, 2, 18, 10, 0));
    }

    #[test]
    fn test_max_results_ceiling() {
        let rule = daily(None);
        let opts = ExpandOptions {
            max_results: 10,
            ..ExpandOptions::default()
        };
        let results = expand(&rule, &ExceptionSet::default(), &opts).unwrap();
        assert_eq!(results.len(), 10);
    }

    #[test]
    fn test_open_ended_daily_hits_default_ceiling() {
        let results = expand_plain(&daily(None));
        assert_eq!(results.len(), MAX_RESULTS as usize);
    }

    #[test]
    fn test_until_bound_is_inclusive() {
        let mut rule = daily(None);
        // Until at the normalized instant of the 3rd occurrence.
        rule.until = Some(ms(utc(), 2026, 2, 18, 0, 0));
        let results = expand_plain(&rule);
        assert_eq!(results.len(), 3);
    }

    // ── Timezone behavior ───────────────────────────────────────────────

    #[test]
    fn test_time_of_day_is_a_fixed_offset_from_local_midnight() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // Daily at 10:00 Eastern, starting the Friday before the 2026
        // spring-forward (March 8). Each occurrence is its day's local
        // midnight plus a fixed 10-hour offset: the transition day lands
        // at 11:00 on the wall clock, the following days at 10:00 again.
        let start = ms(tz, 2026, 3, 6, 10, 0);
        let mut rule =
            RecurrenceRule::new(RecurrenceKind::Daily, 1, tz).with_dates(start, start + 3_600_000);
        rule.occurrence_count = Some(4);
        let results = expand_plain(&rule);
        let starts: Vec<i64> = results.iter().map(|r| r.start).collect();
        assert_eq!(
            starts,
            vec![
                ms(tz, 2026, 3, 6, 10, 0),
                ms(tz, 2026, 3, 7, 10, 0),
                ms(tz, 2026, 3, 8, 11, 0),
                ms(tz, 2026, 3, 9, 10, 0),
            ]
        );
    }

    // ── Serialized shape ────────────────────────────────────────────────

    #[test]
    fn test_result_serializes_flat() {
        let results = expand_plain(&daily(Some(1)));
        let json = serde_json::to_value(results.first().unwrap()).unwrap();
        assert_eq!(json["position"], 1);
        assert_eq!(json["start"].as_i64(), Some(ms(utc(), 2026, 2, 16, 10, 0)));
        assert_eq!(json["end"].as_i64(), Some(ms(utc(), 2026, 2, 16, 11, 0)));
        assert_eq!(json["normalized"].as_i64(), Some(ms(utc(), 2026, 2, 16, 0, 0)));
    }

    // ── Guard rails ─────────────────────────────────────────────────────

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut rule = daily(None);
        rule.interval = 0;
        let result = expand(&rule, &ExceptionSet::default(), &ExpandOptions::default());
        assert!(matches!(
            result,
            Err(RecurrenceError::InvalidRuleField {
                field: "interval",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_start_is_rejected() {
        let rule = RecurrenceRule::new(RecurrenceKind::Daily, 1, utc());
        let result = expand(&rule, &ExceptionSet::default(), &ExpandOptions::default());
        assert!(matches!(result, Err(RecurrenceError::MissingStartDate)));
    }

    #[test]
    fn test_expand_does_not_mutate_inputs() {
        let rule = weekly_mon_wed(Some(4));
        let before = rule.clone();
        let exceptions = ExceptionSet::default();
        let _ = expand(&rule, &exceptions, &ExpandOptions::default()).unwrap();
        let _ = expand(&rule, &exceptions, &ExpandOptions::default()).unwrap();
        assert_eq!(rule, before);
    }

    // ── Property tests ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_count_bounded_daily(interval in 1u32..14, count in 1u32..60) {
            let start = ms(chrono_tz::UTC, 2026, 1, 5, 9, 30);
            let mut rule = RecurrenceRule::new(RecurrenceKind::Daily, interval, chrono_tz::UTC)
                .with_dates(start, start + 1_800_000);
            rule.occurrence_count = Some(count);
            let results = expand(&rule, &ExceptionSet::default(), &ExpandOptions::default()).unwrap();
            prop_assert_eq!(results.len(), count as usize);
            for (index, result) in results.iter().enumerate() {
                prop_assert_eq!(result.position, index as u32 + 1);
                prop_assert_eq!(result.start - start,
                    i64::from(index as u32) * i64::from(interval) * DAY_MS);
            }
        }

        #[test]
        fn prop_positions_are_strictly_increasing(count in 2u32..40, bits in 1u8..128) {
            let start = ms(chrono_tz::UTC, 2026, 2, 16, 10, 0);
            let mut rule = RecurrenceRule::new(RecurrenceKind::Weekly, 1, chrono_tz::UTC)
                .with_dates(start, start + 1_800_000);
            rule.weekdays = Some(WeekdaySet::from_bits(bits));
            rule.occurrence_count = Some(count);
            let results = expand(&rule, &ExceptionSet::default(), &ExpandOptions::default()).unwrap();
            prop_assert_eq!(results.len(), count as usize);
            for pair in results.as_slice().windows(2) {
                prop_assert!(pair[1].position == pair[0].position + 1);
                prop_assert!(pair[1].start > pair[0].start);
            }
        }
    }
}
