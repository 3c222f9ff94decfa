//! The recurrence update classifier.
//!
//! An incoming edit against a stored series can mean very different
//! things: a plain field change on the umbrella object, a
//! single-occurrence exception, a wholesale replacement of the series
//! geometry, or a deletion. [`classify_update`] diffs a
//! [`PartialRuleEdit`] — only the fields the client actually submitted —
//! against the stored state and names the mutation, as a pure total
//! function: identical inputs always produce the identical decision, and
//! a combination with no defined transition is surfaced as an error
//! rather than guessed at.

use serde::Serialize;

use crate::codec::encode;
use crate::error::{RecurrenceError, Result};
use crate::expand::{expand, ExpandOptions};
use crate::rule::{
    ExceptionSet, RecurrenceKind, RecurrenceRule, WeekdaySelector, WeekdaySet,
};
use crate::validate::validate;

// ── Inputs ──────────────────────────────────────────────────────────────────

/// A single occurrence a submission points at, by series position or by
/// date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OccurrenceTarget {
    Position(u32),
    Date(i64),
}

/// The fields a client actually submitted; everything else is
/// "unchanged". `clear_recurrence` is distinct from leaving `kind`
/// unset: it explicitly removes the recurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRuleEdit {
    pub kind: Option<RecurrenceKind>,
    pub clear_recurrence: bool,
    pub interval: Option<u32>,
    pub weekdays: Option<WeekdaySet>,
    pub weekday: Option<WeekdaySelector>,
    pub day_in_month: Option<u32>,
    pub month: Option<u32>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub until: Option<i64>,
    pub occurrence_count: Option<u32>,
    pub target: Option<OccurrenceTarget>,
    pub folder_id: Option<u64>,
}

/// The stored side of a classification: the series root object with its
/// materialized rule (if any) and exception sets.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSeries {
    pub object_id: u64,
    pub folder_id: u64,
    /// First-occurrence start of the stored object, epoch ms.
    pub start: Option<i64>,
    /// First-occurrence end of the stored object, epoch ms.
    pub end: Option<i64>,
    pub timezone: chrono_tz::Tz,
    /// `None` when the stored object does not recur.
    pub rule: Option<RecurrenceRule>,
    pub exceptions: ExceptionSet,
}

// ── Outcome ─────────────────────────────────────────────────────────────────

/// What kind of mutation the submission represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateAction {
    /// Plain field edits; the series geometry is untouched.
    NoAction,
    /// A single occurrence is replaced by a standalone modified event.
    CreateException,
    /// The whole series is regenerated with new geometry. Both exception
    /// sets no longer apply and must be cleared by the caller.
    ChangeRecurringType,
    /// A single event is upgraded into a series root.
    CreateSeries,
    /// A single occurrence is removed (delete exception).
    DeleteOccurrence,
    /// The recurrence is removed from the series root entirely.
    RemoveRecurrence,
}

/// The classifier's decision: the action, plus — where the action calls
/// for it — the regenerated or geometry-resolved rule, its re-encoded
/// pattern, the object id acting as series root, and the targeted
/// occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDecision {
    pub action: UpdateAction,
    pub rule: Option<RecurrenceRule>,
    pub pattern: Option<String>,
    pub series_root: Option<u64>,
    pub target: Option<OccurrenceTarget>,
}

impl UpdateDecision {
    fn plain(action: UpdateAction) -> UpdateDecision {
        UpdateDecision {
            action,
            rule: None,
            pattern: None,
            series_root: None,
            target: None,
        }
    }
}

// ── Classification ──────────────────────────────────────────────────────────

/// Decide what mutation a submission represents against a stored series.
///
/// # Errors
///
/// [`RecurrenceError::RecurringExceptionMoveNotAllowed`] when a
/// single-occurrence edit changes folders,
/// [`RecurrenceError::AmbiguousUpdateState`] for combinations the state
/// machine does not cover, and validation/codec errors when a
/// regenerated rule is incomplete.
pub fn classify_update(
    submitted: Option<&PartialRuleEdit>,
    stored: &StoredSeries,
) -> Result<UpdateDecision> {
    let empty = PartialRuleEdit::default();
    let edit = submitted.unwrap_or(&empty);

    // Folder identity is a series-level property, never a per-occurrence
    // one.
    if stored.rule.is_some() && edit.target.is_some() {
        if let Some(folder) = edit.folder_id {
            if folder != stored.folder_id {
                return Err(RecurrenceError::RecurringExceptionMoveNotAllowed);
            }
        }
    }

    if edit.clear_recurrence && edit.kind.is_some() {
        return Err(RecurrenceError::AmbiguousUpdateState(
            "submission both clears and sets a recurrence kind".into(),
        ));
    }

    match (&stored.rule, edit.clear_recurrence, edit.kind) {
        // No recurrence on either side; clearing nothing is nothing.
        (None, _, None) => Ok(UpdateDecision::plain(UpdateAction::NoAction)),

        // A single event grows into a series root.
        (None, false, Some(kind)) => create_series(edit, stored, kind),

        // The recurrence is explicitly removed — for one occurrence when
        // a target accompanies the clear, otherwise for the whole series.
        (Some(_), true, None) => {
            let action = if edit.target.is_some() {
                UpdateAction::DeleteOccurrence
            } else {
                UpdateAction::RemoveRecurrence
            };
            Ok(UpdateDecision {
                series_root: Some(stored.object_id),
                target: edit.target,
                ..UpdateDecision::plain(action)
            })
        }

        (Some(old), false, submitted_kind) => match submitted_kind {
            Some(kind) if kind != old.kind => {
                if edit.target.is_some() {
                    // A different kind on one occurrence is a
                    // single-occurrence edit, not a geometry change.
                    Ok(UpdateDecision {
                        series_root: Some(stored.object_id),
                        target: edit.target,
                        ..UpdateDecision::plain(UpdateAction::CreateException)
                    })
                } else {
                    change_recurring_type(edit, stored, old, kind)
                }
            }
            // Kind unspecified or unchanged.
            _ => {
                if shape_changed(edit, old) {
                    change_recurring_type(edit, stored, old, old.kind)
                } else if edit.start.is_none() && edit.end.is_none() {
                    // No explicit dates: resolve the implied geometry
                    // from the first occurrence before proceeding.
                    let resolved = resolve_geometry(old)?;
                    Ok(UpdateDecision {
                        rule: Some(resolved),
                        ..UpdateDecision::plain(UpdateAction::NoAction)
                    })
                } else {
                    Ok(UpdateDecision::plain(UpdateAction::NoAction))
                }
            }
        },

        (None, true, Some(_)) | (Some(_), true, Some(_)) => {
            // Unreachable: rejected above. Kept for match totality.
            Err(RecurrenceError::AmbiguousUpdateState(
                "submission both clears and sets a recurrence kind".into(),
            ))
        }
    }
}

/// Whether any submitted field differs from the stored pattern shape.
fn shape_changed(edit: &PartialRuleEdit, rule: &RecurrenceRule) -> bool {
    edit.interval.is_some_and(|value| value != rule.interval)
        || edit.weekdays.is_some_and(|value| Some(value) != rule.weekdays)
        || edit.weekday.is_some_and(|value| Some(value) != rule.weekday)
        || edit
            .day_in_month
            .is_some_and(|value| Some(value) != rule.day_in_month)
        || edit.month.is_some_and(|value| Some(value) != rule.month)
        || edit
            .occurrence_count
            .is_some_and(|value| Some(value) != rule.occurrence_count)
        || edit.until.is_some_and(|value| Some(value) != rule.until)
}

fn change_recurring_type(
    edit: &PartialRuleEdit,
    stored: &StoredSeries,
    old: &RecurrenceRule,
    kind: RecurrenceKind,
) -> Result<UpdateDecision> {
    let rule = merged_rule(edit, old, kind)?;
    validate(&rule)?;
    let pattern = encode(&rule)?;
    Ok(UpdateDecision {
        action: UpdateAction::ChangeRecurringType,
        rule: Some(rule),
        pattern: Some(pattern),
        series_root: Some(stored.object_id),
        target: None,
    })
}

/// Build the regenerated rule for a geometry change: submitted fields
/// win; stored fields carry over only while the kind stays the same
/// (a new kind starts from a clean slate so stale fields cannot leak
/// into it).
fn merged_rule(
    edit: &PartialRuleEdit,
    old: &RecurrenceRule,
    kind: RecurrenceKind,
) -> Result<RecurrenceRule> {
    let same_kind = kind == old.kind;
    let keep = |value: Option<u32>| if same_kind { value } else { None };

    let mut rule = RecurrenceRule::new(
        kind,
        edit.interval.unwrap_or(old.interval),
        old.timezone,
    );
    rule.weekdays = edit
        .weekdays
        .or(if same_kind { old.weekdays } else { None });
    rule.weekday = edit.weekday.or(if same_kind { old.weekday } else { None });
    rule.day_in_month = edit.day_in_month.or(keep(old.day_in_month));
    rule.month = edit.month.or(keep(old.month));

    // At most one of until/count stays authoritative: submitting one
    // drops the stored other.
    rule.until = edit.until.or(if edit.occurrence_count.is_some() || !same_kind {
        None
    } else {
        old.until
    });
    rule.occurrence_count = edit
        .occurrence_count
        .or(if edit.until.is_some() || !same_kind {
            None
        } else {
            old.occurrence_count
        });

    let start = edit.start.or(old.start);
    let end = edit.end.or(old.end);
    match (start, end) {
        (Some(start), Some(end)) => Ok(rule.with_dates(start, end)),
        _ => Err(RecurrenceError::MissingStartDate),
    }
}

fn create_series(
    edit: &PartialRuleEdit,
    stored: &StoredSeries,
    kind: RecurrenceKind,
) -> Result<UpdateDecision> {
    let mut rule = RecurrenceRule::new(kind, edit.interval.unwrap_or(1), stored.timezone);
    rule.weekdays = edit.weekdays;
    rule.weekday = edit.weekday;
    rule.day_in_month = edit.day_in_month;
    rule.month = edit.month;
    rule.until = edit.until;
    rule.occurrence_count = edit.occurrence_count;

    let start = edit.start.or(stored.start);
    let end = edit.end.or(stored.end);
    let rule = match (start, end) {
        (Some(start), Some(end)) => rule.with_dates(start, end),
        _ => return Err(RecurrenceError::MissingStartDate),
    };
    validate(&rule)?;
    let pattern = encode(&rule)?;
    Ok(UpdateDecision {
        action: UpdateAction::CreateSeries,
        rule: Some(rule),
        pattern: Some(pattern),
        series_root: Some(stored.object_id),
        target: None,
    })
}

/// Fill a rule's start/end from its own first occurrence.
fn resolve_geometry(rule: &RecurrenceRule) -> Result<RecurrenceRule> {
    let opts = ExpandOptions {
        position: Some(1),
        max_results: 1,
        ignore_exceptions: true,
        ..ExpandOptions::default()
    };
    let results = expand(rule, &ExceptionSet::default(), &opts)?;
    let first = results
        .first()
        .ok_or(RecurrenceError::PositionNotFound(1))?;
    let mut resolved = rule.clone();
    resolved.start = Some(first.start);
    resolved.end = Some(first.end);
    resolved.recurring_start = Some(first.normalized);
    Ok(resolved)
}

// ── Tests ───────────────────────────────────────────────────────────────────
