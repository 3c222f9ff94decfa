//! # recurrence-engine
//!
//! Deterministic recurrence rule engine for groupware calendars.
//!
//! The engine encodes a calendar event's repetition pattern into a
//! compact persisted form, decodes it back (repairing old bad data as it
//! goes), validates user-submitted rules strictly, and expands a rule
//! into the ordered sequence of concrete occurrence instants — subject to
//! per-occurrence exceptions, explicit or implicit end conditions, and
//! positional lookups in both directions. A companion classifier decides
//! what kind of mutation an incoming edit represents by diffing the
//! submitted pattern against the stored one.
//!
//! Everything is purely computational: no system clock, no I/O, no
//! shared mutable state. Inputs are borrowed immutably, so the same rule
//! may be expanded concurrently by independent callers.
//!
//! ## Modules
//!
//! - [`rule`] — the data model: rule kinds, weekday sets and selectors,
//!   exception sets, timezone-relative normalization
//! - [`codec`] — pattern string ↔ rule, with read-path auto-correction
//! - [`validate`] — strict write-path field validation
//! - [`expand`] — rule + exceptions → concrete occurrences
//! - [`lookup`] — position → date and date → position helpers
//! - [`classify`] — edit + stored series → update action
//! - [`error`] — error types

pub mod classify;
pub mod codec;
pub mod error;
pub mod expand;
pub mod lookup;
pub mod rule;
pub mod validate;

pub use classify::{
    classify_update, OccurrenceTarget, PartialRuleEdit, StoredSeries, UpdateAction,
    UpdateDecision,
};
pub use codec::{decode, encode};
pub use error::{RecurrenceError, Result};
pub use expand::{expand, ExpandOptions, RecurringResult, RecurringResults};
pub use lookup::{date_to_position, position_to_date};
pub use rule::{
    ExceptionSet, RecurrenceKind, RecurrenceRule, WeekdaySelector, WeekdaySet,
};
pub use validate::validate;
