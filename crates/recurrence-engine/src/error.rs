//! Error types for recurrence-engine operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecurrenceError {
    /// The persisted pattern string cannot be decoded (unknown key,
    /// unknown kind code, or a value that is not a number). Not
    /// auto-correctable.
    #[error("Malformed recurrence pattern: {0}")]
    MalformedPattern(String),

    /// Strict-validator rejection of a single field on user-submitted
    /// input. Carries the field name and the rejected value.
    #[error("Invalid recurrence field '{field}': {value}")]
    InvalidRuleField { field: &'static str, value: i64 },

    /// The rule has no start date, so it cannot be anchored.
    #[error("Recurrence rule has no start date")]
    MissingStartDate,

    /// No occurrence exists at the requested series position.
    #[error("No occurrence at position {0}")]
    PositionNotFound(u32),

    /// The given instant is not an occurrence of the series.
    #[error("Date {0} is not part of the series")]
    DateNotInSeries(i64),

    /// A single occurrence of a series cannot live in a different folder
    /// than its series root.
    #[error("A recurrence exception cannot be moved to another folder")]
    RecurringExceptionMoveNotAllowed,

    /// The update classifier reached a combination of submitted and
    /// stored state it has no transition for.
    #[error("Ambiguous recurrence update: {0}")]
    AmbiguousUpdateState(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

pub type Result<T> = std::result::Result<T, RecurrenceError>;
