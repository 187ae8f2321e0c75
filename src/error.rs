//! Compiler error types
//!
//! Defines all user-facing error conditions that can abort a compilation.
//! Programmer-invariant violations (e.g. an un-rewritten subquery grouping
//! reaching lowering) are panics, not variants here: they indicate a bug in
//! an earlier pass, not a bad query.

use thiserror::Error;

/// Errors that can occur while compiling a query
#[derive(Error, Debug)]
pub enum CompileError {
    /// Invalid time range (end not strictly after start, or missing)
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Two datasets in one query share a display name
    #[error("Duplicate dataset name: {0}")]
    DuplicateDatasetName(String),

    /// A field IN grouping was given no terms
    #[error("Empty term set for field {0}")]
    EmptyTermSet(String),

    /// Unsupported combination of time-bucket units
    #[error("Invalid time bucket: {0}")]
    InvalidTimeBucket(String),

    /// A date-time literal could not be parsed
    #[error("Unparseable date-time literal: {0}")]
    InvalidDateTime(String),

    /// A time-period expression could not be parsed
    #[error("Malformed time period: {0}")]
    InvalidTimePeriod(String),

    /// More than one time-zone specifier in a single query
    #[error("Multiple time zones specified in one query")]
    MultipleTimeZones,

    /// The same metric name was defined twice
    #[error("Duplicate metric name: {0}")]
    DuplicateMetricName(String),

    /// A reference to a metric name with no definition
    #[error("Unknown metric name: {0}")]
    UnknownMetricName(String),

    /// Named metric definitions reference each other in a cycle
    #[error("Circular metric definition involving: {0}")]
    CircularMetricDefinition(String),

    /// A field name did not resolve in the current scope
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// A dataset name did not resolve
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// A term cannot be used against an integer-typed field
    #[error("Term '{0}' is not valid for integer field {1}")]
    NonIntegerTerm(String, String),
}

/// Result type for compiler operations
pub type CompileResult<T> = Result<T, CompileError>;
