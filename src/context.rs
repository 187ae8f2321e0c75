//! Compilation context
//!
//! Compilation is a pure function of (parsed query, metadata, clock, warning
//! sink). Everything ambient — the clock, the query time zone, the legacy
//! flag, the period sub-parser, where warnings go — is carried in an explicit
//! `CompileContext` value rather than process-global state.

use crate::metadata::FieldSet;
use crate::time::units::PeriodParser;
use chrono::{DateTime, FixedOffset, Utc};
use std::rc::Rc;

/// An injected clock, making "now"-relative parsing deterministic
pub trait WallClock {
    /// Current Unix time in milliseconds
    fn current_time_millis(&self) -> i64;
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn current_time_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock frozen at a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl WallClock for FixedClock {
    fn current_time_millis(&self) -> i64 {
        self.0
    }
}

/// Sink for non-fatal warnings (deprecated syntax and the like)
pub trait WarningSink {
    /// Report one warning
    fn warn(&self, message: &str);
}

/// Default sink: forwards warnings to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWarnings;

impl WarningSink for TracingWarnings {
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Ambient state for one compilation
pub struct CompileContext<'a> {
    /// Source of "now" for relative time words
    pub clock: &'a dyn WallClock,
    /// Where non-fatal warnings go
    pub warnings: &'a dyn WarningSink,
    /// Parser for time-period expressions like "1d 6h"
    pub period_parser: &'a dyn PeriodParser,
    /// Time zone all instants in this query resolve in
    pub tz: FixedOffset,
    /// Compatibility flag for the older query-language version
    pub legacy: bool,
}

impl<'a> CompileContext<'a> {
    /// Create a context with legacy mode off
    pub fn new(
        clock: &'a dyn WallClock,
        warnings: &'a dyn WarningSink,
        period_parser: &'a dyn PeriodParser,
        tz: FixedOffset,
    ) -> Self {
        Self {
            clock,
            warnings,
            period_parser,
            tz,
            legacy: false,
        }
    }

    /// Set the legacy-compatibility flag
    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// The current instant in the query time zone
    pub fn now(&self) -> DateTime<FixedOffset> {
        DateTime::from_timestamp_millis(self.clock.current_time_millis())
            .unwrap_or(DateTime::UNIX_EPOCH)
            .with_timezone(&self.tz)
    }
}

/// A marker describing what kind of scope parsing has entered
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeMarker {
    /// Inside a grouping over a field
    Field(FieldSet),
    /// Inside a metric expression
    Metric,
    /// Inside a per-dataset (session) grouping
    Session,
}

/// A persistent stack of scope markers
///
/// Pushed when parsing enters a group-by or select scope and consulted for
/// aggregation legality. Never mutated: `push` returns a new stack sharing
/// its tail with the old one.
#[derive(Debug, Clone, Default)]
pub struct AggregateContext {
    head: Option<Rc<ScopeNode>>,
}

#[derive(Debug)]
struct ScopeNode {
    marker: ScopeMarker,
    parent: Option<Rc<ScopeNode>>,
}

impl AggregateContext {
    /// The empty stack
    pub fn empty() -> Self {
        Self::default()
    }

    /// Return a new stack with `marker` on top
    pub fn push(&self, marker: ScopeMarker) -> Self {
        Self {
            head: Some(Rc::new(ScopeNode {
                marker,
                parent: self.head.clone(),
            })),
        }
    }

    /// Markers from innermost to outermost
    pub fn iter(&self) -> impl Iterator<Item = &ScopeMarker> {
        std::iter::successors(self.head.as_deref(), |node| node.parent.as_deref())
            .map(|node| &node.marker)
    }

    /// Number of enclosing scopes
    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    /// Whether the stack is empty
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}
