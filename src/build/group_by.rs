//! Group-by clause building
//!
//! A parsed group-by clause is one variant of the closed
//! [`GroupByClauseNode`] enum; building is a single exhaustive match, so an
//! unrecognized shape cannot reach the orchestrator. Time-term validation
//! (no mixing bucket counts or months with other units) happens here.

use crate::ast::expr::{AggregateFilter, AggregateMetric, DocFilter, DocMetric, Term};
use crate::ast::group_by::{
    GroupBy, GroupByDayOfWeek, GroupByField, GroupByFieldIn, GroupByFieldInQuery,
    GroupByInferredTime, GroupByMetric, GroupByMonth, GroupByPredicate, GroupByQuantiles,
    GroupByRandom, GroupByRandomMetric, GroupBySessionName, GroupByTime, GroupByTimeBuckets,
};
use crate::ast::query::{GroupByEntry, Query, Span};
use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};
use crate::metadata::FieldSet;
use crate::time::units::TimeUnit;

/// A parsed group-by clause shape
#[derive(Debug, Clone, PartialEq)]
pub enum GroupByClauseNode {
    /// Bucket a metric into [min, max) by interval
    Metric {
        metric: DocMetric,
        min: i64,
        max: i64,
        interval: i64,
        exclude_gutters: bool,
    },
    /// Time bucketing by explicit (coefficient, unit) terms
    Time {
        terms: Vec<(i64, TimeUnit)>,
        field: Option<FieldSet>,
        format: Option<String>,
        relative: bool,
    },
    /// Time bucketing with no explicit period
    InferredTime { relative: bool },
    /// All observed terms of a field, optionally top-K
    Field {
        field: FieldSet,
        filter: Option<AggregateFilter>,
        limit: Option<u64>,
        metric: Option<AggregateMetric>,
        with_default: bool,
    },
    /// An explicit term set
    FieldIn {
        field: FieldSet,
        terms: Vec<Term>,
        with_default: bool,
    },
    /// Term set from a correlated subquery
    FieldInQuery {
        query: Box<Query>,
        field: FieldSet,
        negated: bool,
    },
    /// Day-of-week buckets; `explicit_call` is false for the bare legacy
    /// spelling
    DayOfWeek { explicit_call: bool },
    /// One bucket per dataset
    SessionName,
    /// N percentile buckets of a field
    Quantiles { field: FieldSet, buckets: u32 },
    /// Two-way split on a document filter
    Predicate { filter: DocFilter },
    /// Salted hash of a field into K buckets
    Random { field: FieldSet, k: u32, salt: String },
    /// Salted hash of a metric into K buckets
    RandomMetric { metric: DocMetric, k: u32, salt: String },
}

/// A group-by clause with its HAVING filter and alias
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByClause {
    pub node: GroupByClauseNode,
    pub filter: Option<AggregateFilter>,
    pub alias: Option<String>,
    pub span: Span,
}

impl GroupByClause {
    pub fn new(node: GroupByClauseNode) -> Self {
        Self { node, filter: None, alias: None, span: Span::default() }
    }

    pub fn having(mut self, filter: AggregateFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Build a [`GroupBy`] from a clause shape
pub fn build_group_by(
    node: &GroupByClauseNode,
    ctx: &CompileContext<'_>,
) -> CompileResult<GroupBy> {
    match node {
        GroupByClauseNode::Metric { metric, min, max, interval, exclude_gutters } => {
            Ok(GroupBy::Metric(GroupByMetric {
                metric: metric.clone(),
                min: *min,
                max: *max,
                interval: *interval,
                exclude_gutters: *exclude_gutters,
                with_default: false,
            }))
        }
        GroupByClauseNode::Time { terms, field, format, relative } => {
            group_by_from_time_terms(terms, field.clone(), format.clone(), *relative)
        }
        GroupByClauseNode::InferredTime { relative } => {
            Ok(GroupBy::InferredTime(GroupByInferredTime { relative: *relative }))
        }
        GroupByClauseNode::Field { field, filter, limit, metric, with_default } => {
            Ok(GroupBy::Field(GroupByField {
                field: field.clone(),
                filter: filter.clone(),
                limit: *limit,
                metric: metric.clone(),
                with_default: *with_default,
                force_non_streaming: false,
            }))
        }
        GroupByClauseNode::FieldIn { field, terms, with_default } => Ok(GroupBy::FieldIn(
            GroupByFieldIn::new(field.clone(), terms.clone(), *with_default)?,
        )),
        GroupByClauseNode::FieldInQuery { query, field, negated } => {
            Ok(GroupBy::FieldInQuery(GroupByFieldInQuery {
                query: query.clone(),
                field: field.clone(),
                negated: *negated,
            }))
        }
        GroupByClauseNode::DayOfWeek { explicit_call } => {
            if !explicit_call {
                ctx.warnings.warn(
                    "bare day-of-week grouping is deprecated; use dayofweek()",
                );
            }
            Ok(GroupBy::DayOfWeek(GroupByDayOfWeek))
        }
        GroupByClauseNode::SessionName => Ok(GroupBy::SessionName(GroupBySessionName)),
        GroupByClauseNode::Quantiles { field, buckets } => Ok(GroupBy::Quantiles(
            GroupByQuantiles { field: field.clone(), buckets: *buckets },
        )),
        GroupByClauseNode::Predicate { filter } => {
            Ok(GroupBy::Predicate(GroupByPredicate { filter: filter.clone() }))
        }
        GroupByClauseNode::Random { field, k, salt } => Ok(GroupBy::Random(GroupByRandom {
            field: field.clone(),
            k: *k,
            salt: salt.clone(),
        })),
        GroupByClauseNode::RandomMetric { metric, k, salt } => {
            Ok(GroupBy::RandomMetric(GroupByRandomMetric {
                metric: metric.clone(),
                k: *k,
                salt: salt.clone(),
            }))
        }
    }
}

/// Build a full group-by entry from its clause
pub fn build_group_by_entry(
    clause: &GroupByClause,
    ctx: &CompileContext<'_>,
) -> CompileResult<GroupByEntry> {
    Ok(GroupByEntry {
        group_by: build_group_by(&clause.node, ctx)?,
        filter: clause.filter.clone(),
        alias: clause.alias.clone(),
        span: clause.span,
    })
}

/// Turn a (coefficient, unit) term list into a time grouping
///
/// A `Buckets` term must stand alone; `Month` must stand alone with
/// coefficient 1 (becoming a calendar-month grouping); everything else is
/// summed as milliseconds.
pub fn group_by_from_time_terms(
    terms: &[(i64, TimeUnit)],
    field: Option<FieldSet>,
    format: Option<String>,
    relative: bool,
) -> CompileResult<GroupBy> {
    if terms.is_empty() {
        return Err(CompileError::InvalidTimeBucket("empty time period".to_string()));
    }

    if terms.iter().any(|(_, unit)| *unit == TimeUnit::Buckets) {
        if terms.len() > 1 {
            return Err(CompileError::InvalidTimeBucket(
                "can't mix bucket counts with other time units".to_string(),
            ));
        }
        let (count, _) = terms[0];
        return Ok(GroupBy::TimeBuckets(GroupByTimeBuckets { buckets: count, relative }));
    }

    if terms.iter().any(|(_, unit)| *unit == TimeUnit::Month) {
        if terms.len() > 1 {
            return Err(CompileError::InvalidTimeBucket(
                "can't mix months with other time units".to_string(),
            ));
        }
        let (coeff, _) = terms[0];
        if coeff != 1 {
            return Err(CompileError::InvalidTimeBucket(
                "month groupings must use a single month".to_string(),
            ));
        }
        return Ok(GroupBy::Month(GroupByMonth));
    }

    let mut period_millis = 0i64;
    for &(coeff, unit) in terms {
        // Checked above: only fixed-length units remain
        period_millis = coeff
            .checked_mul(unit.millis().unwrap_or(0))
            .and_then(|term| period_millis.checked_add(term))
            .ok_or_else(|| {
                CompileError::InvalidTimeBucket(format!("{coeff}{unit} is out of range"))
            })?;
    }
    if period_millis <= 0 {
        return Err(CompileError::InvalidTimeBucket("zero-length time period".to_string()));
    }
    Ok(GroupBy::Time(GroupByTime { period_millis, field, format, relative }))
}
