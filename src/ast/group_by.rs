//! Group-by nodes and their lowering
//!
//! `GroupBy` is a closed sum type: one variant per way a query can explode
//! groups. Every variant answers two questions the planner cares about:
//!
//! - `is_total()`: do its buckets jointly account for every matching
//!   document? (needed to compute grand totals safely)
//! - `execution_step(..)`: what single step does it lower to?
//!
//! `GroupBy::FieldInQuery` is a placeholder for a correlated subquery; the
//! subquery-rewrite pass must have replaced it before any of these are
//! called, so all three operations panic on it.

use crate::ast::expr::{AggregateFilter, AggregateMetric, DocFilter, DocMetric, Term};
use crate::ast::query::{Dataset, Query};
use crate::error::{CompileError, CompileResult};
use crate::metadata::FieldSet;
use crate::plan::ExecutionStep;
use crate::time::units::infer_bucket_millis;
use serde::Serialize;
use std::collections::BTreeMap;

/// Bucket a per-document metric into `[min, max)` by fixed interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByMetric {
    pub metric: DocMetric,
    pub min: i64,
    pub max: i64,
    pub interval: i64,
    /// Drop documents outside `[min, max)` instead of keeping gutter buckets
    pub exclude_gutters: bool,
    /// Merge out-of-range documents into a single default bucket
    pub with_default: bool,
}

/// Fixed-period time buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByTime {
    pub period_millis: i64,
    /// Explicit time field, when not the shard timestamp
    pub field: Option<FieldSet>,
    /// Display format for bucket labels
    pub format: Option<String>,
    /// Bucket against each dataset's own start instead of the calendar
    pub relative: bool,
}

/// Time buckets with the period inferred from the dataset span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByInferredTime {
    pub relative: bool,
}

/// A fixed number of time buckets; period derived from the span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByTimeBuckets {
    pub buckets: i64,
    pub relative: bool,
}

/// Calendar-month buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByMonth;

/// An explicit term set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByFieldIn {
    pub field: FieldSet,
    pub terms: Vec<Term>,
    /// Keep an "everything else" bucket
    pub with_default: bool,
}

impl GroupByFieldIn {
    /// Construct, rejecting an empty term set
    pub fn new(field: FieldSet, terms: Vec<Term>, with_default: bool) -> CompileResult<Self> {
        if terms.is_empty() {
            return Err(CompileError::EmptyTermSet(field.name()));
        }
        Ok(Self { field, terms, with_default })
    }
}

/// Term set supplied by a correlated subquery; must be rewritten away
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByFieldInQuery {
    pub query: Box<Query>,
    pub field: FieldSet,
    pub negated: bool,
}

/// Group by all observed terms of a field, optionally top-K
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByField {
    pub field: FieldSet,
    /// Filter applied to candidate terms before any limit
    pub filter: Option<AggregateFilter>,
    /// Keep only this many terms
    pub limit: Option<u64>,
    /// Ordering metric for the limit
    pub metric: Option<AggregateMetric>,
    pub with_default: bool,
    /// Disallow fusing this explosion with a streaming iterate
    pub force_non_streaming: bool,
}

impl GroupByField {
    /// Plain grouping over a field: no filter, no limit
    pub fn unlimited(field: FieldSet) -> Self {
        Self {
            field,
            filter: None,
            limit: None,
            metric: None,
            with_default: false,
            force_non_streaming: false,
        }
    }

    /// Top-K grouping: both a result limit and an ordering metric present
    pub fn is_top_k(&self) -> bool {
        self.limit.is_some() && self.metric.is_some()
    }
}

/// One bucket per day of week
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByDayOfWeek;

/// One bucket per dataset in the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupBySessionName;

/// Split a field's documents into N percentile buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByQuantiles {
    pub field: FieldSet,
    pub buckets: u32,
}

/// Two-way split on a boolean document filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByPredicate {
    pub filter: DocFilter,
}

/// Salted hash of a field's term into K buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByRandom {
    pub field: FieldSet,
    pub k: u32,
    pub salt: String,
}

/// Salted hash of a per-document metric value into K buckets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByRandomMetric {
    pub metric: DocMetric,
    pub k: u32,
    pub salt: String,
}

/// A group-by clause, one of fourteen mutually exclusive shapes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GroupBy {
    Metric(GroupByMetric),
    Time(GroupByTime),
    InferredTime(GroupByInferredTime),
    TimeBuckets(GroupByTimeBuckets),
    Month(GroupByMonth),
    FieldIn(GroupByFieldIn),
    FieldInQuery(GroupByFieldInQuery),
    Field(GroupByField),
    DayOfWeek(GroupByDayOfWeek),
    SessionName(GroupBySessionName),
    Quantiles(GroupByQuantiles),
    Predicate(GroupByPredicate),
    Random(GroupByRandom),
    RandomMetric(GroupByRandomMetric),
}

const FIELD_IN_QUERY_INVARIANT: &str =
    "GroupBy::FieldInQuery must be rewritten into FieldIn/Field before use";

impl GroupBy {
    /// Whether this grouping's buckets account for all matching documents
    pub fn is_total(&self) -> bool {
        match self {
            Self::Metric(g) => !g.exclude_gutters || g.with_default,
            Self::FieldIn(g) => g.with_default,
            Self::Field(g) => {
                g.with_default || (g.filter.is_none() && g.limit.is_none())
            }
            Self::FieldInQuery(_) => panic!("{FIELD_IN_QUERY_INVARIANT}"),
            // Every document has a timestamp, a dataset, a hash and a
            // truth value for a predicate
            Self::Time(_)
            | Self::InferredTime(_)
            | Self::TimeBuckets(_)
            | Self::Month(_)
            | Self::DayOfWeek(_)
            | Self::SessionName(_)
            | Self::Quantiles(_)
            | Self::Predicate(_)
            | Self::Random(_)
            | Self::RandomMetric(_) => true,
        }
    }

    /// An equivalent grouping guaranteed total, forcing a default bucket
    /// where needed
    pub fn make_total(self) -> GroupBy {
        match self {
            Self::Metric(g) if !(!g.exclude_gutters || g.with_default) => {
                Self::Metric(GroupByMetric { with_default: true, ..g })
            }
            Self::FieldIn(g) if !g.with_default => {
                Self::FieldIn(GroupByFieldIn { with_default: true, ..g })
            }
            Self::Field(g) if !(g.with_default || (g.filter.is_none() && g.limit.is_none())) => {
                Self::Field(GroupByField { with_default: true, ..g })
            }
            Self::FieldInQuery(_) => panic!("{FIELD_IN_QUERY_INVARIANT}"),
            other => other,
        }
    }

    /// Lower this grouping into its execution step
    ///
    /// Pure: produces a value, executes nothing. `datasets` is the scope of
    /// the enclosing query, in declaration order.
    pub fn execution_step(&self, datasets: &[Dataset]) -> CompileResult<ExecutionStep> {
        match self {
            Self::Metric(g) => Ok(ExecutionStep::ExplodeMetric {
                per_dataset: replicate_metric(&g.metric, datasets),
                min: g.min,
                max: g.max,
                interval: g.interval,
                exclude_gutters: g.exclude_gutters,
                with_default: g.with_default,
            }),
            Self::Time(g) => Ok(ExecutionStep::ExplodeTime {
                period_millis: g.period_millis,
                field: g.field.clone(),
                format: g.format.clone(),
                relative: g.relative,
            }),
            Self::InferredTime(g) => {
                let (earliest, latest, longest) = time_bounds(datasets);
                Ok(ExecutionStep::ExplodeTime {
                    period_millis: infer_bucket_millis(earliest, latest, longest, g.relative),
                    field: None,
                    format: None,
                    relative: g.relative,
                })
            }
            Self::TimeBuckets(g) => {
                let (earliest, latest, longest) = time_bounds(datasets);
                let span = if g.relative { longest } else { latest - earliest };
                let buckets = g.buckets.max(1);
                // Round up so `buckets` buckets always cover the span
                let period = (span + buckets - 1) / buckets;
                Ok(ExecutionStep::ExplodeTime {
                    period_millis: period.max(1),
                    field: None,
                    format: None,
                    relative: g.relative,
                })
            }
            Self::Month(_) => Ok(ExecutionStep::ExplodeMonths),
            Self::FieldIn(g) => {
                if g.terms.is_empty() {
                    return Err(CompileError::EmptyTermSet(g.field.name()));
                }
                Ok(ExecutionStep::ExplodeFieldIn {
                    field: g.field.clone(),
                    terms: g.terms.clone(),
                    with_default: g.with_default,
                })
            }
            Self::FieldInQuery(_) => panic!("{FIELD_IN_QUERY_INVARIANT}"),
            Self::Field(g) => Ok(ExecutionStep::ExplodeField {
                field: g.field.clone(),
                filter: g.filter.clone(),
                limit: g.limit,
                metric: g.metric.clone(),
                with_default: g.with_default,
                force_non_streaming: g.force_non_streaming,
            }),
            Self::DayOfWeek(_) => Ok(ExecutionStep::ExplodeDayOfWeek),
            Self::SessionName(_) => Ok(ExecutionStep::ExplodeSessionNames {
                names: datasets.iter().map(|d| d.display_name().to_string()).collect(),
            }),
            Self::Quantiles(g) => Ok(ExecutionStep::ExplodePerDocPercentile {
                field: g.field.clone(),
                buckets: g.buckets,
            }),
            Self::Predicate(g) => {
                // A boolean split is a metric explosion of if(filter, 1, 0)
                // into [0, 2) with interval 1
                let metric = DocMetric::IfThenElse {
                    cond: Box::new(g.filter.clone()),
                    then_metric: Box::new(DocMetric::Constant(1)),
                    else_metric: Box::new(DocMetric::Constant(0)),
                };
                Ok(ExecutionStep::ExplodeMetric {
                    per_dataset: replicate_metric(&metric, datasets),
                    min: 0,
                    max: 2,
                    interval: 1,
                    exclude_gutters: true,
                    with_default: false,
                })
            }
            Self::Random(g) => Ok(ExecutionStep::ExplodeRandom {
                field: g.field.clone(),
                k: g.k,
                salt: g.salt.clone(),
            }),
            Self::RandomMetric(g) => Ok(ExecutionStep::ExplodeRandomMetric {
                per_dataset: replicate_metric(&g.metric, datasets),
                k: g.k,
                salt: g.salt.clone(),
            }),
        }
    }
}

/// One metric expression replicated across every dataset in scope
fn replicate_metric(metric: &DocMetric, datasets: &[Dataset]) -> BTreeMap<String, DocMetric> {
    datasets
        .iter()
        .map(|d| (d.display_name().to_string(), metric.clone()))
        .collect()
}

/// (earliest start, latest end, longest single-dataset span), in millis
fn time_bounds(datasets: &[Dataset]) -> (i64, i64, i64) {
    let mut earliest = i64::MAX;
    let mut latest = i64::MIN;
    let mut longest = 0;
    for d in datasets {
        let start = d.start.timestamp_millis();
        let end = d.end.timestamp_millis();
        earliest = earliest.min(start);
        latest = latest.max(end);
        longest = longest.max(end - start);
    }
    if datasets.is_empty() {
        (0, 0, 0)
    } else {
        (earliest, latest, longest)
    }
}
