//! Execution steps and runtime commands
//!
//! An [`ExecutionStep`] is one logical operation the pass pipeline reasons
//! about; a [`Command`] is one opaque operation the runtime consumes. Steps
//! flatten into commands at the very end of compilation. Nothing here is
//! executed: these are in-process values handed to the execution runtime.

use crate::ast::expr::{AggregateFilter, AggregateMetric, DocFilter, DocMetric, Term};
use crate::error::{CompileError, CompileResult};
use crate::metadata::{DatasetsMetadata, FieldSet, FieldType};
use serde::Serialize;
use std::collections::BTreeMap;

/// A value that must be computed in an earlier execution phase than the
/// step that consumes it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Precomputed {
    /// Per-group percentile of a field
    Percentile { field: FieldSet, percentile: f64 },
    /// Per-group distinct-term count of a field
    Distinct {
        field: FieldSet,
        having: Option<AggregateFilter>,
    },
}

/// One logical operation in the lowered plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExecutionStep {
    /// Intersect the document set with a filter
    FilterDocs { filter: DocFilter },
    /// Explode groups by a per-dataset metric into [min, max) buckets
    ExplodeMetric {
        per_dataset: BTreeMap<String, DocMetric>,
        min: i64,
        max: i64,
        interval: i64,
        exclude_gutters: bool,
        with_default: bool,
    },
    /// Explode groups into fixed-period time buckets
    ExplodeTime {
        period_millis: i64,
        field: Option<FieldSet>,
        format: Option<String>,
        relative: bool,
    },
    /// Explode groups into calendar-month buckets
    ExplodeMonths,
    /// Explode groups by an explicit term set
    ExplodeFieldIn {
        field: FieldSet,
        terms: Vec<Term>,
        with_default: bool,
    },
    /// Explode groups by every observed term of a field
    ExplodeField {
        field: FieldSet,
        filter: Option<AggregateFilter>,
        limit: Option<u64>,
        metric: Option<AggregateMetric>,
        with_default: bool,
        force_non_streaming: bool,
    },
    /// Explode groups into seven day-of-week buckets
    ExplodeDayOfWeek,
    /// One bucket per dataset
    ExplodeSessionNames { names: Vec<String> },
    /// Split a field into N percentile buckets
    ExplodePerDocPercentile { field: FieldSet, buckets: u32 },
    /// Salted hash of a field into K buckets
    ExplodeRandom { field: FieldSet, k: u32, salt: String },
    /// Salted hash of a metric value into K buckets
    ExplodeRandomMetric {
        per_dataset: BTreeMap<String, DocMetric>,
        k: u32,
        salt: String,
    },
    /// Drop groups failing a post-aggregation filter
    FilterGroups { filter: AggregateFilter },
    /// Compute a named value for later lookup
    ComputePrecomputed { name: String, computation: Precomputed },
    /// Evaluate the select list over the current groups
    GetGroupStats {
        metrics: Vec<AggregateMetric>,
        format_strings: Vec<Option<String>>,
        fetch_limit: Option<usize>,
    },
    /// Streaming fusion of a field explosion with the select evaluation
    IterateField {
        field: FieldSet,
        metrics: Vec<AggregateMetric>,
        format_strings: Vec<Option<String>>,
        fetch_limit: Option<usize>,
    },
}

/// One opaque operation for the execution runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    ApplyFilter {
        filter: DocFilter,
    },
    MetricRegroup {
        per_dataset: BTreeMap<String, DocMetric>,
        min: i64,
        max: i64,
        interval: i64,
        exclude_gutters: bool,
        with_default: bool,
    },
    TimeRegroup {
        period_millis: i64,
        field: Option<FieldSet>,
        format: Option<String>,
        relative: bool,
    },
    MonthRegroup,
    IntRegroupFieldIn {
        field: FieldSet,
        terms: Vec<i64>,
        with_default: bool,
    },
    StringRegroupFieldIn {
        field: FieldSet,
        terms: Vec<String>,
        with_default: bool,
    },
    FieldRegroup {
        field: FieldSet,
        filter: Option<AggregateFilter>,
        limit: Option<u64>,
        metric: Option<AggregateMetric>,
        with_default: bool,
    },
    DayOfWeekRegroup,
    SessionNameRegroup {
        names: Vec<String>,
    },
    PercentileRegroup {
        field: FieldSet,
        buckets: u32,
    },
    RandomRegroup {
        field: FieldSet,
        k: u32,
        salt: String,
    },
    RandomMetricRegroup {
        per_dataset: BTreeMap<String, DocMetric>,
        k: u32,
        salt: String,
    },
    FilterGroups {
        filter: AggregateFilter,
    },
    ComputePercentile {
        name: String,
        field: FieldSet,
        percentile: f64,
    },
    ComputeDistinct {
        name: String,
        field: FieldSet,
        having: Option<AggregateFilter>,
    },
    GetGroupStats {
        metrics: Vec<AggregateMetric>,
        format_strings: Vec<Option<String>>,
        fetch_limit: Option<usize>,
    },
    SimpleIterate {
        field: FieldSet,
        metrics: Vec<AggregateMetric>,
        format_strings: Vec<Option<String>>,
        fetch_limit: Option<usize>,
    },
}

impl ExecutionStep {
    /// Flatten this step into the commands the runtime consumes
    pub fn commands(&self, meta: &dyn DatasetsMetadata) -> CompileResult<Vec<Command>> {
        let command = match self {
            Self::FilterDocs { filter } => Command::ApplyFilter { filter: filter.clone() },
            Self::ExplodeMetric {
                per_dataset,
                min,
                max,
                interval,
                exclude_gutters,
                with_default,
            } => Command::MetricRegroup {
                per_dataset: per_dataset.clone(),
                min: *min,
                max: *max,
                interval: *interval,
                exclude_gutters: *exclude_gutters,
                with_default: *with_default,
            },
            Self::ExplodeTime { period_millis, field, format, relative } => Command::TimeRegroup {
                period_millis: *period_millis,
                field: field.clone(),
                format: format.clone(),
                relative: *relative,
            },
            Self::ExplodeMonths => Command::MonthRegroup,
            Self::ExplodeFieldIn { field, terms, with_default } => {
                field_in_command(field, terms, *with_default, meta)?
            }
            Self::ExplodeField { field, filter, limit, metric, with_default, .. } => {
                Command::FieldRegroup {
                    field: field.clone(),
                    filter: filter.clone(),
                    limit: *limit,
                    metric: metric.clone(),
                    with_default: *with_default,
                }
            }
            Self::ExplodeDayOfWeek => Command::DayOfWeekRegroup,
            Self::ExplodeSessionNames { names } => {
                Command::SessionNameRegroup { names: names.clone() }
            }
            Self::ExplodePerDocPercentile { field, buckets } => Command::PercentileRegroup {
                field: field.clone(),
                buckets: *buckets,
            },
            Self::ExplodeRandom { field, k, salt } => Command::RandomRegroup {
                field: field.clone(),
                k: *k,
                salt: salt.clone(),
            },
            Self::ExplodeRandomMetric { per_dataset, k, salt } => Command::RandomMetricRegroup {
                per_dataset: per_dataset.clone(),
                k: *k,
                salt: salt.clone(),
            },
            Self::FilterGroups { filter } => Command::FilterGroups { filter: filter.clone() },
            Self::ComputePrecomputed { name, computation } => match computation {
                Precomputed::Percentile { field, percentile } => Command::ComputePercentile {
                    name: name.clone(),
                    field: field.clone(),
                    percentile: *percentile,
                },
                Precomputed::Distinct { field, having } => Command::ComputeDistinct {
                    name: name.clone(),
                    field: field.clone(),
                    having: having.clone(),
                },
            },
            Self::GetGroupStats { metrics, format_strings, fetch_limit } => {
                Command::GetGroupStats {
                    metrics: metrics.clone(),
                    format_strings: format_strings.clone(),
                    fetch_limit: *fetch_limit,
                }
            }
            Self::IterateField { field, metrics, format_strings, fetch_limit } => {
                Command::SimpleIterate {
                    field: field.clone(),
                    metrics: metrics.clone(),
                    format_strings: format_strings.clone(),
                    fetch_limit: *fetch_limit,
                }
            }
        };
        Ok(vec![command])
    }
}

/// A field-in explosion lowers differently for integer and string fields
///
/// The field is integer-typed only when every dataset in scope says so;
/// unknown types are treated as string, the safe direction.
fn field_in_command(
    field: &FieldSet,
    terms: &[Term],
    with_default: bool,
    meta: &dyn DatasetsMetadata,
) -> CompileResult<Command> {
    let all_int = field.fields.iter().all(|(dataset, actual)| {
        meta.field_type(dataset, actual) == Some(FieldType::Int)
    });

    if all_int {
        let int_terms = terms
            .iter()
            .map(|t| {
                t.as_int().ok_or_else(|| {
                    CompileError::NonIntegerTerm(t.as_string(), field.name())
                })
            })
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Command::IntRegroupFieldIn {
            field: field.clone(),
            terms: int_terms,
            with_default,
        })
    } else {
        Ok(Command::StringRegroupFieldIn {
            field: field.clone(),
            terms: terms.iter().map(Term::as_string).collect(),
            with_default,
        })
    }
}
