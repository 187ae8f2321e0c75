//! Whole-query building
//!
//! Assembles a [`Query`] from its parsed clauses: resolves each dataset
//! (threading the first dataset's range into partial entries), collapses
//! same-field OR chains into term sets, conjoins all WHERE filters, and
//! checks query-wide constraints like the single-time-zone rule.

use crate::ast::expr::{AggregateMetric, DocFilter, Term};
use crate::ast::query::{Query, SelectItem, Span};
use crate::build::dataset::{build_dataset, DatasetClause};
use crate::build::group_by::{build_group_by_entry, GroupByClause};
use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};
use crate::metadata::{FieldResolver, FieldSet};
use chrono::FixedOffset;

/// One parsed select expression
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    pub metric: AggregateMetric,
    pub format_string: Option<String>,
}

impl SelectClause {
    pub fn new(metric: AggregateMetric) -> Self {
        Self { metric, format_string: None }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format_string = Some(format.into());
        self
    }
}

/// A whole parsed query, pre-resolution
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryClause {
    pub datasets: Vec<DatasetClause>,
    /// WHERE filters, implicitly conjoined
    pub filters: Vec<DocFilter>,
    pub group_bys: Vec<GroupByClause>,
    pub selects: Vec<SelectClause>,
    pub options: Vec<String>,
    /// Every time-zone specifier that appeared anywhere in the query
    pub time_zones: Vec<FixedOffset>,
    pub row_limit: Option<usize>,
    pub span: Span,
}

/// Build a resolved [`Query`] from its clauses
pub fn build_query(
    clause: &QueryClause,
    ctx: &CompileContext<'_>,
    resolver: &dyn FieldResolver,
) -> CompileResult<Query> {
    let mut zones = clause.time_zones.clone();
    zones.dedup();
    if zones.len() > 1 {
        return Err(CompileError::MultipleTimeZones);
    }
    let tz = zones.first().copied().unwrap_or(ctx.tz);
    let ctx = CompileContext {
        clock: ctx.clock,
        warnings: ctx.warnings,
        period_parser: ctx.period_parser,
        tz,
        legacy: ctx.legacy,
    };

    let mut datasets = Vec::with_capacity(clause.datasets.len());
    let mut filters = rewrite_multi_term_in(clause.filters.clone());
    for dataset_clause in &clause.datasets {
        let (dataset, local_filter) =
            build_dataset(dataset_clause, &ctx, resolver, datasets.first())?;
        if let Some(local_filter) = local_filter {
            filters.push(local_filter);
        }
        datasets.push(dataset);
    }

    let mut group_bys = Vec::with_capacity(clause.group_bys.len());
    for group_by_clause in &clause.group_bys {
        group_bys.push(build_group_by_entry(group_by_clause, &ctx)?);
    }

    let mut builder = Query::builder()
        .datasets(datasets)
        .filter_opt(DocFilter::and_all(filters))
        .legacy(ctx.legacy)
        .tz(tz)
        .span(clause.span);
    for group_by in group_bys {
        builder = builder.group_by(group_by);
    }
    for select in &clause.selects {
        builder = builder.select(SelectItem {
            metric: select.metric.clone(),
            format_string: select.format_string.clone(),
        });
    }
    for option in &clause.options {
        builder = builder.option(option.clone());
    }
    if let Some(limit) = clause.row_limit {
        builder = builder.row_limit(limit);
    }
    builder.build()
}

/// Collapse OR chains of equality tests on a single field into term-set
/// membership
///
/// `f = a OR f = b OR f = c` and a term-set filter are run the same way on
/// the shards, but the term-set form regroups once instead of three times.
/// Filters the rewrite does not apply to are carried through into the new
/// list unchanged.
pub fn rewrite_multi_term_in(filters: Vec<DocFilter>) -> Vec<DocFilter> {
    filters
        .into_iter()
        .map(|filter| match collect_or_terms(&filter) {
            Some((field, terms)) if terms.len() > 1 => DocFilter::FieldInTerms {
                field,
                terms,
                negated: false,
            },
            _ => filter,
        })
        .collect()
}

/// If `filter` is an OR chain whose every leaf is `FieldIs` on one field,
/// return that field and the leaf terms in left-to-right order.
fn collect_or_terms(filter: &DocFilter) -> Option<(FieldSet, Vec<Term>)> {
    match filter {
        DocFilter::FieldIs { field, term } => Some((field.clone(), vec![term.clone()])),
        DocFilter::Or(lhs, rhs) => {
            let (left_field, mut terms) = collect_or_terms(lhs)?;
            let (right_field, right_terms) = collect_or_terms(rhs)?;
            if left_field != right_field {
                return None;
            }
            terms.extend(right_terms);
            Some((left_field, terms))
        }
        _ => None,
    }
}
