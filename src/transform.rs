//! Generic bottom-up rewrite protocol
//!
//! Every optimization pass is written against [`Rewrite`]: one rule set with
//! a method per node kind, all defaulting to identity. [`Transform`] walks a
//! node bottom-up — children first, rebuild, then the rule for the node's
//! own kind — and copies source spans onto rebuilt nodes.
//!
//! Two deliberate holes: transforms never descend into the query embedded in
//! `DocFilter::FieldInQuery` or `GroupBy::FieldInQuery` (a pass that needs
//! correlated subqueries must recurse into them explicitly), and
//! `GroupBy::traverse1` rewrites aggregate metrics only one level deep for
//! passes that must not touch nested groupings.

use crate::ast::expr::{AggregateFilter, AggregateMetric, DocFilter, DocMetric};
use crate::ast::group_by::{
    GroupBy, GroupByField, GroupByMetric, GroupByPredicate, GroupByRandomMetric,
};
use crate::ast::query::{GroupByEntry, Query, SelectItem};
use crate::error::CompileResult;

/// A rewrite rule set: one rule per node kind, identity by default
///
/// Rules take `&mut self` so a pass can accumulate state (collected names,
/// counters) while rewriting.
pub trait Rewrite {
    fn group_by(&mut self, g: GroupBy) -> CompileResult<GroupBy> {
        Ok(g)
    }

    fn aggregate_metric(&mut self, m: AggregateMetric) -> CompileResult<AggregateMetric> {
        Ok(m)
    }

    fn doc_metric(&mut self, m: DocMetric) -> CompileResult<DocMetric> {
        Ok(m)
    }

    fn aggregate_filter(&mut self, f: AggregateFilter) -> CompileResult<AggregateFilter> {
        Ok(f)
    }

    fn doc_filter(&mut self, f: DocFilter) -> CompileResult<DocFilter> {
        Ok(f)
    }
}

/// A node that can rebuild itself through a rule set
pub trait Transform: Sized {
    /// Rewrite bottom-up: children first, then this node's own rule
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self>;
}

fn transform_box<T: Transform, R: Rewrite + ?Sized>(
    node: &T,
    rules: &mut R,
) -> CompileResult<Box<T>> {
    Ok(Box::new(node.transform(rules)?))
}

impl Transform for DocMetric {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        let rebuilt = match self {
            Self::Field(_) | Self::Count | Self::Constant(_) => self.clone(),
            Self::Add(a, b) => Self::Add(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Subtract(a, b) => {
                Self::Subtract(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::Multiply(a, b) => {
                Self::Multiply(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::Divide(a, b) => {
                Self::Divide(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::Min(a, b) => Self::Min(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Max(a, b) => Self::Max(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Negate(a) => Self::Negate(transform_box(&**a, rules)?),
            Self::IfThenElse { cond, then_metric, else_metric } => Self::IfThenElse {
                cond: transform_box(&**cond, rules)?,
                then_metric: transform_box(&**then_metric, rules)?,
                else_metric: transform_box(&**else_metric, rules)?,
            },
        };
        rules.doc_metric(rebuilt)
    }
}

impl Transform for DocFilter {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        let rebuilt = match self {
            Self::FieldIs { .. }
            | Self::FieldIsnt { .. }
            | Self::FieldInTerms { .. }
            | Self::Regex { .. }
            | Self::Always
            | Self::Never => self.clone(),
            // The embedded query is deliberately not descended into
            Self::FieldInQuery { .. } => self.clone(),
            Self::MetricEq(a, b) => {
                Self::MetricEq(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::MetricGt(a, b) => {
                Self::MetricGt(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::MetricLt(a, b) => {
                Self::MetricLt(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::And(a, b) => Self::And(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Or(a, b) => Self::Or(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Not(a) => Self::Not(transform_box(&**a, rules)?),
            Self::Qualified { scope, inner } => Self::Qualified {
                scope: scope.clone(),
                inner: transform_box(&**inner, rules)?,
            },
        };
        rules.doc_filter(rebuilt)
    }
}

impl Transform for AggregateMetric {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        let rebuilt = match self {
            Self::Constant(_)
            | Self::NameRef(_)
            | Self::GroupStatsLookup(_)
            | Self::Percentile { .. } => self.clone(),
            Self::DocStats(m) => Self::DocStats(transform_box(&**m, rules)?),
            Self::Named { inner, name } => Self::Named {
                inner: transform_box(&**inner, rules)?,
                name: name.clone(),
            },
            Self::Add(a, b) => Self::Add(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Subtract(a, b) => {
                Self::Subtract(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::Multiply(a, b) => {
                Self::Multiply(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::Divide(a, b) => {
                Self::Divide(transform_box(&**a, rules)?, transform_box(&**b, rules)?)
            }
            Self::Negate(a) => Self::Negate(transform_box(&**a, rules)?),
            Self::Distinct { field, having } => Self::Distinct {
                field: field.clone(),
                having: match having {
                    Some(f) => Some(transform_box(&**f, rules)?),
                    None => None,
                },
            },
            Self::Running(a) => Self::Running(transform_box(&**a, rules)?),
            Self::Parent(a) => Self::Parent(transform_box(&**a, rules)?),
        };
        rules.aggregate_metric(rebuilt)
    }
}

impl Transform for AggregateFilter {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        let rebuilt = match self {
            Self::TermIs(_) | Self::Regex(_) | Self::Always | Self::Never => self.clone(),
            Self::Is(a, b) => Self::Is(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Gt(a, b) => Self::Gt(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Gte(a, b) => Self::Gte(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Lt(a, b) => Self::Lt(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Lte(a, b) => Self::Lte(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::And(a, b) => Self::And(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Or(a, b) => Self::Or(transform_box(&**a, rules)?, transform_box(&**b, rules)?),
            Self::Not(a) => Self::Not(transform_box(&**a, rules)?),
        };
        rules.aggregate_filter(rebuilt)
    }
}

impl Transform for GroupBy {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        let rebuilt = match self {
            Self::Metric(g) => Self::Metric(GroupByMetric {
                metric: g.metric.transform(rules)?,
                ..g.clone()
            }),
            Self::Predicate(g) => Self::Predicate(GroupByPredicate {
                filter: g.filter.transform(rules)?,
            }),
            Self::Field(g) => Self::Field(GroupByField {
                field: g.field.clone(),
                filter: match &g.filter {
                    Some(f) => Some(f.transform(rules)?),
                    None => None,
                },
                limit: g.limit,
                metric: match &g.metric {
                    Some(m) => Some(m.transform(rules)?),
                    None => None,
                },
                with_default: g.with_default,
                force_non_streaming: g.force_non_streaming,
            }),
            Self::RandomMetric(g) => Self::RandomMetric(GroupByRandomMetric {
                metric: g.metric.transform(rules)?,
                k: g.k,
                salt: g.salt.clone(),
            }),
            // The embedded query is deliberately not descended into
            Self::FieldInQuery(_) => self.clone(),
            Self::Time(_)
            | Self::InferredTime(_)
            | Self::TimeBuckets(_)
            | Self::Month(_)
            | Self::FieldIn(_)
            | Self::DayOfWeek(_)
            | Self::SessionName(_)
            | Self::Quantiles(_)
            | Self::Random(_) => self.clone(),
        };
        rules.group_by(rebuilt)
    }
}

impl GroupBy {
    /// Rewrite aggregate metrics one level deep only
    ///
    /// For passes (like top-K rewriting) that must adjust a grouping's own
    /// ordering metric without recursing anywhere else. Behaviorally
    /// consistent with the `GroupBy::Field` branch of `transform`.
    pub fn traverse1(
        &self,
        f: &mut dyn FnMut(AggregateMetric) -> CompileResult<AggregateMetric>,
    ) -> CompileResult<GroupBy> {
        match self {
            Self::Field(g) => Ok(Self::Field(GroupByField {
                metric: match &g.metric {
                    Some(m) => Some(f(m.clone())?),
                    None => None,
                },
                ..g.clone()
            })),
            other => Ok(other.clone()),
        }
    }
}

impl Transform for GroupByEntry {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        Ok(Self {
            group_by: self.group_by.transform(rules)?,
            filter: match &self.filter {
                Some(f) => Some(f.transform(rules)?),
                None => None,
            },
            alias: self.alias.clone(),
            span: self.span,
        })
    }
}

impl Transform for SelectItem {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        Ok(Self {
            metric: self.metric.transform(rules)?,
            format_string: self.format_string.clone(),
        })
    }
}

impl Transform for Query {
    fn transform<R: Rewrite + ?Sized>(&self, rules: &mut R) -> CompileResult<Self> {
        let filter = match &self.filter {
            Some(f) => Some(f.transform(rules)?),
            None => None,
        };
        let group_bys = self
            .group_bys
            .iter()
            .map(|entry| entry.transform(rules))
            .collect::<CompileResult<Vec<_>>>()?;
        let selects = self
            .selects
            .iter()
            .map(|item| item.transform(rules))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(self.rebuilt(filter, group_bys, selects))
    }
}
