//! Expression nodes
//!
//! Per-document metrics and filters run against every document on the
//! shards; aggregate metrics and filters run over already-grouped stats.
//! The compiler threads these through its passes but never evaluates them.

use crate::ast::query::Query;
use crate::metadata::FieldSet;
use serde::Serialize;

/// A constant term of a field: integer or string
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Term {
    /// Integer term
    Int(i64),
    /// String term
    Str(String),
}

impl Term {
    /// The term rendered as it would appear in query text
    pub fn as_string(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    /// The term as an integer, when it is one (or parses as one)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.parse().ok(),
        }
    }
}

/// A per-document metric expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DocMetric {
    /// The value of a field in each document
    Field(FieldSet),
    /// 1 per document
    Count,
    /// A constant
    Constant(i64),
    Add(Box<DocMetric>, Box<DocMetric>),
    Subtract(Box<DocMetric>, Box<DocMetric>),
    Multiply(Box<DocMetric>, Box<DocMetric>),
    Divide(Box<DocMetric>, Box<DocMetric>),
    Min(Box<DocMetric>, Box<DocMetric>),
    Max(Box<DocMetric>, Box<DocMetric>),
    Negate(Box<DocMetric>),
    /// Conditional on a per-document filter
    IfThenElse {
        cond: Box<DocFilter>,
        then_metric: Box<DocMetric>,
        else_metric: Box<DocMetric>,
    },
}

/// A per-document filter expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DocFilter {
    /// Field equals a term
    FieldIs { field: FieldSet, term: Term },
    /// Field does not equal a term
    FieldIsnt { field: FieldSet, term: Term },
    /// Field is one of several terms
    FieldInTerms {
        field: FieldSet,
        terms: Vec<Term>,
        negated: bool,
    },
    /// Field matches a regex
    Regex { field: FieldSet, pattern: String },
    MetricEq(Box<DocMetric>, Box<DocMetric>),
    MetricGt(Box<DocMetric>, Box<DocMetric>),
    MetricLt(Box<DocMetric>, Box<DocMetric>),
    And(Box<DocFilter>, Box<DocFilter>),
    Or(Box<DocFilter>, Box<DocFilter>),
    Not(Box<DocFilter>),
    /// Restrict a filter to a set of datasets
    Qualified {
        scope: Vec<String>,
        inner: Box<DocFilter>,
    },
    /// Field value appears in the result terms of a correlated subquery
    ///
    /// A placeholder: a pass must rewrite it before lowering. Transforms do
    /// not descend into the embedded query.
    FieldInQuery {
        query: Box<Query>,
        field: FieldSet,
        negated: bool,
    },
    /// Matches every document
    Always,
    /// Matches no document
    Never,
}

impl DocFilter {
    /// Conjunction folding; an empty list yields no filter
    pub fn and_all(filters: Vec<DocFilter>) -> Option<DocFilter> {
        filters
            .into_iter()
            .reduce(|a, b| DocFilter::And(Box::new(a), Box::new(b)))
    }
}

/// An aggregate (per-group) metric expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AggregateMetric {
    /// A constant
    Constant(f64),
    /// A per-document metric summed over the group
    DocStats(Box<DocMetric>),
    /// A definition: `metric as name`
    Named {
        inner: Box<AggregateMetric>,
        name: String,
    },
    /// A reference to a named metric, unresolved until substitution
    NameRef(String),
    /// A reference to a value precomputed in an earlier execution phase
    GroupStatsLookup(String),
    Add(Box<AggregateMetric>, Box<AggregateMetric>),
    Subtract(Box<AggregateMetric>, Box<AggregateMetric>),
    Multiply(Box<AggregateMetric>, Box<AggregateMetric>),
    Divide(Box<AggregateMetric>, Box<AggregateMetric>),
    Negate(Box<AggregateMetric>),
    /// The p-th percentile of a field's values within the group
    Percentile { field: FieldSet, percentile: f64 },
    /// Count of distinct terms of a field within the group, optionally
    /// restricted to terms passing a filter
    Distinct {
        field: FieldSet,
        having: Option<Box<AggregateFilter>>,
    },
    /// Running total across preceding groups
    Running(Box<AggregateMetric>),
    /// The value of the parent group
    Parent(Box<AggregateMetric>),
}

impl AggregateMetric {
    /// Whether any node in this metric is a running total
    ///
    /// Running metrics depend on group visit order, which streaming field
    /// iteration does not preserve.
    pub fn contains_running(&self) -> bool {
        match self {
            Self::Running(_) => true,
            Self::Constant(_)
            | Self::DocStats(_)
            | Self::NameRef(_)
            | Self::GroupStatsLookup(_)
            | Self::Percentile { .. }
            | Self::Distinct { .. } => false,
            Self::Named { inner, .. } | Self::Negate(inner) | Self::Parent(inner) => {
                inner.contains_running()
            }
            Self::Add(a, b)
            | Self::Subtract(a, b)
            | Self::Multiply(a, b)
            | Self::Divide(a, b) => a.contains_running() || b.contains_running(),
        }
    }

    /// Whether this metric must be computed in an earlier execution phase
    /// than the step that consumes it
    pub fn requires_precomputation(&self) -> bool {
        matches!(self, Self::Percentile { .. } | Self::Distinct { .. })
    }
}

/// An aggregate (per-group) filter expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AggregateFilter {
    /// The group's own term equals a constant
    TermIs(Term),
    /// The group's own term matches a regex
    Regex(String),
    Is(Box<AggregateMetric>, Box<AggregateMetric>),
    Gt(Box<AggregateMetric>, Box<AggregateMetric>),
    Gte(Box<AggregateMetric>, Box<AggregateMetric>),
    Lt(Box<AggregateMetric>, Box<AggregateMetric>),
    Lte(Box<AggregateMetric>, Box<AggregateMetric>),
    And(Box<AggregateFilter>, Box<AggregateFilter>),
    Or(Box<AggregateFilter>, Box<AggregateFilter>),
    Not(Box<AggregateFilter>),
    /// Keeps every group
    Always,
    /// Keeps no group
    Never,
}

impl AggregateFilter {
    /// Conjunction of two optional filters
    pub fn and_opt(a: Option<AggregateFilter>, b: Option<AggregateFilter>) -> Option<AggregateFilter> {
        match (a, b) {
            (Some(a), Some(b)) => Some(AggregateFilter::And(Box::new(a), Box::new(b))),
            (Some(f), None) | (None, Some(f)) => Some(f),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_as_int() {
        assert_eq!(Term::Int(5).as_int(), Some(5));
        assert_eq!(Term::Str("7".to_string()).as_int(), Some(7));
        assert_eq!(Term::Str("us".to_string()).as_int(), None);
    }

    #[test]
    fn test_contains_running_nested() {
        let m = AggregateMetric::Add(
            Box::new(AggregateMetric::Constant(1.0)),
            Box::new(AggregateMetric::Negate(Box::new(AggregateMetric::Running(
                Box::new(AggregateMetric::DocStats(Box::new(DocMetric::Count))),
            )))),
        );
        assert!(m.contains_running());
        assert!(!AggregateMetric::Constant(1.0).contains_running());
    }

    #[test]
    fn test_and_all_empty_and_chain() {
        assert_eq!(DocFilter::and_all(vec![]), None);
        let combined = DocFilter::and_all(vec![DocFilter::Always, DocFilter::Never]).unwrap();
        assert_eq!(
            combined,
            DocFilter::And(Box::new(DocFilter::Always), Box::new(DocFilter::Never))
        );
    }

    #[test]
    fn test_and_opt() {
        assert_eq!(AggregateFilter::and_opt(None, None), None);
        assert_eq!(
            AggregateFilter::and_opt(Some(AggregateFilter::Always), None),
            Some(AggregateFilter::Always)
        );
    }

    #[test]
    fn test_requires_precomputation() {
        let fs = FieldSet::singleton("logs", "country");
        assert!(AggregateMetric::Distinct { field: fs.clone(), having: None }
            .requires_precomputation());
        assert!(AggregateMetric::Percentile { field: fs, percentile: 50.0 }
            .requires_precomputation());
        assert!(!AggregateMetric::Constant(1.0).requires_precomputation());
    }
}
