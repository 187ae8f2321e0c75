//! Query-level passes
//!
//! Each pass is a pure `&Query -> Query` function (or `-> (Query, extra)`)
//! built on the rewrite protocol. The orchestrator in the parent module
//! commits their order; none of them is safe to reorder against another.

use crate::ast::expr::{AggregateFilter, AggregateMetric, DocFilter, DocMetric};
use crate::ast::group_by::{GroupBy, GroupByField};
use crate::ast::query::{GroupByEntry, Query, OPT_TOTALS};
use crate::error::{CompileError, CompileResult};
use crate::plan::Precomputed;
use crate::transform::{Rewrite, Transform};
use std::collections::BTreeMap;

/// Substitution rounds before a name cycle is assumed
const MAX_SUBSTITUTION_ROUNDS: usize = 64;

/// Move an entry's HAVING filter inside a top-K grouping
///
/// A top-K grouping truncates to its limit while exploding; a HAVING filter
/// left outside it would run after truncation and see only the surviving
/// terms. Folding the filter into the grouping's internal filter makes
/// filtering precede truncation.
pub fn fix_top_k_having(query: &Query) -> CompileResult<Query> {
    let group_bys = query
        .group_bys
        .iter()
        .map(|entry| match (&entry.group_by, &entry.filter) {
            (GroupBy::Field(g), Some(having)) if g.is_top_k() => GroupByEntry {
                group_by: GroupBy::Field(GroupByField {
                    filter: AggregateFilter::and_opt(g.filter.clone(), Some(having.clone())),
                    ..g.clone()
                }),
                filter: None,
                alias: entry.alias.clone(),
                span: entry.span,
            },
            _ => entry.clone(),
        })
        .collect();
    Ok(query.rebuilt(query.filter.clone(), group_bys, query.selects.clone()))
}

/// Harvest every `metric as name` definition into a name-to-metric map
pub fn extract_names(query: &Query) -> CompileResult<BTreeMap<String, AggregateMetric>> {
    struct Harvest {
        defs: BTreeMap<String, AggregateMetric>,
    }

    impl Rewrite for Harvest {
        fn aggregate_metric(&mut self, m: AggregateMetric) -> CompileResult<AggregateMetric> {
            if let AggregateMetric::Named { inner, name } = &m {
                if self.defs.insert(name.clone(), (**inner).clone()).is_some() {
                    return Err(CompileError::DuplicateMetricName(name.clone()));
                }
            }
            Ok(m)
        }
    }

    let mut harvest = Harvest { defs: BTreeMap::new() };
    query.transform(&mut harvest)?;
    Ok(harvest.defs)
}

/// Replace every name reference with its definition
///
/// Definitions may reference other definitions, so substitution repeats
/// until a round changes nothing. A round cap converts a reference cycle
/// into an error instead of a loop.
pub fn substitute_names(
    query: &Query,
    defs: &BTreeMap<String, AggregateMetric>,
) -> CompileResult<Query> {
    struct Substitute<'a> {
        defs: &'a BTreeMap<String, AggregateMetric>,
        substituted: bool,
    }

    impl Rewrite for Substitute<'_> {
        fn aggregate_metric(&mut self, m: AggregateMetric) -> CompileResult<AggregateMetric> {
            if let AggregateMetric::NameRef(name) = &m {
                let def = self
                    .defs
                    .get(name)
                    .ok_or_else(|| CompileError::UnknownMetricName(name.clone()))?;
                self.substituted = true;
                return Ok(def.clone());
            }
            Ok(m)
        }
    }

    let mut current = query.clone();
    for _ in 0..MAX_SUBSTITUTION_ROUNDS {
        let mut rules = Substitute { defs, substituted: false };
        let next = current.transform(&mut rules)?;
        if !rules.substituted {
            return Ok(next);
        }
        current = next;
    }
    Err(CompileError::CircularMetricDefinition(
        defs.keys().cloned().collect::<Vec<_>>().join(", "),
    ))
}

/// Strip `Named` wrappers, now that every reference is resolved
pub fn remove_names(query: &Query) -> CompileResult<Query> {
    struct Strip;

    impl Rewrite for Strip {
        fn aggregate_metric(&mut self, m: AggregateMetric) -> CompileResult<AggregateMetric> {
            match m {
                AggregateMetric::Named { inner, .. } => Ok(*inner),
                other => Ok(other),
            }
        }
    }

    query.transform(&mut Strip)
}

/// Fold constant subexpressions
///
/// Numeric folding over document and aggregate metrics, and trivial boolean
/// folding over filters. Integer folds that would overflow (or divide by
/// zero) are left unfolded for the runtime to deal with.
pub fn fold_constants(query: &Query) -> CompileResult<Query> {
    query.transform(&mut Fold)
}

struct Fold;

impl Rewrite for Fold {
    fn doc_metric(&mut self, m: DocMetric) -> CompileResult<DocMetric> {
        use DocMetric::{Add, Constant, Divide, Max, Min, Multiply, Negate, Subtract};
        Ok(match m {
            Add(a, b) => fold_doc(Add, *a, *b, i64::checked_add),
            Subtract(a, b) => fold_doc(Subtract, *a, *b, i64::checked_sub),
            Multiply(a, b) => fold_doc(Multiply, *a, *b, i64::checked_mul),
            Divide(a, b) => fold_doc(Divide, *a, *b, |x, y| x.checked_div(y)),
            Min(a, b) => fold_doc(Min, *a, *b, |x, y| Some(x.min(y))),
            Max(a, b) => fold_doc(Max, *a, *b, |x, y| Some(x.max(y))),
            Negate(a) => match *a {
                Constant(x) if x.checked_neg().is_some() => Constant(-x),
                inner => Negate(Box::new(inner)),
            },
            other => other,
        })
    }

    fn aggregate_metric(&mut self, m: AggregateMetric) -> CompileResult<AggregateMetric> {
        use AggregateMetric::{Add, Constant, Divide, Multiply, Negate, Subtract};
        Ok(match m {
            Add(a, b) => fold_agg(Add, *a, *b, |x, y| x + y),
            Subtract(a, b) => fold_agg(Subtract, *a, *b, |x, y| x - y),
            Multiply(a, b) => fold_agg(Multiply, *a, *b, |x, y| x * y),
            Divide(a, b) => fold_agg(Divide, *a, *b, |x, y| x / y),
            Negate(a) => match *a {
                Constant(x) => Constant(-x),
                inner => Negate(Box::new(inner)),
            },
            other => other,
        })
    }

    fn doc_filter(&mut self, f: DocFilter) -> CompileResult<DocFilter> {
        use DocFilter::{Always, And, Never, Not, Or};
        Ok(match f {
            And(a, b) => match (*a, *b) {
                (Always, x) | (x, Always) => x,
                (Never, _) | (_, Never) => Never,
                (a, b) => And(Box::new(a), Box::new(b)),
            },
            Or(a, b) => match (*a, *b) {
                (Never, x) | (x, Never) => x,
                (Always, _) | (_, Always) => Always,
                (a, b) => Or(Box::new(a), Box::new(b)),
            },
            Not(a) => match *a {
                Always => Never,
                Never => Always,
                inner => Not(Box::new(inner)),
            },
            other => other,
        })
    }

    fn aggregate_filter(&mut self, f: AggregateFilter) -> CompileResult<AggregateFilter> {
        use AggregateFilter::{Always, And, Never, Not, Or};
        Ok(match f {
            And(a, b) => match (*a, *b) {
                (Always, x) | (x, Always) => x,
                (Never, _) | (_, Never) => Never,
                (a, b) => And(Box::new(a), Box::new(b)),
            },
            Or(a, b) => match (*a, *b) {
                (Never, x) | (x, Never) => x,
                (Always, _) | (_, Always) => Always,
                (a, b) => Or(Box::new(a), Box::new(b)),
            },
            Not(a) => match *a {
                Always => Never,
                Never => Always,
                inner => Not(Box::new(inner)),
            },
            other => other,
        })
    }
}

fn fold_doc(
    rebuild: fn(Box<DocMetric>, Box<DocMetric>) -> DocMetric,
    a: DocMetric,
    b: DocMetric,
    fold: fn(i64, i64) -> Option<i64>,
) -> DocMetric {
    match (a, b) {
        (DocMetric::Constant(x), DocMetric::Constant(y)) => match fold(x, y) {
            Some(v) => DocMetric::Constant(v),
            None => rebuild(
                Box::new(DocMetric::Constant(x)),
                Box::new(DocMetric::Constant(y)),
            ),
        },
        (a, b) => rebuild(Box::new(a), Box::new(b)),
    }
}

fn fold_agg(
    rebuild: fn(Box<AggregateMetric>, Box<AggregateMetric>) -> AggregateMetric,
    a: AggregateMetric,
    b: AggregateMetric,
    fold: fn(f64, f64) -> f64,
) -> AggregateMetric {
    match (a, b) {
        (AggregateMetric::Constant(x), AggregateMetric::Constant(y)) => {
            AggregateMetric::Constant(fold(x, y))
        }
        (a, b) => rebuild(Box::new(a), Box::new(b)),
    }
}

/// Result of precomputation extraction
pub struct ExtractedPrecomputed {
    pub query: Query,
    /// Named computations, in the order their lookups were introduced
    pub computations: Vec<(String, Precomputed)>,
    /// Grand-total select list harvested under legacy totals mode
    pub totals: Vec<AggregateMetric>,
}

/// Pull percentile and distinct metrics out into named precomputations
///
/// Both must run in an earlier execution phase than the stats step that
/// consumes them; the metric tree keeps a `GroupStatsLookup` in their place.
/// Under legacy mode with totals requested, this pass also harvests the
/// grand-total select list and forces every grouping total so the default
/// buckets keep grand totals exact.
pub fn extract_precomputed(query: &Query) -> CompileResult<ExtractedPrecomputed> {
    struct Extract {
        computations: Vec<(String, Precomputed)>,
    }

    impl Extract {
        fn name_for(&mut self, computation: Precomputed) -> String {
            let name = format!("computed_{}", self.computations.len());
            self.computations.push((name.clone(), computation));
            name
        }
    }

    impl Rewrite for Extract {
        fn aggregate_metric(&mut self, m: AggregateMetric) -> CompileResult<AggregateMetric> {
            match m {
                AggregateMetric::Percentile { field, percentile } => {
                    let name = self.name_for(Precomputed::Percentile { field, percentile });
                    Ok(AggregateMetric::GroupStatsLookup(name))
                }
                AggregateMetric::Distinct { field, having } => {
                    let name = self.name_for(Precomputed::Distinct {
                        field,
                        having: having.map(|h| *h),
                    });
                    Ok(AggregateMetric::GroupStatsLookup(name))
                }
                other => Ok(other),
            }
        }
    }

    let mut rules = Extract { computations: Vec::new() };
    let mut query = query.transform(&mut rules)?;

    let totals = if query.legacy && query.options.contains(OPT_TOTALS) {
        let group_bys = query
            .group_bys
            .iter()
            .map(|entry| GroupByEntry {
                group_by: entry.group_by.clone().make_total(),
                filter: entry.filter.clone(),
                alias: entry.alias.clone(),
                span: entry.span,
            })
            .collect();
        let totals = query.selects.iter().map(|s| s.metric.clone()).collect();
        query = query.rebuilt(query.filter.clone(), group_bys, query.selects.clone());
        totals
    } else {
        Vec::new()
    };

    Ok(ExtractedPrecomputed {
        query,
        computations: rules.computations,
        totals,
    })
}
