//! The compilation pipeline
//!
//! A committed, total order of passes turns a resolved [`Query`] into the
//! command list the runtime consumes:
//!
//! 1. Fold HAVING filters into top-K groupings
//! 2. Extract named metric definitions
//! 3. Substitute name references with their definitions
//! 4. Strip the now-redundant name wrappers
//! 5. Fold constant subexpressions
//! 6. Extract precomputations (harvesting legacy grand totals)
//! 7. Lower the query into execution steps
//! 8. Insert the precomputation steps
//! 9. Push the row limit into the final stats step
//! 10. Force non-streaming field explosions under running metrics
//! 11. Merge streamable explosions with their stats steps
//! 12. Flatten steps into commands
//!
//! Reordering any two passes is not supported: name substitution must see
//! extracted definitions, folding must see substituted metrics, the merge
//! pass must run after the non-streaming fix, and so on down the list.

pub mod passes;
pub mod steps;

pub use passes::{
    extract_names, extract_precomputed, fix_top_k_having, fold_constants, remove_names,
    substitute_names, ExtractedPrecomputed,
};
pub use steps::{
    append_precomputed, apply_limit_hint, fix_running_ftgs, flatten, lower, merge_field_iterate,
};

use crate::ast::expr::AggregateMetric;
use crate::ast::query::Query;
use crate::error::CompileResult;
use crate::metadata::DatasetsMetadata;
use crate::plan::Command;

/// Run the whole pipeline over a resolved query
///
/// Pure: the query is rebuilt pass by pass, never mutated. Returns the
/// command list and the grand-total select list (empty unless legacy mode
/// requested totals).
pub fn compile(
    query: &Query,
    meta: &dyn DatasetsMetadata,
) -> CompileResult<(Vec<Command>, Vec<AggregateMetric>)> {
    let query = passes::fix_top_k_having(query)?;
    let defs = passes::extract_names(&query)?;
    tracing::debug!(names = defs.len(), "Extracted metric definitions");
    let query = passes::substitute_names(&query, &defs)?;
    let query = passes::remove_names(&query)?;
    let query = passes::fold_constants(&query)?;
    let extracted = passes::extract_precomputed(&query)?;
    tracing::debug!(
        precomputed = extracted.computations.len(),
        totals = extracted.totals.len(),
        "Extracted precomputations"
    );

    let lowered = steps::lower(&extracted.query)?;
    let lowered = steps::append_precomputed(lowered, extracted.computations);
    let lowered = steps::apply_limit_hint(lowered, extracted.query.row_limit);
    let lowered = steps::fix_running_ftgs(lowered);
    let lowered = steps::merge_field_iterate(lowered);
    let commands = steps::flatten(&lowered, meta)?;
    tracing::debug!(
        steps = lowered.len(),
        commands = commands.len(),
        "Compiled query"
    );
    Ok((commands, extracted.totals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{DocFilter, DocMetric, Term};
    use crate::ast::group_by::{GroupBy, GroupByField};
    use crate::ast::query::{Dataset, GroupByEntry, SelectItem, Span};
    use crate::metadata::{FieldSet, SchemaMetadata};
    use chrono::{FixedOffset, TimeZone};
    use std::collections::BTreeMap;

    fn fs(field: &str) -> FieldSet {
        FieldSet::singleton("logs", field)
    }

    fn count() -> AggregateMetric {
        AggregateMetric::DocStats(Box::new(DocMetric::Count))
    }

    fn dataset() -> Dataset {
        let tz = FixedOffset::east_opt(0).unwrap();
        Dataset::new(
            "logs".to_string(),
            tz.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            tz.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap(),
            None,
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_plain_count_compiles_to_one_stats_command() {
        let query = Query::builder()
            .dataset(dataset())
            .select(SelectItem::new(count()))
            .build()
            .unwrap();
        let (commands, totals) = compile(&query, &SchemaMetadata::new()).unwrap();
        assert!(totals.is_empty());
        assert_eq!(
            commands,
            vec![Command::GetGroupStats {
                metrics: vec![count()],
                format_strings: vec![None],
                fetch_limit: None,
            }]
        );
    }

    #[test]
    fn test_filtered_grouped_query_shape() {
        let query = Query::builder()
            .dataset(dataset())
            .filter(DocFilter::FieldIs {
                field: fs("country"),
                term: Term::Str("us".to_string()),
            })
            .group_by(GroupByEntry::new(GroupBy::Field(GroupByField::unlimited(
                fs("referrer"),
            ))))
            .select(SelectItem::new(count()))
            .build()
            .unwrap();
        let (commands, _) = compile(&query, &SchemaMetadata::new()).unwrap();

        // The bare field explosion and the stats step fuse into one iterate
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], Command::ApplyFilter { .. }));
        match &commands[1] {
            Command::SimpleIterate { field, metrics, .. } => {
                assert_eq!(*field, fs("referrer"));
                assert_eq!(*metrics, vec![count()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_running_metric_blocks_streaming_iteration() {
        let query = Query::builder()
            .dataset(dataset())
            .group_by(GroupByEntry::new(GroupBy::Field(GroupByField::unlimited(
                fs("referrer"),
            ))))
            .select(SelectItem::new(AggregateMetric::Running(Box::new(count()))))
            .build()
            .unwrap();
        let (commands, _) = compile(&query, &SchemaMetadata::new()).unwrap();

        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], Command::FieldRegroup { .. }));
        assert!(matches!(commands[1], Command::GetGroupStats { .. }));
    }

    #[test]
    fn test_row_limit_becomes_fetch_hint() {
        let query = Query::builder()
            .dataset(dataset())
            .select(SelectItem::new(count()))
            .row_limit(1000)
            .build()
            .unwrap();
        let (commands, _) = compile(&query, &SchemaMetadata::new()).unwrap();
        match &commands[0] {
            Command::GetGroupStats { fetch_limit, .. } => assert_eq!(*fetch_limit, Some(1000)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_name_reference_used_twice_lowers_consistently() {
        // `count() as c select c + 1, c * 2` must fold after substitution,
        // so both uses see the same definition
        let named = AggregateMetric::Named {
            inner: Box::new(AggregateMetric::Add(
                Box::new(AggregateMetric::Constant(2.0)),
                Box::new(AggregateMetric::Constant(3.0)),
            )),
            name: "c".to_string(),
        };
        let query = Query::builder()
            .dataset(dataset())
            .select(SelectItem::new(named))
            .select(SelectItem::new(AggregateMetric::Negate(Box::new(
                AggregateMetric::NameRef("c".to_string()),
            ))))
            .build()
            .unwrap();
        let (commands, _) = compile(&query, &SchemaMetadata::new()).unwrap();
        match &commands[0] {
            Command::GetGroupStats { metrics, .. } => {
                assert_eq!(metrics[0], AggregateMetric::Constant(5.0));
                assert_eq!(metrics[1], AggregateMetric::Constant(-5.0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_percentile_select_inserts_a_compute_command() {
        let query = Query::builder()
            .dataset(dataset())
            .select(SelectItem::new(AggregateMetric::Percentile {
                field: fs("latency"),
                percentile: 95.0,
            }))
            .build()
            .unwrap();
        let (commands, _) = compile(&query, &SchemaMetadata::new()).unwrap();

        assert_eq!(commands.len(), 2);
        match &commands[0] {
            Command::ComputePercentile { name, field, percentile } => {
                assert_eq!(name, "computed_0");
                assert_eq!(*field, fs("latency"));
                assert_eq!(*percentile, 95.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        match &commands[1] {
            Command::GetGroupStats { metrics, .. } => {
                assert_eq!(
                    metrics[0],
                    AggregateMetric::GroupStatsLookup("computed_0".to_string())
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_memoized_commands_are_stable() {
        let query = Query::builder()
            .dataset(dataset())
            .select(SelectItem::new(count()))
            .build()
            .unwrap();
        let meta = SchemaMetadata::new();
        let first = query.commands(&meta).unwrap().to_vec();
        let second = query.commands(&meta).unwrap().to_vec();
        assert_eq!(first, second);
    }
}
