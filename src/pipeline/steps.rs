//! Step-list passes
//!
//! The back half of the pipeline works on [`ExecutionStep`] lists: lowering
//! produces the first list, later passes rebuild it (never mutate in place
//! across passes), and flattening turns the final list into runtime
//! commands.

use crate::ast::expr::AggregateMetric;
use crate::ast::query::Query;
use crate::error::CompileResult;
use crate::metadata::DatasetsMetadata;
use crate::plan::{Command, ExecutionStep, Precomputed};

/// Lower a fully-rewritten query into its first execution-step list
///
/// Shape: an optional leading document filter, one explosion per group-by
/// entry (each followed by a group filter when the entry kept a HAVING),
/// and a trailing stats step for the select list.
pub fn lower(query: &Query) -> CompileResult<Vec<ExecutionStep>> {
    let mut steps = Vec::new();
    if let Some(filter) = &query.filter {
        steps.push(ExecutionStep::FilterDocs { filter: filter.clone() });
    }
    for entry in &query.group_bys {
        steps.push(entry.group_by.execution_step(&query.datasets)?);
        if let Some(having) = &entry.filter {
            steps.push(ExecutionStep::FilterGroups { filter: having.clone() });
        }
    }
    steps.push(ExecutionStep::GetGroupStats {
        metrics: query.selects.iter().map(|s| s.metric.clone()).collect(),
        format_strings: query.selects.iter().map(|s| s.format_string.clone()).collect(),
        fetch_limit: None,
    });
    Ok(steps)
}

/// Insert the extracted precomputations before the trailing stats step
pub fn append_precomputed(
    steps: Vec<ExecutionStep>,
    computations: Vec<(String, Precomputed)>,
) -> Vec<ExecutionStep> {
    if computations.is_empty() {
        return steps;
    }
    let mut rebuilt = Vec::with_capacity(steps.len() + computations.len());
    let stats_at = steps.len().saturating_sub(1);
    for (i, step) in steps.into_iter().enumerate() {
        if i == stats_at {
            for (name, computation) in computations.iter().cloned() {
                rebuilt.push(ExecutionStep::ComputePrecomputed { name, computation });
            }
        }
        rebuilt.push(step);
    }
    rebuilt
}

/// Push the query row limit into the final stats step as a fetch-size hint
pub fn apply_limit_hint(
    steps: Vec<ExecutionStep>,
    row_limit: Option<usize>,
) -> Vec<ExecutionStep> {
    let Some(limit) = row_limit else {
        return steps;
    };
    let last = steps.len().saturating_sub(1);
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| match step {
            ExecutionStep::GetGroupStats { metrics, format_strings, .. } if i == last => {
                ExecutionStep::GetGroupStats {
                    metrics,
                    format_strings,
                    fetch_limit: Some(limit),
                }
            }
            other => other,
        })
        .collect()
}

/// Force field explosions non-streaming when a running metric follows
///
/// Streaming field iteration visits terms across groups in term order, so a
/// running total evaluated during it would accumulate in the wrong order.
pub fn fix_running_ftgs(steps: Vec<ExecutionStep>) -> Vec<ExecutionStep> {
    let running_next: Vec<bool> = steps
        .iter()
        .skip(1)
        .map(|step| match step {
            ExecutionStep::GetGroupStats { metrics, .. } => {
                metrics.iter().any(AggregateMetric::contains_running)
            }
            _ => false,
        })
        .chain(std::iter::once(false))
        .collect();
    steps
        .into_iter()
        .zip(running_next)
        .map(|(step, running)| match step {
            ExecutionStep::ExplodeField {
                field,
                filter,
                limit,
                metric,
                with_default,
                force_non_streaming,
            } if running => ExecutionStep::ExplodeField {
                field,
                filter,
                limit,
                metric,
                with_default,
                force_non_streaming: force_non_streaming || running,
            },
            other => other,
        })
        .collect()
}

/// Fuse a streamable field explosion with the stats step that follows it
///
/// A bare field explosion (no filter, limit, ordering metric, default
/// bucket, or non-streaming requirement) immediately followed by a stats
/// step is one streaming iteration over the field's terms.
pub fn merge_field_iterate(steps: Vec<ExecutionStep>) -> Vec<ExecutionStep> {
    let mut merged = Vec::with_capacity(steps.len());
    let mut iter = steps.into_iter().peekable();
    while let Some(step) = iter.next() {
        let streamable = matches!(
            step,
            ExecutionStep::ExplodeField {
                filter: None,
                limit: None,
                metric: None,
                with_default: false,
                force_non_streaming: false,
                ..
            }
        ) && matches!(iter.peek(), Some(ExecutionStep::GetGroupStats { .. }));

        if streamable {
            if let (
                ExecutionStep::ExplodeField { field, .. },
                Some(ExecutionStep::GetGroupStats { metrics, format_strings, fetch_limit }),
            ) = (step, iter.next())
            {
                merged.push(ExecutionStep::IterateField {
                    field,
                    metrics,
                    format_strings,
                    fetch_limit,
                });
            }
        } else {
            merged.push(step);
        }
    }
    merged
}

/// Flatten the final step list into the command list the runtime consumes
pub fn flatten(
    steps: &[ExecutionStep],
    meta: &dyn DatasetsMetadata,
) -> CompileResult<Vec<Command>> {
    let mut commands = Vec::with_capacity(steps.len());
    for step in steps {
        commands.extend(step.commands(meta)?);
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::DocMetric;
    use crate::metadata::FieldSet;

    fn fs(field: &str) -> FieldSet {
        FieldSet::singleton("logs", field)
    }

    fn count() -> AggregateMetric {
        AggregateMetric::DocStats(Box::new(DocMetric::Count))
    }

    fn explode(field: &str) -> ExecutionStep {
        ExecutionStep::ExplodeField {
            field: fs(field),
            filter: None,
            limit: None,
            metric: None,
            with_default: false,
            force_non_streaming: false,
        }
    }

    fn stats(metrics: Vec<AggregateMetric>) -> ExecutionStep {
        let format_strings = metrics.iter().map(|_| None).collect();
        ExecutionStep::GetGroupStats { metrics, format_strings, fetch_limit: None }
    }

    #[test]
    fn test_precomputed_goes_before_the_stats_step() {
        let steps = append_precomputed(
            vec![explode("country"), stats(vec![count()])],
            vec![(
                "computed_0".to_string(),
                Precomputed::Percentile { field: fs("latency"), percentile: 50.0 },
            )],
        );
        assert_eq!(steps.len(), 3);
        assert!(matches!(steps[0], ExecutionStep::ExplodeField { .. }));
        assert!(matches!(steps[1], ExecutionStep::ComputePrecomputed { .. }));
        assert!(matches!(steps[2], ExecutionStep::GetGroupStats { .. }));
    }

    #[test]
    fn test_limit_hint_reaches_the_final_stats_step() {
        let steps = apply_limit_hint(vec![explode("country"), stats(vec![count()])], Some(500));
        match &steps[1] {
            ExecutionStep::GetGroupStats { fetch_limit, .. } => {
                assert_eq!(*fetch_limit, Some(500));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_no_limit_leaves_steps_untouched() {
        let steps = apply_limit_hint(vec![stats(vec![count()])], None);
        match &steps[0] {
            ExecutionStep::GetGroupStats { fetch_limit, .. } => assert_eq!(*fetch_limit, None),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_running_metric_forces_non_streaming() {
        let running = AggregateMetric::Running(Box::new(count()));
        let steps = fix_running_ftgs(vec![explode("country"), stats(vec![running])]);
        match &steps[0] {
            ExecutionStep::ExplodeField { force_non_streaming, .. } => {
                assert!(force_non_streaming);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_plain_metrics_stay_streamable() {
        let steps = fix_running_ftgs(vec![explode("country"), stats(vec![count()])]);
        match &steps[0] {
            ExecutionStep::ExplodeField { force_non_streaming, .. } => {
                assert!(!force_non_streaming);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_bare_explosion_merges_into_iteration() {
        let steps = merge_field_iterate(vec![explode("country"), stats(vec![count()])]);
        assert_eq!(steps.len(), 1);
        match &steps[0] {
            ExecutionStep::IterateField { field, metrics, .. } => {
                assert_eq!(*field, fs("country"));
                assert_eq!(*metrics, vec![count()]);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_limited_explosion_does_not_merge() {
        let limited = ExecutionStep::ExplodeField {
            field: fs("country"),
            filter: None,
            limit: Some(10),
            metric: Some(count()),
            with_default: false,
            force_non_streaming: false,
        };
        let steps = merge_field_iterate(vec![limited, stats(vec![count()])]);
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_forced_non_streaming_does_not_merge() {
        let running = AggregateMetric::Running(Box::new(count()));
        let steps = fix_running_ftgs(vec![explode("country"), stats(vec![running])]);
        let steps = merge_field_iterate(steps);
        assert_eq!(steps.len(), 2);
    }
}
