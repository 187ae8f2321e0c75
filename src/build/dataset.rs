//! Dataset node building
//!
//! One FROM-clause entry becomes one [`Dataset`] node. A full entry carries
//! its own time range; a partial entry reuses the first dataset's resolved
//! range rather than re-parsing anything. A dataset-local WHERE becomes a
//! filter qualified to that dataset's display name.

use crate::ast::expr::DocFilter;
use crate::ast::query::{Dataset, Span};
use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};
use crate::metadata::{FieldResolver, ScopedFieldResolver};
use crate::time::resolver::{resolve_range, TimeExpr};
use std::collections::BTreeMap;

/// A parsed FROM-clause entry
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetClause {
    /// Raw dataset token as written
    pub name: String,
    /// Start expression; `None` for a partial entry
    pub start: Option<TimeExpr>,
    /// End expression; `None` for a partial entry
    pub end: Option<TimeExpr>,
    /// Optional display alias
    pub alias: Option<String>,
    /// (virtual name, actual name) pairs
    pub field_aliases: Vec<(String, String)>,
    /// Dataset-local WHERE clause
    pub filter: Option<DocFilter>,
    pub span: Span,
}

impl DatasetClause {
    /// A full entry with explicit time range
    pub fn new(name: impl Into<String>, start: TimeExpr, end: TimeExpr) -> Self {
        Self {
            name: name.into(),
            start: Some(start),
            end: Some(end),
            alias: None,
            field_aliases: Vec::new(),
            filter: None,
            span: Span::default(),
        }
    }

    /// A partial entry inheriting the first dataset's range
    pub fn partial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
            alias: None,
            field_aliases: Vec::new(),
            filter: None,
            span: Span::default(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn field_alias(mut self, virtual_name: &str, actual: &str) -> Self {
        self.field_aliases.push((virtual_name.to_string(), actual.to_string()));
        self
    }

    pub fn filter(mut self, filter: DocFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Build one dataset node and its qualified filter, if any
///
/// `first` is the already-built first dataset of the query, used to fill in
/// a partial entry's time range; `None` while building the first entry.
pub fn build_dataset(
    clause: &DatasetClause,
    ctx: &CompileContext<'_>,
    resolver: &dyn FieldResolver,
    first: Option<&Dataset>,
) -> CompileResult<(Dataset, Option<DocFilter>)> {
    let name = resolver.resolve_dataset_token(&clause.name)?;

    let (start, end) = match (&clause.start, &clause.end) {
        (Some(start), Some(end)) => resolve_range(start, end, ctx)?,
        _ => match first {
            Some(first) => (first.start, first.end),
            None => {
                return Err(CompileError::InvalidTimeRange(format!(
                    "dataset {name} has no time range and no prior dataset to inherit from"
                )))
            }
        },
    };

    let display_name = clause.alias.clone().unwrap_or_else(|| name.clone());
    let scoped = ScopedFieldResolver::new(resolver, vec![name.clone(), display_name.clone()]);

    // Field aliases resolve inside this dataset only
    let mut field_aliases = BTreeMap::new();
    for (virtual_name, actual) in &clause.field_aliases {
        let resolved = scoped.resolve(actual)?;
        let concrete = resolved
            .field_for(&name)
            .or_else(|| resolved.field_for(&display_name))
            .unwrap_or(actual.as_str());
        field_aliases.insert(virtual_name.clone(), concrete.to_string());
    }

    let dataset = Dataset::new(name, start, end, clause.alias.clone(), field_aliases, clause.span)?;

    let filter = clause.filter.clone().map(|inner| DocFilter::Qualified {
        scope: vec![dataset.display_name().to_string()],
        inner: Box::new(inner),
    });

    Ok((dataset, filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::Term;
    use crate::context::{CompileContext, FixedClock, TracingWarnings};
    use crate::metadata::{FieldSet, MapResolver};
    use crate::time::units::DefaultPeriodParser;
    use chrono::FixedOffset;

    // 2024-03-15T10:00:00Z
    const NOW_MILLIS: i64 = 1_710_496_800_000;

    fn ctx(clock: &FixedClock) -> CompileContext<'_> {
        CompileContext::new(
            clock,
            &TracingWarnings,
            &DefaultPeriodParser,
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn resolver() -> MapResolver {
        MapResolver::new(&["logs", "clicks"]).field("country").field("ctr")
    }

    #[test]
    fn test_full_entry_resolves_range() {
        let clock = FixedClock(NOW_MILLIS);
        let clause = DatasetClause::new(
            "LOGS",
            TimeExpr::Quoted("2024-03-01".to_string()),
            TimeExpr::Quoted("2024-03-08".to_string()),
        );
        let (dataset, filter) = build_dataset(&clause, &ctx(&clock), &resolver(), None).unwrap();
        assert_eq!(dataset.name, "logs");
        assert_eq!(dataset.display_name(), "logs");
        assert!(filter.is_none());
        assert!(dataset.start < dataset.end);
    }

    #[test]
    fn test_partial_entry_inherits_first_range() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        let first_clause = DatasetClause::new(
            "logs",
            TimeExpr::Quoted("2024-03-01".to_string()),
            TimeExpr::Quoted("2024-03-08".to_string()),
        );
        let (first, _) = build_dataset(&first_clause, &c, &resolver(), None).unwrap();

        let partial = DatasetClause::partial("clicks");
        let (second, _) = build_dataset(&partial, &c, &resolver(), Some(&first)).unwrap();
        assert_eq!(second.start, first.start);
        assert_eq!(second.end, first.end);
    }

    #[test]
    fn test_partial_first_entry_is_error() {
        let clock = FixedClock(NOW_MILLIS);
        let partial = DatasetClause::partial("logs");
        assert!(matches!(
            build_dataset(&partial, &ctx(&clock), &resolver(), None),
            Err(CompileError::InvalidTimeRange(_))
        ));
    }

    #[test]
    fn test_inverted_range_is_error() {
        let clock = FixedClock(NOW_MILLIS);
        let clause = DatasetClause::new(
            "logs",
            TimeExpr::Quoted("2024-03-08".to_string()),
            TimeExpr::Quoted("2024-03-01".to_string()),
        );
        assert!(matches!(
            build_dataset(&clause, &ctx(&clock), &resolver(), None),
            Err(CompileError::InvalidTimeRange(_))
        ));
    }

    #[test]
    fn test_local_where_is_qualified_to_display_name() {
        let clock = FixedClock(NOW_MILLIS);
        let clause = DatasetClause::new(
            "logs",
            TimeExpr::Quoted("2024-03-01".to_string()),
            TimeExpr::Quoted("2024-03-08".to_string()),
        )
        .alias("weblogs")
        .filter(DocFilter::FieldIs {
            field: FieldSet::singleton("logs", "country"),
            term: Term::Str("us".to_string()),
        });

        let (dataset, filter) = build_dataset(&clause, &ctx(&clock), &resolver(), None).unwrap();
        assert_eq!(dataset.display_name(), "weblogs");
        match filter {
            Some(DocFilter::Qualified { scope, .. }) => {
                assert_eq!(scope, vec!["weblogs".to_string()]);
            }
            other => panic!("unexpected filter: {other:?}"),
        }
    }

    #[test]
    fn test_field_aliases_resolved_in_scope() {
        let clock = FixedClock(NOW_MILLIS);
        let clause = DatasetClause::new(
            "logs",
            TimeExpr::Quoted("2024-03-01".to_string()),
            TimeExpr::Quoted("2024-03-08".to_string()),
        )
        .field_alias("rate", "ctr");

        let (dataset, _) = build_dataset(&clause, &ctx(&clock), &resolver(), None).unwrap();
        assert_eq!(dataset.field_aliases.get("rate").map(String::as_str), Some("ctr"));
    }
}
