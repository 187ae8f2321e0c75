//! Query, dataset, and select nodes
//!
//! A [`Query`] is an immutable value: passes rebuild it, never mutate it.
//! The derived command list and grand-total list are memoized on the value
//! and computed on first access.

use crate::ast::expr::{AggregateMetric, DocFilter};
use crate::ast::group_by::GroupBy;
use crate::error::{CompileError, CompileResult};
use crate::metadata::DatasetsMetadata;
use crate::plan::Command;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

/// Byte range in the original query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// One dataset reference from the FROM clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    /// Canonical dataset name
    pub name: String,
    /// Inclusive start instant
    pub start: DateTime<FixedOffset>,
    /// Exclusive end instant, strictly after `start`
    pub end: DateTime<FixedOffset>,
    /// Optional display alias
    pub alias: Option<String>,
    /// Virtual field name -> actual field name
    pub field_aliases: BTreeMap<String, String>,
    /// Position in the query text
    pub span: Span,
}

impl Dataset {
    /// Create a dataset node, validating the time range
    pub fn new(
        name: String,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
        alias: Option<String>,
        field_aliases: BTreeMap<String, String>,
        span: Span,
    ) -> CompileResult<Self> {
        if end <= start {
            return Err(CompileError::InvalidTimeRange(format!(
                "dataset {name}: end {end} is not after start {start}"
            )));
        }
        Ok(Self { name, start, end, alias, field_aliases, span })
    }

    /// The name this dataset goes by in the query: alias if present
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// One select expression with its formatting option
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectItem {
    pub metric: AggregateMetric,
    /// printf-style formatting for the output column
    pub format_string: Option<String>,
}

impl SelectItem {
    pub fn new(metric: AggregateMetric) -> Self {
        Self { metric, format_string: None }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format_string = Some(format.into());
        self
    }
}

/// A group-by clause entry: the grouping, an optional post-aggregation
/// filter (HAVING), and an optional display alias
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupByEntry {
    pub group_by: GroupBy,
    pub filter: Option<crate::ast::expr::AggregateFilter>,
    pub alias: Option<String>,
    pub span: Span,
}

impl GroupByEntry {
    pub fn new(group_by: GroupBy) -> Self {
        Self { group_by, filter: None, alias: None, span: Span::default() }
    }
}

/// A fully-resolved query, ready for the pass pipeline
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    /// Datasets in declaration order; display names pairwise distinct
    pub datasets: Vec<Dataset>,
    /// Combined document filter from all WHERE clauses
    pub filter: Option<DocFilter>,
    /// Group-by entries in declaration order
    pub group_bys: Vec<GroupByEntry>,
    /// Select expressions in declaration order
    pub selects: Vec<SelectItem>,
    /// Query option strings
    pub options: BTreeSet<String>,
    /// Row limit for the final result
    pub row_limit: Option<usize>,
    /// Compatibility flag for the older query-language version
    pub legacy: bool,
    /// Time zone the query's instants were resolved in
    #[serde(skip)]
    pub tz: FixedOffset,
    /// Position in the query text
    pub span: Span,

    #[serde(skip)]
    commands: OnceCell<Vec<Command>>,
    #[serde(skip)]
    totals: OnceCell<Vec<AggregateMetric>>,
}

/// Option string requesting grand totals
pub const OPT_TOTALS: &str = "totals";

impl Query {
    /// Start building a query
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// The lowered command list, computed on first access
    pub fn commands(&self, meta: &dyn DatasetsMetadata) -> CompileResult<&[Command]> {
        if let Some(commands) = self.commands.get() {
            return Ok(commands);
        }
        let (commands, totals) = crate::pipeline::compile(self, meta)?;
        self.totals.get_or_init(|| totals);
        Ok(self.commands.get_or_init(|| commands))
    }

    /// The grand-total select list, computed on first access
    pub fn totals(&self, meta: &dyn DatasetsMetadata) -> CompileResult<&[AggregateMetric]> {
        if let Some(totals) = self.totals.get() {
            return Ok(totals);
        }
        self.commands(meta)?;
        Ok(self.totals.get_or_init(Vec::new))
    }

    /// Rebuild this query with different clause lists, keeping everything
    /// else (used by transform passes)
    pub fn rebuilt(
        &self,
        filter: Option<DocFilter>,
        group_bys: Vec<GroupByEntry>,
        selects: Vec<SelectItem>,
    ) -> Self {
        Self {
            datasets: self.datasets.clone(),
            filter,
            group_bys,
            selects,
            options: self.options.clone(),
            row_limit: self.row_limit,
            legacy: self.legacy,
            tz: self.tz,
            span: self.span,
            commands: OnceCell::new(),
            totals: OnceCell::new(),
        }
    }
}

// Memo cells are derived state: two queries are equal when their declared
// content is, whether or not either has been compiled yet.
impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.datasets == other.datasets
            && self.filter == other.filter
            && self.group_bys == other.group_bys
            && self.selects == other.selects
            && self.options == other.options
            && self.row_limit == other.row_limit
            && self.legacy == other.legacy
            && self.tz == other.tz
    }
}

/// Builder for constructing queries
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    datasets: Vec<Dataset>,
    filter: Option<DocFilter>,
    group_bys: Vec<GroupByEntry>,
    selects: Vec<SelectItem>,
    options: BTreeSet<String>,
    row_limit: Option<usize>,
    legacy: bool,
    tz: FixedOffset,
    span: Span,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            filter: None,
            group_bys: Vec::new(),
            selects: Vec::new(),
            options: BTreeSet::new(),
            row_limit: None,
            legacy: false,
            tz: FixedOffset::east_opt(0).expect("zero offset is valid"),
            span: Span::default(),
        }
    }
}

impl QueryBuilder {
    pub fn dataset(mut self, dataset: Dataset) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn datasets(mut self, datasets: Vec<Dataset>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn filter(mut self, filter: DocFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter_opt(mut self, filter: Option<DocFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn group_by(mut self, entry: GroupByEntry) -> Self {
        self.group_bys.push(entry);
        self
    }

    pub fn select(mut self, item: SelectItem) -> Self {
        self.selects.push(item);
        self
    }

    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.insert(option.into());
        self
    }

    pub fn row_limit(mut self, limit: usize) -> Self {
        self.row_limit = Some(limit);
        self
    }

    pub fn legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn tz(mut self, tz: FixedOffset) -> Self {
        self.tz = tz;
        self
    }

    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Build the query, checking that dataset display names are pairwise
    /// distinct
    pub fn build(self) -> CompileResult<Query> {
        let mut seen = BTreeSet::new();
        for dataset in &self.datasets {
            if !seen.insert(dataset.display_name().to_string()) {
                return Err(CompileError::DuplicateDatasetName(
                    dataset.display_name().to_string(),
                ));
            }
        }
        Ok(Query {
            datasets: self.datasets,
            filter: self.filter,
            group_bys: self.group_bys,
            selects: self.selects,
            options: self.options,
            row_limit: self.row_limit,
            legacy: self.legacy,
            tz: self.tz,
            span: self.span,
            commands: OnceCell::new(),
            totals: OnceCell::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn instant(day: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_dataset_rejects_inverted_range() {
        let err = Dataset::new(
            "logs".to_string(),
            instant(10),
            instant(5),
            None,
            BTreeMap::new(),
            Span::default(),
        );
        assert!(matches!(err, Err(CompileError::InvalidTimeRange(_))));

        let err = Dataset::new(
            "logs".to_string(),
            instant(10),
            instant(10),
            None,
            BTreeMap::new(),
            Span::default(),
        );
        assert!(matches!(err, Err(CompileError::InvalidTimeRange(_))));
    }

    #[test]
    fn test_dataset_valid_range_keeps_bounds() {
        let d = Dataset::new(
            "logs".to_string(),
            instant(5),
            instant(10),
            None,
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap();
        assert_eq!(d.start, instant(5));
        assert_eq!(d.end, instant(10));
    }

    #[test]
    fn test_display_name_prefers_alias() {
        let d = Dataset::new(
            "logs_2024_03".to_string(),
            instant(5),
            instant(10),
            Some("logs".to_string()),
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap();
        assert_eq!(d.display_name(), "logs");
    }

    #[test]
    fn test_duplicate_display_names_rejected() {
        let a = Dataset::new(
            "logs_a".to_string(),
            instant(5),
            instant(10),
            Some("logs".to_string()),
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap();
        let b = Dataset::new(
            "logs_b".to_string(),
            instant(5),
            instant(10),
            Some("logs".to_string()),
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap();

        let err = Query::builder().dataset(a).dataset(b).build();
        assert!(matches!(err, Err(CompileError::DuplicateDatasetName(name)) if name == "logs"));
    }

    #[test]
    fn test_distinct_raw_names_accepted() {
        let a = Dataset::new(
            "logs".to_string(),
            instant(5),
            instant(10),
            None,
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap();
        let b = Dataset::new(
            "clicks".to_string(),
            instant(5),
            instant(10),
            None,
            BTreeMap::new(),
            Span::default(),
        )
        .unwrap();
        assert!(Query::builder().dataset(a).dataset(b).build().is_ok());
    }

    #[test]
    fn test_query_equality_ignores_memo_state() {
        let q1 = Query::builder().build().unwrap();
        let q2 = Query::builder().build().unwrap();
        assert_eq!(q1, q2);
    }
}
