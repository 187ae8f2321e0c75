//! Query abstract syntax tree
//!
//! The node kinds the compiler middle-end owns:
//!
//! - **Query / Dataset / GroupByEntry**: the query-level tree
//! - **GroupBy**: the fourteen grouping shapes and their lowering
//! - **Expressions**: per-document and per-group metrics and filters

pub mod expr;
pub mod group_by;
pub mod query;

pub use expr::{AggregateFilter, AggregateMetric, DocFilter, DocMetric, Term};
pub use group_by::{
    GroupBy, GroupByDayOfWeek, GroupByField, GroupByFieldIn, GroupByFieldInQuery,
    GroupByInferredTime, GroupByMetric, GroupByMonth, GroupByPredicate, GroupByQuantiles,
    GroupByRandom, GroupByRandomMetric, GroupBySessionName, GroupByTime, GroupByTimeBuckets,
};
pub use query::{Dataset, GroupByEntry, Query, QueryBuilder, SelectItem, Span, OPT_TOTALS};
