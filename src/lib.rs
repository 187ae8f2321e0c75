//! # Lodestar
//!
//! Query Compiler Middle-End - semantic analysis and logical planning for an
//! analytic query language over a distributed time-sharded store.
//!
//! ## Features
//!
//! - **Dataset resolution**: FROM-clause entries become absolute time ranges
//!   via an injected clock, with relative words, periods, and literals
//! - **Fourteen grouping shapes**: a closed sum type covering metric, time,
//!   field, percentile, random, and predicate explosions
//! - **Rewrite pipeline**: a committed twelve-pass order from named-metric
//!   substitution down to the runtime command list
//! - **Exact calendar arithmetic**: month/quarter/year buckets that survive
//!   uneven month lengths
//! - **Deterministic**: compilation is a pure function of the query, the
//!   metadata, and an injected clock
//!
//! ## Modules
//!
//! - [`build`]: clause-to-AST builders (datasets, groupings, whole queries)
//! - [`ast`]: the query tree, grouping shapes, and expression nodes
//! - [`pipeline`]: the fixed-order pass sequence
//! - [`plan`]: execution steps and the runtime command list
//! - [`time`]: time-point resolution, period parsing, calendar arithmetic
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lodestar::build::{build_query, DatasetClause, QueryClause, SelectClause};
//! use lodestar::context::{CompileContext, SystemClock, TracingWarnings};
//! use lodestar::metadata::{MapResolver, SchemaMetadata};
//! use lodestar::time::{DefaultPeriodParser, TimeExpr};
//! use lodestar::{AggregateMetric, DocMetric};
//! use chrono::FixedOffset;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = SystemClock;
//!     let ctx = CompileContext::new(
//!         &clock,
//!         &TracingWarnings,
//!         &DefaultPeriodParser,
//!         FixedOffset::east_opt(0).unwrap(),
//!     );
//!
//!     // FROM logs "yesterday" "today" SELECT count()
//!     let clause = QueryClause {
//!         datasets: vec![DatasetClause::new(
//!             "logs",
//!             TimeExpr::Word("yesterday".to_string()),
//!             TimeExpr::Word("today".to_string()),
//!         )],
//!         selects: vec![SelectClause::new(AggregateMetric::DocStats(Box::new(
//!             DocMetric::Count,
//!         )))],
//!         ..QueryClause::default()
//!     };
//!
//!     let resolver = MapResolver::new(&["logs"]);
//!     let query = build_query(&clause, &ctx, &resolver)?;
//!
//!     // Lazily lowered on first access, memoized after
//!     let commands = query.commands(&SchemaMetadata::new())?;
//!     println!("{} commands", commands.len());
//!
//!     Ok(())
//! }
//! ```

pub mod ast;
pub mod build;
pub mod context;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod plan;
pub mod time;
pub mod transform;

// Re-export top-level types for convenience
pub use ast::{
    AggregateFilter, AggregateMetric, Dataset, DocFilter, DocMetric, GroupBy, GroupByEntry,
    Query, QueryBuilder, SelectItem, Span, Term, OPT_TOTALS,
};

pub use build::{
    build_dataset, build_group_by, build_query, DatasetClause, GroupByClause, GroupByClauseNode,
    QueryClause, SelectClause,
};

pub use context::{
    AggregateContext, CompileContext, FixedClock, ScopeMarker, SystemClock, TracingWarnings,
    WallClock, WarningSink,
};

pub use error::{CompileError, CompileResult};

pub use metadata::{
    DatasetsMetadata, FieldResolver, FieldSet, FieldType, MapResolver, SchemaMetadata,
    ScopedFieldResolver,
};

pub use pipeline::compile;

pub use plan::{Command, ExecutionStep, Precomputed};

pub use time::{
    infer_bucket_millis, resolve_range, resolve_time, CalendarPeriod, DefaultPeriodParser,
    PeriodParser, TimeExpr, TimeUnit,
};

pub use transform::{Rewrite, Transform};
