//! Building AST nodes from parse-tree clauses
//!
//! The surface grammar lives in a front end outside this crate; what arrives
//! here are closed clause enums. Each builder is an exhaustive match over
//! one of them — an unrecognized shape is a compile-time impossibility, not
//! a runtime check.

pub mod dataset;
pub mod group_by;
pub mod query;

pub use dataset::{build_dataset, DatasetClause};
pub use group_by::{
    build_group_by, build_group_by_entry, group_by_from_time_terms, GroupByClause,
    GroupByClauseNode,
};
pub use query::{build_query, QueryClause, SelectClause};
