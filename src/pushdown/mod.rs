//! Filter Pushdown
//!
//! Splits caller filters into origin request parameters and predicates
//! evaluated locally on the fetched table.
//!
//! # Design
//!
//! - Only columns with an explicit mapping are ever pushed
//! - Anything that cannot be pushed exactly is evaluated locally
//! - Malformed filter specs are dropped with a warning, never raised

mod evaluator;
mod mapper;
mod predicate;

pub use evaluator::{apply_predicates, filter_table, LocalFilterOutcome};
pub use mapper::{ColumnMapping, PushdownMapper, PushdownResult};
pub use predicate::{parse_filters, FilterOp, FilterPredicate, Filters};
