#![forbid(unsafe_code)]

//! Statement synthesis.
//!
//! This module turns entity snapshots into statements: per-entity fragments,
//! the merged single-statement write, and the bulk load/delete/count
//! statements.

/// Statement and clause model with deterministic rendering.
///
/// Shared by the synthesizer and every driver.
pub mod ast;

/// Per-entity fragment builder and dirty detection.
pub mod builder;

/// Merging fragments into a single write statement.
pub mod clauses;

/// Property values exchanged with drivers.
pub mod value;

pub use ast::{Clause, EntityTarget, IdSelector, Params, Projection, Statement, WriteQuery};
pub use builder::{EntityQuery, Fragment, MatchKey};
pub use clauses::ClauseSet;
pub use value::{Properties, Value};
