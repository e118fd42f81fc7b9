#![forbid(unsafe_code)]

//! Statement transport.
//!
//! The engine talks to the database only through [`Driver`]: one call per
//! statement plus explicit transaction control. A network driver renders
//! [`Statement::text`] with [`Statement::params`]; [`MemoryDriver`]
//! interprets the statement structure against an in-process graph and is
//! used by the demo binary and the test suites.

mod memory;

use std::collections::BTreeMap;

use crate::query::ast::Statement;
use crate::query::value::Value;
use crate::types::Result;

pub use memory::MemoryDriver;

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Executes statements against a graph database.
pub trait Driver: Send {
    /// Runs one statement and returns every result row.
    fn run(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Opens a transaction; statements run inside it until commit or rollback.
    fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Discards the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Releases the connection.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
