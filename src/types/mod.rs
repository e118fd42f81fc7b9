#![forbid(unsafe_code)]

//! Shared identifiers, depth requests and the crate error type.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a node or relationship inside one keyspace.
///
/// Node and relationship identifiers live in separate keyspaces, so the same
/// `EntityId` may name one node and one relationship at the same time.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub enum EntityId {
    /// Never written to the database.
    #[default]
    Unsaved,
    /// Provisional identity handed out during a single save pass.
    Pending(u32),
    /// Identity assigned by the database.
    Persisted(i64),
}

impl EntityId {
    /// Returns the database identifier, if one has been assigned.
    pub fn persisted(self) -> Option<i64> {
        match self {
            EntityId::Persisted(id) => Some(id),
            _ => None,
        }
    }

    /// True once the database has assigned an identifier.
    pub fn is_persisted(self) -> bool {
        matches!(self, EntityId::Persisted(_))
    }

    /// True for provisional save-pass identities.
    pub fn is_pending(self) -> bool {
        matches!(self, EntityId::Pending(_))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Unsaved => write!(f, "unsaved"),
            EntityId::Pending(seq) => write!(f, "_{seq}"),
            EntityId::Persisted(id) if *id < 0 => write!(f, "_{}", id.unsigned_abs()),
            EntityId::Persisted(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Persisted(value)
    }
}

/// Traversal radius for loads and saves, counted in relationship hops.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    /// Traverse at most this many relationship hops away from each root.
    Bounded(u32),
    /// Traverse everything reachable.
    Unbounded,
}

impl Depth {
    /// Sentinel step limit used for unbounded traversals.
    pub const UNBOUNDED_STEPS: u32 = u32::MAX;

    /// Step limit for the node/relationship alternating traversal.
    ///
    /// A hop is two steps: one onto the relationship, one onto the far node.
    pub fn step_limit(self) -> u32 {
        match self {
            Depth::Bounded(hops) => hops.saturating_mul(2),
            Depth::Unbounded => Self::UNBOUNDED_STEPS,
        }
    }

    /// Inverse of [`Depth::step_limit`], used when re-deriving a depth from a
    /// cached entity.
    pub fn from_steps(steps: u32) -> Self {
        if steps == Self::UNBOUNDED_STEPS {
            Depth::Unbounded
        } else {
            Depth::Bounded(steps / 2)
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Bounded(1)
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Bounded(hops) => write!(f, "{hops}"),
            Depth::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Schema mapping is missing, ambiguous or was handed an invalid value.
    #[error("schema error: {0}")]
    Schema(String),
    /// Statement transport or execution failed.
    #[error("query error: {0}")]
    Query(String),
    /// The caller asked for something the engine cannot answer consistently.
    #[error("consistency error: {0}")]
    Consistency(String),
    /// Invalid argument passed to an API.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A required element was not found.
    #[error("not found: {0}")]
    NotFound(&'static str),
    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Stable identifier for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::Schema(_) => "SCHEMA",
            GraphError::Query(_) => "QUERY",
            GraphError::Consistency(_) => "CONSISTENCY",
            GraphError::InvalidArgument(_) => "INVALID_ARGUMENT",
            GraphError::NotFound(_) => "NOT_FOUND",
            GraphError::Config(_) => "CONFIG",
            GraphError::Io(_) => "IO",
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
