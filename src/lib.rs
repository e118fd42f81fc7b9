//! Penumbra: synchronization engine of an object-graph mapper.
//!
//! Domain objects ([`Object`] behind shared [`Handle`]s) are described to a
//! [`Registry`] and moved to and from a property-graph database by a
//! [`Session`]. The session keeps an identity-mapped [`Store`] so every
//! persisted entity has exactly one in-memory object, loads bounded
//! neighbourhoods in one round trip, and turns each save into a single
//! statement that only touches what changed.
//!
//! ```rust
//! use penumbra::{Depth, FieldType, MemoryDriver, NodeSchema, Object, Registry, RelationField, Session, Target};
//!
//! let mut registry = Registry::new();
//! registry.register_node(
//!     NodeSchema::new("Person")
//!         .property("name", FieldType::String)
//!         .relation(RelationField::outgoing("friend", Target::Node("Person".into()))),
//! )?;
//! let mut session = Session::new(MemoryDriver::new(), registry);
//!
//! let bob = Object::new("Person").with_property("name", "Bob").into_handle();
//! let alice = Object::new("Person")
//!     .with_property("name", "Alice")
//!     .with_related("friend", bob.clone())
//!     .into_handle();
//! session.save(&alice)?;
//!
//! let id = alice.id().persisted().expect("saved");
//! let loaded = session.load_depth("Person", id, Depth::Bounded(1))?;
//! assert!(loaded.ptr_eq(&alice));
//! # Ok::<(), penumbra::GraphError>(())
//! ```

#![warn(missing_docs)]

pub mod driver;
pub mod model;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
pub mod types;

pub use driver::{Driver, MemoryDriver, Row};
pub use model::{EntityKind, EntityRef, Graph, GraphEntity, Handle, Node, Object, Related, Relationship};
pub use query::ast::Params;
pub use query::value::{Properties, Value};
pub use schema::{
    Direction, FieldType, NodeSchema, Registry, RelationField, RelationshipSchema, SchemaProvider,
    Target,
};
pub use session::{
    Event, EventListener, Lifecycle, LoadKey, Session, SessionConfig, Transaction, TxState,
};
pub use store::Store;
pub use types::{Depth, EntityId, GraphError, Result};
