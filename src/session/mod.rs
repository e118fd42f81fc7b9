#![forbid(unsafe_code)]

//! Unit of work between domain objects and the database.
//!
//! A [`Session`] owns a [`Driver`], the identity-mapped [`Store`] and the
//! schema [`Registry`]. Loads hydrate objects from bounded path fetches,
//! saves diff object graphs against the store and issue one write statement
//! per call, and deletes cascade through the cache. Caller-written
//! statements can be run raw or hydrated like a load. Everything runs on the
//! calling thread; a session is not shared between threads.

pub mod config;
mod deleter;
pub mod events;
mod loader;
mod raw;
mod saver;
pub mod transaction;

use std::sync::Arc;

use tracing::{debug, info};

use crate::driver::{Driver, Row};
use crate::model::{EntityKind, EntityRef, GraphEntity, Handle};
use crate::query::ast::{EntityTarget, Statement};
use crate::query::builder;
use crate::schema::{EntitySchema, Registry};
use crate::store::Store;
use crate::types::{EntityId, GraphError, Result};

pub use config::{SessionConfig, DEFAULT_MAX_DEPTH};
pub use events::{Event, EventListener, Lifecycle};
pub use loader::LoadKey;
pub use transaction::{Transaction, TxState};

use events::{Batch, Listeners};

/// Object-graph mapper session.
pub struct Session {
    driver: Box<dyn Driver>,
    store: Store,
    registry: Arc<Registry>,
    listeners: Listeners,
    config: SessionConfig,
    in_transaction: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl Session {
    /// Session with default configuration.
    pub fn new(driver: impl Driver + 'static, registry: Registry) -> Self {
        Self::with_config(driver, registry, SessionConfig::default())
    }

    /// Session with explicit configuration.
    pub fn with_config(
        driver: impl Driver + 'static,
        registry: Registry,
        config: SessionConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        Self {
            driver: Box::new(driver),
            store: Store::new(registry.clone()),
            registry,
            listeners: Listeners::default(),
            config,
            in_transaction: false,
        }
    }

    /// Registered domain types.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identity-mapped cache.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// True while a [`Transaction`] is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Adds a lifecycle listener. Listeners run in registration order.
    pub fn register_event_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.register(listener);
    }

    /// Removes a listener previously registered with the same `Arc`.
    pub fn dispose_event_listener(&mut self, listener: &Arc<dyn EventListener>) -> Result<()> {
        if self.listeners.dispose(listener) {
            Ok(())
        } else {
            Err(GraphError::NotFound("event listener"))
        }
    }

    /// Drops every cached entity without notifying anyone.
    ///
    /// Objects keep their ids; the next save matches them by id.
    pub fn clear(&mut self) {
        debug!(entities = self.store.len(), "session.clear");
        self.store.clear();
    }

    /// Issues the uniqueness constraints and indexes every registered node
    /// type declares. Returns the number of statements run.
    pub fn create_schema(&mut self) -> Result<usize> {
        let statements = self.registry.schema_statements();
        for statement in &statements {
            self.run(statement)?;
        }
        info!(statements = statements.len(), "session.create_schema");
        Ok(statements.len())
    }

    /// Number of stored entities of a registered type.
    pub fn count_entities_of_type(&mut self, type_name: &str) -> Result<i64> {
        let target = self.target(type_name)?;
        let rows = self.run(&builder::count(target))?;
        rows.first()
            .and_then(|row| row.get("count"))
            .and_then(|count| count.as_int())
            .ok_or_else(|| GraphError::Query(format!("count of '{type_name}' returned no value")))
    }

    /// Releases the driver.
    pub fn close(mut self) -> Result<()> {
        self.driver.close()
    }

    pub(crate) fn run(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        execute(self.driver.as_mut(), &self.config, statement)
    }

    /// Kind of entity a registered type maps to.
    pub(crate) fn kind_of(&self, type_name: &str) -> Result<EntityKind> {
        Ok(if self.registry.get(type_name)?.is_relationship() {
            EntityKind::Relationship
        } else {
            EntityKind::Node
        })
    }

    /// Arena key of a domain object.
    pub(crate) fn entity_ref(&self, handle: &Handle) -> Result<EntityRef> {
        Ok(EntityRef {
            kind: self.kind_of(&handle.type_name())?,
            id: handle.id(),
        })
    }

    /// Bulk-statement target of a registered type.
    pub(crate) fn target(&self, type_name: &str) -> Result<EntityTarget> {
        Ok(match self.registry.get(type_name)?.as_ref() {
            EntitySchema::Node(node) => EntityTarget::Node {
                label: node.struct_label(),
            },
            EntitySchema::Relationship(rel) => EntityTarget::Relationship {
                rel_type: rel.backend_type().to_owned(),
            },
        })
    }
}

/// Runs one statement, logging its text when configured to.
fn execute(driver: &mut dyn Driver, config: &SessionConfig, statement: &Statement) -> Result<Vec<Row>> {
    if config.log_statements {
        info!(statement = statement.name(), text = %statement.text(), "session.statement");
    } else {
        debug!(statement = statement.name(), "session.statement");
    }
    driver.run(statement)
}

/// Reports cascade-deleted entities and the neighbours they left behind.
///
/// Deleted objects receive their delete notification and lose their id.
fn notify_removed(store: &Store, batch: &mut Batch<'_>, deleted: &[GraphEntity], updated: &[EntityRef]) {
    for entity in deleted {
        if let Some(object) = entity.value() {
            batch.post_delete(object);
            object.write().set_id(EntityId::Unsaved);
        }
    }
    for entity in updated {
        if deleted.iter().any(|d| d.entity_ref() == *entity) {
            continue;
        }
        if let Some(object) = store.get(*entity).and_then(|e| e.value().cloned()) {
            batch.updated(&object);
        }
    }
}
