#![forbid(unsafe_code)]

//! Identity-mapped session cache.
//!
//! The store is the authoritative record of every entity the session has
//! seen, keyed by entity id, with two secondary indexes:
//!
//! * phantom relationships by `(start, end, type)`, so a relationship with no
//!   domain object can be matched again on the next save;
//! * entities by `(type name, custom id)`, for types that declare one.
//!
//! The mutex guards raw map mutation only. Callers sequence multi-step
//! updates themselves; a session is used from one thread at a time.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::model::{EntityKind, EntityRef, Graph, GraphEntity};
use crate::query::value::Value;
use crate::schema::SchemaProvider;
use crate::types::EntityId;

/// Hashable form of a scalar custom-id value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ScalarKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    String(String),
}

impl ScalarKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(ScalarKey::Bool(*v)),
            Value::Int(v) => Some(ScalarKey::Int(*v)),
            Value::Float(v) => Some(ScalarKey::Float(v.to_bits())),
            Value::String(v) => Some(ScalarKey::String(v.clone())),
            _ => None,
        }
    }
}

type PhantomKey = (EntityId, EntityId, String);
type CustomKey = (String, ScalarKey);

#[derive(Default)]
struct StoreInner {
    graph: Graph,
    phantoms: FxHashMap<PhantomKey, EntityId>,
    custom_ids: FxHashMap<CustomKey, EntityRef>,
    custom_keys: FxHashMap<EntityRef, CustomKey>,
}

impl StoreInner {
    fn unindex(&mut self, entity: &GraphEntity) {
        if let Some(key) = self.custom_keys.remove(&entity.entity_ref()) {
            self.custom_ids.remove(&key);
        }
        if let GraphEntity::Relationship(rel) = entity {
            let key = (rel.start, rel.end, rel.rel_type.clone());
            if self.phantoms.get(&key) == Some(&rel.id) {
                self.phantoms.remove(&key);
            }
        }
    }

    fn remove(
        &mut self,
        entity: EntityRef,
        deleted: &mut Vec<GraphEntity>,
        updated: &mut Vec<EntityRef>,
    ) {
        match entity.kind {
            EntityKind::Node => {
                let Some(node) = self.graph.node(entity.id) else {
                    return;
                };
                let incident: Vec<EntityId> = node.relationships.iter().copied().collect();
                for rel_id in incident {
                    self.remove(EntityRef::relationship(rel_id), deleted, updated);
                }
                if let Some(node) = self.graph.remove_node(entity.id) {
                    let node = GraphEntity::Node(node);
                    self.unindex(&node);
                    deleted.push(node);
                }
            }
            EntityKind::Relationship => {
                let Some(rel) = self.graph.remove_relationship(entity.id) else {
                    return;
                };
                for endpoint in [rel.start, rel.end] {
                    if self.graph.node(endpoint).is_some() {
                        updated.push(EntityRef::node(endpoint));
                    }
                }
                let rel = GraphEntity::Relationship(rel);
                self.unindex(&rel);
                deleted.push(rel);
            }
        }
    }
}

/// Session cache of nodes and relationships.
pub struct Store {
    inner: Mutex<StoreInner>,
    schema: Arc<dyn SchemaProvider>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("entities", &inner.graph.len())
            .field("phantoms", &inner.phantoms.len())
            .field("custom_ids", &inner.custom_ids.len())
            .finish()
    }
}

impl Store {
    /// Empty store resolving custom-id fields through `schema`.
    pub fn new(schema: Arc<dyn SchemaProvider>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            schema,
        }
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.lock().graph.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().graph.is_empty()
    }

    /// Owned copy of a cached entity.
    pub fn get(&self, entity: EntityRef) -> Option<GraphEntity> {
        self.inner.lock().graph.get(entity)
    }

    /// Cached entity of `type_name` whose custom id equals `value`.
    pub fn get_by_custom_id(&self, type_name: &str, value: &Value) -> Option<GraphEntity> {
        let key = (type_name.to_owned(), ScalarKey::from_value(value)?);
        let inner = self.inner.lock();
        let entity = *inner.custom_ids.get(&key)?;
        inner.graph.get(entity)
    }

    /// Id of a cached phantom relationship between two nodes.
    pub fn phantom(&self, start: EntityId, end: EntityId, rel_type: &str) -> Option<EntityId> {
        self.inner
            .lock()
            .phantoms
            .get(&(start, end, rel_type.to_owned()))
            .copied()
    }

    /// Runs `f` against the cached graph while holding the lock.
    pub fn with_graph<R>(&self, f: impl FnOnce(&Graph) -> R) -> R {
        f(&self.inner.lock().graph)
    }

    /// Cached entities reachable from `root` within `step_limit` steps.
    pub fn unwind(&self, root: EntityRef, step_limit: u32) -> Vec<(EntityRef, u32)> {
        self.inner.lock().graph.unwind(root, step_limit)
    }

    /// Inserts or overwrites an entity and refreshes both indexes.
    ///
    /// A saved relationship is mirrored into whichever endpoints are cached.
    pub fn save(&self, entity: GraphEntity) {
        let custom = entity.value().and_then(|handle| {
            let type_name = handle.type_name();
            let field = self.schema.custom_id_field(&type_name).ok().flatten()?;
            let key = ScalarKey::from_value(entity.properties().get(&field)?)?;
            Some((type_name, key))
        });

        let mut inner = self.inner.lock();
        let entity_ref = entity.entity_ref();
        if let Some(previous) = inner.graph.get(entity_ref) {
            inner.unindex(&previous);
        }
        if let Some(key) = custom {
            inner.custom_ids.insert(key.clone(), entity_ref);
            inner.custom_keys.insert(entity_ref, key);
        }
        match entity {
            GraphEntity::Node(node) => {
                inner.graph.insert_node(node);
            }
            GraphEntity::Relationship(rel) => {
                if rel.is_phantom() && rel.id.is_persisted() {
                    inner
                        .phantoms
                        .insert((rel.start, rel.end, rel.rel_type.clone()), rel.id);
                }
                inner.graph.insert_relationship(rel);
            }
        }
    }

    /// Removes an entity.
    ///
    /// Deleting a node first deletes every incident relationship. Returns
    /// the removed entities and the surviving nodes whose adjacency shrank.
    pub fn delete(&self, entity: EntityRef) -> (Vec<GraphEntity>, Vec<EntityRef>) {
        let mut deleted = Vec::new();
        let mut updated = Vec::new();
        self.inner.lock().remove(entity, &mut deleted, &mut updated);

        updated.sort();
        updated.dedup();
        updated.retain(|e| !deleted.iter().any(|d| d.entity_ref() == *e));
        if deleted.len() > 1 {
            debug!(
                entity = %entity.signature(),
                deleted = deleted.len(),
                updated = updated.len(),
                "store.delete.cascade"
            );
        }
        (deleted, updated)
    }

    /// Removes everything, returning what was cached.
    pub fn purge(&self) -> Vec<GraphEntity> {
        let mut inner = self.inner.lock();
        let graph = std::mem::take(&mut inner.graph);
        *inner = StoreInner::default();
        let mut deleted: Vec<GraphEntity> = graph.nodes().cloned().map(GraphEntity::Node).collect();
        deleted.extend(graph.relationships().cloned().map(GraphEntity::Relationship));
        debug!(deleted = deleted.len(), "store.purge");
        deleted
    }

    /// Resets to empty without reporting anything.
    pub fn clear(&self) {
        *self.inner.lock() = StoreInner::default();
    }
}
