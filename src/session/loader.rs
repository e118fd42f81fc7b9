//! Load pass: one path fetch hydrated into the identity map.
//!
//! Rows are decoded into a scratch [`Graph`] first. Hydration then walks the
//! scratch graph from each root up to the requested radius and runs in two
//! phases: everything that can fail (type resolution, field lookup) is
//! decided up front, and only then are objects created or refreshed and the
//! cache written.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::debug;

use super::{execute, notify_removed, Session};
use crate::driver::Row;
use crate::model::{
    join_labels, mirror_id, EntityKind, EntityRef, Graph, GraphEntity, Handle, Node, Object,
    Relationship,
};
use crate::query::ast::IdSelector;
use crate::query::builder;
use crate::query::value::{NodeValue, Properties, RelationshipValue, Value};
use crate::schema::coerce::unflatten;
use crate::schema::{EntitySchema, SchemaProvider, Target};
use crate::types::{Depth, EntityId, GraphError, Result};

/// Identifies a root to load.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadKey {
    /// Internal database id.
    Internal(i64),
    /// Value of the type's custom-id property.
    Custom(Value),
}

impl From<i64> for LoadKey {
    fn from(id: i64) -> Self {
        LoadKey::Internal(id)
    }
}

impl From<&str> for LoadKey {
    fn from(value: &str) -> Self {
        LoadKey::Custom(Value::from(value))
    }
}

impl From<String> for LoadKey {
    fn from(value: String) -> Self {
        LoadKey::Custom(Value::String(value))
    }
}

impl From<Value> for LoadKey {
    fn from(value: Value) -> Self {
        LoadKey::Custom(value)
    }
}

/// Result of hydrating one fetch.
pub(super) struct Hydrated {
    pub(super) roots: Vec<Handle>,
    entities: BTreeSet<EntityRef>,
}

/// Per-entity decisions made before anything is written.
struct Planned {
    entity: EntityRef,
    type_name: Option<String>,
    depth: u32,
    keep: bool,
    /// Incident relationships were not all fetched.
    frontier: bool,
}

impl Session {
    /// Loads one entity by key at
    /// [`SessionConfig::default_load_depth`](super::SessionConfig).
    pub fn load(&mut self, type_name: &str, key: impl Into<LoadKey>) -> Result<Handle> {
        let depth = self.config.default_load_depth;
        self.load_depth(type_name, key, depth)
    }

    /// Loads one entity by key with its neighbourhood up to `depth` hops.
    ///
    /// An entity already cached to at least `depth` is returned from the
    /// cache without a round trip.
    pub fn load_depth(
        &mut self,
        type_name: &str,
        key: impl Into<LoadKey>,
        depth: Depth,
    ) -> Result<Handle> {
        self.config.check_depth(depth)?;
        let roots = self.load_roots(type_name, Some(vec![key.into()]), depth, false, true)?;
        roots
            .into_iter()
            .next()
            .ok_or(GraphError::NotFound("entity"))
    }

    /// Loads every entity of a type, or those matching `keys`.
    pub fn load_all(
        &mut self,
        type_name: &str,
        keys: Option<Vec<LoadKey>>,
        depth: Depth,
    ) -> Result<Vec<Handle>> {
        self.config.check_depth(depth)?;
        self.load_roots(type_name, keys, depth, false, false)
    }

    /// Refreshes objects from the database at their cached depth.
    ///
    /// Entities that were reachable before but no longer exist are removed
    /// from the cache with delete notifications. A handle whose entity is
    /// gone is marked unsaved. Each slot receives the canonical object.
    pub fn reload(&mut self, objects: &mut [Handle]) -> Result<()> {
        for object in objects.iter_mut() {
            *object = self.reload_one(object)?;
        }
        Ok(())
    }

    fn reload_one(&mut self, object: &Handle) -> Result<Handle> {
        let type_name = object.type_name();
        let entity = self.entity_ref(object)?;
        let Some(db_id) = entity.id.persisted() else {
            return Err(GraphError::InvalidArgument(format!(
                "cannot reload an unsaved '{type_name}'"
            )));
        };
        let depth = self
            .store
            .get(entity)
            .and_then(|cached| cached.depth())
            .map(Depth::from_steps)
            .unwrap_or(self.config.default_load_depth);
        let previous: Vec<EntityRef> = self
            .store
            .unwind(entity, depth.step_limit())
            .into_iter()
            .map(|(e, _)| e)
            .collect();

        let hydrated = self.fetch(
            &type_name,
            Some(IdSelector::Internal(vec![db_id])),
            depth,
            true,
            true,
        )?;

        let mut deleted = Vec::new();
        let mut updated = Vec::new();
        for stale in previous.iter().filter(|e| !hydrated.entities.contains(e)) {
            let (d, u) = self.store.delete(*stale);
            deleted.extend(d);
            updated.extend(u);
        }
        if !deleted.is_empty() {
            debug!(
                root = %entity.signature(),
                deleted = deleted.len(),
                "session.reload.stale"
            );
        }
        let mut batch = self.listeners.batch();
        notify_removed(&self.store, &mut batch, &deleted, &updated);
        drop(batch);

        match hydrated.roots.into_iter().next() {
            Some(canonical) => Ok(canonical),
            None => {
                object.write().set_id(EntityId::Unsaved);
                Ok(object.clone())
            }
        }
    }

    fn load_roots(
        &mut self,
        type_name: &str,
        keys: Option<Vec<LoadKey>>,
        depth: Depth,
        reload: bool,
        by_id: bool,
    ) -> Result<Vec<Handle>> {
        let schema = self.registry.get(type_name)?;
        let Some(keys) = keys else {
            return Ok(self.fetch(type_name, None, depth, reload, by_id)?.roots);
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = normalize(keys, schema.custom_id())?;

        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for key in keys {
            match self.cached(type_name, &key, depth, reload) {
                Some(object) => hits.push(object),
                None => misses.push(key),
            }
        }
        if misses.is_empty() {
            debug!(type_name, hits = hits.len(), "session.load.cache_hit");
            return Ok(hits);
        }

        let by_property = matches!(misses.first(), Some(LoadKey::Custom(_)));
        let selector = match schema.custom_id() {
            Some(property) if by_property => IdSelector::Property {
                property: property.to_owned(),
                values: misses
                    .into_iter()
                    .filter_map(|key| match key {
                        LoadKey::Custom(value) => Some(value),
                        LoadKey::Internal(_) => None,
                    })
                    .collect(),
            },
            _ => IdSelector::Internal(
                misses
                    .into_iter()
                    .filter_map(|key| match key {
                        LoadKey::Internal(id) => Some(id),
                        LoadKey::Custom(_) => None,
                    })
                    .collect(),
            ),
        };
        let hydrated = self.fetch(type_name, Some(selector), depth, reload, by_id)?;
        hits.extend(hydrated.roots);
        Ok(hits)
    }

    /// Cached object for `key`, if known to at least `depth`.
    fn cached(&self, type_name: &str, key: &LoadKey, depth: Depth, reload: bool) -> Option<Handle> {
        if reload || depth == Depth::Unbounded {
            return None;
        }
        let entity = match key {
            LoadKey::Internal(id) => {
                let kind = self.kind_of(type_name).ok()?;
                self.store.get(EntityRef {
                    kind,
                    id: EntityId::Persisted(*id),
                })?
            }
            LoadKey::Custom(value) => self.store.get_by_custom_id(type_name, value)?,
        };
        let object = entity.value()?;
        if object.type_name() != type_name {
            return None;
        }
        (entity.depth()? >= depth.step_limit()).then(|| object.clone())
    }

    fn fetch(
        &mut self,
        type_name: &str,
        selector: Option<IdSelector>,
        depth: Depth,
        reload: bool,
        by_id: bool,
    ) -> Result<Hydrated> {
        let kind = self.kind_of(type_name)?;
        let target = self.target(type_name)?;
        let statement = builder::load_all(target, selector, depth);
        let rows = execute(self.driver.as_mut(), &self.config, &statement)?;
        let root_column = match kind {
            EntityKind::Node => "ID(n)",
            EntityKind::Relationship => "ID(r)",
        };
        let (scratch, roots) = decode(&rows, root_column)?;
        if by_id && roots.len() > 1 {
            return Err(GraphError::Consistency(format!(
                "loading '{type_name}' by id returned {} roots",
                roots.len()
            )));
        }
        let roots: Vec<EntityRef> = roots
            .into_iter()
            .map(|id| EntityRef {
                kind,
                id: EntityId::Persisted(id),
            })
            .collect();
        let hydrated = self.hydrate(type_name, &roots, &scratch, depth.step_limit(), reload)?;
        debug!(
            type_name,
            rows = rows.len(),
            roots = hydrated.roots.len(),
            entities = hydrated.entities.len(),
            "session.load.hydrate"
        );
        Ok(hydrated)
    }

    pub(super) fn hydrate(
        &self,
        type_name: &str,
        roots: &[EntityRef],
        scratch: &Graph,
        step_limit: u32,
        reload: bool,
    ) -> Result<Hydrated> {
        let mut distances: BTreeMap<EntityRef, u32> = BTreeMap::new();
        let mut order = Vec::new();
        for root in roots {
            for (entity, distance) in scratch.unwind(*root, step_limit) {
                match distances.get_mut(&entity) {
                    Some(known) => *known = (*known).min(distance),
                    None => {
                        distances.insert(entity, distance);
                        order.push(entity);
                    }
                }
            }
        }

        // Decide types, depths and what to keep. Nothing is written yet.
        let mut planned = Vec::with_capacity(order.len());
        let mut schemas: FxHashMap<String, std::sync::Arc<EntitySchema>> = FxHashMap::default();
        for entity in &order {
            let type_for = match entity.kind {
                EntityKind::Node if roots.contains(entity) => Some(type_name.to_owned()),
                EntityKind::Node => scratch
                    .node(entity.id)
                    .and_then(|node| self.registry.node_type_for_label(&node.label)),
                EntityKind::Relationship if roots.contains(entity) => Some(type_name.to_owned()),
                EntityKind::Relationship => scratch
                    .relationship(entity.id)
                    .and_then(|rel| self.registry.relationship_type_for(&rel.rel_type)),
            };
            if let Some(name) = &type_for {
                if !schemas.contains_key(name) {
                    schemas.insert(name.clone(), self.registry.get(name)?);
                }
            }
            // Endpoints of a relationship on the boundary sit one step past
            // the limit and are cached at depth zero.
            let distance = distances[entity];
            let (depth, frontier) = if step_limit == Depth::UNBOUNDED_STEPS {
                (Depth::UNBOUNDED_STEPS, false)
            } else {
                (
                    step_limit.saturating_sub(distance),
                    entity.kind == EntityKind::Node && distance >= step_limit,
                )
            };
            let keep = !reload
                && self.store.get(*entity).is_some_and(|cached| {
                    cached.depth().is_some_and(|known| known >= depth)
                        && cached
                            .value()
                            .is_some_and(|object| Some(object.type_name()) == type_for)
                });
            planned.push(Planned {
                entity: *entity,
                type_name: type_for,
                depth,
                keep,
                frontier,
            });
        }
        let typed: FxHashMap<EntityRef, &Planned> = planned
            .iter()
            .filter(|p| p.type_name.is_some())
            .map(|p| (p.entity, p))
            .collect();

        // Field assignments of refreshed nodes.
        let mut assignments: Vec<(EntityRef, String, bool, EntityRef)> = Vec::new();
        for plan in planned.iter().filter(|p| !p.keep) {
            let (EntityKind::Node, Some(node_type)) = (plan.entity.kind, &plan.type_name) else {
                continue;
            };
            let Some(node) = scratch.node(plan.entity.id) else {
                continue;
            };
            for rel_id in &node.relationships {
                let rel_ref = EntityRef::relationship(*rel_id);
                if !distances.contains_key(&rel_ref) {
                    continue;
                }
                let Some(rel) = scratch.relationship(*rel_id) else {
                    continue;
                };
                let Some(field) = self.registry.graph_field(node_type, node.id, rel, scratch)?
                else {
                    continue;
                };
                let target = match field.target {
                    Target::Relationship(_) => rel_ref,
                    Target::Node(_) => EntityRef::node(rel.other(node.id)),
                };
                if typed.contains_key(&target) {
                    assignments.push((plan.entity, field.name, field.many, target));
                }
            }
        }

        // Endpoint fields of refreshed relationship objects.
        let mut endpoints: Vec<(EntityRef, String, EntityRef)> = Vec::new();
        for plan in planned.iter().filter(|p| !p.keep) {
            let (EntityKind::Relationship, Some(rel_type)) = (plan.entity.kind, &plan.type_name)
            else {
                continue;
            };
            let Some(rel) = scratch.relationship(plan.entity.id) else {
                continue;
            };
            for (start, node) in [(true, rel.start), (false, rel.end)] {
                let endpoint = EntityRef::node(node);
                if typed.contains_key(&endpoint) {
                    let field = self.registry.endpoint(rel_type, start)?.field;
                    endpoints.push((plan.entity, field, endpoint));
                }
            }
        }

        // Domain properties of refreshed entities.
        let mut decoded: FxHashMap<EntityRef, Properties> = FxHashMap::default();
        for plan in planned.iter().filter(|p| !p.keep) {
            let Some(name) = &plan.type_name else {
                continue;
            };
            let declared = schemas
                .get(name)
                .map(|schema| schema.properties())
                .unwrap_or_default();
            let raw = match plan.entity.kind {
                EntityKind::Node => scratch.node(plan.entity.id).map(|node| &node.properties),
                EntityKind::Relationship => scratch
                    .relationship(plan.entity.id)
                    .map(|rel| &rel.properties),
            };
            if let Some(raw) = raw {
                decoded.insert(plan.entity, unflatten(raw, declared)?);
            }
        }

        // Objects: reuse the canonical instance when one is cached.
        let mut objects: FxHashMap<EntityRef, Handle> = FxHashMap::default();
        for plan in &planned {
            let Some(name) = &plan.type_name else {
                continue;
            };
            let cached = self
                .store
                .get(plan.entity)
                .and_then(|cached| cached.value().cloned())
                .filter(|object| &object.type_name() == name);
            let object = cached.unwrap_or_else(|| Object::new(name.clone()).into_handle());
            objects.insert(plan.entity, object);
        }

        for plan in planned.iter().filter(|p| !p.keep) {
            let Some(object) = objects.get(&plan.entity) else {
                continue;
            };
            let mut guard = object.write();
            guard.set_id(plan.entity.id);
            // Fields of a frontier node may point past the fetched radius.
            if !plan.frontier {
                guard.clear_related();
            }
            if let Some(properties) = decoded.remove(&plan.entity) {
                guard.replace_properties(properties);
            }
            if plan.entity.kind == EntityKind::Node {
                if let Some(node) = scratch.node(plan.entity.id) {
                    guard.replace_labels(self.registry.runtime_labels(&node.label));
                }
            }
        }
        for (owner, field, many, target) in assignments {
            let (Some(owner), Some(target)) = (objects.get(&owner), objects.get(&target)) else {
                continue;
            };
            if many {
                owner.push_related(field, target.clone());
            } else {
                owner.set_related(field, Some(target.clone()));
            }
        }
        for (rel, field, node) in endpoints {
            if let (Some(rel), Some(node)) = (objects.get(&rel), objects.get(&node)) {
                rel.set_related(field, Some(node.clone()));
            }
        }

        // Cache: nodes first so relationships mirror into their adjacency.
        for plan in planned.iter().filter(|p| !p.keep) {
            let value = objects.get(&plan.entity).cloned();
            match plan.entity.kind {
                EntityKind::Node => {
                    if let Some(node) = scratch.node(plan.entity.id) {
                        let mut node = node.clone();
                        node.relationships
                            .retain(|id| distances.contains_key(&EntityRef::relationship(*id)));
                        if let Some(GraphEntity::Node(cached)) = self.store.get(plan.entity) {
                            let surviving: Vec<EntityId> = self.store.with_graph(|graph| {
                                cached
                                    .relationships
                                    .iter()
                                    .copied()
                                    .filter(|id| graph.relationship(*id).is_some())
                                    .collect()
                            });
                            node.relationships.extend(surviving);
                        }
                        node.depth = Some(plan.depth);
                        node.value = value;
                        self.store.save(GraphEntity::Node(node));
                    }
                }
                EntityKind::Relationship => {}
            }
        }
        for plan in planned.iter().filter(|p| !p.keep) {
            if plan.entity.kind != EntityKind::Relationship {
                continue;
            }
            if let Some(rel) = scratch.relationship(plan.entity.id) {
                let mut rel = rel.clone();
                rel.depth = Some(plan.depth);
                rel.value = objects.get(&plan.entity).cloned();
                self.store.save(GraphEntity::Relationship(rel));
            }
        }

        let mut batch = self.listeners.batch();
        for plan in &planned {
            if let Some(object) = objects.get(&plan.entity) {
                batch.post_load(object);
            }
        }
        drop(batch);

        Ok(Hydrated {
            roots: roots
                .iter()
                .filter_map(|root| objects.get(root).cloned())
                .collect(),
            entities: distances.into_keys().collect(),
        })
    }
}

/// Rejects mixed key kinds and turns custom keys of types without a custom
/// id into internal ones.
fn normalize(keys: Vec<LoadKey>, custom_id: Option<&str>) -> Result<Vec<LoadKey>> {
    let mut internal = false;
    let mut custom = false;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let key = match (key, custom_id) {
            (LoadKey::Custom(value), None) => match value.as_int() {
                Some(id) => LoadKey::Internal(id),
                None => {
                    return Err(GraphError::InvalidArgument(format!(
                        "type declares no custom id, cannot load by {}",
                        value.kind()
                    )))
                }
            },
            (key, _) => key,
        };
        match key {
            LoadKey::Internal(_) => internal = true,
            LoadKey::Custom(_) => custom = true,
        }
        out.push(key);
    }
    if internal && custom {
        return Err(GraphError::InvalidArgument(
            "cannot mix internal and custom ids in one load".into(),
        ));
    }
    Ok(out)
}

/// Node for a returned node value, with the id mirrored into its properties.
pub(super) fn scratch_node(value: &NodeValue) -> Node {
    let id = EntityId::Persisted(value.id);
    let mut node = Node::new(id, join_labels(&value.labels));
    node.properties = value.properties.clone();
    mirror_id(&mut node.properties, id);
    node
}

/// Relationship for a returned relationship value, oriented `start -> end`.
pub(super) fn scratch_relationship(value: &RelationshipValue, start: i64, end: i64) -> Relationship {
    let id = EntityId::Persisted(value.id);
    let mut rel = Relationship::new(
        id,
        value.rel_type.clone(),
        EntityId::Persisted(start),
        EntityId::Persisted(end),
    );
    rel.properties = value.properties.clone();
    mirror_id(&mut rel.properties, id);
    rel
}

/// Decodes path rows into a scratch graph plus the root ids in row order.
fn decode(rows: &[Row], root_column: &str) -> Result<(Graph, Vec<i64>)> {
    let mut graph = Graph::new();
    let mut roots = Vec::new();
    for row in rows {
        let root = row
            .get(root_column)
            .and_then(Value::as_int)
            .ok_or_else(|| GraphError::Query(format!("load row has no `{root_column}` column")))?;
        if !roots.contains(&root) {
            roots.push(root);
        }
        let Some(Value::Path(path)) = row.get("path") else {
            return Err(GraphError::Query("load row has no path".into()));
        };
        if path.nodes.len() != path.relationships.len() + 1 {
            return Err(GraphError::Query(format!(
                "malformed path: {} nodes, {} relationships",
                path.nodes.len(),
                path.relationships.len()
            )));
        }
        let inverted: Vec<Option<bool>> = match row.get("isDirectionInverted") {
            Some(Value::List(flags)) => flags.iter().map(Value::as_bool).collect(),
            _ => Vec::new(),
        };

        for value in &path.nodes {
            let id = EntityId::Persisted(value.id);
            if graph.node(id).is_some() {
                continue;
            }
            graph.insert_node(scratch_node(value));
        }
        for (index, value) in path.relationships.iter().enumerate() {
            let id = EntityId::Persisted(value.id);
            if graph.relationship(id).is_some() {
                continue;
            }
            let (left, right) = (path.nodes[index].id, path.nodes[index + 1].id);
            let (start, end) = match inverted.get(index).copied().flatten() {
                Some(true) => (right, left),
                Some(false) => (left, right),
                None => (value.start, value.end),
            };
            graph.insert_relationship(scratch_relationship(value, start, end));
        }
    }
    Ok((graph, roots))
}
