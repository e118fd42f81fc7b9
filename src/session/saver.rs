//! Save pass: object graph to one write statement.
//!
//! A pass walks the domain objects reachable from its roots, breadth first,
//! alternating node and relationship steps up to the requested radius. Every
//! visited object is captured into a pass-local [`Graph`] under a provisional
//! id if it has never been saved. Each captured entity is diffed against its
//! cached snapshot; dirty ones contribute CREATE or MATCH plus SET clauses,
//! relationships the cache knows about but the objects no longer reference
//! contribute MATCH plus DELETE, and every variable a clause uses without
//! binding gets a MATCH of its own. All of it is merged into a single
//! statement, so the database applies the whole pass or none of it.
//!
//! Nothing in the cache changes until the statement has succeeded. On any
//! failure the provisional ids handed to objects are taken back.
//!
//! Inverse fields are not populated: an object graph that should read the
//! same from both ends (as a load produces it) must be linked from both
//! ends by the caller.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::events::{Lifecycle, Listeners};
use super::{execute, notify_removed, Session};
use crate::driver::Row;
use crate::model::{
    mirror_id, Coordinate, EntityKind, EntityRef, Graph, GraphEntity, Handle, Node, Relationship,
};
use crate::query::ast::{Projection, Statement};
use crate::query::builder::{EntityQuery, Fragment, MatchKey};
use crate::query::clauses::ClauseSet;
use crate::query::value::Value;
use crate::schema::{Direction, RelatedEntity, Registry, SchemaProvider};
use crate::store::Store;
use crate::types::{Depth, EntityId, GraphError, Result};

impl Session {
    /// Saves `object` and everything reachable from it, using
    /// [`SessionConfig::default_save_depth`](super::SessionConfig).
    pub fn save(&mut self, object: &Handle) -> Result<()> {
        let depth = self.config.default_save_depth;
        self.save_all(std::slice::from_ref(object), depth)
    }

    /// Saves `object` and whatever lies within `depth` relationship hops.
    pub fn save_depth(&mut self, object: &Handle, depth: Depth) -> Result<()> {
        self.save_all(std::slice::from_ref(object), depth)
    }

    /// Saves several roots in one statement.
    pub fn save_all(&mut self, roots: &[Handle], depth: Depth) -> Result<()> {
        self.config.check_depth(depth)?;
        if roots.is_empty() {
            return Ok(());
        }
        let mut pass = SavePass::new(&self.registry, &self.store, &self.listeners, depth);
        let plan = match pass.plan(roots) {
            Ok(plan) => plan,
            Err(err) => {
                pass.revert();
                return Err(err);
            }
        };
        let rows = match execute(self.driver.as_mut(), &self.config, &plan.statement) {
            Ok(rows) => rows,
            Err(err) => {
                pass.revert();
                return Err(err);
            }
        };
        pass.apply(plan, rows)
    }
}

fn absorb(clauses: &mut ClauseSet, fragment: Fragment, dependencies: &mut Vec<EntityRef>) {
    dependencies.extend(fragment.dependencies.iter().copied());
    clauses.extend(fragment);
}

/// Everything a pass decided before talking to the database.
struct Plan {
    statement: Statement,
    /// Entities written by the statement, in visiting order.
    saved: Vec<EntityRef>,
    /// Cached relationships the statement deletes.
    removed: Vec<Relationship>,
    /// Entities the statement binds, except removed relationships.
    bound: Vec<EntityRef>,
}

struct SavePass<'a> {
    registry: &'a Registry,
    store: &'a Store,
    listeners: &'a Listeners,
    step_limit: u32,
    graph: Graph,
    next_pending: u32,
    /// Object address to arena key.
    mapped: FxHashMap<usize, EntityRef>,
    values: FxHashMap<EntityRef, Handle>,
    /// Every object whose id the pass changed, with the id to restore.
    assigned: Vec<(Handle, EntityId)>,
    phantom_ids: FxHashMap<(EntityId, EntityId, String), EntityId>,
    phantom_ends: FxHashMap<EntityId, (Handle, Handle, String)>,
    /// Neighbours found when an entity was captured.
    neighbors: FxHashMap<EntityRef, Vec<EntityRef>>,
    /// First-visit order across all roots.
    order: Vec<EntityRef>,
    /// Roots with the last distance their walk processed.
    roots: Vec<(EntityRef, u32)>,
}

impl<'a> SavePass<'a> {
    fn new(registry: &'a Registry, store: &'a Store, listeners: &'a Listeners, depth: Depth) -> Self {
        Self {
            registry,
            store,
            listeners,
            step_limit: depth.step_limit(),
            graph: Graph::new(),
            next_pending: 0,
            mapped: FxHashMap::default(),
            values: FxHashMap::default(),
            assigned: Vec::new(),
            phantom_ids: FxHashMap::default(),
            phantom_ends: FxHashMap::default(),
            neighbors: FxHashMap::default(),
            order: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn next_id(&mut self) -> EntityId {
        self.next_pending += 1;
        EntityId::Pending(self.next_pending)
    }

    /// Arena key of an object, handing out a provisional id on first sight.
    ///
    /// An unsaved object whose custom id matches a cached entity of the same
    /// type adopts that entity's id.
    fn ensure_id(&mut self, object: &Handle) -> Result<EntityRef> {
        if let Some(entity) = self.mapped.get(&object.addr()) {
            return Ok(*entity);
        }
        let type_name = object.type_name();
        let kind = if self.registry.get(&type_name)?.is_relationship() {
            EntityKind::Relationship
        } else {
            EntityKind::Node
        };
        let current = object.id();
        let id = if current.is_persisted() {
            current
        } else {
            let custom = self.registry.custom_id_value(&object.read())?;
            let adopted = custom
                .and_then(|value| self.store.get_by_custom_id(&type_name, &value))
                .map(|entity| entity.id())
                .filter(|id| id.is_persisted());
            let id = match adopted {
                Some(id) => id,
                None => self.next_id(),
            };
            let previous = if current.is_pending() {
                EntityId::Unsaved
            } else {
                current
            };
            self.assigned.push((object.clone(), previous));
            object.write().set_id(id);
            id
        };
        let entity = EntityRef { kind, id };
        self.mapped.insert(object.addr(), entity);
        self.values.insert(entity, object.clone());
        Ok(entity)
    }

    /// Arena key of the relationship implied by a node-to-node reference.
    fn phantom_ref(&mut self, start: &Handle, end: &Handle, rel_type: &str) -> Result<EntityRef> {
        let from = self.ensure_id(start)?.id;
        let to = self.ensure_id(end)?.id;
        let key = (from, to, rel_type.to_owned());
        if let Some(id) = self.phantom_ids.get(&key) {
            return Ok(EntityRef::relationship(*id));
        }
        let cached = if from.is_persisted() && to.is_persisted() {
            self.store.phantom(from, to, rel_type)
        } else {
            None
        };
        let id = match cached {
            Some(id) => id,
            None => self.next_id(),
        };
        self.phantom_ids.insert(key, id);
        self.phantom_ends
            .insert(id, (start.clone(), end.clone(), rel_type.to_owned()));
        Ok(EntityRef::relationship(id))
    }

    fn value(&self, entity: EntityRef) -> Result<Handle> {
        self.values
            .get(&entity)
            .cloned()
            .ok_or(GraphError::NotFound("save pass object"))
    }

    fn plan(&mut self, roots: &[Handle]) -> Result<Plan> {
        for (index, root) in roots.iter().enumerate() {
            self.walk(root, index)?;
        }
        self.link_adjacency();

        let (removed, removed_counts) = self.removed_relationships()?;
        for rel in &removed {
            for endpoint in [rel.start, rel.end] {
                self.refresh(endpoint)?;
            }
        }

        let mut clauses = ClauseSet::new();
        let mut bound: BTreeSet<EntityRef> = BTreeSet::new();
        let mut dependencies: Vec<EntityRef> = Vec::new();
        let mut saved = Vec::new();

        for entity in self.order.clone() {
            let query = self.query_for(entity, &removed_counts)?;
            if !query.is_dirty() {
                continue;
            }
            let binding = if entity.id.is_pending() {
                query.create()
            } else {
                query.matching()?
            };
            absorb(&mut clauses, binding, &mut dependencies);
            absorb(&mut clauses, query.set(), &mut dependencies);
            bound.insert(entity);
            saved.push(entity);
        }

        let mut deleted = BTreeSet::new();
        for rel in &removed {
            let query = EntityQuery::relationship(rel, Some(rel));
            absorb(&mut clauses, query.matching()?, &mut dependencies);
            absorb(&mut clauses, query.delete(), &mut dependencies);
            deleted.insert(query.entity());
        }

        for (root, _) in self.roots.clone() {
            if bound.contains(&root) {
                continue;
            }
            let query = self.query_for(root, &removed_counts)?;
            absorb(&mut clauses, query.matching()?, &mut dependencies);
            bound.insert(root);
        }

        while let Some(dependency) = dependencies.pop() {
            if bound.contains(&dependency) || deleted.contains(&dependency) {
                continue;
            }
            let query = if self.graph.contains(dependency) {
                self.query_for(dependency, &removed_counts)?
            } else {
                match self.store.get(dependency) {
                    Some(GraphEntity::Node(node)) => EntityQuery::node(
                        &node,
                        Some(&node),
                        node.id.persisted().map(MatchKey::Internal),
                    ),
                    Some(GraphEntity::Relationship(rel)) => {
                        EntityQuery::relationship(&rel, Some(&rel))
                    }
                    None => {
                        return Err(GraphError::Consistency(format!(
                            "{} is referenced by the save but is neither reachable nor cached",
                            dependency.signature()
                        )))
                    }
                }
            };
            absorb(&mut clauses, query.matching()?, &mut dependencies);
            bound.insert(dependency);
        }

        let bound: Vec<EntityRef> = bound.into_iter().collect();
        let returns = bound
            .iter()
            .map(|entity| Projection::IdMap(entity.signature()))
            .collect();
        let statement = Statement::Write(clauses.finish(returns));
        debug!(
            roots = self.roots.len(),
            visited = self.order.len(),
            dirty = saved.len(),
            removed = removed.len(),
            "session.save.plan"
        );
        Ok(Plan {
            statement,
            saved,
            removed,
            bound,
        })
    }

    /// Breadth-first walk from one root over the object graph.
    fn walk(&mut self, root: &Handle, root_index: usize) -> Result<()> {
        let root_ref = self.ensure_id(root)?;
        let mut seen = BTreeSet::from([root_ref]);
        let mut queue = VecDeque::from([(root_ref, 0u32)]);
        let mut siblings: BTreeMap<u32, u32> = BTreeMap::new();
        let mut last = 0;
        while let Some((entity, distance)) = queue.pop_front() {
            if entity.kind == EntityKind::Relationship && distance > self.step_limit {
                break;
            }
            last = distance;
            let sibling = siblings.entry(distance).or_default();
            let coordinate = Coordinate {
                distance,
                sibling: *sibling,
                root: root_index,
            };
            *sibling += 1;

            let neighbors = self.capture(entity)?;
            if self.graph.coordinate(entity).is_none() {
                self.graph.set_coordinate(entity, Some(coordinate));
            }
            for neighbor in neighbors {
                if seen.insert(neighbor) {
                    queue.push_back((neighbor, distance.saturating_add(1)));
                }
            }
        }
        self.roots.push((root_ref, last));
        Ok(())
    }

    /// Captures an entity into the arena once and returns its neighbours.
    fn capture(&mut self, entity: EntityRef) -> Result<Vec<EntityRef>> {
        if let Some(neighbors) = self.neighbors.get(&entity) {
            return Ok(neighbors.clone());
        }
        let neighbors = match entity.kind {
            EntityKind::Node => self.capture_node(entity)?,
            EntityKind::Relationship => self.capture_relationship(entity)?,
        };
        self.order.push(entity);
        self.neighbors.insert(entity, neighbors.clone());
        Ok(neighbors)
    }

    fn lifecycle(entity: EntityRef) -> Lifecycle {
        if entity.id.is_persisted() {
            Lifecycle::Update
        } else {
            Lifecycle::Create
        }
    }

    fn capture_node(&mut self, entity: EntityRef) -> Result<Vec<EntityRef>> {
        let object = self.value(entity)?;
        self.listeners.pre_save(&object, Self::lifecycle(entity))?;
        let (label, mut properties, related) = {
            let guard = object.read();
            (
                self.registry.label_or_type(&guard)?,
                self.registry.properties(&guard)?,
                self.registry.related_entities(&guard)?,
            )
        };
        mirror_id(&mut properties, entity.id);
        let mut node = Node::new(entity.id, label);
        node.properties = properties;
        node.value = Some(object.clone());
        self.graph.insert_node(node);

        let mut neighbors = Vec::new();
        for related in related {
            match related {
                RelatedEntity::Entity { relationship, .. } => {
                    neighbors.push(self.ensure_id(&relationship)?);
                }
                RelatedEntity::Phantom {
                    rel_type,
                    other,
                    direction,
                    ..
                } => {
                    let (start, end) = match direction {
                        Direction::Outgoing => (object.clone(), other),
                        Direction::Incoming => (other, object.clone()),
                    };
                    neighbors.push(self.phantom_ref(&start, &end, &rel_type)?);
                }
                RelatedEntity::Endpoint { .. } => {}
            }
        }
        Ok(neighbors)
    }

    fn capture_relationship(&mut self, entity: EntityRef) -> Result<Vec<EntityRef>> {
        if let Some((start, end, rel_type)) = self.phantom_ends.get(&entity.id).cloned() {
            let from = self.ensure_id(&start)?;
            let to = self.ensure_id(&end)?;
            let mut rel = Relationship::new(entity.id, rel_type, from.id, to.id);
            mirror_id(&mut rel.properties, entity.id);
            self.graph.insert_relationship(rel);
            return Ok(vec![from, to]);
        }

        let object = self.value(entity)?;
        self.listeners.pre_save(&object, Self::lifecycle(entity))?;
        let (rel_type, mut properties, related) = {
            let guard = object.read();
            (
                self.registry.label_or_type(&guard)?,
                self.registry.properties(&guard)?,
                self.registry.related_entities(&guard)?,
            )
        };
        let (mut start, mut end) = (None, None);
        for related in related {
            if let RelatedEntity::Endpoint {
                node, start: is_start, ..
            } = related
            {
                let endpoint = self.ensure_id(&node)?;
                if is_start {
                    start = Some(endpoint);
                } else {
                    end = Some(endpoint);
                }
            }
        }
        let (Some(start), Some(end)) = (start, end) else {
            return Err(GraphError::InvalidArgument(format!(
                "relationship '{}' is missing an endpoint",
                object.type_name()
            )));
        };
        mirror_id(&mut properties, entity.id);
        let mut rel = Relationship::new(entity.id, rel_type, start.id, end.id);
        rel.properties = properties;
        rel.value = Some(object);
        self.graph.insert_relationship(rel);
        Ok(vec![start, end])
    }

    /// Mirrors every captured relationship into the adjacency of captured
    /// endpoints, whatever order they were captured in.
    fn link_adjacency(&mut self) {
        let links: Vec<(EntityId, EntityId, EntityId)> = self
            .graph
            .relationships()
            .map(|rel| (rel.id, rel.start, rel.end))
            .collect();
        for (id, start, end) in links {
            for endpoint in [start, end] {
                if let Some(node) = self.graph.node_mut(endpoint) {
                    node.relationships.insert(id);
                }
            }
        }
    }

    /// Cached relationships of captured nodes that their objects no longer
    /// reference, plus how many each node lost.
    fn removed_relationships(&self) -> Result<(Vec<Relationship>, FxHashMap<EntityId, usize>)> {
        let mut removed: BTreeMap<EntityId, Relationship> = BTreeMap::new();
        for entity in &self.order {
            if entity.kind != EntityKind::Node || !entity.id.is_persisted() {
                continue;
            }
            let Some(GraphEntity::Node(cached)) = self.store.get(*entity) else {
                continue;
            };
            let Some(object) = self.values.get(entity) else {
                continue;
            };
            let type_name = object.type_name();
            let referenced = self.neighbors.get(entity);
            for rel_id in &cached.relationships {
                let rel_ref = EntityRef::relationship(*rel_id);
                if self.graph.contains(rel_ref)
                    || removed.contains_key(rel_id)
                    || referenced.is_some_and(|n| n.contains(&rel_ref))
                {
                    continue;
                }
                let Some(GraphEntity::Relationship(rel)) = self.store.get(rel_ref) else {
                    continue;
                };
                let field = self.store.with_graph(|graph| {
                    self.registry.graph_field(&type_name, entity.id, &rel, graph)
                })?;
                if field.is_some() {
                    removed.insert(*rel_id, rel);
                }
            }
        }
        let mut counts: FxHashMap<EntityId, usize> = FxHashMap::default();
        for rel in removed.values() {
            *counts.entry(rel.start).or_default() += 1;
            if rel.end != rel.start {
                *counts.entry(rel.end).or_default() += 1;
            }
        }
        Ok((removed.into_values().collect(), counts))
    }

    /// Pulls the far endpoint of a removed relationship into the pass so its
    /// adjacency change is written and reported.
    fn refresh(&mut self, node_id: EntityId) -> Result<()> {
        let entity = EntityRef::node(node_id);
        if self.graph.contains(entity) {
            return Ok(());
        }
        let Some(GraphEntity::Node(cached)) = self.store.get(entity) else {
            return Ok(());
        };
        match cached.value.clone() {
            Some(object) => {
                self.mapped.insert(object.addr(), entity);
                self.values.insert(entity, object);
                self.capture(entity)?;
            }
            None => {
                self.graph.insert_node(cached);
                self.order.push(entity);
            }
        }
        Ok(())
    }

    fn query_for(
        &self,
        entity: EntityRef,
        removed_counts: &FxHashMap<EntityId, usize>,
    ) -> Result<EntityQuery> {
        match entity.kind {
            EntityKind::Node => {
                let node = self
                    .graph
                    .node(entity.id)
                    .ok_or(GraphError::NotFound("save pass node"))?;
                let cached = match self.store.get(entity) {
                    Some(GraphEntity::Node(cached)) => Some(cached),
                    _ => None,
                };
                let custom = match &node.value {
                    Some(object) => self
                        .registry
                        .custom_id_field(&object.type_name())?
                        .and_then(|field| {
                            let value = node.properties.get(&field)?.clone();
                            Some((field, value))
                        }),
                    None => None,
                };
                Ok(EntityQuery::node(
                    node,
                    cached.as_ref(),
                    MatchKey::for_entity(entity.id, custom),
                )
                .with_removed_relationships(
                    removed_counts.get(&entity.id).copied().unwrap_or_default(),
                ))
            }
            EntityKind::Relationship => {
                let rel = self
                    .graph
                    .relationship(entity.id)
                    .ok_or(GraphError::NotFound("save pass relationship"))?;
                let cached = match self.store.get(entity) {
                    Some(GraphEntity::Relationship(cached)) => Some(cached),
                    _ => None,
                };
                Ok(EntityQuery::relationship(rel, cached.as_ref()))
            }
        }
    }

    /// Applies a successful statement to objects and the cache.
    fn apply(mut self, plan: Plan, rows: Vec<Row>) -> Result<()> {
        let ids = match Self::assigned_ids(&plan, rows) {
            Ok(ids) => ids,
            Err(err) => {
                self.revert();
                return Err(err);
            }
        };

        let mut created: FxHashSet<EntityRef> = FxHashSet::default();
        let mut renamed: FxHashMap<EntityRef, EntityRef> = FxHashMap::default();
        for (entity, db_id) in ids {
            let persisted = EntityRef {
                kind: entity.kind,
                id: EntityId::Persisted(db_id),
            };
            self.graph.rekey(entity, persisted.id);
            match entity.kind {
                EntityKind::Node => {
                    if let Some(node) = self.graph.node_mut(persisted.id) {
                        mirror_id(&mut node.properties, persisted.id);
                    }
                }
                EntityKind::Relationship => {
                    if let Some(rel) = self.graph.relationship_mut(persisted.id) {
                        mirror_id(&mut rel.properties, persisted.id);
                    }
                }
            }
            if let Some(object) = self.values.get(&entity) {
                object.write().set_id(persisted.id);
            }
            created.insert(persisted);
            renamed.insert(entity, persisted);
        }
        let resolve = |entity: EntityRef| renamed.get(&entity).copied().unwrap_or(entity);

        let mut batch = self.listeners.batch();
        for rel in &plan.removed {
            let (deleted, updated) = self.store.delete(EntityRef::relationship(rel.id));
            notify_removed(self.store, &mut batch, &deleted, &updated);
        }

        let root_depths: FxHashMap<EntityRef, u32> = self
            .roots
            .iter()
            .map(|(root, last)| (resolve(*root), *last))
            .collect();
        let mut written: Vec<EntityRef> = self.order.iter().map(|e| resolve(*e)).collect();
        written.sort_by_key(|entity| entity.kind);

        self.graph.clear_coordinates();
        for entity in &written {
            let Some(mut current) = self.graph.get(*entity) else {
                continue;
            };
            let cached = self.store.get(*entity);
            let depth = root_depths
                .get(entity)
                .copied()
                .or_else(|| cached.as_ref().and_then(GraphEntity::depth));
            match &mut current {
                GraphEntity::Node(node) => {
                    node.depth = depth;
                    node.relationships.retain(|id| id.is_persisted());
                    if let Some(GraphEntity::Node(cached)) = &cached {
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
                }
                GraphEntity::Relationship(rel) => rel.depth = depth,
            }
            self.store.save(current);
        }

        for entity in &plan.saved {
            let entity = resolve(*entity);
            let Some(object) = self.graph.value(entity) else {
                continue;
            };
            let lifecycle = if created.contains(&entity) {
                Lifecycle::Create
            } else {
                Lifecycle::Update
            };
            batch.post_save(&object, lifecycle);
        }
        drop(batch);

        debug!(
            written = written.len(),
            created = created.len(),
            removed = plan.removed.len(),
            "session.save.apply"
        );
        self.release();
        Ok(())
    }

    /// Database ids for every provisional entity the statement bound.
    fn assigned_ids(plan: &Plan, rows: Vec<Row>) -> Result<Vec<(EntityRef, i64)>> {
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Query("save statement matched nothing".into()))?;
        let mut ids = Vec::new();
        for entity in &plan.bound {
            if !entity.id.is_pending() {
                continue;
            }
            let signature = entity.signature();
            let id = row
                .get(&signature)
                .and_then(|value| value.get("id"))
                .and_then(Value::as_int)
                .ok_or_else(|| GraphError::Query(format!("no id returned for {signature}")))?;
            ids.push((*entity, id));
        }
        Ok(ids)
    }

    /// Takes back every id the pass handed out.
    fn revert(&mut self) {
        for (object, previous) in self.assigned.drain(..) {
            object.write().set_id(previous);
        }
    }

    /// Takes back provisional ids that were never written.
    fn release(&mut self) {
        for (object, previous) in self.assigned.drain(..) {
            if object.id().is_pending() {
                object.write().set_id(previous);
            }
        }
    }
}
