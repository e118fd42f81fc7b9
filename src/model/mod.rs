//! Entity model: nodes, relationships and the id-indexed arena that holds them.
//!
//! Entities never point at each other directly. A node lists the ids of its
//! incident relationships and a relationship names its two endpoint node
//! ids; lookups go through a [`Graph`]. The same arena type backs the
//! session cache, the scratch graph decoded from a load, and the working set
//! of a save pass.

pub mod object;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::query::value::{Properties, Value};
use crate::types::EntityId;

pub use object::{Handle, Object, Related};

/// Name of the reserved property mirroring an entity's database id.
pub const ID_PROPERTY: &str = "id";

/// Delimiter joining multiple labels into a single label string.
pub const LABEL_DELIMITER: &str = ":";

/// The two entity kinds of a property graph.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum EntityKind {
    /// Graph vertex.
    Node,
    /// Graph edge.
    Relationship,
}

/// Arena key: entity kind plus id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EntityRef {
    /// Keyspace the id belongs to.
    pub kind: EntityKind,
    /// Identity inside the keyspace.
    pub id: EntityId,
}

impl EntityRef {
    /// Reference to a node.
    pub fn node(id: EntityId) -> Self {
        Self {
            kind: EntityKind::Node,
            id,
        }
    }

    /// Reference to a relationship.
    pub fn relationship(id: EntityId) -> Self {
        Self {
            kind: EntityKind::Relationship,
            id,
        }
    }

    /// Statement variable bound to this entity, e.g. `n12`, `r_3`.
    pub fn signature(&self) -> String {
        match self.kind {
            EntityKind::Node => format!("n{}", self.id),
            EntityKind::Relationship => format!("r{}", self.id),
        }
    }
}

/// Transient BFS bookkeeping. Only meaningful during the pass that set it.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Coordinate {
    /// Steps from the root; a relationship hop is two steps.
    pub distance: u32,
    /// Position among the entities discovered at the same distance.
    pub sibling: u32,
    /// Index of the root that discovered the entity.
    pub root: usize,
}

/// Graph vertex.
#[derive(Clone, Debug)]
pub struct Node {
    /// Identity.
    pub id: EntityId,
    /// Sorted, `:`-joined labels.
    pub label: String,
    /// Backend properties, including the reserved `id` mirror once persisted.
    pub properties: Properties,
    /// Step radius to which this node's neighbourhood is known.
    pub depth: Option<u32>,
    /// Traversal bookkeeping.
    pub coordinate: Option<Coordinate>,
    /// Bound domain object.
    pub value: Option<Handle>,
    /// Ids of incident relationships.
    pub relationships: BTreeSet<EntityId>,
}

impl Node {
    /// Creates a node with no properties and no adjacency.
    pub fn new(id: EntityId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            properties: Properties::new(),
            depth: None,
            coordinate: None,
            value: None,
            relationships: BTreeSet::new(),
        }
    }

    /// Individual labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.label.split(LABEL_DELIMITER).filter(|l| !l.is_empty())
    }
}

/// Graph edge.
#[derive(Clone, Debug)]
pub struct Relationship {
    /// Identity.
    pub id: EntityId,
    /// Relationship type.
    pub rel_type: String,
    /// Backend properties, including the reserved `id` mirror once persisted.
    pub properties: Properties,
    /// Step radius to which this relationship's neighbourhood is known.
    pub depth: Option<u32>,
    /// Traversal bookkeeping.
    pub coordinate: Option<Coordinate>,
    /// Bound domain object. `None` marks a phantom relationship.
    pub value: Option<Handle>,
    /// Start node id.
    pub start: EntityId,
    /// End node id.
    pub end: EntityId,
}

impl Relationship {
    /// Creates a relationship between two nodes.
    pub fn new(id: EntityId, rel_type: impl Into<String>, start: EntityId, end: EntityId) -> Self {
        Self {
            id,
            rel_type: rel_type.into(),
            properties: Properties::new(),
            depth: None,
            coordinate: None,
            value: None,
            start,
            end,
        }
    }

    /// The endpoint that is not `node`. Self-loops return the same id.
    pub fn other(&self, node: EntityId) -> EntityId {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }

    /// True when known only structurally, without a bound domain object.
    pub fn is_phantom(&self) -> bool {
        self.value.is_none()
    }
}

/// Either entity kind.
#[derive(Clone, Debug)]
pub enum GraphEntity {
    /// Node variant.
    Node(Node),
    /// Relationship variant.
    Relationship(Relationship),
}

impl GraphEntity {
    /// Arena key.
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            GraphEntity::Node(n) => EntityRef::node(n.id),
            GraphEntity::Relationship(r) => EntityRef::relationship(r.id),
        }
    }

    /// Identity.
    pub fn id(&self) -> EntityId {
        match self {
            GraphEntity::Node(n) => n.id,
            GraphEntity::Relationship(r) => r.id,
        }
    }

    /// Label string for nodes, type for relationships.
    pub fn label_or_type(&self) -> &str {
        match self {
            GraphEntity::Node(n) => &n.label,
            GraphEntity::Relationship(r) => &r.rel_type,
        }
    }

    /// Backend properties.
    pub fn properties(&self) -> &Properties {
        match self {
            GraphEntity::Node(n) => &n.properties,
            GraphEntity::Relationship(r) => &r.properties,
        }
    }

    /// Bound domain object.
    pub fn value(&self) -> Option<&Handle> {
        match self {
            GraphEntity::Node(n) => n.value.as_ref(),
            GraphEntity::Relationship(r) => r.value.as_ref(),
        }
    }

    /// Known neighbourhood radius.
    pub fn depth(&self) -> Option<u32> {
        match self {
            GraphEntity::Node(n) => n.depth,
            GraphEntity::Relationship(r) => r.depth,
        }
    }

    /// Statement variable.
    pub fn signature(&self) -> String {
        self.entity_ref().signature()
    }
}

/// Id-indexed arena of nodes and relationships.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: BTreeMap<EntityId, Node>,
    relationships: BTreeMap<EntityId, Relationship>,
}

impl Graph {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes plus relationships.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }

    /// True when the arena holds nothing.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    /// Node lookup.
    pub fn node(&self, id: EntityId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Mutable node lookup.
    pub fn node_mut(&mut self, id: EntityId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Relationship lookup.
    pub fn relationship(&self, id: EntityId) -> Option<&Relationship> {
        self.relationships.get(&id)
    }

    /// Mutable relationship lookup.
    pub fn relationship_mut(&mut self, id: EntityId) -> Option<&mut Relationship> {
        self.relationships.get_mut(&id)
    }

    /// Iterates over nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates over relationships in id order.
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    /// Every key in the arena, nodes first.
    pub fn refs(&self) -> Vec<EntityRef> {
        self.nodes
            .keys()
            .map(|id| EntityRef::node(*id))
            .chain(self.relationships.keys().map(|id| EntityRef::relationship(*id)))
            .collect()
    }

    /// True if the key is present.
    pub fn contains(&self, entity: EntityRef) -> bool {
        match entity.kind {
            EntityKind::Node => self.nodes.contains_key(&entity.id),
            EntityKind::Relationship => self.relationships.contains_key(&entity.id),
        }
    }

    /// Owned copy of an entity.
    pub fn get(&self, entity: EntityRef) -> Option<GraphEntity> {
        match entity.kind {
            EntityKind::Node => self.nodes.get(&entity.id).cloned().map(GraphEntity::Node),
            EntityKind::Relationship => self
                .relationships
                .get(&entity.id)
                .cloned()
                .map(GraphEntity::Relationship),
        }
    }

    /// Bound domain object of an entity.
    pub fn value(&self, entity: EntityRef) -> Option<Handle> {
        match entity.kind {
            EntityKind::Node => self.nodes.get(&entity.id)?.value.clone(),
            EntityKind::Relationship => self.relationships.get(&entity.id)?.value.clone(),
        }
    }

    /// Replaces the bound domain object of an entity.
    pub fn set_value(&mut self, entity: EntityRef, value: Option<Handle>) {
        match entity.kind {
            EntityKind::Node => {
                if let Some(node) = self.nodes.get_mut(&entity.id) {
                    node.value = value;
                }
            }
            EntityKind::Relationship => {
                if let Some(rel) = self.relationships.get_mut(&entity.id) {
                    rel.value = value;
                }
            }
        }
    }

    /// Traversal coordinate of an entity.
    pub fn coordinate(&self, entity: EntityRef) -> Option<Coordinate> {
        match entity.kind {
            EntityKind::Node => self.nodes.get(&entity.id)?.coordinate,
            EntityKind::Relationship => self.relationships.get(&entity.id)?.coordinate,
        }
    }

    /// Sets or clears a traversal coordinate.
    pub fn set_coordinate(&mut self, entity: EntityRef, coordinate: Option<Coordinate>) {
        match entity.kind {
            EntityKind::Node => {
                if let Some(node) = self.nodes.get_mut(&entity.id) {
                    node.coordinate = coordinate;
                }
            }
            EntityKind::Relationship => {
                if let Some(rel) = self.relationships.get_mut(&entity.id) {
                    rel.coordinate = coordinate;
                }
            }
        }
    }

    /// Clears every traversal coordinate.
    pub fn clear_coordinates(&mut self) {
        for node in self.nodes.values_mut() {
            node.coordinate = None;
        }
        for rel in self.relationships.values_mut() {
            rel.coordinate = None;
        }
    }

    /// Sets the known neighbourhood radius of an entity.
    pub fn set_depth(&mut self, entity: EntityRef, depth: Option<u32>) {
        match entity.kind {
            EntityKind::Node => {
                if let Some(node) = self.nodes.get_mut(&entity.id) {
                    node.depth = depth;
                }
            }
            EntityKind::Relationship => {
                if let Some(rel) = self.relationships.get_mut(&entity.id) {
                    rel.depth = depth;
                }
            }
        }
    }

    /// Inserts or overwrites a node as given.
    pub fn insert_node(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id, node)
    }

    /// Inserts or overwrites a relationship and mirrors it into the adjacency
    /// of whichever endpoints are present.
    pub fn insert_relationship(&mut self, rel: Relationship) -> Option<Relationship> {
        let (id, start, end) = (rel.id, rel.start, rel.end);
        let previous = self.relationships.insert(id, rel);
        for endpoint in [start, end] {
            if let Some(node) = self.nodes.get_mut(&endpoint) {
                node.relationships.insert(id);
            }
        }
        previous
    }

    /// Removes a node without touching its relationships.
    pub fn remove_node(&mut self, id: EntityId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    /// Removes a relationship and unlinks it from both endpoints.
    pub fn remove_relationship(&mut self, id: EntityId) -> Option<Relationship> {
        let rel = self.relationships.remove(&id)?;
        for endpoint in [rel.start, rel.end] {
            if let Some(node) = self.nodes.get_mut(&endpoint) {
                node.relationships.remove(&id);
            }
        }
        Some(rel)
    }

    /// Neighbours of an entity: incident relationships for a node, endpoints
    /// for a relationship. Dangling references are skipped.
    pub fn neighbors(&self, entity: EntityRef) -> Vec<EntityRef> {
        match entity.kind {
            EntityKind::Node => self
                .nodes
                .get(&entity.id)
                .map(|node| {
                    node.relationships
                        .iter()
                        .filter(|id| self.relationships.contains_key(id))
                        .map(|id| EntityRef::relationship(*id))
                        .collect()
                })
                .unwrap_or_default(),
            EntityKind::Relationship => match self.relationships.get(&entity.id) {
                Some(rel) => {
                    let mut out = Vec::with_capacity(2);
                    for endpoint in [rel.start, rel.end] {
                        let candidate = EntityRef::node(endpoint);
                        if self.nodes.contains_key(&endpoint) && !out.contains(&candidate) {
                            out.push(candidate);
                        }
                    }
                    out
                }
                None => Vec::new(),
            },
        }
    }

    /// Moves an entity to a new id, rewriting every reference to it.
    pub fn rekey(&mut self, entity: EntityRef, new_id: EntityId) {
        if entity.id == new_id {
            return;
        }
        match entity.kind {
            EntityKind::Node => {
                let Some(mut node) = self.nodes.remove(&entity.id) else {
                    return;
                };
                node.id = new_id;
                for rel_id in &node.relationships {
                    if let Some(rel) = self.relationships.get_mut(rel_id) {
                        if rel.start == entity.id {
                            rel.start = new_id;
                        }
                        if rel.end == entity.id {
                            rel.end = new_id;
                        }
                    }
                }
                self.nodes.insert(new_id, node);
            }
            EntityKind::Relationship => {
                let Some(mut rel) = self.relationships.remove(&entity.id) else {
                    return;
                };
                rel.id = new_id;
                for endpoint in [rel.start, rel.end] {
                    if let Some(node) = self.nodes.get_mut(&endpoint) {
                        if node.relationships.remove(&entity.id) {
                            node.relationships.insert(new_id);
                        }
                    }
                }
                self.relationships.insert(new_id, rel);
            }
        }
    }

    /// Breadth-first walk from `root`, alternating node and relationship
    /// steps. Stops at the first relationship farther than `step_limit`.
    ///
    /// Returns the visited entities in visiting order with their distance.
    pub fn unwind(&self, root: EntityRef, step_limit: u32) -> Vec<(EntityRef, u32)> {
        let mut visited = Vec::new();
        if !self.contains(root) {
            return visited;
        }
        let mut seen = BTreeSet::from([root]);
        let mut queue = VecDeque::from([(root, 0u32)]);
        while let Some((entity, distance)) = queue.pop_front() {
            if entity.kind == EntityKind::Relationship && distance > step_limit {
                break;
            }
            visited.push((entity, distance));
            for neighbor in self.neighbors(entity) {
                if seen.insert(neighbor) {
                    queue.push_back((neighbor, distance.saturating_add(1)));
                }
            }
        }
        visited
    }
}

/// Writes the reserved `id` mirror into a property map.
pub(crate) fn mirror_id(properties: &mut Properties, id: EntityId) {
    match id.persisted() {
        Some(db_id) => {
            properties.insert(ID_PROPERTY.to_owned(), Value::Int(db_id));
        }
        None => {
            properties.remove(ID_PROPERTY);
        }
    }
}

/// Sorts and joins labels into the canonical label string.
pub fn join_labels<I, S>(labels: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = labels
        .into_iter()
        .map(|l| l.as_ref().to_owned())
        .filter(|l| !l.is_empty())
        .collect();
    set.into_iter().collect::<Vec<_>>().join(LABEL_DELIMITER)
}
