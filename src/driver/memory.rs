//! In-process driver.
//!
//! Interprets [`Statement`]s against a shared in-memory property graph with
//! the semantics the engine relies on: all MATCH clauses bind before any
//! write, a failed match yields zero rows and no mutation, `SET +=` merges
//! with `null` removing a key, node and relationship ids are assigned from
//! separate counters, and a write statement is applied atomically.
//!
//! Handles are cheap clones over the same graph so a test can keep one to
//! inspect the database while the session owns another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::{Driver, Row};
use crate::model::LABEL_DELIMITER;
use crate::query::ast::{
    Clause, EntityTarget, IdSelector, NodeFilter, Projection, Statement, WriteQuery,
};
use crate::query::value::{NodeValue, PathValue, Properties, RelationshipValue, Value};
use crate::types::{GraphError, Result};

#[derive(Clone, Debug, Default)]
struct StoredNode {
    labels: BTreeSet<String>,
    properties: Properties,
}

#[derive(Clone, Debug)]
struct StoredRelationship {
    rel_type: String,
    start: i64,
    end: i64,
    properties: Properties,
}

#[derive(Clone, Debug, Default)]
struct MemoryGraph {
    nodes: BTreeMap<i64, StoredNode>,
    relationships: BTreeMap<i64, StoredRelationship>,
    next_node: i64,
    next_relationship: i64,
    constraints: BTreeSet<(String, String)>,
    indexes: BTreeSet<(String, Vec<String>)>,
}

#[derive(Clone, Copy, Debug)]
enum Bound {
    Node(i64),
    Relationship(i64),
}

impl Bound {
    fn id(self) -> i64 {
        match self {
            Bound::Node(id) | Bound::Relationship(id) => id,
        }
    }
}

/// Alternating walk: `nodes.len() == rels.len() + 1`.
#[derive(Clone, Debug)]
struct Trail {
    nodes: Vec<i64>,
    rels: Vec<i64>,
}

fn split_labels(label: &str) -> impl Iterator<Item = &str> {
    label.split(LABEL_DELIMITER).filter(|l| !l.is_empty())
}

fn merge_properties(target: &mut Properties, patch: &Properties) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn param<'q>(query: &'q WriteQuery, name: &str) -> Result<&'q Value> {
    query
        .params
        .get(name)
        .ok_or_else(|| GraphError::Query(format!("missing parameter ${name}")))
}

fn node_var(bound: &FxHashMap<&str, Bound>, var: &str) -> Result<i64> {
    match bound.get(var) {
        Some(Bound::Node(id)) => Ok(*id),
        _ => Err(GraphError::Query(format!("variable `{var}` not bound to a node"))),
    }
}

impl MemoryGraph {
    fn has_labels(&self, id: i64, label: &str) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|node| split_labels(label).all(|l| node.labels.contains(l)))
    }

    fn node_value(&self, id: i64) -> Option<NodeValue> {
        let node = self.nodes.get(&id)?;
        Some(NodeValue {
            id,
            labels: node.labels.iter().cloned().collect(),
            properties: node.properties.clone(),
        })
    }

    fn relationship_value(&self, id: i64) -> Option<RelationshipValue> {
        let rel = self.relationships.get(&id)?;
        Some(RelationshipValue {
            id,
            rel_type: rel.rel_type.clone(),
            start: rel.start,
            end: rel.end,
            properties: rel.properties.clone(),
        })
    }

    fn incident(&self, node: i64) -> impl Iterator<Item = (i64, &StoredRelationship)> {
        self.relationships
            .iter()
            .filter(move |(_, rel)| rel.start == node || rel.end == node)
            .map(|(id, rel)| (*id, rel))
    }

    fn detach_delete(&mut self, node: i64) {
        self.relationships
            .retain(|_, rel| rel.start != node && rel.end != node);
        self.nodes.remove(&node);
    }

    /// Every trail from `from` of length `0..=max` avoiding `used`.
    fn trails(&self, from: i64, max: Option<u32>, used: &mut BTreeSet<i64>) -> Vec<Trail> {
        let mut out = Vec::new();
        let mut trail = Trail {
            nodes: vec![from],
            rels: Vec::new(),
        };
        self.extend_trail(&mut trail, max, used, &mut out);
        out
    }

    fn extend_trail(
        &self,
        trail: &mut Trail,
        max: Option<u32>,
        used: &mut BTreeSet<i64>,
        out: &mut Vec<Trail>,
    ) {
        out.push(trail.clone());
        if max.is_some_and(|max| trail.rels.len() >= max as usize) {
            return;
        }
        let Some(&at) = trail.nodes.last() else {
            return;
        };
        let steps: Vec<(i64, i64)> = self
            .incident(at)
            .filter(|(id, _)| !used.contains(id))
            .map(|(id, rel)| (id, if rel.start == at { rel.end } else { rel.start }))
            .collect();
        for (rel_id, next) in steps {
            used.insert(rel_id);
            trail.rels.push(rel_id);
            trail.nodes.push(next);
            self.extend_trail(trail, max, used, out);
            trail.nodes.pop();
            trail.rels.pop();
            used.remove(&rel_id);
        }
    }

    fn path_row(&self, trail: &Trail, root_column: &str, root: i64) -> Result<Row> {
        let mut path = PathValue::default();
        let mut inverted = Vec::with_capacity(trail.rels.len());
        for (index, node) in trail.nodes.iter().enumerate() {
            path.nodes.push(
                self.node_value(*node)
                    .ok_or(GraphError::NotFound("path node"))?,
            );
            if let Some(rel_id) = trail.rels.get(index) {
                let rel = self
                    .relationship_value(*rel_id)
                    .ok_or(GraphError::NotFound("path relationship"))?;
                inverted.push(Value::Bool(rel.start != *node));
                path.relationships.push(rel);
            }
        }
        Ok(Row::from([
            ("path".to_owned(), Value::Path(path)),
            (root_column.to_owned(), Value::Int(root)),
            ("isDirectionInverted".to_owned(), Value::List(inverted)),
        ]))
    }

    fn check_constraints(&self) -> Result<()> {
        for (label, property) in &self.constraints {
            let mut seen = Vec::new();
            for (id, node) in &self.nodes {
                if !node.labels.contains(label) {
                    continue;
                }
                if let Some(value) = node.properties.get(property) {
                    if seen.contains(&value) {
                        return Err(GraphError::Query(format!(
                            "node {id} already exists with label `{label}` and property `{property}`"
                        )));
                    }
                    seen.push(value);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    graph: MemoryGraph,
    snapshot: Option<MemoryGraph>,
    log: Vec<String>,
    fail_next: Option<String>,
    responses: FxHashMap<String, Vec<Row>>,
}

/// Driver over an in-process graph.
#[derive(Clone, Debug, Default)]
pub struct MemoryDriver {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryDriver {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of every statement run so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.shared.lock().log.clone()
    }

    /// Forgets the statement log.
    pub fn clear_statements(&self) {
        self.shared.lock().log.clear();
    }

    /// Makes the next statement fail with a query error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.shared.lock().fail_next = Some(message.into());
    }

    /// Rows returned for a raw statement with exactly this text.
    ///
    /// Raw statements are not interpreted; any other raw text fails.
    pub fn respond(&self, text: impl Into<String>, rows: Vec<Row>) {
        self.shared.lock().responses.insert(text.into(), rows);
    }

    /// Number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.shared.lock().graph.nodes.len()
    }

    /// Number of stored relationships.
    pub fn relationship_count(&self) -> usize {
        self.shared.lock().graph.relationships.len()
    }

    /// Stored node by id.
    pub fn node(&self, id: i64) -> Option<NodeValue> {
        self.shared.lock().graph.node_value(id)
    }

    /// Stored relationship by id.
    pub fn relationship(&self, id: i64) -> Option<RelationshipValue> {
        self.shared.lock().graph.relationship_value(id)
    }

    /// Every stored relationship.
    pub fn relationships(&self) -> Vec<RelationshipValue> {
        let shared = self.shared.lock();
        shared
            .graph
            .relationships
            .keys()
            .filter_map(|id| shared.graph.relationship_value(*id))
            .collect()
    }

    /// Ids of nodes carrying every label in `label`.
    pub fn node_ids(&self, label: &str) -> Vec<i64> {
        let shared = self.shared.lock();
        shared
            .graph
            .nodes
            .keys()
            .copied()
            .filter(|id| shared.graph.has_labels(*id, label))
            .collect()
    }

    fn write(graph: &mut MemoryGraph, query: &WriteQuery) -> Result<Vec<Row>> {
        let mut bound: FxHashMap<&str, Bound> = FxHashMap::default();

        for clause in &query.clauses {
            match clause {
                Clause::MatchNode { var, filter } => {
                    let found = match filter {
                        NodeFilter::Id { param: name } => {
                            let id = param(query, name)?.as_int();
                            id.filter(|id| graph.nodes.contains_key(id))
                        }
                        NodeFilter::Property {
                            property,
                            param: name,
                        } => {
                            let wanted = param(query, name)?;
                            graph
                                .nodes
                                .iter()
                                .find(|(_, node)| node.properties.get(property) == Some(wanted))
                                .map(|(id, _)| *id)
                        }
                    };
                    match found {
                        Some(id) => {
                            bound.insert(var, Bound::Node(id));
                        }
                        None => return Ok(Vec::new()),
                    }
                }
                Clause::MatchRelationship {
                    start,
                    var,
                    rel_type,
                    end,
                    id_param,
                } => {
                    let (start, end) = (node_var(&bound, start)?, node_var(&bound, end)?);
                    let wanted = match id_param {
                        Some(name) => Some(param(query, name)?.as_int()),
                        None => None,
                    };
                    let found = graph.relationships.iter().find(|(id, rel)| {
                        rel.start == start
                            && rel.end == end
                            && &rel.rel_type == rel_type
                            && wanted.map_or(true, |w| w == Some(**id))
                    });
                    match found {
                        Some((id, _)) => {
                            bound.insert(var, Bound::Relationship(*id));
                        }
                        None => return Ok(Vec::new()),
                    }
                }
                _ => {}
            }
        }

        for clause in &query.clauses {
            match clause {
                Clause::MatchNode { .. } | Clause::MatchRelationship { .. } => {}
                Clause::CreateNode { var } => {
                    let id = graph.next_node;
                    graph.next_node += 1;
                    graph.nodes.insert(id, StoredNode::default());
                    bound.insert(var, Bound::Node(id));
                }
                Clause::CreateRelationship {
                    start,
                    var,
                    rel_type,
                    end,
                } => {
                    let (start, end) = (node_var(&bound, start)?, node_var(&bound, end)?);
                    let id = graph.next_relationship;
                    graph.next_relationship += 1;
                    graph.relationships.insert(
                        id,
                        StoredRelationship {
                            rel_type: rel_type.clone(),
                            start,
                            end,
                            properties: Properties::new(),
                        },
                    );
                    bound.insert(var, Bound::Relationship(id));
                }
                Clause::SetProperties { var, param: name } => {
                    let Value::Map(patch) = param(query, name)? else {
                        return Err(GraphError::Query(format!("${name} is not a map")));
                    };
                    let properties = match bound.get(var.as_str()) {
                        Some(Bound::Node(id)) => graph.nodes.get_mut(id).map(|n| &mut n.properties),
                        Some(Bound::Relationship(id)) => {
                            graph.relationships.get_mut(id).map(|r| &mut r.properties)
                        }
                        None => None,
                    };
                    let properties = properties
                        .ok_or_else(|| GraphError::Query(format!("variable `{var}` not bound")))?;
                    merge_properties(properties, patch);
                }
                Clause::SetLabels { var, labels } | Clause::RemoveLabels { var, labels } => {
                    let id = node_var(&bound, var)?;
                    let node = graph
                        .nodes
                        .get_mut(&id)
                        .ok_or(GraphError::NotFound("node"))?;
                    for label in split_labels(labels) {
                        if matches!(clause, Clause::SetLabels { .. }) {
                            node.labels.insert(label.to_owned());
                        } else {
                            node.labels.remove(label);
                        }
                    }
                }
                Clause::Delete { var, detach } => match bound.get(var.as_str()) {
                    Some(Bound::Node(id)) => {
                        if !detach && graph.incident(*id).next().is_some() {
                            return Err(GraphError::Query(format!(
                                "cannot delete node {id}, it still has relationships"
                            )));
                        }
                        graph.detach_delete(*id);
                    }
                    Some(Bound::Relationship(id)) => {
                        graph.relationships.remove(id);
                    }
                    None => return Err(GraphError::Query(format!("variable `{var}` not bound"))),
                },
            }
        }

        graph.check_constraints()?;

        let mut row = Row::new();
        for projection in &query.returns {
            let id = bound
                .get(projection.var())
                .map(|b| b.id())
                .ok_or_else(|| {
                    GraphError::Query(format!("variable `{}` not bound", projection.var()))
                })?;
            let value = match projection {
                Projection::IdMap(_) => Value::Map(BTreeMap::from([(
                    "id".to_owned(),
                    Value::Int(id),
                )])),
                Projection::Id(_) => Value::Int(id),
            };
            row.insert(projection.column(), value);
        }
        Ok(vec![row])
    }

    fn selected(
        graph: &MemoryGraph,
        target: &EntityTarget,
        ids: Option<&IdSelector>,
    ) -> Vec<i64> {
        let accepts = |id: i64, properties: &Properties| match ids {
            None => true,
            Some(IdSelector::Internal(ids)) => ids.contains(&id),
            Some(IdSelector::Property { property, values }) => properties
                .get(property)
                .is_some_and(|value| values.contains(value)),
        };
        match target {
            EntityTarget::Node { label } => graph
                .nodes
                .iter()
                .filter(|(id, node)| graph.has_labels(**id, label) && accepts(**id, &node.properties))
                .map(|(id, _)| *id)
                .collect(),
            EntityTarget::Relationship { rel_type } => graph
                .relationships
                .iter()
                .filter(|(id, rel)| &rel.rel_type == rel_type && accepts(**id, &rel.properties))
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    fn load_all(
        graph: &MemoryGraph,
        target: &EntityTarget,
        ids: Option<&IdSelector>,
        max_length: Option<u32>,
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for root in Self::selected(graph, target, ids) {
            match target {
                EntityTarget::Node { .. } => {
                    for trail in graph.trails(root, max_length, &mut BTreeSet::new()) {
                        rows.push(graph.path_row(&trail, "ID(n)", root)?);
                    }
                }
                EntityTarget::Relationship { .. } => {
                    let Some(rel) = graph.relationships.get(&root) else {
                        continue;
                    };
                    let mut used = BTreeSet::from([root]);
                    for left in graph.trails(rel.start, max_length, &mut used) {
                        let mut used: BTreeSet<i64> = left.rels.iter().copied().collect();
                        used.insert(root);
                        for right in graph.trails(rel.end, max_length, &mut used) {
                            let mut nodes: Vec<i64> = left.nodes.iter().rev().copied().collect();
                            nodes.extend(&right.nodes);
                            let mut rels: Vec<i64> = left.rels.iter().rev().copied().collect();
                            rels.push(root);
                            rels.extend(&right.rels);
                            rows.push(graph.path_row(&Trail { nodes, rels }, "ID(r)", root)?);
                        }
                    }
                }
            }
        }
        Ok(rows)
    }

    fn execute(graph: &mut MemoryGraph, statement: &Statement) -> Result<Vec<Row>> {
        match statement {
            Statement::Write(query) => {
                let mut work = graph.clone();
                let rows = Self::write(&mut work, query)?;
                *graph = work;
                Ok(rows)
            }
            Statement::LoadAll {
                target,
                ids,
                max_length,
            } => Self::load_all(graph, target, ids.as_ref(), *max_length),
            Statement::DeleteAll { target } => {
                let ids = Self::selected(graph, target, None);
                let column = match target {
                    EntityTarget::Node { .. } => "ID(n)",
                    EntityTarget::Relationship { .. } => "ID(r)",
                };
                for id in &ids {
                    match target {
                        EntityTarget::Node { .. } => graph.detach_delete(*id),
                        EntityTarget::Relationship { .. } => {
                            graph.relationships.remove(id);
                        }
                    }
                }
                Ok(ids
                    .into_iter()
                    .map(|id| Row::from([(column.to_owned(), Value::Int(id))]))
                    .collect())
            }
            Statement::Count { target } => {
                let count = Self::selected(graph, target, None).len();
                Ok(vec![Row::from([(
                    "count".to_owned(),
                    Value::Int(count as i64),
                )])])
            }
            Statement::Purge => {
                graph.nodes.clear();
                graph.relationships.clear();
                Ok(Vec::new())
            }
            Statement::UniqueConstraint { label, property } => {
                graph.constraints.insert((label.clone(), property.clone()));
                graph.check_constraints()?;
                Ok(Vec::new())
            }
            Statement::Index { label, properties } => {
                graph.indexes.insert((label.clone(), properties.clone()));
                Ok(Vec::new())
            }
            Statement::Raw { text, .. } => Err(GraphError::Query(format!(
                "raw statement `{text}` cannot be interpreted"
            ))),
        }
    }
}

impl Driver for MemoryDriver {
    fn run(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let mut shared = self.shared.lock();
        shared.log.push(statement.text());
        if let Some(message) = shared.fail_next.take() {
            return Err(GraphError::Query(message));
        }
        let rows = match statement {
            Statement::Raw { text, .. } => shared
                .responses
                .get(text)
                .cloned()
                .ok_or_else(|| GraphError::Query(format!("no response for raw statement `{text}`")))?,
            _ => Self::execute(&mut shared.graph, statement)?,
        };
        debug!(statement = statement.name(), rows = rows.len(), "memory.run");
        Ok(rows)
    }

    fn begin(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.snapshot.is_some() {
            return Err(GraphError::Query("transaction already open".into()));
        }
        shared.snapshot = Some(shared.graph.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.shared
            .lock()
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| GraphError::Query("no open transaction".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        let snapshot = shared
            .snapshot
            .take()
            .ok_or_else(|| GraphError::Query("no open transaction".into()))?;
        shared.graph = snapshot;
        Ok(())
    }
}
