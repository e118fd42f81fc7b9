//! Per-entity statement fragments.
//!
//! An [`EntityQuery`] is built from the pass copy of an entity and its last
//! stored snapshot. It knows whether the entity is dirty and produces the
//! CREATE, MATCH, SET and DELETE fragments the saver merges into a single
//! write statement. Bulk statements (load, delete-all, count) are built by
//! the free functions at the bottom of the module.

use std::collections::BTreeSet;

use super::ast::{Clause, EntityTarget, IdSelector, NodeFilter, Params, Statement};
use super::value::{Properties, Value};
use crate::model::{join_labels, EntityRef, Node, Relationship, ID_PROPERTY};
use crate::types::{Depth, EntityId, GraphError, Result};

/// How a persisted node is located.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchKey {
    /// Internal database id.
    Internal(i64),
    /// Declared custom-id property.
    Custom {
        /// Property name.
        property: String,
        /// Property value.
        value: Value,
    },
}

impl MatchKey {
    /// Internal id when assigned, otherwise the custom id if one is declared.
    pub fn for_entity(id: EntityId, custom: Option<(String, Value)>) -> Option<Self> {
        match (id.persisted(), custom) {
            (Some(db_id), _) => Some(MatchKey::Internal(db_id)),
            (None, Some((property, value))) if !value.is_null() => {
                Some(MatchKey::Custom { property, value })
            }
            _ => None,
        }
    }
}

/// Clauses and parameters contributed by one entity.
#[derive(Clone, Debug, Default)]
pub struct Fragment {
    /// Clauses, in any order; merging sorts them.
    pub clauses: Vec<Clause>,
    /// Parameters the clauses reference.
    pub params: Params,
    /// Entities whose variables the clauses use without binding them.
    pub dependencies: Vec<EntityRef>,
}

#[derive(Clone, Debug)]
enum Shape {
    Node {
        labels_added: Vec<String>,
        labels_removed: Vec<String>,
    },
    Relationship {
        rel_type: String,
        start: EntityRef,
        end: EntityRef,
    },
}

/// Statement builder for one entity of a save pass.
#[derive(Clone, Debug)]
pub struct EntityQuery {
    entity: EntityRef,
    signature: String,
    shape: Shape,
    delta: Properties,
    payload: Properties,
    removed_relationships: usize,
    match_key: Option<MatchKey>,
}

impl EntityQuery {
    /// Builder for a node. `stored` is the node's last cached snapshot.
    pub fn node(node: &Node, stored: Option<&Node>, match_key: Option<MatchKey>) -> Self {
        let current: BTreeSet<&str> = node.labels().collect();
        let previous: BTreeSet<&str> = stored.map(|s| s.labels().collect()).unwrap_or_default();
        let delta = property_delta(&node.properties, stored.map(|s| &s.properties));
        let entity = EntityRef::node(node.id);
        Self {
            signature: entity.signature(),
            entity,
            shape: Shape::Node {
                labels_added: current.difference(&previous).map(|l| (*l).to_owned()).collect(),
                labels_removed: previous.difference(&current).map(|l| (*l).to_owned()).collect(),
            },
            payload: delta.clone(),
            delta,
            removed_relationships: 0,
            match_key,
        }
    }

    /// Builder for a relationship. Its SET always carries the full map.
    pub fn relationship(rel: &Relationship, stored: Option<&Relationship>) -> Self {
        let delta = property_delta(&rel.properties, stored.map(|s| &s.properties));
        let mut payload: Properties = rel
            .properties
            .iter()
            .filter(|(k, _)| k.as_str() != ID_PROPERTY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &delta {
            if value.is_null() {
                payload.insert(key.clone(), Value::Null);
            }
        }
        let entity = EntityRef::relationship(rel.id);
        Self {
            signature: entity.signature(),
            entity,
            shape: Shape::Relationship {
                rel_type: rel.rel_type.clone(),
                start: EntityRef::node(rel.start),
                end: EntityRef::node(rel.end),
            },
            delta,
            payload,
            removed_relationships: 0,
            match_key: rel.id.persisted().map(MatchKey::Internal),
        }
    }

    /// Records how many relationships of this node were removed since the
    /// last snapshot.
    pub fn with_removed_relationships(mut self, count: usize) -> Self {
        self.removed_relationships = count;
        self
    }

    /// Entity the builder was made for.
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// Bound variable.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Changed properties, with removed ones as `Null`.
    pub fn delta(&self) -> &Properties {
        &self.delta
    }

    /// True when the labels differ from the snapshot.
    pub fn labels_changed(&self) -> bool {
        match &self.shape {
            Shape::Node {
                labels_added,
                labels_removed,
            } => !labels_added.is_empty() || !labels_removed.is_empty(),
            Shape::Relationship { .. } => false,
        }
    }

    /// Whether the entity must be written.
    pub fn is_dirty(&self) -> bool {
        self.entity.id.is_pending()
            || !self.delta.is_empty()
            || self.labels_changed()
            || self.removed_relationships > 0
    }

    /// CREATE clause. Relationships depend on both endpoints.
    pub fn create(&self) -> Fragment {
        match &self.shape {
            Shape::Node { .. } => Fragment {
                clauses: vec![Clause::CreateNode {
                    var: self.signature.clone(),
                }],
                ..Fragment::default()
            },
            Shape::Relationship {
                rel_type,
                start,
                end,
            } => Fragment {
                clauses: vec![Clause::CreateRelationship {
                    start: start.signature(),
                    var: self.signature.clone(),
                    rel_type: rel_type.clone(),
                    end: end.signature(),
                }],
                params: Params::new(),
                dependencies: vec![*start, *end],
            },
        }
    }

    /// MATCH clause binding the persisted entity.
    pub fn matching(&self) -> Result<Fragment> {
        let param = format!("{}ID", self.signature);
        match &self.shape {
            Shape::Node { .. } => {
                let (filter, value) = match &self.match_key {
                    Some(MatchKey::Internal(id)) => {
                        (NodeFilter::Id { param: param.clone() }, Value::Int(*id))
                    }
                    Some(MatchKey::Custom { property, value }) => (
                        NodeFilter::Property {
                            property: property.clone(),
                            param: param.clone(),
                        },
                        value.clone(),
                    ),
                    None => {
                        return Err(GraphError::Consistency(format!(
                            "node {} has no id to match on",
                            self.signature
                        )))
                    }
                };
                Ok(Fragment {
                    clauses: vec![Clause::MatchNode {
                        var: self.signature.clone(),
                        filter,
                    }],
                    params: Params::from([(param, value)]),
                    dependencies: Vec::new(),
                })
            }
            Shape::Relationship {
                rel_type,
                start,
                end,
            } => {
                let mut params = Params::new();
                let id_param = match &self.match_key {
                    Some(MatchKey::Internal(id)) => {
                        params.insert(param.clone(), Value::Int(*id));
                        Some(param)
                    }
                    _ => None,
                };
                Ok(Fragment {
                    clauses: vec![Clause::MatchRelationship {
                        start: start.signature(),
                        var: self.signature.clone(),
                        rel_type: rel_type.clone(),
                        end: end.signature(),
                        id_param,
                    }],
                    params,
                    dependencies: vec![*start, *end],
                })
            }
        }
    }

    /// SET clauses for changed properties and labels. Empty when clean.
    pub fn set(&self) -> Fragment {
        let mut fragment = Fragment::default();
        if !self.payload.is_empty() {
            let param = format!("{}Properties", self.signature);
            fragment.clauses.push(Clause::SetProperties {
                var: self.signature.clone(),
                param: param.clone(),
            });
            fragment
                .params
                .insert(param, Value::Map(self.payload.clone()));
        }
        if let Shape::Node {
            labels_added,
            labels_removed,
        } = &self.shape
        {
            if !labels_added.is_empty() {
                fragment.clauses.push(Clause::SetLabels {
                    var: self.signature.clone(),
                    labels: join_labels(labels_added),
                });
            }
            if !labels_removed.is_empty() {
                fragment.clauses.push(Clause::RemoveLabels {
                    var: self.signature.clone(),
                    labels: join_labels(labels_removed),
                });
            }
        }
        fragment
    }

    /// DELETE clause. Nodes are detach-deleted.
    pub fn delete(&self) -> Fragment {
        Fragment {
            clauses: vec![Clause::Delete {
                var: self.signature.clone(),
                detach: matches!(self.shape, Shape::Node { .. }),
            }],
            ..Fragment::default()
        }
    }
}

/// Shallow diff of `current` against `stored`, ignoring the id mirror.
/// Keys missing from `current` map to `Null`.
pub fn property_delta(current: &Properties, stored: Option<&Properties>) -> Properties {
    let mut delta = Properties::new();
    for (key, value) in current {
        if key == ID_PROPERTY {
            continue;
        }
        if stored.and_then(|s| s.get(key)) != Some(value) {
            delta.insert(key.clone(), value.clone());
        }
    }
    if let Some(stored) = stored {
        for key in stored.keys() {
            if key != ID_PROPERTY && !current.contains_key(key) {
                delta.insert(key.clone(), Value::Null);
            }
        }
    }
    delta
}

/// Bounded path fetch around the selected roots.
pub fn load_all(target: EntityTarget, ids: Option<IdSelector>, depth: Depth) -> Statement {
    Statement::LoadAll {
        target,
        ids,
        max_length: match depth {
            Depth::Bounded(_) => Some(depth.step_limit()),
            Depth::Unbounded => None,
        },
    }
}

/// Deletes every entity of a type.
pub fn delete_all(target: EntityTarget) -> Statement {
    Statement::DeleteAll { target }
}

/// Counts entities of a type.
pub fn count(target: EntityTarget) -> Statement {
    Statement::Count { target }
}
