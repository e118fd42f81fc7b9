//! Caller-written statements.
//!
//! Entities in the returned rows go through the same hydration as a load at
//! depth zero, so they join the identity map and reuse cached objects.

use tracing::debug;

use super::loader::{scratch_node, scratch_relationship};
use super::Session;
use crate::driver::Row;
use crate::model::{EntityKind, EntityRef, Graph, Handle};
use crate::query::ast::{Params, Statement};
use crate::query::value::Value;
use crate::types::{EntityId, GraphError, Result};

impl Session {
    /// Runs a statement verbatim and returns its rows.
    pub fn query(&mut self, text: impl Into<String>, params: Params) -> Result<Vec<Row>> {
        self.run(&Statement::Raw {
            text: text.into(),
            params,
        })
    }

    /// Runs a statement and hydrates every returned entity of `type_name`.
    ///
    /// Other node and relationship values in a row are decoded alongside; a
    /// relationship type must return both of its endpoints. A row without
    /// an entity of the type is rejected.
    pub fn query_for_objects(
        &mut self,
        type_name: &str,
        text: impl Into<String>,
        params: Params,
    ) -> Result<Vec<Handle>> {
        let kind = self.kind_of(type_name)?;
        let rows = self.query(text, params)?;

        let mut scratch = Graph::new();
        for value in rows.iter().flat_map(|row| row.values()) {
            if let Value::Node(node) = value {
                scratch.insert_node(scratch_node(node));
            }
        }
        for value in rows.iter().flat_map(|row| row.values()) {
            if let Value::Relationship(rel) = value {
                scratch.insert_relationship(scratch_relationship(rel, rel.start, rel.end));
            }
        }

        let mut roots = Vec::new();
        for row in &rows {
            let matched: Vec<EntityRef> = row
                .values()
                .filter_map(|value| match value {
                    Value::Node(node) => Some(EntityRef::node(EntityId::Persisted(node.id))),
                    Value::Relationship(rel) => {
                        Some(EntityRef::relationship(EntityId::Persisted(rel.id)))
                    }
                    _ => None,
                })
                .filter(|entity| {
                    entity.kind == kind
                        && self.type_in(&scratch, *entity).as_deref() == Some(type_name)
                })
                .collect();
            if matched.is_empty() {
                return Err(GraphError::Query(format!(
                    "result row has no '{type_name}' entity"
                )));
            }
            for entity in matched {
                if !roots.contains(&entity) {
                    roots.push(entity);
                }
            }
        }

        if kind == EntityKind::Relationship {
            for root in &roots {
                let complete = scratch.relationship(root.id).is_some_and(|rel| {
                    scratch.node(rel.start).is_some() && scratch.node(rel.end).is_some()
                });
                if !complete {
                    return Err(GraphError::Query(format!(
                        "relationship {} returned without its endpoints",
                        root.id
                    )));
                }
            }
        }

        let hydrated = self.hydrate(type_name, &roots, &scratch, 0, false)?;
        debug!(
            type_name,
            rows = rows.len(),
            roots = hydrated.roots.len(),
            "session.query.hydrate"
        );
        Ok(hydrated.roots)
    }

    /// Like [`Session::query_for_objects`] for at most one entity.
    pub fn query_for_object(
        &mut self,
        type_name: &str,
        text: impl Into<String>,
        params: Params,
    ) -> Result<Option<Handle>> {
        let mut objects = self.query_for_objects(type_name, text, params)?;
        if objects.len() > 1 {
            return Err(GraphError::Consistency(format!(
                "expected one '{type_name}', the query returned {}",
                objects.len()
            )));
        }
        Ok(objects.pop())
    }

    /// Runs a statement returning a single row with an integer column.
    pub fn count(&mut self, text: impl Into<String>, params: Params) -> Result<i64> {
        let rows = self.query(text, params)?;
        let [row] = rows.as_slice() else {
            return Err(GraphError::Query(format!(
                "count expects one row, got {}",
                rows.len()
            )));
        };
        row.values()
            .find_map(Value::as_int)
            .ok_or_else(|| GraphError::Query("count row has no integer column".into()))
    }

    fn type_in(&self, scratch: &Graph, entity: EntityRef) -> Option<String> {
        match entity.kind {
            EntityKind::Node => scratch
                .node(entity.id)
                .and_then(|node| self.registry.node_type_for_label(&node.label)),
            EntityKind::Relationship => scratch
                .relationship(entity.id)
                .and_then(|rel| self.registry.relationship_type_for(&rel.rel_type)),
        }
    }
}
