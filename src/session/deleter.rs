//! Deletes and bulk removal.

use tracing::debug;

use super::{execute, notify_removed, Session};
use crate::model::{EntityKind, EntityRef, GraphEntity, Handle, Node};
use crate::query::ast::{Projection, Statement};
use crate::query::builder::{self, EntityQuery, MatchKey};
use crate::query::clauses::ClauseSet;
use crate::query::value::Value;
use crate::types::{EntityId, GraphError, Result};

impl Session {
    /// Deletes one object from the database and the cache.
    ///
    /// Deleting a node detaches it, so its cached relationships go with it.
    /// Every removed object is notified and marked unsaved; surviving
    /// neighbours receive an update notification. Deleting a persisted
    /// object the session never cached does nothing.
    pub fn delete(&mut self, object: &Handle) -> Result<()> {
        let entity = self.entity_ref(object)?;
        if !entity.id.is_persisted() {
            return Err(GraphError::InvalidArgument(format!(
                "cannot delete an unsaved '{}'",
                object.type_name()
            )));
        }
        let Some(cached) = self.store.get(entity) else {
            debug!(entity = %entity.signature(), "session.delete.uncached");
            return Ok(());
        };

        let mut batch = self.listeners.batch();
        batch.pre_delete(object);
        if let GraphEntity::Node(node) = &cached {
            for rel_id in &node.relationships {
                let incident = self
                    .store
                    .get(EntityRef::relationship(*rel_id))
                    .and_then(|rel| rel.value().cloned());
                if let Some(incident) = incident {
                    batch.pre_delete(&incident);
                }
            }
        }

        let mut clauses = ClauseSet::new();
        let query = match &cached {
            GraphEntity::Node(node) => EntityQuery::node(
                node,
                Some(node),
                node.id.persisted().map(MatchKey::Internal),
            ),
            GraphEntity::Relationship(rel) => {
                for endpoint in [rel.start, rel.end] {
                    clauses.extend(endpoint_match(endpoint)?);
                }
                EntityQuery::relationship(rel, Some(rel))
            }
        };
        let binding = query.matching()?;
        clauses.extend(binding);
        clauses.extend(query.delete());
        let statement =
            Statement::Write(clauses.finish(vec![Projection::Id(entity.signature())]));

        let rows = execute(self.driver.as_mut(), &self.config, &statement)?;
        if rows.is_empty() {
            return Err(GraphError::Query(format!(
                "delete of {} matched nothing",
                entity.signature()
            )));
        }

        let (deleted, updated) = self.store.delete(entity);
        notify_removed(&self.store, &mut batch, &deleted, &updated);
        debug!(
            entity = %entity.signature(),
            deleted = deleted.len(),
            updated = updated.len(),
            "session.delete"
        );
        Ok(())
    }

    /// Deletes every entity of a type. Returns how many were deleted.
    pub fn delete_all(&mut self, type_name: &str) -> Result<usize> {
        let kind = self.kind_of(type_name)?;
        let target = self.target(type_name)?;
        let column = match kind {
            EntityKind::Node => "ID(n)",
            EntityKind::Relationship => "ID(r)",
        };
        let rows = self.run(&builder::delete_all(target))?;
        let ids = rows
            .iter()
            .map(|row| {
                row.get(column).and_then(Value::as_int).ok_or_else(|| {
                    GraphError::Query(format!("delete-all row has no `{column}` column"))
                })
            })
            .collect::<Result<Vec<i64>>>()?;

        let mut deleted = Vec::new();
        let mut updated = Vec::new();
        for id in &ids {
            let (d, u) = self.store.delete(EntityRef {
                kind,
                id: EntityId::Persisted(*id),
            });
            deleted.extend(d);
            updated.extend(u);
        }
        let mut batch = self.listeners.batch();
        notify_removed(&self.store, &mut batch, &deleted, &updated);
        debug!(type_name, deleted = ids.len(), "session.delete_all");
        Ok(ids.len())
    }

    /// Deletes everything in the database and empties the cache.
    pub fn purge_database(&mut self) -> Result<()> {
        self.run(&Statement::Purge)?;
        let deleted = self.store.purge();
        let mut batch = self.listeners.batch();
        notify_removed(&self.store, &mut batch, &deleted, &[]);
        debug!(deleted = deleted.len(), "session.purge");
        Ok(())
    }
}

/// MATCH fragment binding a relationship endpoint by id.
fn endpoint_match(id: EntityId) -> Result<builder::Fragment> {
    EntityQuery::node(&Node::new(id, ""), None, id.persisted().map(MatchKey::Internal)).matching()
}
