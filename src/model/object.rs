//! Application-level domain objects.
//!
//! A domain object is a dynamically typed record whose shape is described by
//! a registered schema. Objects reference each other through shared
//! [`Handle`]s, so an in-memory object graph may contain cycles. The engine
//! never relies on those references for identity: entities are keyed by
//! [`EntityId`] and resolved through an arena.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::query::value::{Properties, Value};
use crate::types::EntityId;

/// Value of a relationship-bearing field on a domain object.
#[derive(Clone, Debug)]
pub enum Related {
    /// Single reference.
    One(Handle),
    /// Collection of references, in insertion order.
    Many(Vec<Handle>),
}

impl Related {
    /// All referenced handles.
    pub fn handles(&self) -> Vec<Handle> {
        match self {
            Related::One(handle) => vec![handle.clone()],
            Related::Many(handles) => handles.clone(),
        }
    }
}

/// Domain object instance.
#[derive(Clone, Debug)]
pub struct Object {
    type_name: String,
    id: EntityId,
    properties: Properties,
    labels: BTreeSet<String>,
    related: BTreeMap<String, Related>,
}

impl Object {
    /// Creates an empty, unsaved object of a registered type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: EntityId::Unsaved,
            properties: Properties::new(),
            labels: BTreeSet::new(),
            related: BTreeMap::new(),
        }
    }

    /// Builder-style property assignment.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Builder-style runtime label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Builder-style single reference.
    pub fn with_related(mut self, field: impl Into<String>, target: Handle) -> Self {
        self.related.insert(field.into(), Related::One(target));
        self
    }

    /// Wraps the object in a shared handle.
    pub fn into_handle(self) -> Handle {
        Handle(Arc::new(RwLock::new(self)))
    }

    /// Registered type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Current identity.
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    /// Property map, excluding relationship fields.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Single property lookup.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Sets or replaces a property. Assigning `Value::Null` removes it.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        match value.into() {
            Value::Null => {
                self.properties.remove(&name);
            }
            value => {
                self.properties.insert(name, value);
            }
        }
    }

    pub(crate) fn replace_properties(&mut self, properties: Properties) {
        self.properties = properties;
    }

    /// Runtime labels attached to this instance.
    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    /// Adds a runtime label.
    pub fn add_label(&mut self, label: impl Into<String>) {
        self.labels.insert(label.into());
    }

    /// Removes a runtime label.
    pub fn remove_label(&mut self, label: &str) -> bool {
        self.labels.remove(label)
    }

    pub(crate) fn replace_labels(&mut self, labels: BTreeSet<String>) {
        self.labels = labels;
    }

    /// Raw relationship field value.
    pub fn related(&self, field: &str) -> Option<&Related> {
        self.related.get(field)
    }

    /// All populated relationship fields.
    pub fn related_fields(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.related.iter().map(|(name, related)| (name.as_str(), related))
    }

    /// Replaces a single-valued field; `None` nulls it out.
    pub fn set_related(&mut self, field: impl Into<String>, target: Option<Handle>) {
        let field = field.into();
        match target {
            Some(handle) => {
                self.related.insert(field, Related::One(handle));
            }
            None => {
                self.related.remove(&field);
            }
        }
    }

    /// Appends to a collection field unless the handle is already present.
    pub fn push_related(&mut self, field: impl Into<String>, target: Handle) {
        let entry = self
            .related
            .entry(field.into())
            .or_insert_with(|| Related::Many(Vec::new()));
        let replacement = match entry {
            Related::Many(handles) => {
                if !handles.iter().any(|h| h.ptr_eq(&target)) {
                    handles.push(target);
                }
                None
            }
            Related::One(existing) if existing.ptr_eq(&target) => None,
            Related::One(existing) => Some(Related::Many(vec![existing.clone(), target])),
        };
        if let Some(replacement) = replacement {
            *entry = replacement;
        }
    }

    /// Removes one handle from a field. Returns whether anything changed.
    pub fn remove_related(&mut self, field: &str, target: &Handle) -> bool {
        let Some(entry) = self.related.get_mut(field) else {
            return false;
        };
        let removed = match entry {
            Related::One(existing) => existing.ptr_eq(target),
            Related::Many(handles) => {
                let before = handles.len();
                handles.retain(|h| !h.ptr_eq(target));
                handles.len() != before
            }
        };
        if matches!(entry, Related::One(_)) && removed {
            self.related.remove(field);
        }
        removed
    }

    /// Drops every relationship field.
    pub fn clear_related(&mut self) {
        self.related.clear();
    }
}

impl PartialEq for Object {
    /// Compares type, identity, labels, properties and the identities of
    /// referenced objects. Referenced objects are not compared recursively.
    fn eq(&self, other: &Self) -> bool {
        fn targets(related: &BTreeMap<String, Related>) -> BTreeMap<&str, Vec<EntityId>> {
            related
                .iter()
                .map(|(name, rel)| (name.as_str(), rel.handles().iter().map(Handle::id).collect()))
                .collect()
        }
        self.type_name == other.type_name
            && self.id == other.id
            && self.labels == other.labels
            && self.properties == other.properties
            && targets(&self.related) == targets(&other.related)
    }
}

/// Shared, interior-mutable reference to a domain object.
#[derive(Clone)]
pub struct Handle(Arc<RwLock<Object>>);

impl Handle {
    /// Wraps an object.
    pub fn new(object: Object) -> Self {
        object.into_handle()
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.0.read()
    }

    /// Write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.0.write()
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address usable as a hash key while the handle is alive.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Current identity of the object.
    pub fn id(&self) -> EntityId {
        self.0.read().id()
    }

    /// Registered type name of the object.
    pub fn type_name(&self) -> String {
        self.0.read().type_name().to_owned()
    }

    /// Cloned property value.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.0.read().property(name).cloned()
    }

    /// Sets a property.
    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.write().set_property(name, value);
    }

    /// First handle referenced by a field.
    pub fn related_one(&self, field: &str) -> Option<Handle> {
        match self.0.read().related(field)? {
            Related::One(handle) => Some(handle.clone()),
            Related::Many(handles) => handles.first().cloned(),
        }
    }

    /// Every handle referenced by a field.
    pub fn related_many(&self, field: &str) -> Vec<Handle> {
        self.0
            .read()
            .related(field)
            .map(Related::handles)
            .unwrap_or_default()
    }

    /// Replaces or nulls out a single-valued field.
    pub fn set_related(&self, field: impl Into<String>, target: Option<Handle>) {
        self.0.write().set_related(field, target);
    }

    /// Appends to a collection field.
    pub fn push_related(&self, field: impl Into<String>, target: Handle) {
        self.0.write().push_related(field, target);
    }

    /// Snapshot of the object, with references kept as handles.
    pub fn snapshot(&self) -> Object {
        self.0.read().clone()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: object graphs may be cyclic.
        let object = self.0.read();
        f.debug_struct("Handle")
            .field("type", &object.type_name())
            .field("id", &object.id())
            .finish()
    }
}
