//! Explicit schema registry and the schema-provider contract.
//!
//! Domain types are described once at startup through [`NodeSchema`] and
//! [`RelationshipSchema`] builders and registered in a [`Registry`]. The
//! registry answers the [`SchemaProvider`] questions the loader and saver ask:
//! what label an object carries, which backend properties it has, which
//! field of a node receives a given relationship.
//!
//! Relationship-field resolution is computed lazily per node type on first
//! use and cached; ambiguous mappings surface as [`GraphError::Schema`] at
//! that point.

pub mod coerce;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::model::{join_labels, Graph, Handle, Object, Related, Relationship};
use crate::query::ast::Statement;
use crate::query::value::{Properties, Value};
use crate::types::{EntityId, GraphError, Result};

/// Declared type of a property field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Binary payload.
    Bytes,
    /// Nanoseconds since the Unix epoch.
    DateTime,
    /// Homogeneous list.
    List(Box<FieldType>),
    /// String-keyed map, stored flattened as `field.key`.
    Map(Box<FieldType>),
    /// Anything; no coercion.
    Any,
}

impl FieldType {
    /// Scalar types are the only ones allowed as custom ids.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::Bool | FieldType::Int | FieldType::Float | FieldType::String
        )
    }
}

/// One declared property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDef {
    /// Backend property name.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Backed by a uniqueness constraint.
    pub unique: bool,
    /// Backed by an index.
    pub indexed: bool,
}

impl PropertyDef {
    /// Plain property.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            unique: false,
            indexed: false,
        }
    }
}

/// Direction of a relationship as seen from the node declaring the field.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// The declaring node is the start node.
    Outgoing,
    /// The declaring node is the end node.
    Incoming,
}

/// What a relationship field points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Another node type; the relationship itself is phantom.
    Node(String),
    /// A relationship type carrying its own domain object.
    Relationship(String),
}

/// Relationship-bearing field of a node type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationField {
    /// Field name on the domain object.
    pub name: String,
    /// Target type.
    pub target: Target,
    /// Direction relative to the declaring node.
    pub direction: Direction,
    /// Explicit relationship type for node targets.
    pub rel_type: Option<String>,
    /// Holds a collection rather than a single reference.
    pub many: bool,
}

impl RelationField {
    /// Outgoing field.
    pub fn outgoing(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
            direction: Direction::Outgoing,
            rel_type: None,
            many: false,
        }
    }

    /// Incoming field.
    pub fn incoming(name: impl Into<String>, target: Target) -> Self {
        Self {
            direction: Direction::Incoming,
            ..Self::outgoing(name, target)
        }
    }

    /// Sets an explicit relationship type.
    pub fn rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel_type = Some(rel_type.into());
        self
    }

    /// Marks the field as a collection.
    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }
}

/// Description of a node type.
#[derive(Clone, Debug)]
pub struct NodeSchema {
    name: String,
    labels: Vec<String>,
    properties: Vec<PropertyDef>,
    custom_id: Option<String>,
    relations: Vec<RelationField>,
}

impl NodeSchema {
    /// New node type whose label defaults to its name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            labels: vec![name.clone()],
            name,
            properties: Vec::new(),
            custom_id: None,
            relations: Vec::new(),
        }
    }

    /// Replaces the type's own labels.
    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a property.
    pub fn property(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.properties.push(PropertyDef::new(name, field_type));
        self
    }

    /// Declares a property backed by a uniqueness constraint.
    pub fn unique_property(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let mut def = PropertyDef::new(name, field_type);
        def.unique = true;
        self.properties.push(def);
        self
    }

    /// Declares an indexed property.
    pub fn indexed_property(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let mut def = PropertyDef::new(name, field_type);
        def.indexed = true;
        self.properties.push(def);
        self
    }

    /// Declares a custom-id property.
    pub fn custom_id(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        self.custom_id = Some(name.clone());
        self.properties.push(PropertyDef::new(name, field_type));
        self
    }

    /// Declares a relationship field.
    pub fn relation(mut self, field: RelationField) -> Self {
        self.relations.push(field);
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical label string of the type itself.
    pub fn struct_label(&self) -> String {
        join_labels(&self.labels)
    }

    /// Declared properties.
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    /// Declared relationship fields.
    pub fn relations(&self) -> &[RelationField] {
        &self.relations
    }

    /// Relationship field by name.
    pub fn relation_field(&self, name: &str) -> Option<&RelationField> {
        self.relations.iter().find(|f| f.name == name)
    }
}

/// One end of a relationship type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Field on the relationship object holding the node.
    pub field: String,
    /// Node type of the endpoint.
    pub node_type: String,
}

/// Description of a relationship type with its own domain object.
#[derive(Clone, Debug)]
pub struct RelationshipSchema {
    name: String,
    rel_type: String,
    properties: Vec<PropertyDef>,
    custom_id: Option<String>,
    start: Endpoint,
    end: Endpoint,
}

impl RelationshipSchema {
    /// New relationship type. The backend type defaults to the upper-cased name.
    pub fn new(
        name: impl Into<String>,
        start: (impl Into<String>, impl Into<String>),
        end: (impl Into<String>, impl Into<String>),
    ) -> Self {
        let name = name.into();
        Self {
            rel_type: name.to_uppercase(),
            name,
            properties: Vec::new(),
            custom_id: None,
            start: Endpoint {
                field: start.0.into(),
                node_type: start.1.into(),
            },
            end: Endpoint {
                field: end.0.into(),
                node_type: end.1.into(),
            },
        }
    }

    /// Overrides the backend relationship type.
    pub fn rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel_type = rel_type.into();
        self
    }

    /// Declares a property.
    pub fn property(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.properties.push(PropertyDef::new(name, field_type));
        self
    }

    /// Declares a custom-id property.
    pub fn custom_id(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        self.custom_id = Some(name.clone());
        self.properties.push(PropertyDef::new(name, field_type));
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend relationship type.
    pub fn backend_type(&self) -> &str {
        &self.rel_type
    }

    /// Start endpoint.
    pub fn start(&self) -> &Endpoint {
        &self.start
    }

    /// End endpoint.
    pub fn end(&self) -> &Endpoint {
        &self.end
    }

    /// Declared properties.
    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }
}

/// Registered type description.
#[derive(Clone, Debug)]
pub enum EntitySchema {
    /// Node type.
    Node(NodeSchema),
    /// Relationship type.
    Relationship(RelationshipSchema),
}

impl EntitySchema {
    /// Type name.
    pub fn name(&self) -> &str {
        match self {
            EntitySchema::Node(s) => s.name(),
            EntitySchema::Relationship(s) => s.name(),
        }
    }

    /// Declared properties.
    pub fn properties(&self) -> &[PropertyDef] {
        match self {
            EntitySchema::Node(s) => s.properties(),
            EntitySchema::Relationship(s) => s.properties(),
        }
    }

    /// Custom-id property name.
    pub fn custom_id(&self) -> Option<&str> {
        match self {
            EntitySchema::Node(s) => s.custom_id.as_deref(),
            EntitySchema::Relationship(s) => s.custom_id.as_deref(),
        }
    }

    /// True for relationship types.
    pub fn is_relationship(&self) -> bool {
        matches!(self, EntitySchema::Relationship(_))
    }
}

/// Something a domain object points at, as seen by the saver.
#[derive(Clone, Debug)]
pub enum RelatedEntity {
    /// Relationship object referenced from a node field.
    Entity {
        /// Declaring field.
        field: String,
        /// Relationship domain object.
        relationship: Handle,
    },
    /// Node referenced directly from a node field; the edge has no object.
    Phantom {
        /// Declaring field.
        field: String,
        /// Backend relationship type.
        rel_type: String,
        /// Referenced node.
        other: Handle,
        /// Direction relative to the declaring node.
        direction: Direction,
    },
    /// Endpoint node of a relationship object.
    Endpoint {
        /// Declaring field.
        field: String,
        /// Endpoint node.
        node: Handle,
        /// True for the start node.
        start: bool,
    },
}

/// Per-type answers the engine needs about domain objects.
pub trait SchemaProvider: Send + Sync {
    /// Label string of a node object, or type of a relationship object.
    fn label_or_type(&self, object: &Object) -> Result<String>;
    /// Backend properties of an object, map fields flattened.
    fn properties(&self, object: &Object) -> Result<Properties>;
    /// Custom-id property declared by a type.
    fn custom_id_field(&self, type_name: &str) -> Result<Option<String>>;
    /// Entities a domain object references.
    fn related_entities(&self, object: &Object) -> Result<Vec<RelatedEntity>>;
    /// Field of `node` (of type `type_name`) that receives `rel`, if navigable.
    fn graph_field(
        &self,
        type_name: &str,
        node: EntityId,
        rel: &Relationship,
        graph: &Graph,
    ) -> Result<Option<RelationField>>;
    /// Declared type of a property, used for coercion.
    fn declared_field_type(&self, type_name: &str, property: &str) -> Option<FieldType>;
}

#[derive(Debug, Default)]
struct Resolution {
    same_entity: FxHashMap<(String, Direction), RelationField>,
    different_entity: FxHashMap<(String, String, String), RelationField>,
}

/// Registry of every domain type known to a session.
#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<String, Arc<EntitySchema>>,
    struct_labels: BTreeSet<String>,
    resolved: RwLock<FxHashMap<String, Arc<Resolution>>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node type.
    pub fn register_node(&mut self, schema: NodeSchema) -> Result<()> {
        if schema.labels.is_empty() {
            return Err(GraphError::Schema(format!(
                "node type '{}' declares no labels",
                schema.name
            )));
        }
        self.validate_properties(&schema.name, &schema.properties, schema.custom_id.as_deref())?;
        self.struct_labels.extend(schema.labels.iter().cloned());
        self.insert(EntitySchema::Node(schema))
    }

    /// Registers a relationship type.
    pub fn register_relationship(&mut self, schema: RelationshipSchema) -> Result<()> {
        if schema.rel_type.is_empty() {
            return Err(GraphError::Schema(format!(
                "relationship type '{}' has an empty backend type",
                schema.name
            )));
        }
        self.validate_properties(&schema.name, &schema.properties, schema.custom_id.as_deref())?;
        self.insert(EntitySchema::Relationship(schema))
    }

    fn insert(&mut self, schema: EntitySchema) -> Result<()> {
        let name = schema.name().to_owned();
        if self.types.contains_key(&name) {
            return Err(GraphError::Schema(format!("type '{name}' registered twice")));
        }
        self.types.insert(name, Arc::new(schema));
        self.resolved.write().clear();
        Ok(())
    }

    fn validate_properties(
        &self,
        type_name: &str,
        properties: &[PropertyDef],
        custom_id: Option<&str>,
    ) -> Result<()> {
        let mut seen = BTreeSet::new();
        for def in properties {
            if def.name.contains(coerce::MAP_DELIMITER) {
                return Err(GraphError::Schema(format!(
                    "property '{}' of '{type_name}' can't contain '{}'",
                    def.name,
                    coerce::MAP_DELIMITER
                )));
            }
            if def.name == crate::model::ID_PROPERTY {
                return Err(GraphError::Schema(format!(
                    "property name 'id' of '{type_name}' is reserved"
                )));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(GraphError::Schema(format!(
                    "property '{}' of '{type_name}' declared twice",
                    def.name
                )));
            }
        }
        if let Some(custom_id) = custom_id {
            let def = properties.iter().find(|d| d.name == custom_id);
            if !def.is_some_and(|d| d.field_type.is_scalar()) {
                return Err(GraphError::Schema(format!(
                    "invalid custom id type for '{custom_id}' in '{type_name}'"
                )));
            }
        }
        Ok(())
    }

    /// Looks up a registered type.
    pub fn get(&self, type_name: &str) -> Result<Arc<EntitySchema>> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| GraphError::Schema(format!("type '{type_name}' is not registered")))
    }

    /// Looks up a registered node type.
    pub fn node_schema(&self, type_name: &str) -> Result<Arc<EntitySchema>> {
        let schema = self.get(type_name)?;
        match schema.as_ref() {
            EntitySchema::Node(_) => Ok(schema),
            EntitySchema::Relationship(_) => Err(GraphError::Schema(format!(
                "type '{type_name}' is a relationship type"
            ))),
        }
    }

    /// Label of a node type, or backend type of a relationship type.
    pub fn type_label(&self, type_name: &str) -> Result<String> {
        Ok(match self.get(type_name)?.as_ref() {
            EntitySchema::Node(s) => s.struct_label(),
            EntitySchema::Relationship(s) => s.rel_type.clone(),
        })
    }

    /// Restricts a label string to labels owned by registered node types.
    pub fn filter_struct_labels(&self, label: &str) -> String {
        join_labels(
            label
                .split(crate::model::LABEL_DELIMITER)
                .filter(|l| self.struct_labels.contains(*l)),
        )
    }

    /// Labels in `label` that no registered node type owns.
    pub fn runtime_labels(&self, label: &str) -> BTreeSet<String> {
        label
            .split(crate::model::LABEL_DELIMITER)
            .filter(|l| !l.is_empty() && !self.struct_labels.contains(*l))
            .map(str::to_owned)
            .collect()
    }

    /// Node type whose own labels match the registered labels in `label`.
    pub fn node_type_for_label(&self, label: &str) -> Option<String> {
        let filtered = self.filter_struct_labels(label);
        self.types.values().find_map(|schema| match schema.as_ref() {
            EntitySchema::Node(s) if s.struct_label() == filtered => Some(s.name.clone()),
            _ => None,
        })
    }

    /// Relationship type registered under a backend type.
    pub fn relationship_type_for(&self, rel_type: &str) -> Option<String> {
        self.types.values().find_map(|schema| match schema.as_ref() {
            EntitySchema::Relationship(s) if s.rel_type == rel_type => Some(s.name.clone()),
            _ => None,
        })
    }

    /// Endpoint description of a relationship type.
    pub fn endpoint(&self, type_name: &str, start: bool) -> Result<Endpoint> {
        match self.get(type_name)?.as_ref() {
            EntitySchema::Relationship(s) => Ok(if start { s.start.clone() } else { s.end.clone() }),
            EntitySchema::Node(_) => Err(GraphError::Schema(format!(
                "type '{type_name}' is not a relationship type"
            ))),
        }
    }

    /// Reads the custom-id value of an object, if its type declares one.
    pub fn custom_id_value(&self, object: &Object) -> Result<Option<Value>> {
        let schema = self.get(object.type_name())?;
        Ok(schema
            .custom_id()
            .and_then(|field| object.property(field).cloned()))
    }

    /// Constraint and index statements for every node type.
    pub fn schema_statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();
        for schema in self.types.values() {
            let EntitySchema::Node(node) = schema.as_ref() else {
                continue;
            };
            let unique: BTreeSet<&str> = node
                .properties
                .iter()
                .filter(|d| d.unique || node.custom_id.as_deref() == Some(d.name.as_str()))
                .map(|d| d.name.as_str())
                .collect();
            let indexed: Vec<String> = node
                .properties
                .iter()
                .filter(|d| d.indexed && !unique.contains(d.name.as_str()))
                .map(|d| d.name.clone())
                .collect();
            for property in &unique {
                for label in &node.labels {
                    statements.push(Statement::UniqueConstraint {
                        label: label.clone(),
                        property: (*property).to_owned(),
                    });
                }
            }
            if !indexed.is_empty() {
                for label in &node.labels {
                    statements.push(Statement::Index {
                        label: label.clone(),
                        properties: indexed.clone(),
                    });
                }
            }
        }
        statements
    }

    fn resolution(&self, type_name: &str) -> Result<Arc<Resolution>> {
        if let Some(resolved) = self.resolved.read().get(type_name) {
            return Ok(Arc::clone(resolved));
        }
        let resolution = Arc::new(self.resolve(type_name)?);
        self.resolved
            .write()
            .insert(type_name.to_owned(), Arc::clone(&resolution));
        Ok(resolution)
    }

    fn resolve(&self, type_name: &str) -> Result<Resolution> {
        let schema = self.node_schema(type_name)?;
        let EntitySchema::Node(node) = schema.as_ref() else {
            return Err(GraphError::Schema(format!("'{type_name}' is not a node type")));
        };
        let own_label = node.struct_label();
        let mut resolution = Resolution::default();

        for field in &node.relations {
            let (rel_type, other_label) = self.field_shape(node, field)?;
            let (from, to) = match field.direction {
                Direction::Outgoing => (own_label.clone(), other_label),
                Direction::Incoming => (other_label, own_label.clone()),
            };
            let existing = if from == to {
                resolution
                    .same_entity
                    .entry((rel_type, field.direction))
                    .or_insert_with(|| field.clone())
            } else {
                resolution
                    .different_entity
                    .entry((rel_type, from, to))
                    .or_insert_with(|| field.clone())
            };
            if existing.name != field.name {
                return Err(GraphError::Schema(format!(
                    "ambiguous relationship between field '{}' and field '{}' in '{type_name}'",
                    field.name, existing.name
                )));
            }
        }
        tracing::debug!(type_name, fields = node.relations.len(), "schema.resolve");
        Ok(resolution)
    }

    /// Backend type and far-side label of a relationship field.
    fn field_shape(&self, node: &NodeSchema, field: &RelationField) -> Result<(String, String)> {
        match &field.target {
            Target::Node(target) => {
                let target_schema = self.node_schema(target)?;
                let EntitySchema::Node(target_node) = target_schema.as_ref() else {
                    return Err(GraphError::Schema(format!("'{target}' is not a node type")));
                };
                let rel_type = match (&field.rel_type, field.direction) {
                    (Some(explicit), _) => explicit.clone(),
                    (None, Direction::Outgoing) => format!("{}_{}", node.name, target),
                    (None, Direction::Incoming) => format!("{}_{}", target, node.name),
                };
                Ok((rel_type, target_node.struct_label()))
            }
            Target::Relationship(target) => {
                let target_schema = self.get(target)?;
                let EntitySchema::Relationship(rel) = target_schema.as_ref() else {
                    return Err(GraphError::Schema(format!(
                        "field '{}' of '{}' targets '{target}', which is not a relationship type",
                        field.name, node.name
                    )));
                };
                let (own_end, far_end) = match field.direction {
                    Direction::Outgoing => (&rel.start, &rel.end),
                    Direction::Incoming => (&rel.end, &rel.start),
                };
                if own_end.node_type != node.name {
                    return Err(GraphError::Schema(format!(
                        "field '{}' of '{}' expects '{target}' to attach at '{}'",
                        field.name, node.name, own_end.node_type
                    )));
                }
                let far_schema = self.node_schema(&far_end.node_type)?;
                let EntitySchema::Node(far_node) = far_schema.as_ref() else {
                    return Err(GraphError::Schema(format!(
                        "'{}' is not a node type",
                        far_end.node_type
                    )));
                };
                Ok((rel.rel_type.clone(), far_node.struct_label()))
            }
        }
    }
}

impl SchemaProvider for Registry {
    fn label_or_type(&self, object: &Object) -> Result<String> {
        match self.get(object.type_name())?.as_ref() {
            EntitySchema::Node(node) => {
                for label in object.labels() {
                    if self.struct_labels.contains(label) {
                        return Err(GraphError::Schema(format!(
                            "runtime label '{label}' on '{}' clashes with a registered type label",
                            node.name
                        )));
                    }
                }
                Ok(join_labels(node.labels.iter().chain(object.labels().iter())))
            }
            EntitySchema::Relationship(rel) => Ok(rel.rel_type.clone()),
        }
    }

    fn properties(&self, object: &Object) -> Result<Properties> {
        let schema = self.get(object.type_name())?;
        let declared = schema.properties();
        let mut out = Properties::new();
        for (name, value) in object.properties() {
            let def = declared.iter().find(|d| &d.name == name).ok_or_else(|| {
                GraphError::Schema(format!(
                    "property '{name}' is not declared on '{}'",
                    object.type_name()
                ))
            })?;
            if !coerce::conforms(value, &def.field_type) {
                return Err(GraphError::Schema(format!(
                    "property '{name}' of '{}' expects {:?}, got {}",
                    object.type_name(),
                    def.field_type,
                    value.kind()
                )));
            }
            coerce::flatten(name, value.clone(), &mut out);
        }
        if let Some(custom_id) = schema.custom_id() {
            if object.property(custom_id).map_or(true, Value::is_null) {
                return Err(GraphError::Schema(format!(
                    "custom id '{custom_id}' cannot be empty in '{}'",
                    object.type_name()
                )));
            }
        }
        Ok(out)
    }

    fn custom_id_field(&self, type_name: &str) -> Result<Option<String>> {
        Ok(self.get(type_name)?.custom_id().map(str::to_owned))
    }

    fn related_entities(&self, object: &Object) -> Result<Vec<RelatedEntity>> {
        let mut related = Vec::new();
        match self.get(object.type_name())?.as_ref() {
            EntitySchema::Node(node) => {
                for field in &node.relations {
                    let Some(value) = object.related(&field.name) else {
                        continue;
                    };
                    for handle in value.handles() {
                        match &field.target {
                            Target::Relationship(_) => related.push(RelatedEntity::Entity {
                                field: field.name.clone(),
                                relationship: handle,
                            }),
                            Target::Node(_) => {
                                let (rel_type, _) = self.field_shape(node, field)?;
                                related.push(RelatedEntity::Phantom {
                                    field: field.name.clone(),
                                    rel_type,
                                    other: handle,
                                    direction: field.direction,
                                });
                            }
                        }
                    }
                }
            }
            EntitySchema::Relationship(rel) => {
                for (endpoint, start) in [(&rel.start, true), (&rel.end, false)] {
                    let node = match object.related(&endpoint.field) {
                        Some(Related::One(handle)) => handle.clone(),
                        Some(Related::Many(handles)) if handles.len() == 1 => handles[0].clone(),
                        _ => {
                            return Err(GraphError::InvalidArgument(format!(
                                "{} node for relationship '{}' is empty",
                                if start { "start" } else { "end" },
                                rel.name
                            )))
                        }
                    };
                    related.push(RelatedEntity::Endpoint {
                        field: endpoint.field.clone(),
                        node,
                        start,
                    });
                }
            }
        }
        Ok(related)
    }

    fn graph_field(
        &self,
        type_name: &str,
        node: EntityId,
        rel: &Relationship,
        graph: &Graph,
    ) -> Result<Option<RelationField>> {
        let resolution = self.resolution(type_name)?;
        let label_of = |id: EntityId| {
            graph
                .node(id)
                .map(|n| self.filter_struct_labels(&n.label))
                .unwrap_or_default()
        };
        let from = label_of(rel.start);
        let to = label_of(rel.end);
        if from == to {
            let direction = if rel.end == node && rel.start != node {
                Direction::Incoming
            } else {
                Direction::Outgoing
            };
            Ok(resolution
                .same_entity
                .get(&(rel.rel_type.clone(), direction))
                .cloned())
        } else {
            Ok(resolution
                .different_entity
                .get(&(rel.rel_type.clone(), from, to))
                .cloned())
        }
    }

    fn declared_field_type(&self, type_name: &str, property: &str) -> Option<FieldType> {
        let schema = self.types.get(type_name)?;
        schema
            .properties()
            .iter()
            .find(|d| d.name == property)
            .map(|d| d.field_type.clone())
    }
}
