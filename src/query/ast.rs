//! Statement model shared by the synthesizer and the drivers.
//!
//! Every statement the engine issues is built as a value of [`Statement`].
//! Network drivers send [`Statement::text`] with [`Statement::params`];
//! the in-process driver interprets the structure directly. Rendering is
//! deterministic so the same statement always produces the same text.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use super::value::Value;

/// Named statement parameters.
pub type Params = BTreeMap<String, Value>;

/// How a node is located by a MATCH clause.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeFilter {
    /// `WHERE ID(var) = $param`.
    Id {
        /// Parameter holding the internal id.
        param: String,
    },
    /// `WHERE var.property = $param`.
    Property {
        /// Custom-id property.
        property: String,
        /// Parameter holding the custom-id value.
        param: String,
    },
}

/// Category of a clause; determines its position in a merged statement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClauseKind {
    /// Binds existing entities.
    Match,
    /// Creates nodes.
    NodeCreate,
    /// Creates relationships between bound nodes.
    RelationshipCreate,
    /// Writes properties and labels.
    Set,
    /// Removes entities.
    Delete,
}

impl ClauseKind {
    /// Merge order.
    pub const ORDER: [ClauseKind; 5] = [
        ClauseKind::Match,
        ClauseKind::NodeCreate,
        ClauseKind::RelationshipCreate,
        ClauseKind::Set,
        ClauseKind::Delete,
    ];

    /// Position inside [`ClauseKind::ORDER`].
    pub fn index(self) -> usize {
        match self {
            ClauseKind::Match => 0,
            ClauseKind::NodeCreate => 1,
            ClauseKind::RelationshipCreate => 2,
            ClauseKind::Set => 3,
            ClauseKind::Delete => 4,
        }
    }
}

/// One clause of a write statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Clause {
    /// Binds an existing node.
    MatchNode {
        /// Bound variable.
        var: String,
        /// Lookup filter.
        filter: NodeFilter,
    },
    /// Binds an existing relationship between two bound nodes.
    MatchRelationship {
        /// Start node variable.
        start: String,
        /// Bound variable.
        var: String,
        /// Relationship type.
        rel_type: String,
        /// End node variable.
        end: String,
        /// Parameter holding the internal id, when known.
        id_param: Option<String>,
    },
    /// Creates a node.
    CreateNode {
        /// Bound variable.
        var: String,
    },
    /// Creates a relationship between two bound nodes.
    CreateRelationship {
        /// Start node variable.
        start: String,
        /// Bound variable.
        var: String,
        /// Relationship type.
        rel_type: String,
        /// End node variable.
        end: String,
    },
    /// Merges a parameter map into the entity's properties.
    SetProperties {
        /// Target variable.
        var: String,
        /// Parameter holding the property map.
        param: String,
    },
    /// Adds labels.
    SetLabels {
        /// Target variable.
        var: String,
        /// `:`-joined labels.
        labels: String,
    },
    /// Removes labels.
    RemoveLabels {
        /// Target variable.
        var: String,
        /// `:`-joined labels.
        labels: String,
    },
    /// Deletes an entity.
    Delete {
        /// Target variable.
        var: String,
        /// Also delete incident relationships.
        detach: bool,
    },
}

impl Clause {
    /// Merge category.
    pub fn kind(&self) -> ClauseKind {
        match self {
            Clause::MatchNode { .. } | Clause::MatchRelationship { .. } => ClauseKind::Match,
            Clause::CreateNode { .. } => ClauseKind::NodeCreate,
            Clause::CreateRelationship { .. } => ClauseKind::RelationshipCreate,
            Clause::SetProperties { .. } | Clause::SetLabels { .. } | Clause::RemoveLabels { .. } => {
                ClauseKind::Set
            }
            Clause::Delete { .. } => ClauseKind::Delete,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::MatchNode { var, filter } => {
                writeln!(f, "MATCH ({var})")?;
                match filter {
                    NodeFilter::Id { param } => writeln!(f, "WHERE ID({var}) = ${param}"),
                    NodeFilter::Property { property, param } => {
                        writeln!(f, "WHERE {var}.{property} = ${param}")
                    }
                }
            }
            Clause::MatchRelationship {
                start,
                var,
                rel_type,
                end,
                id_param,
            } => {
                writeln!(f, "MATCH ({start})-[{var}:{rel_type}]->({end})")?;
                match id_param {
                    Some(param) => writeln!(f, "WHERE ID({var}) = ${param}"),
                    None => Ok(()),
                }
            }
            Clause::CreateNode { var } => writeln!(f, "CREATE ({var})"),
            Clause::CreateRelationship {
                start,
                var,
                rel_type,
                end,
            } => writeln!(f, "CREATE ({start})-[{var}:{rel_type}]->({end})"),
            Clause::SetProperties { var, param } => writeln!(f, "SET {var} += ${param}"),
            Clause::SetLabels { var, labels } => writeln!(f, "SET {var}:{labels}"),
            Clause::RemoveLabels { var, labels } => writeln!(f, "REMOVE {var}:{labels}"),
            Clause::Delete { var, detach: true } => writeln!(f, "DETACH DELETE {var}"),
            Clause::Delete { var, detach: false } => writeln!(f, "DELETE {var}"),
        }
    }
}

/// Column of a write statement's RETURN.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Projection {
    /// `var{id:ID(var)}`, a one-entry map keyed by the variable.
    IdMap(String),
    /// `ID(var)`.
    Id(String),
}

impl Projection {
    /// Bound variable the projection reads.
    pub fn var(&self) -> &str {
        match self {
            Projection::IdMap(var) | Projection::Id(var) => var,
        }
    }

    /// Column name in the result row.
    pub fn column(&self) -> String {
        match self {
            Projection::IdMap(var) => var.clone(),
            Projection::Id(var) => format!("ID({var})"),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::IdMap(var) => write!(f, "{var}{{id:ID({var})}}"),
            Projection::Id(var) => write!(f, "ID({var})"),
        }
    }
}

/// Ordered clauses plus the projection they return.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteQuery {
    /// Clauses in execution order.
    pub clauses: Vec<Clause>,
    /// RETURN columns.
    pub returns: Vec<Projection>,
    /// Parameters referenced by the clauses.
    pub params: Params,
}

/// Entity type a bulk statement applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityTarget {
    /// Nodes carrying a label string.
    Node {
        /// `:`-joined labels.
        label: String,
    },
    /// Relationships of a type.
    Relationship {
        /// Relationship type.
        rel_type: String,
    },
}

/// Root selection of a load.
#[derive(Clone, Debug, PartialEq)]
pub enum IdSelector {
    /// Internal database ids.
    Internal(Vec<i64>),
    /// Values of a custom-id property.
    Property {
        /// Custom-id property.
        property: String,
        /// Accepted values.
        values: Vec<Value>,
    },
}

/// A complete statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Multi-entity write built from merged clauses.
    Write(WriteQuery),
    /// Bounded variable-length path fetch around every selected root.
    LoadAll {
        /// Root type.
        target: EntityTarget,
        /// Root selection; `None` selects every entity of the type.
        ids: Option<IdSelector>,
        /// Upper bound of each variable-length segment; `None` is unbounded.
        max_length: Option<u32>,
    },
    /// Deletes every entity of a type, returning their ids.
    DeleteAll {
        /// Target type.
        target: EntityTarget,
    },
    /// Counts entities of a type.
    Count {
        /// Target type.
        target: EntityTarget,
    },
    /// Deletes the whole database.
    Purge,
    /// Uniqueness constraint.
    UniqueConstraint {
        /// Constrained label.
        label: String,
        /// Constrained property.
        property: String,
    },
    /// Composite index.
    Index {
        /// Indexed label.
        label: String,
        /// Indexed properties.
        properties: Vec<String>,
    },
    /// Caller-written statement passed through verbatim.
    Raw {
        /// Statement text.
        text: String,
        /// Parameters referenced by `text`.
        params: Params,
    },
}

impl Statement {
    /// Query text.
    pub fn text(&self) -> String {
        self.to_string()
    }

    /// Parameters referenced by [`Statement::text`].
    pub fn params(&self) -> Params {
        match self {
            Statement::Write(query) => query.params.clone(),
            Statement::Raw { params, .. } => params.clone(),
            Statement::LoadAll { ids: Some(ids), .. } => {
                let values = match ids {
                    IdSelector::Internal(ids) => ids.iter().map(|id| Value::Int(*id)).collect(),
                    IdSelector::Property { values, .. } => values.clone(),
                };
                Params::from([("ids".to_owned(), Value::List(values))])
            }
            _ => Params::new(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Statement::Write(_) => "write",
            Statement::LoadAll { .. } => "load_all",
            Statement::DeleteAll { .. } => "delete_all",
            Statement::Count { .. } => "count",
            Statement::Purge => "purge",
            Statement::UniqueConstraint { .. } => "unique_constraint",
            Statement::Index { .. } => "index",
            Statement::Raw { .. } => "raw",
        }
    }
}

const DIRECTION_TAIL: &str = "range(0, length(path) - 1) as index\n";

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Write(query) => {
                let mut out = String::new();
                for clause in &query.clauses {
                    write!(out, "{clause}")?;
                }
                if !query.returns.is_empty() {
                    let columns: Vec<String> = query.returns.iter().map(|p| p.to_string()).collect();
                    write!(out, "RETURN {}", columns.join(", "))?;
                }
                f.write_str(out.trim_end())
            }
            Statement::LoadAll {
                target,
                ids,
                max_length,
            } => {
                let bound = max_length.map(|n| n.to_string()).unwrap_or_default();
                let var = match target {
                    EntityTarget::Node { label } => {
                        writeln!(f, "MATCH path = (n:{label})-[*0..{bound}]-()")?;
                        "n"
                    }
                    EntityTarget::Relationship { rel_type } => {
                        writeln!(
                            f,
                            "MATCH path = ()-[*0..{bound}]-()-[r:{rel_type}]-()-[*0..{bound}]-()"
                        )?;
                        "r"
                    }
                };
                match ids {
                    Some(IdSelector::Internal(_)) => writeln!(f, "WHERE ID({var}) IN $ids")?,
                    Some(IdSelector::Property { property, .. }) => {
                        writeln!(f, "WHERE {var}.{property} IN $ids")?
                    }
                    None => {}
                }
                write!(f, "WITH {var}, path, {DIRECTION_TAIL}")?;
                writeln!(
                    f,
                    "WITH {var}, path, index, [i in index | CASE WHEN nodes(path)[i] = startNode(relationships(path)[i]) THEN false ELSE true END] as isDirectionInverted"
                )?;
                write!(f, "RETURN path, ID({var}), isDirectionInverted")
            }
            Statement::DeleteAll {
                target: EntityTarget::Node { label },
            } => write!(f, "MATCH (n:{label}) DETACH DELETE n RETURN ID(n)"),
            Statement::DeleteAll {
                target: EntityTarget::Relationship { rel_type },
            } => write!(f, "MATCH ()-[r:{rel_type}]-() DELETE r RETURN ID(r)"),
            Statement::Count {
                target: EntityTarget::Node { label },
            } => write!(f, "MATCH (n:{label}) RETURN count(n) as count"),
            Statement::Count {
                target: EntityTarget::Relationship { rel_type },
            } => write!(f, "MATCH ()-[r:{rel_type}]->() RETURN count(r) as count"),
            Statement::Purge => write!(f, "MATCH (n) DETACH DELETE n"),
            Statement::UniqueConstraint { label, property } => write!(
                f,
                "CREATE CONSTRAINT ON (a:{label}) ASSERT a.{property} IS UNIQUE"
            ),
            Statement::Index { label, properties } => {
                write!(f, "CREATE INDEX ON :{label}({})", properties.join(","))
            }
            Statement::Raw { text, .. } => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_renders_clauses_then_returns() {
        let query = WriteQuery {
            clauses: vec![
                Clause::MatchNode {
                    var: "n4".into(),
                    filter: NodeFilter::Id {
                        param: "n4ID".into(),
                    },
                },
                Clause::CreateNode { var: "n_1".into() },
                Clause::CreateRelationship {
                    start: "n4".into(),
                    var: "r_2".into(),
                    rel_type: "KNOWS".into(),
                    end: "n_1".into(),
                },
                Clause::SetLabels {
                    var: "n_1".into(),
                    labels: "Person".into(),
                },
            ],
            returns: vec![
                Projection::IdMap("n_1".into()),
                Projection::IdMap("r_2".into()),
            ],
            params: Params::new(),
        };
        let text = Statement::Write(query).text();
        assert_eq!(
            text,
            "MATCH (n4)\nWHERE ID(n4) = $n4ID\nCREATE (n_1)\nCREATE (n4)-[r_2:KNOWS]->(n_1)\nSET n_1:Person\nRETURN n_1{id:ID(n_1)}, r_2{id:ID(r_2)}"
        );
    }

    #[test]
    fn load_all_renders_bounded_and_unbounded_paths() {
        let bounded = Statement::LoadAll {
            target: EntityTarget::Node {
                label: "Person".into(),
            },
            ids: Some(IdSelector::Internal(vec![1, 2])),
            max_length: Some(4),
        };
        let text = bounded.text();
        assert!(text.starts_with("MATCH path = (n:Person)-[*0..4]-()\nWHERE ID(n) IN $ids\n"));
        assert!(text.ends_with("RETURN path, ID(n), isDirectionInverted"));
        assert_eq!(
            bounded.params().get("ids"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
        );

        let unbounded = Statement::LoadAll {
            target: EntityTarget::Relationship {
                rel_type: "KNOWS".into(),
            },
            ids: Some(IdSelector::Property {
                property: "uuid".into(),
                values: vec![Value::from("a")],
            }),
            max_length: None,
        };
        let text = unbounded.text();
        assert!(text.starts_with("MATCH path = ()-[*0..]-()-[r:KNOWS]-()-[*0..]-()\nWHERE r.uuid IN $ids\n"));
    }

    #[test]
    fn bulk_statements_render() {
        let node = EntityTarget::Node {
            label: "Person".into(),
        };
        let rel = EntityTarget::Relationship {
            rel_type: "KNOWS".into(),
        };
        assert_eq!(
            Statement::DeleteAll { target: node.clone() }.text(),
            "MATCH (n:Person) DETACH DELETE n RETURN ID(n)"
        );
        assert_eq!(
            Statement::DeleteAll { target: rel.clone() }.text(),
            "MATCH ()-[r:KNOWS]-() DELETE r RETURN ID(r)"
        );
        assert_eq!(
            Statement::Count { target: node }.text(),
            "MATCH (n:Person) RETURN count(n) as count"
        );
        assert_eq!(
            Statement::Count { target: rel }.text(),
            "MATCH ()-[r:KNOWS]->() RETURN count(r) as count"
        );
        assert_eq!(Statement::Purge.text(), "MATCH (n) DETACH DELETE n");

        let params = Params::from([("age".to_owned(), Value::Int(18))]);
        let raw = Statement::Raw {
            text: "MATCH (p) WHERE p.age >= $age RETURN p".into(),
            params: params.clone(),
        };
        assert_eq!(raw.text(), "MATCH (p) WHERE p.age >= $age RETURN p");
        assert_eq!(raw.params(), params);
        assert_eq!(raw.name(), "raw");
    }
}
