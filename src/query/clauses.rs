//! Merging per-entity fragments into one write statement.

use rustc_hash::FxHashSet;

use super::ast::{Clause, ClauseKind, Params, Projection, WriteQuery};
use super::builder::Fragment;

/// Clauses grouped by kind, deduplicated, with their parameters.
///
/// Groups are emitted in [`ClauseKind::ORDER`] so every variable is bound
/// before anything uses it: all MATCHes, then node CREATEs, then
/// relationship CREATEs, then SETs, then DELETEs.
#[derive(Debug, Default)]
pub struct ClauseSet {
    groups: [Vec<Clause>; 5],
    seen: FxHashSet<Clause>,
    params: Params,
}

impl ClauseSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause unless an identical one is already present.
    pub fn push(&mut self, clause: Clause) -> bool {
        if !self.seen.insert(clause.clone()) {
            return false;
        }
        self.groups[clause.kind().index()].push(clause);
        true
    }

    /// Adds every clause and parameter of a fragment.
    pub fn extend(&mut self, fragment: Fragment) {
        for clause in fragment.clauses {
            self.push(clause);
        }
        self.params.extend(fragment.params);
    }

    /// True if the clause is present.
    pub fn contains(&self, clause: &Clause) -> bool {
        self.seen.contains(clause)
    }

    /// Number of distinct clauses.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when nothing was added.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Clauses of one kind, in insertion order.
    pub fn of_kind(&self, kind: ClauseKind) -> &[Clause] {
        &self.groups[kind.index()]
    }

    /// Finalizes into a write statement returning `returns`.
    pub fn finish(self, returns: Vec<Projection>) -> WriteQuery {
        WriteQuery {
            clauses: self.groups.into_iter().flatten().collect(),
            returns,
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::NodeFilter;

    #[test]
    fn clauses_are_ordered_by_kind_and_deduplicated() {
        let mut set = ClauseSet::new();
        set.push(Clause::Delete {
            var: "r3".into(),
            detach: false,
        });
        set.push(Clause::CreateNode { var: "n_1".into() });
        let matched = Clause::MatchNode {
            var: "n2".into(),
            filter: NodeFilter::Id {
                param: "n2ID".into(),
            },
        };
        assert!(set.push(matched.clone()));
        assert!(!set.push(matched.clone()));
        set.push(Clause::CreateRelationship {
            start: "n2".into(),
            var: "r_2".into(),
            rel_type: "T".into(),
            end: "n_1".into(),
        });
        assert_eq!(set.len(), 4);

        let kinds: Vec<ClauseKind> = set
            .finish(Vec::new())
            .clauses
            .iter()
            .map(Clause::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ClauseKind::Match,
                ClauseKind::NodeCreate,
                ClauseKind::RelationshipCreate,
                ClauseKind::Delete,
            ]
        );
    }
}
