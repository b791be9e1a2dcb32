// archetype.rs - Canonical id sets
//
// A Type is the unique set of ids that defines a table. Ids are always
// stored sorted and deduplicated, so two entities share a table exactly
// when their id sets are equal, regardless of the order ids were added.

use crate::ecs::Id;
use std::fmt;
use std::sync::Arc;

/// Sorted, deduplicated sequence of ids. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type(Arc<[Id]>);

impl Type {
    /// The type of the root table.
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Create a type from a list of ids. The input is sorted and deduplicated.
    pub fn from_ids(mut ids: Vec<Id>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self(Arc::from(ids))
    }

    #[inline]
    pub fn ids(&self) -> &[Id] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    #[inline]
    pub fn index_of(&self, id: Id) -> Option<usize> {
        self.0.binary_search(&id).ok()
    }

    /// Type with `id` added, or `None` if it is already present.
    pub fn with(&self, id: Id) -> Option<Type> {
        let pos = self.0.binary_search(&id).err()?;
        let mut ids = Vec::with_capacity(self.0.len() + 1);
        ids.extend_from_slice(&self.0[..pos]);
        ids.push(id);
        ids.extend_from_slice(&self.0[pos..]);
        Some(Self(Arc::from(ids)))
    }

    /// Type with `id` removed, or `None` if it is absent.
    pub fn without(&self, id: Id) -> Option<Type> {
        let pos = self.0.binary_search(&id).ok()?;
        let mut ids = Vec::with_capacity(self.0.len() - 1);
        ids.extend_from_slice(&self.0[..pos]);
        ids.extend_from_slice(&self.0[pos + 1..]);
        Some(Self(Arc::from(ids)))
    }

    /// Index of the first id at or after `start` matching `pattern`.
    pub fn find_match(&self, pattern: Id, start: usize) -> Option<usize> {
        if !pattern.is_wildcard() {
            return self.index_of(pattern).filter(|&i| i >= start);
        }
        self.0
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, id)| id.matches(pattern))
            .map(|(i, _)| i)
    }

    /// Number of ids matching `pattern`.
    pub fn count_matches(&self, pattern: Id) -> usize {
        if !pattern.is_wildcard() {
            return usize::from(self.contains(pattern));
        }
        self.0.iter().filter(|id| id.matches(pattern)).count()
    }

    /// Ids in `self` that are not in `other`.
    pub fn difference<'a>(&'a self, other: &'a Type) -> impl Iterator<Item = Id> + 'a {
        self.0.iter().copied().filter(move |id| !other.contains(*id))
    }
}

impl Default for Type {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Entity, WILDCARD};

    fn id(i: u32) -> Id {
        Entity::from_parts(i, 0).id()
    }

    #[test]
    fn canonical_regardless_of_order() {
        let a = Type::from_ids(vec![id(3), id(1), id(2), id(1)]);
        let b = Type::from_ids(vec![id(2), id(3), id(1)]);
        assert_eq!(a, b);
        assert_eq!(a.ids(), &[id(1), id(2), id(3)]);
    }

    #[test]
    fn with_and_without() {
        let t = Type::from_ids(vec![id(1), id(3)]);
        let t2 = t.with(id(2)).unwrap();
        assert_eq!(t2.ids(), &[id(1), id(2), id(3)]);
        assert!(t2.with(id(2)).is_none());
        assert_eq!(t2.without(id(2)).unwrap(), t);
        assert!(t.without(id(2)).is_none());
    }

    #[test]
    fn pairs_sort_after_plain_ids_and_group_by_relationship() {
        let rel = Entity::from_parts(10, 0);
        let t = Type::from_ids(vec![
            Id::pair(rel, Entity::from_parts(5, 0)),
            id(50),
            Id::pair(rel, Entity::from_parts(4, 0)),
        ]);
        assert_eq!(t.ids()[0], id(50));
        let first = t.find_match(Id::pair(rel, WILDCARD), 0).unwrap();
        assert_eq!(first, 1);
        assert_eq!(t.find_match(Id::pair(rel, WILDCARD), first + 1), Some(2));
        assert_eq!(t.count_matches(Id::pair(rel, WILDCARD)), 2);
        assert_eq!(t.count_matches(WILDCARD.id()), 1);
    }
}
