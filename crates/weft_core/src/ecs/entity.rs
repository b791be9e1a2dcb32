//! Entity and id handles with generational indices
//!
//! Entities are lightweight handles (8 bytes). The generation counter
//! prevents a recycled index from being mistaken for the entity that used
//! it before.
//!
//! Every component, tag and relationship is itself an entity, so the same
//! 64-bit key space is used for "things" and for the ids attached to them.
//! An [`Id`] is either a plain entity id or a `(relationship, target)` pair.

use std::fmt;

/// Index part of an entity handle.
pub type EntityIdx = u32;

/// Generation part of an entity handle.
pub type Generation = u16;

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: u64 = 0xFFFF << GENERATION_SHIFT;
const PAIR_FIRST_MASK: u64 = 0x00FF_FFFF << GENERATION_SHIFT;

/// Flag bit marking an [`Id`] as a relationship pair.
pub const PAIR_FLAG: u64 = 1 << 63;

/// Largest entity index usable as the relationship half of a pair.
pub const MAX_PAIR_FIRST: EntityIdx = 0x00FF_FFFF;

/// Entity handle (generation-indexed for safety)
///
/// Format: [8-bit flags | 8 unused | 16-bit generation | 32-bit index]
/// - Index: position in the entity index
/// - Generation: incremented when the entity is deleted
///
/// Example:
/// ```ignore
/// let e = world.new_entity()?;
/// world.delete(e)?;
/// assert!(!world.is_alive(e)); // stale handle, generation mismatch
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    /// The null entity. Never alive.
    pub const NULL: Entity = Entity(0);

    pub(crate) const fn from_parts(index: EntityIdx, generation: Generation) -> Self {
        Self(((generation as u64) << GENERATION_SHIFT) | index as u64)
    }

    #[inline]
    pub const fn index(self) -> EntityIdx {
        (self.0 & INDEX_MASK) as EntityIdx
    }

    #[inline]
    pub const fn generation(self) -> Generation {
        ((self.0 & GENERATION_MASK) >> GENERATION_SHIFT) as Generation
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Serialize to 64-bit integer
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Deserialize from 64-bit integer. Flag bits are discarded.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & (GENERATION_MASK | INDEX_MASK))
    }

    /// Same index, next generation.
    #[inline]
    pub(crate) const fn next_generation(self) -> Self {
        Self::from_parts(self.index(), self.generation().wrapping_add(1))
    }

    /// Id of this entity when used as a component or tag.
    #[inline]
    pub const fn id(self) -> Id {
        Id(self.0)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Key attached to an entity: a component, a tag, or a relationship pair.
///
/// Pairs keep only the indices of their two halves; the generation is
/// resolved through the entity index when a full [`Entity`] is needed.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Id(u64);

impl Id {
    pub const NULL: Id = Id(0);

    /// Build a `(relationship, target)` pair.
    ///
    /// # Panics
    /// Panics if `rel`'s index does not fit in the 24-bit relationship half.
    /// World operations taking a relationship use [`Id::try_pair`] and
    /// report that case as an error instead.
    pub fn pair(rel: Entity, tgt: Entity) -> Self {
        match Self::try_pair(rel, tgt) {
            Some(id) => id,
            None => panic!("relationship index {} does not fit in a pair", rel.index()),
        }
    }

    /// Build a `(relationship, target)` pair, or `None` if `rel`'s index
    /// does not fit in the relationship half.
    #[inline]
    pub const fn try_pair(rel: Entity, tgt: Entity) -> Option<Self> {
        if rel.index() > MAX_PAIR_FIRST {
            return None;
        }
        Some(Self::pair_from_indices(rel.index(), tgt.index()))
    }

    #[inline]
    pub(crate) const fn pair_from_indices(first: EntityIdx, second: EntityIdx) -> Self {
        Self(PAIR_FLAG | ((first as u64) << GENERATION_SHIFT) | second as u64)
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn is_pair(self) -> bool {
        self.0 & PAIR_FLAG != 0
    }

    /// Relationship index for pairs, entity index otherwise.
    #[inline]
    pub const fn first(self) -> EntityIdx {
        if self.is_pair() {
            ((self.0 & PAIR_FIRST_MASK) >> GENERATION_SHIFT) as EntityIdx
        } else {
            (self.0 & INDEX_MASK) as EntityIdx
        }
    }

    /// Target index for pairs, `0` otherwise.
    #[inline]
    pub const fn second(self) -> EntityIdx {
        if self.is_pair() {
            (self.0 & INDEX_MASK) as EntityIdx
        } else {
            0
        }
    }

    /// The entity this id names, if it is not a pair.
    #[inline]
    pub const fn entity(self) -> Option<Entity> {
        if self.is_pair() {
            None
        } else {
            Some(Entity(self.0))
        }
    }

    /// True for `*`, `(R, *)`, `(*, T)` and `(*, *)`.
    #[inline]
    pub const fn is_wildcard(self) -> bool {
        if self.is_pair() {
            self.first() == WILDCARD_INDEX || self.second() == WILDCARD_INDEX
        } else {
            self.first() == WILDCARD_INDEX
        }
    }

    /// Does this concrete id satisfy `pattern`?
    ///
    /// Generations are ignored for plain ids, matching how pairs compare.
    pub const fn matches(self, pattern: Id) -> bool {
        if pattern.is_pair() != self.is_pair() {
            // `*` only matches plain ids
            return false;
        }
        if self.is_pair() {
            (pattern.first() == WILDCARD_INDEX || pattern.first() == self.first())
                && (pattern.second() == WILDCARD_INDEX || pattern.second() == self.second())
        } else {
            pattern.first() == WILDCARD_INDEX || pattern.first() == self.first()
        }
    }

    /// `(R, *)` for a pair, `*` otherwise.
    #[inline]
    pub(crate) const fn with_wildcard_second(self) -> Id {
        Id::pair_from_indices(self.first(), WILDCARD_INDEX)
    }

    /// `(*, T)` for a pair.
    #[inline]
    pub(crate) const fn with_wildcard_first(self) -> Id {
        Id::pair_from_indices(WILDCARD_INDEX, self.second())
    }
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        entity.id()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |idx: EntityIdx| -> String {
            if idx == WILDCARD_INDEX {
                "*".to_string()
            } else {
                idx.to_string()
            }
        };
        if self.is_pair() {
            write!(f, "({}, {})", name(self.first()), name(self.second()))
        } else {
            write!(f, "{}", name(self.first()))
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) const WILDCARD_INDEX: EntityIdx = 1;
pub(crate) const CHILD_OF_INDEX: EntityIdx = 2;

/// Number of indices reserved for builtin entities (including the null index).
pub(crate) const BUILTIN_COUNT: EntityIdx = 3;

/// Matches any id in lookups and query terms. Never stored on an entity.
pub const WILDCARD: Entity = Entity::from_parts(WILDCARD_INDEX, 0);

/// Exclusive hierarchy relationship. Deleting a parent deletes its children.
pub const CHILD_OF: Entity = Entity::from_parts(CHILD_OF_INDEX, 0);

/// `(*, *)`: every pair.
pub const WILDCARD_PAIR: Id = Id::pair_from_indices(WILDCARD_INDEX, WILDCARD_INDEX);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_bits_round_trip_keeps_generation() {
        let e = Entity::from_parts(42, 7);
        assert_eq!(e.index(), 42);
        assert_eq!(e.generation(), 7);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
        assert_ne!(e.next_generation(), e);
        assert_eq!(e.next_generation().index(), 42);
    }

    #[test]
    fn pair_halves_ignore_generations() {
        let rel = Entity::from_parts(10, 3);
        let tgt = Entity::from_parts(20, 9);
        let pair = Id::pair(rel, tgt);
        assert!(pair.is_pair());
        assert_eq!(pair.first(), 10);
        assert_eq!(pair.second(), 20);
        assert_eq!(pair, Id::pair(Entity::from_parts(10, 0), Entity::from_parts(20, 0)));
        assert!(pair.entity().is_none());
    }

    #[test]
    fn wildcard_matching() {
        let rel = Entity::from_parts(10, 0);
        let tgt = Entity::from_parts(20, 0);
        let pair = Id::pair(rel, tgt);
        assert!(pair.matches(Id::pair(rel, WILDCARD)));
        assert!(pair.matches(Id::pair(WILDCARD, tgt)));
        assert!(pair.matches(WILDCARD_PAIR));
        assert!(!pair.matches(WILDCARD.id()));
        assert!(!pair.matches(Id::pair(rel, Entity::from_parts(21, 0))));
        assert!(rel.id().matches(WILDCARD.id()));
        assert!(Id::pair(rel, WILDCARD).is_wildcard());
        let too_big = Entity::from_parts(MAX_PAIR_FIRST + 1, 0);
        assert_eq!(Id::try_pair(too_big, tgt), None);
        assert_eq!(Id::try_pair(rel, tgt), Some(pair));
        assert!(!pair.is_wildcard());
    }
}
