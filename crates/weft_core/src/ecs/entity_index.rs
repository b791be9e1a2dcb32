//! Sparse map from entity ids to storage locations.
//!
//! The index is a sparse set: `sparse` is addressed by entity index and
//! points into `dense`, whose first `alive` slots hold the live entities and
//! whose tail holds freed ids (already carrying their next generation) ready
//! to be recycled. Freeing an index bumps its generation so a stale handle
//! never aliases the entity that reuses the slot.
//!
//! Deferred creation claims a freed id without making it alive: the id
//! leaves `dense` and its slot is marked reserved until the queued creation
//! calls [`EntityIndex::ensure`] or the claim is handed back.

use crate::ecs::error::{EcsError, EcsResult};
use crate::ecs::storage::TableId;
use crate::ecs::{Entity, EntityIdx, Generation};
use std::sync::atomic::{AtomicU32, Ordering};

/// Storage location of a live entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub table: TableId,
    pub row: u32,
    /// Queries depend on this entity from outside their matched tables
    /// (fixed source or traversal target).
    pub(crate) observed: bool,
}

impl Record {
    pub(crate) const fn new(table: TableId, row: u32) -> Self {
        Self {
            table,
            row,
            observed: false,
        }
    }
}

const NO_DENSE: u32 = u32::MAX;
/// Freed id claimed for a deferred creation; not in `dense`.
const RESERVED: u32 = u32::MAX - 1;

#[derive(Clone, Copy, Debug)]
struct Slot {
    dense: u32,
    generation: Generation,
    record: Record,
}

impl Slot {
    const EMPTY: Slot = Slot {
        dense: NO_DENSE,
        generation: 0,
        record: Record::new(TableId::ROOT, 0),
    };
}

/// Outcome of [`EntityIndex::ensure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Ensured {
    Existing,
    Created,
}

pub(crate) struct EntityIndex {
    dense: Vec<Entity>,
    alive: usize,
    sparse: Vec<Slot>,
    /// Highest index ever handed out. Atomic so worker stages can reserve
    /// fresh ids through a shared reference.
    max_index: AtomicU32,
}

impl EntityIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            dense: Vec::with_capacity(capacity),
            alive: 0,
            sparse: Vec::with_capacity(capacity),
            max_index: AtomicU32::new(0),
        }
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.alive
    }

    /// Live entities in dense order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.dense[..self.alive].iter().copied()
    }

    fn slot(&self, index: EntityIdx) -> Option<&Slot> {
        self.sparse.get(index as usize).filter(|s| s.dense != NO_DENSE)
    }

    fn slot_mut(&mut self, index: EntityIdx) -> &mut Slot {
        let i = index as usize;
        if i >= self.sparse.len() {
            self.sparse.resize(i + 1, Slot::EMPTY);
        }
        &mut self.sparse[i]
    }

    #[inline]
    fn slot_is_alive(&self, slot: &Slot) -> bool {
        (slot.dense as usize) < self.alive
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        match self.slot(entity.index()) {
            Some(slot) => self.slot_is_alive(slot) && slot.generation == entity.generation(),
            None => false,
        }
    }

    /// Not null and either alive or not yet used with this generation, so it
    /// can still be `ensure`d. A handle to a deleted entity is not valid.
    pub fn is_valid(&self, entity: Entity) -> bool {
        if entity.is_null() {
            return false;
        }
        match self.slot(entity.index()) {
            Some(slot) => slot.generation == entity.generation(),
            None => true,
        }
    }

    /// Current live handle for an index (pairs only store indices).
    pub fn alive_by_index(&self, index: EntityIdx) -> Option<Entity> {
        let slot = self.slot(index)?;
        self.slot_is_alive(slot)
            .then(|| Entity::from_parts(index, slot.generation))
    }

    pub fn get(&self, entity: Entity) -> Option<&Record> {
        let slot = self.slot(entity.index())?;
        (self.slot_is_alive(slot) && slot.generation == entity.generation()).then_some(&slot.record)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut Record> {
        if !self.is_alive(entity) {
            return None;
        }
        Some(&mut self.sparse[entity.index() as usize].record)
    }

    /// Record of a live entity, or `InvalidEntity`.
    pub fn record(&self, entity: Entity) -> EcsResult<Record> {
        self.get(entity)
            .copied()
            .ok_or(EcsError::invalid_entity(entity))
    }

    /// Allocate an id, recycling a freed index when one is available.
    ///
    /// The returned entity is alive with its record at row 0 of the root
    /// table; the caller must place it before using the record.
    pub fn new_id(&mut self) -> Entity {
        if self.alive < self.dense.len() {
            let entity = self.dense[self.alive];
            self.alive += 1;
            let slot = &mut self.sparse[entity.index() as usize];
            slot.record = Record::new(TableId::ROOT, 0);
            return entity;
        }

        let index = self.max_index.fetch_add(1, Ordering::Relaxed) + 1;
        let entity = Entity::from_parts(index, 0);
        self.push_alive(entity);
        entity
    }

    /// Reserve a fresh index without making it alive. Safe to call from
    /// several worker stages at once; the id becomes alive on `ensure`.
    pub fn reserve_id(&self) -> Entity {
        let index = self.max_index.fetch_add(1, Ordering::Relaxed) + 1;
        Entity::from_parts(index, 0)
    }

    /// Claim a freed id for a deferred creation. It stays dead, and is not
    /// handed out again, until `ensure` or `unreserve`.
    pub fn recycle_reserved(&mut self) -> Option<Entity> {
        if self.alive == self.dense.len() {
            return None;
        }
        let last = self.dense.len() - 1;
        self.swap_dense(self.alive, last);
        let entity = self.dense.pop()?;
        self.sparse[entity.index() as usize].dense = RESERVED;
        Some(entity)
    }

    /// A freed id if one is available, a fresh one otherwise.
    pub fn reserve_recycled(&mut self) -> Entity {
        match self.recycle_reserved() {
            Some(entity) => entity,
            None => self.reserve_id(),
        }
    }

    /// Put an unused claim from `recycle_reserved` back on the recycle list.
    pub fn unreserve(&mut self, entity: Entity) {
        let pos = self.dense.len() as u32;
        match self.sparse.get_mut(entity.index() as usize) {
            Some(slot) if slot.dense == RESERVED && slot.generation == entity.generation() => {
                slot.dense = pos;
            }
            _ => return,
        }
        self.dense.push(entity);
    }

    /// Freed ids ready to be recycled.
    pub fn recyclable(&self) -> usize {
        self.dense.len() - self.alive
    }

    /// Highest index handed out so far.
    pub fn max_index(&self) -> EntityIdx {
        self.max_index.load(Ordering::Relaxed)
    }

    fn push_alive(&mut self, entity: Entity) {
        let pos = self.dense.len();
        self.dense.push(entity);
        {
            let slot = self.slot_mut(entity.index());
            *slot = Slot {
                dense: pos as u32,
                generation: entity.generation(),
                record: Record::new(TableId::ROOT, 0),
            };
        }
        self.swap_dense(pos, self.alive);
        self.alive += 1;
    }

    fn swap_dense(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.dense.swap(a, b);
        let ea = self.dense[a];
        let eb = self.dense[b];
        self.sparse[ea.index() as usize].dense = a as u32;
        self.sparse[eb.index() as usize].dense = b as u32;
    }

    /// Make `entity` alive with exactly this generation, or validate that it
    /// already is.
    pub fn ensure(&mut self, entity: Entity) -> EcsResult<Ensured> {
        if entity.is_null() {
            return Err(EcsError::invalid_entity(entity));
        }
        let index = entity.index();
        let current = self.max_index.load(Ordering::Relaxed);
        if index > current {
            self.max_index.store(index, Ordering::Relaxed);
        }

        match self.slot(index).copied() {
            None => {
                self.push_alive(entity);
                Ok(Ensured::Created)
            }
            Some(slot) if self.slot_is_alive(&slot) => {
                if slot.generation == entity.generation() {
                    Ok(Ensured::Existing)
                } else {
                    Err(EcsError::invalid_entity(entity))
                }
            }
            Some(slot) if slot.dense == RESERVED => {
                self.push_alive(entity);
                Ok(Ensured::Created)
            }
            Some(slot) => {
                // Freed slot: revive it with the requested generation.
                let pos = slot.dense as usize;
                self.dense[pos] = entity;
                let alive = self.alive;
                self.swap_dense(pos, alive);
                self.alive += 1;
                let slot = &mut self.sparse[index as usize];
                slot.generation = entity.generation();
                slot.record = Record::new(TableId::ROOT, 0);
                Ok(Ensured::Created)
            }
        }
    }

    /// Free `entity`'s index and bump its generation. Returns its last record.
    pub fn remove(&mut self, entity: Entity) -> EcsResult<Record> {
        if !self.is_alive(entity) {
            return Err(EcsError::invalid_entity(entity));
        }
        let pos = self.sparse[entity.index() as usize].dense as usize;
        let last = self.alive - 1;
        self.swap_dense(pos, last);
        self.alive -= 1;

        let next = entity.next_generation();
        self.dense[last] = next;
        let slot = &mut self.sparse[entity.index() as usize];
        slot.generation = next.generation();
        Ok(slot.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_alive_and_distinct() {
        let mut index = EntityIndex::with_capacity(4);
        let a = index.new_id();
        let b = index.new_id();
        assert_ne!(a, b);
        assert!(index.is_alive(a));
        assert!(index.is_alive(b));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn removed_index_is_recycled_with_new_generation() {
        let mut index = EntityIndex::with_capacity(4);
        let a = index.new_id();
        let _b = index.new_id();
        index.remove(a).unwrap();
        assert!(!index.is_alive(a));
        assert!(!index.is_valid(a));
        assert!(index.remove(a).is_err());

        let c = index.new_id();
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert_eq!(c.generation(), a.generation() + 1);
        assert!(index.is_alive(c));
        assert!(!index.is_alive(a));
        assert_eq!(index.alive_by_index(a.index()), Some(c));
    }

    #[test]
    fn ensure_creates_and_validates() {
        let mut index = EntityIndex::with_capacity(4);
        let reserved = index.reserve_id();
        assert!(!index.is_alive(reserved));
        assert!(index.is_valid(reserved));
        assert_eq!(index.ensure(reserved).unwrap(), Ensured::Created);
        assert_eq!(index.ensure(reserved).unwrap(), Ensured::Existing);

        let stale = reserved.next_generation();
        assert!(index.ensure(stale).is_err());

        // ids handed out after an explicit ensure never collide with it
        let far = Entity::from_parts(100, 0);
        index.ensure(far).unwrap();
        let next = index.new_id();
        assert!(next.index() > 100);
    }

    #[test]
    fn ensure_revives_freed_slot() {
        let mut index = EntityIndex::with_capacity(4);
        let a = index.new_id();
        index.remove(a).unwrap();
        let revived = Entity::from_parts(a.index(), 5);
        assert_eq!(index.ensure(revived).unwrap(), Ensured::Created);
        assert!(index.is_alive(revived));
        assert_eq!(index.len(), 1);
        // recycle list no longer holds the revived index
        let b = index.new_id();
        assert_ne!(b.index(), a.index());
    }

    #[test]
    fn reserved_recycled_id_waits_for_ensure() {
        let mut index = EntityIndex::with_capacity(4);
        let a = index.new_id();
        let b = index.new_id();
        index.remove(a).unwrap();
        index.remove(b).unwrap();
        assert_eq!(index.recyclable(), 2);

        let claimed = index.reserve_recycled();
        assert!([a.index(), b.index()].contains(&claimed.index()));
        assert!(!index.is_alive(claimed));
        assert!(index.is_valid(claimed));
        assert_eq!(index.recyclable(), 1);

        // the claim is never handed out twice
        let other = index.new_id();
        assert_ne!(other.index(), claimed.index());
        assert_eq!(index.recyclable(), 0);
        let fresh = index.reserve_recycled();
        assert_eq!(fresh.index(), 3);
        assert_eq!(index.max_index(), 3);
        assert_eq!(index.ensure(claimed).unwrap(), Ensured::Created);
        assert!(index.is_alive(claimed));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn unused_claim_returns_to_recycle_list() {
        let mut index = EntityIndex::with_capacity(4);
        let a = index.new_id();
        index.remove(a).unwrap();
        let claimed = index.recycle_reserved().unwrap();
        assert!(index.recycle_reserved().is_none());
        index.unreserve(claimed);
        index.unreserve(claimed);
        assert_eq!(index.recyclable(), 1);
        assert_eq!(index.new_id(), claimed);
    }

    #[test]
    fn records_follow_entities() {
        let mut index = EntityIndex::with_capacity(4);
        let a = index.new_id();
        index.get_mut(a).unwrap().row = 7;
        assert_eq!(index.record(a).unwrap().row, 7);
        let removed = index.remove(a).unwrap();
        assert_eq!(removed.row, 7);
        assert!(index.get(a).is_none());
    }
}
