// poly.rs - World-owned objects
//
// Queries and observers live in one arena and are told apart by an explicit
// kind tag. Both hold claims on id records that must be released when the
// object is disposed.

use crate::ecs::id_record::IdRecordId;
use crate::ecs::observer::Observer;
use crate::ecs::query::Query;
use std::fmt;

/// Handle of an object in the world arena. Never reused within a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectKind {
    Query,
    Observer,
}

/// Capabilities shared by every world object.
pub(crate) trait Poly {
    fn kind(&self) -> ObjectKind;

    /// Id records this object keeps alive.
    fn claims(&self) -> &[IdRecordId];
}

pub(crate) enum WorldObject {
    Query(Query),
    Observer(Observer),
}

impl WorldObject {
    pub fn as_poly(&self) -> &dyn Poly {
        match self {
            WorldObject::Query(q) => q,
            WorldObject::Observer(o) => o,
        }
    }

    #[inline]
    pub fn kind(&self) -> ObjectKind {
        self.as_poly().kind()
    }

    pub fn as_query(&self) -> Option<&Query> {
        match self {
            WorldObject::Query(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_query_mut(&mut self) -> Option<&mut Query> {
        match self {
            WorldObject::Query(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_observer_mut(&mut self) -> Option<&mut Observer> {
        match self {
            WorldObject::Observer(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct ObjectArena {
    slots: Vec<Option<WorldObject>>,
    live: usize,
}

impl ObjectArena {
    pub fn insert(&mut self, object: WorldObject) -> ObjectId {
        let id = ObjectId(self.slots.len() as u32);
        self.slots.push(Some(object));
        self.live += 1;
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&WorldObject> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut WorldObject> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<WorldObject> {
        let object = self.slots.get_mut(id.0 as usize)?.take();
        if object.is_some() {
            self.live -= 1;
        }
        object
    }

    /// Live objects of one kind.
    pub fn ids_of(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, o)| o.as_ref().is_some_and(|o| o.kind() == kind))
            .map(|(i, _)| ObjectId(i as u32))
            .collect()
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|o| o.kind() == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &WorldObject)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|o| (ObjectId(i as u32), o)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{EventKind, ObserverDesc, QueryBuilder, World};

    #[test]
    fn objects_are_told_apart_by_kind() {
        let mut world = World::new();
        let tag = world.new_entity();
        let q = QueryBuilder::new().with_id(tag).build(&mut world).unwrap();
        let o = world
            .observer(ObserverDesc::new(tag, &[EventKind::OnAdd], |_, _| {}))
            .unwrap();

        assert_eq!(world.objects.len(), 2);
        assert_eq!(world.objects.count(ObjectKind::Query), 1);
        assert_eq!(world.objects.ids_of(ObjectKind::Observer), vec![o.0]);
        assert_eq!(world.objects.get(q.0).map(WorldObject::kind), Some(ObjectKind::Query));
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let mut world = World::new();
        let tag = world.new_entity();
        let first = QueryBuilder::new().with_id(tag).build(&mut world).unwrap();
        world.query_fini(first).unwrap();
        let second = QueryBuilder::new().with_id(tag).build(&mut world).unwrap();

        assert_ne!(first.0, second.0);
        assert!(world.objects.get(first.0).is_none());
        assert_eq!(world.objects.len(), 1);
    }
}
