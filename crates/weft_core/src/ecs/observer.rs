// observer.rs - Callbacks on component lifecycle events
//
// Observers are notified after a change is fully applied: the entity is in
// its new table and any value written by `set` is in place. Callbacks get a
// deferred world, so structural changes they request are queued and applied
// by the surrounding flush.

use crate::ecs::error::{EcsError, EcsResult, QueryError};
use crate::ecs::id_record::IdRecordId;
use crate::ecs::poly::{ObjectId, ObjectKind, Poly, WorldObject};
use crate::ecs::storage::TableId;
use crate::ecs::{Entity, Id, World};
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EventKind {
    OnAdd,
    OnRemove,
    OnSet,
}

impl EventKind {
    const fn bit(self) -> u8 {
        match self {
            EventKind::OnAdd => 1,
            EventKind::OnRemove => 2,
            EventKind::OnSet => 4,
        }
    }
}

/// What happened, to whom, and where the entity is now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub entity: Entity,
    /// Concrete id that was added, removed or set.
    pub id: Id,
    /// Table holding the entity after the change; `None` once deleted.
    pub table: Option<TableId>,
    pub row: u32,
}

pub type ObserverCallback = Box<dyn FnMut(&mut World, &Event) + Send + Sync>;

pub struct ObserverDesc {
    /// Id pattern; may contain wildcards.
    pub id: Id,
    pub events: Vec<EventKind>,
    pub callback: ObserverCallback,
}

impl ObserverDesc {
    pub fn new(id: impl Into<Id>, events: &[EventKind], callback: impl FnMut(&mut World, &Event) + Send + Sync + 'static) -> Self {
        Self {
            id: id.into(),
            events: events.to_vec(),
            callback: Box::new(callback),
        }
    }
}

/// Handle of an observer owned by a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObserverId(pub(crate) ObjectId);

pub(crate) struct Observer {
    pattern: Id,
    events: u8,
    /// Taken out while the callback runs.
    callback: Option<ObserverCallback>,
    claims: [IdRecordId; 1],
}

impl Poly for Observer {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Observer
    }

    fn claims(&self) -> &[IdRecordId] {
        &self.claims
    }
}

impl Observer {
    fn wants(&self, kind: EventKind, id: Id) -> bool {
        self.events & kind.bit() != 0 && (id == self.pattern || id.matches(self.pattern))
    }
}

impl World {
    pub fn observer(&mut self, desc: ObserverDesc) -> EcsResult<ObserverId> {
        if desc.id == Id::NULL {
            return Err(QueryError::Empty.into());
        }
        if let Some(e) = desc.id.entity().filter(|e| !e.is_null() && !desc.id.is_wildcard()) {
            if !self.entities.is_alive(e) {
                return Err(EcsError::invalid_entity(e));
            }
        }
        let rid = self.ids.ensure_claimed(desc.id);
        let events = desc.events.iter().fold(0, |mask, k| mask | k.bit());
        let oid = self.objects.insert(WorldObject::Observer(Observer {
            pattern: desc.id,
            events,
            callback: Some(desc.callback),
            claims: [rid],
        }));
        debug!(observer = %oid, id = %desc.id, "observer created");
        Ok(ObserverId(oid))
    }

    pub fn observer_fini(&mut self, o: ObserverId) -> EcsResult<()> {
        match self.objects.get(o.0).map(WorldObject::kind) {
            Some(ObjectKind::Observer) => {}
            _ => return Err(QueryError::UnknownQuery { query: o.0.raw() }.into()),
        }
        if let Some(object) = self.objects.remove(o.0) {
            for &rid in object.as_poly().claims() {
                self.ids.release(rid);
            }
        }
        debug!(observer = %o.0, "observer disposed");
        Ok(())
    }

    /// Notify observers of one event. Callbacks run deferred.
    pub(crate) fn emit(&mut self, event: Event) {
        if self.objects.count(ObjectKind::Observer) == 0 {
            return;
        }
        for oid in self.objects.ids_of(ObjectKind::Observer) {
            let callback = match self.objects.get_mut(oid).and_then(WorldObject::as_observer_mut) {
                Some(observer) if observer.wants(event.kind, event.id) => observer.callback.take(),
                _ => None,
            };
            let Some(mut callback) = callback else {
                continue;
            };
            // Emission only happens while applying a change, so the
            // enclosing flush picks up whatever the callback queues.
            self.defer_depth += 1;
            callback(self, &event);
            self.defer_depth -= 1;
            if let Some(observer) = self.objects.get_mut(oid).and_then(WorldObject::as_observer_mut) {
                observer.callback = Some(callback);
            }
        }
    }
}
