//! Observer events and entity cleanup.

use std::sync::{Arc, Mutex};
use weft_core::define_component;
use weft_core::ecs::{
    CleanupAction, CleanupPolicy, Entity, Event, EventKind, Id, ObserverDesc, World, CHILD_OF, WILDCARD,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Health(i32);
define_component!(Health);

type Log = Arc<Mutex<Vec<Event>>>;

fn record(world: &mut World, id: impl Into<Id>, events: &[EventKind]) -> Log {
    let log: Log = Arc::default();
    let sink = log.clone();
    world
        .observer(ObserverDesc::new(id, events, move |_, event| {
            sink.lock().unwrap().push(*event);
        }))
        .unwrap();
    log
}

fn kinds(log: &Log) -> Vec<(EventKind, Entity)> {
    log.lock().unwrap().iter().map(|e| (e.kind, e.entity)).collect()
}

#[test]
fn set_reports_add_then_set_with_value_in_place() {
    let mut world = World::new();
    let health = world.component::<Health>().unwrap();
    let seen: Arc<Mutex<Vec<i32>>> = Arc::default();
    let sink = seen.clone();
    world
        .observer(ObserverDesc::new(health, &[EventKind::OnSet], move |world, event| {
            let value = world.get::<Health>(event.entity).map_or(-1, |h| h.0);
            sink.lock().unwrap().push(value);
        }))
        .unwrap();
    let log = record(&mut world, health, &[EventKind::OnAdd, EventKind::OnRemove]);

    let e = world.new_entity();
    world.set(e, Health(7)).unwrap();
    world.set(e, Health(9)).unwrap();
    world.remove::<Health>(e).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![7, 9]);
    assert_eq!(kinds(&log), vec![(EventKind::OnAdd, e), (EventKind::OnRemove, e)]);
    let events = log.lock().unwrap();
    assert_eq!(events[1].table, Some(world.table_of(e).unwrap()));
}

#[test]
fn wildcard_observer_sees_concrete_pairs() {
    let mut world = World::new();
    let likes = world.new_named("Likes").unwrap();
    let log = record(&mut world, Id::pair(likes, WILDCARD), &[EventKind::OnAdd]);
    let a = world.new_entity();
    let b = world.new_entity();
    let c = world.new_entity();
    world.add_pair(a, likes, b).unwrap();
    world.add_pair(a, likes, c).unwrap();

    let ids: Vec<Id> = log.lock().unwrap().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![Id::pair(likes, b), Id::pair(likes, c)]);
}

#[test]
fn delete_reports_removal_without_a_table() {
    let mut world = World::new();
    let health = world.component::<Health>().unwrap();
    let log = record(&mut world, health, &[EventKind::OnRemove]);
    let e = world.new_entity();
    world.set(e, Health(1)).unwrap();
    world.delete(e).unwrap();

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity, e);
    assert_eq!(events[0].table, None);
}

#[test]
fn disposed_observer_is_silent() {
    let mut world = World::new();
    let health = world.component::<Health>().unwrap();
    let log: Log = Arc::default();
    let sink = log.clone();
    let observer = world
        .observer(ObserverDesc::new(health, &[EventKind::OnAdd], move |_, event| {
            sink.lock().unwrap().push(*event);
        }))
        .unwrap();
    let e = world.new_entity();
    world.add::<Health>(e).unwrap();
    world.observer_fini(observer).unwrap();
    let f = world.new_entity();
    world.add::<Health>(f).unwrap();
    assert_eq!(kinds(&log), vec![(EventKind::OnAdd, e)]);
    assert!(world.observer_fini(observer).is_err());
}

#[test]
fn observer_changes_apply_before_the_operation_returns() {
    let mut world = World::new();
    let health = world.component::<Health>().unwrap();
    let dead = world.new_named("Dead").unwrap();
    world
        .observer(ObserverDesc::new(health, &[EventKind::OnSet], move |world, event| {
            if world.get::<Health>(event.entity).is_some_and(|h| h.0 <= 0) {
                world.add_id(event.entity, dead).unwrap();
            }
        }))
        .unwrap();

    let e = world.new_entity();
    world.set(e, Health(3)).unwrap();
    assert!(!world.has_id(e, dead));
    world.set(e, Health(0)).unwrap();
    assert!(world.has_id(e, dead));
    assert_eq!(world.pending_commands(), 0);
}

#[test]
fn custom_cleanup_deletes_holders_of_a_relationship() {
    let mut world = World::new();
    let owns = world.new_named("Owns").unwrap();
    world
        .set_cleanup(
            owns,
            CleanupPolicy {
                on_delete_target: CleanupAction::Delete,
                ..CleanupPolicy::default()
            },
        )
        .unwrap();
    let item = world.new_entity();
    let owner = world.new_entity();
    let bystander = world.new_entity();
    world.add_pair(owner, owns, item).unwrap();
    world.add_pair(bystander, CHILD_OF, owner).unwrap();

    world.delete(item).unwrap();
    assert!(!world.is_alive(owner));
    assert!(!world.is_alive(bystander));
    assert!(world.is_alive(owns));
    world.check_integrity().unwrap();
}

#[test]
fn deleting_a_relationship_strips_its_pairs() {
    let mut world = World::new();
    let likes = world.new_entity();
    let a = world.new_entity();
    let b = world.new_entity();
    world.add_pair(a, likes, b).unwrap();
    world.set(a, Health(4)).unwrap();

    world.delete(likes).unwrap();
    assert!(world.is_alive(a));
    assert_eq!(world.get::<Health>(a), Some(&Health(4)));
    assert_eq!(world.type_of(a).unwrap().len(), 1);

    // The recycled index must not resurrect the old pair.
    let fresh = world.new_entity();
    assert_eq!(fresh.index(), likes.index());
    assert!(!world.has_pair(a, fresh, b));
    world.check_integrity().unwrap();
}
