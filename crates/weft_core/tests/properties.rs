//! Property tests for table transitions and entity recycling.

use proptest::prelude::*;
use weft_core::define_component;
use weft_core::ecs::{Entity, World};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Mass(f64);
define_component!(Mass);

#[derive(Clone, Debug, Default, PartialEq)]
struct Label(String);
define_component!(Label);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Frozen;
define_component!(Frozen);

proptest! {
    #[test]
    fn prop_has_follows_add_remove_parity(ops in prop::collection::vec(any::<bool>(), 0..64)) {
        let mut world = World::new();
        let tag = world.new_entity();
        let e = world.new_entity();
        let mut expected = false;
        for add in ops {
            if add {
                world.add_id(e, tag).unwrap();
            } else {
                world.remove_id(e, tag).unwrap();
            }
            expected = add;
            prop_assert_eq!(world.has_id(e, tag), expected);
        }
        prop_assert_eq!(world.has_id(e, tag), expected);
    }

    #[test]
    fn prop_deferred_parity_matches_immediate(ops in prop::collection::vec(any::<bool>(), 1..64)) {
        let mut world = World::new();
        let tag = world.new_entity();
        let e = world.new_entity();
        world.defer_begin();
        for &add in &ops {
            if add {
                world.add_id(e, tag).unwrap();
            } else {
                world.remove_id(e, tag).unwrap();
            }
        }
        world.defer_end();
        prop_assert_eq!(world.has_id(e, tag), *ops.last().unwrap());
        prop_assert!(world.check_integrity().is_ok());
    }

    #[test]
    fn prop_type_is_independent_of_add_order(order in Just(vec![0usize, 1, 2]).prop_shuffle()) {
        let mut world = World::new();
        let ids = [world.new_entity(), world.new_entity(), world.new_entity()];
        let reference = world.new_entity();
        for id in ids {
            world.add_id(reference, id).unwrap();
        }
        let e = world.new_entity();
        for i in order {
            world.add_id(e, ids[i]).unwrap();
        }
        prop_assert_eq!(world.table_of(e).unwrap(), world.table_of(reference).unwrap());
        prop_assert_eq!(world.type_of(e).unwrap(), world.type_of(reference).unwrap());
    }

    #[test]
    fn prop_transitions_preserve_shared_values(
        masses in prop::collection::vec(-1.0e6f64..1.0e6, 1..16),
        victim in any::<prop::sample::Index>(),
    ) {
        let mut world = World::new();
        let entities: Vec<Entity> = masses
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                let e = world.new_entity();
                world.set(e, Mass(m)).unwrap();
                world.set(e, Label(format!("e{i}"))).unwrap();
                e
            })
            .collect();

        // Moving one entity out swaps the last row into its place.
        let moved = entities[victim.index(entities.len())];
        world.add::<Frozen>(moved).unwrap();
        world.remove::<Label>(moved).unwrap();

        for (i, (&e, &m)) in entities.iter().zip(&masses).enumerate() {
            prop_assert_eq!(world.get::<Mass>(e), Some(&Mass(m)));
            if e == moved {
                prop_assert!(world.get::<Label>(e).is_none());
                prop_assert!(world.has::<Frozen>(e));
            } else {
                prop_assert_eq!(world.get::<Label>(e), Some(&Label(format!("e{i}"))));
            }
        }
        prop_assert!(world.check_integrity().is_ok());
    }
}

#[test]
fn added_component_is_default_initialized() {
    let mut world = World::new();
    let e = world.new_entity();
    world.set(e, Mass(2.5)).unwrap();
    world.add::<Label>(e).unwrap();
    assert_eq!(world.get::<Label>(e), Some(&Label::default()));
    assert_eq!(world.get::<Mass>(e), Some(&Mass(2.5)));
}

#[test]
fn recycled_index_never_equals_old_handle() {
    let mut world = World::new();
    let old = world.new_entity();
    world.set(old, Mass(1.0)).unwrap();
    world.delete(old).unwrap();
    assert!(!world.is_alive(old));
    assert!(!world.is_valid(old));

    let new = world.new_entity();
    assert_eq!(new.index(), old.index());
    assert_ne!(new, old);
    assert!(world.is_alive(new));
    assert!(!world.is_alive(old));
    assert!(world.get::<Mass>(new).is_none());
    assert!(world.add::<Frozen>(old).is_err());
}

#[test]
fn deferred_creation_recycles_freed_ids() {
    let mut world = World::new();
    world.component::<Mass>().unwrap();
    let first = world.new_entity();
    world.delete(first).unwrap();

    for i in 0..1000 {
        world.defer_begin();
        let e = world.new_entity();
        world.set(e, Mass(i as f64)).unwrap();
        assert!(!world.is_alive(e));
        world.defer_end();
        assert!(world.is_alive(e));
        assert_eq!(world.get::<Mass>(e), Some(&Mass(i as f64)));
        world.delete(e).unwrap();
    }

    let stats = world.stats();
    assert!(stats.max_entity_index <= first.index() + 1);
    assert!(world.check_integrity().is_ok());
}
