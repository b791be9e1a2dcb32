//! Worker stages driven from rayon.

use rayon::prelude::*;
use weft_core::define_component;
use weft_core::ecs::{QueryBuilder, World, WorldConfig, CHILD_OF};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Counter(u64);
define_component!(Counter);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Step(u64);
define_component!(Step);

fn world_with_stages(stages: usize) -> World {
    World::with_config(WorldConfig {
        stage_count: stages,
        ..WorldConfig::default()
    })
    .unwrap()
}

#[test]
fn producers_on_worker_stages_merge_in_order() {
    let mut world = world_with_stages(4);
    world.component::<Counter>().unwrap();
    let parent = world.new_entity();

    world.defer_begin();
    let created: Vec<Vec<_>> = world
        .stage_writers()
        .into_par_iter()
        .map(|writer| {
            let commands = writer.commands();
            (0..25)
                .map(|i| {
                    let e = commands.new_entity();
                    commands.set(e, Counter(i)).unwrap();
                    commands.add_pair(e, CHILD_OF, parent).unwrap();
                    e
                })
                .collect()
        })
        .collect();
    assert_eq!(world.pending_commands(), 4 * 25 * 3);
    for &e in created.iter().flatten() {
        assert!(world.is_valid(e));
        assert!(!world.is_alive(e));
    }
    world.defer_end();

    assert_eq!(world.pending_commands(), 0);
    for batch in &created {
        for (i, &e) in batch.iter().enumerate() {
            assert_eq!(world.get::<Counter>(e), Some(&Counter(i as u64)));
            assert_eq!(world.parent(e), Some(parent));
        }
    }
    assert_eq!(world.children(parent).len(), 100);
    world.check_integrity().unwrap();
}

#[test]
fn par_run_writes_every_table() {
    let mut world = world_with_stages(3);
    world.component::<Counter>().unwrap();
    world.component::<Step>().unwrap();
    let tags: Vec<_> = (0..6).map(|_| world.new_entity()).collect();
    let mut entities = Vec::new();
    for (i, &tag) in tags.iter().enumerate() {
        for n in 0..10 {
            let e = world.new_entity();
            world.set(e, Counter(0)).unwrap();
            world.set(e, Step(i as u64 + n)).unwrap();
            world.add_id(e, tag).unwrap();
            entities.push(e);
        }
    }

    let q = QueryBuilder::new()
        .with::<Counter>()
        .with::<Step>()
        .build(&mut world)
        .unwrap();
    for _ in 0..3 {
        world
            .par_run(q, |it| {
                let steps = it.field::<Step>(1).unwrap();
                let counters = it.field_mut::<Counter>(0).unwrap();
                for (c, s) in counters.iter_mut().zip(steps) {
                    c.0 += s.0;
                }
            })
            .unwrap();
    }
    for &e in &entities {
        let step = world.get::<Step>(e).unwrap().0;
        assert_eq!(world.get::<Counter>(e), Some(&Counter(step * 3)));
    }
    world.check_integrity().unwrap();
}

#[test]
fn par_run_queues_commands_per_stage() {
    let mut world = world_with_stages(2);
    world.component::<Counter>().unwrap();
    let q = QueryBuilder::new().with::<Counter>().build(&mut world).unwrap();
    let tag = world.new_entity();
    let marked = world.new_entity();
    for i in 0..20 {
        let e = world.new_entity();
        world.set(e, Counter(i)).unwrap();
        if i % 2 == 0 {
            world.add_id(e, tag).unwrap();
        }
    }

    world
        .par_run(q, |it| {
            let commands = it.commands().unwrap();
            let counters = it.field::<Counter>(0).unwrap();
            for (&e, c) in it.entities().iter().zip(counters) {
                if c.0 >= 10 {
                    commands.add_id(e, marked).unwrap();
                }
            }
        })
        .unwrap();

    let marked_query = QueryBuilder::new().with_id(marked).build(&mut world).unwrap();
    assert_eq!(world.query_count(marked_query).unwrap(), 10);
}

#[test]
fn par_run_rejects_fixed_sources() {
    let mut world = world_with_stages(2);
    let game = world.new_entity();
    world.set(game, Step(1)).unwrap();
    let q = QueryBuilder::new()
        .with::<Counter>()
        .with::<Step>()
        .src(game)
        .build(&mut world)
        .unwrap();
    assert!(world.par_run(q, |_| {}).is_err());
    assert!(world.run(q, |_| {}).is_ok());
}

#[test]
fn worker_stages_recycle_freed_ids() {
    let mut world = world_with_stages(4);
    world.component::<Counter>().unwrap();

    let mut ceiling = None;
    for round in 0..50u64 {
        world.defer_begin();
        let created: Vec<_> = world
            .stage_writers()
            .into_par_iter()
            .map(|writer| {
                let commands = writer.commands();
                let e = commands.new_entity();
                commands.set(e, Counter(round)).unwrap();
                e
            })
            .collect();
        world.defer_end();

        assert_eq!(created.len(), world.stage_count());
        for &e in &created {
            assert_eq!(world.get::<Counter>(e), Some(&Counter(round)));
            world.delete(e).unwrap();
        }
        let max = world.stats().max_entity_index;
        assert_eq!(*ceiling.get_or_insert(max), max);
    }
    assert_eq!(world.stats().recyclable_ids, world.stage_count());
    world.check_integrity().unwrap();
}
