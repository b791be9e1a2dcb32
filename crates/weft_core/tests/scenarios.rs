//! End-to-end scenarios over a single world.

use weft_core::define_component;
use weft_core::ecs::{Entity, Id, QueryBuilder, World};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}
define_component!(Position);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}
define_component!(Velocity);

#[test]
fn deferred_add_and_set_apply_at_flush() {
    let mut world = World::new();
    let position = world.component::<Position>().unwrap();
    let velocity = world.component::<Velocity>().unwrap();
    let e1 = world.new_entity();
    world.set(e1, Position { x: 0.0, y: 0.0 }).unwrap();

    world.defer_begin();
    world.add::<Velocity>(e1).unwrap();
    world.set(e1, Velocity { x: 1.0, y: 2.0 }).unwrap();
    assert!(world.get::<Velocity>(e1).is_none());
    assert_eq!(world.pending_commands(), 2);
    world.defer_end();

    assert_eq!(world.get::<Velocity>(e1), Some(&Velocity { x: 1.0, y: 2.0 }));
    assert_eq!(world.get::<Position>(e1), Some(&Position { x: 0.0, y: 0.0 }));
    let ty = world.type_of(e1).unwrap();
    assert_eq!(ty.ids(), &[position.id(), velocity.id()]);
    world.check_integrity().unwrap();
}

fn mutual_likes(world: &mut World) -> (Entity, Entity, Entity) {
    let likes = world.new_named("Likes").unwrap();
    let a = world.new_named("A").unwrap();
    let b = world.new_named("B").unwrap();
    world.add_pair(a, likes, b).unwrap();
    world.add_pair(b, likes, a).unwrap();
    (likes, a, b)
}

#[test]
fn fixed_source_wildcard_yields_target() {
    let mut world = World::new();
    let (likes, a, b) = mutual_likes(&mut world);

    let q = QueryBuilder::new()
        .with_pair(likes, "*")
        .src(a)
        .build(&mut world)
        .unwrap();
    let rows: Vec<(Id, Entity)> = world
        .query_iter(q)
        .unwrap()
        .map(|it| (it.field_id(0), it.field_src(0)))
        .collect();
    assert_eq!(rows, vec![(Id::pair(likes, b), a)]);
}

#[test]
fn symmetric_facts_yield_one_row_per_direction() {
    let mut world = World::new();
    let (likes, a, b) = mutual_likes(&mut world);

    let rule = QueryBuilder::new()
        .with_pair(likes, "$Y")
        .src_var("X")
        .with_pair(likes, "$X")
        .src_var("Y")
        .build(&mut world)
        .unwrap();
    let mut rows: Vec<(Entity, Entity)> = world
        .rule_iter(rule)
        .unwrap()
        .map(|row| (row.get("X").unwrap(), row.get("$Y").unwrap()))
        .collect();
    rows.sort();
    assert_eq!(rows, vec![(a, b), (b, a)]);
    assert_eq!(world.query_count(rule).unwrap(), 2);
}

#[test]
fn rule_by_name_with_prebound_variable() {
    let mut world = World::new();
    let (likes, a, b) = mutual_likes(&mut world);
    let c = world.new_named("C").unwrap();
    world.add_pair(c, likes, a).unwrap();

    let rule = QueryBuilder::new()
        .with_pair("Likes", "$Y")
        .src_var("X")
        .build(&mut world)
        .unwrap();
    let rows: Vec<Entity> = world
        .rule_iter(rule)
        .unwrap()
        .set_var("Y", a)
        .unwrap()
        .filter_map(|row| row.get("X"))
        .collect();
    let mut rows = rows;
    rows.sort();
    assert_eq!(rows, vec![b, c]);
    assert_eq!(world.lookup("Likes"), Some(likes));
}

#[test]
fn query_over_components_sees_every_row() {
    let mut world = World::new();
    let q = QueryBuilder::new()
        .with::<Position>()
        .with::<Velocity>()
        .build(&mut world)
        .unwrap();
    for i in 0..10 {
        let e = world.new_entity();
        world.set(e, Position { x: i as f32, y: 0.0 }).unwrap();
        if i % 2 == 0 {
            world.set(e, Velocity { x: 1.0, y: 1.0 }).unwrap();
        }
    }
    assert_eq!(world.query_count(q).unwrap(), 5);

    world
        .run(q, |it| {
            let v = it.field::<Velocity>(1).unwrap();
            let p = it.field_mut::<Position>(0).unwrap();
            for (p, v) in p.iter_mut().zip(v) {
                p.x += v.x;
                p.y += v.y;
            }
        })
        .unwrap();

    let mut xs: Vec<f32> = world
        .query_iter(q)
        .unwrap()
        .flat_map(|it| it.field::<Position>(0).unwrap().to_vec())
        .map(|p| p.x)
        .collect();
    xs.sort_by(f32::total_cmp);
    assert_eq!(xs, vec![1.0, 3.0, 5.0, 7.0, 9.0]);
}
