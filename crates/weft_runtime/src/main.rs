//! Weft Runtime
//!
//! Headless driver for the ECS core: spawns a field of moving particles,
//! steps them for a fixed number of frames and logs world statistics.
//!
//! Usage: `weft [config.json] [frames]`

use anyhow::{Context, Result};
use glam::Vec3;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use weft_core::define_component;
use weft_core::ecs::{InOut, QueryBuilder, QueryId, World, WorldConfig, CHILD_OF};
use weft_metrics::{FrameTimer, PhaseProfiler};

const DT: f32 = 1.0 / 60.0;
const EMITTERS: usize = 8;
const SPAWN_PER_EMITTER: usize = 32;

// ============================================================================
// Components
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position(Vec3);
define_component!(Position);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Velocity(Vec3);
define_component!(Velocity);

/// Seconds left before the particle is deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Lifetime(f32);
define_component!(Lifetime);

#[derive(Clone, Copy, Debug, Default)]
struct Emitter;
define_component!(Emitter);

// ============================================================================
// Systems
// ============================================================================

struct Systems {
    movement: QueryId,
    aging: QueryId,
}

impl Systems {
    fn new(world: &mut World) -> Result<Self> {
        let movement = QueryBuilder::new()
            .with::<Position>()
            .with::<Velocity>()
            .access(InOut::In)
            .build(world)?;
        let aging = QueryBuilder::new().with::<Lifetime>().build(world)?;
        Ok(Self { movement, aging })
    }
}

fn movement_system(world: &mut World, q: QueryId) -> Result<()> {
    world.par_run(q, |it| {
        let Some(velocities) = it.field::<Velocity>(1) else {
            return;
        };
        if let Ok(positions) = it.field_mut::<Position>(0) {
            for (p, v) in positions.iter_mut().zip(velocities) {
                p.0 += v.0 * DT;
            }
        }
    })?;
    Ok(())
}

fn aging_system(world: &mut World, q: QueryId) -> Result<()> {
    world.run(q, |it| {
        let entities = it.entities().to_vec();
        let Ok(lifetimes) = it.field_mut::<Lifetime>(0) else {
            return;
        };
        let Ok(commands) = it.commands() else {
            return;
        };
        for (entity, life) in entities.into_iter().zip(lifetimes.iter_mut()) {
            life.0 -= DT;
            if life.0 <= 0.0 {
                if let Err(err) = commands.delete(entity) {
                    warn!(%entity, %err, "could not queue particle delete");
                }
            }
        }
    })?;
    Ok(())
}

/// Spawn a burst of particles under every emitter, one stage per worker.
fn spawn_system(world: &mut World, emitters: &[weft_core::ecs::Entity], frame: u64) -> Result<()> {
    world.defer_begin();
    let writers = world.stage_writers();
    let stages = writers.len();
    writers.into_par_iter().try_for_each(|writer| -> Result<()> {
        let commands = writer.commands();
        for (i, &emitter) in emitters.iter().enumerate().filter(|(i, _)| i % stages == writer.stage_id()) {
            for n in 0..SPAWN_PER_EMITTER {
                let angle = (n as f32 / SPAWN_PER_EMITTER as f32) * std::f32::consts::TAU + frame as f32 * 0.1;
                let particle = commands.new_entity();
                commands.add_pair(particle, CHILD_OF, emitter)?;
                commands.set(particle, Position(Vec3::new(i as f32, 0.0, 0.0)))?;
                commands.set(particle, Velocity(Vec3::new(angle.cos(), 1.0, angle.sin())))?;
                commands.set(particle, Lifetime(0.5 + (n % 4) as f32 * 0.25))?;
            }
        }
        Ok(())
    })?;
    world.defer_end();
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<WorldConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            Ok(WorldConfig::from_json(&text)?)
        }
        None => Ok(WorldConfig {
            delete_empty_tables: true,
            ..WorldConfig::default()
        }
        .with_worker_stages()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(args.first().map(String::as_str))?;
    let frames: u64 = match args.get(1) {
        Some(n) => n.parse().context("frame count must be a number")?,
        None => 240,
    };

    info!("Weft v{}", weft_core::VERSION);
    info!(config = %serde_json::to_string(&config)?, "creating world");
    let mut world = World::with_config(config)?;

    world.component::<Position>()?;
    world.component::<Velocity>()?;
    world.component::<Lifetime>()?;
    world.component::<Emitter>()?;

    let mut emitters = Vec::with_capacity(EMITTERS);
    for i in 0..EMITTERS {
        let emitter = world.new_named(&format!("emitter{i}"))?;
        world.add::<Emitter>(emitter)?;
        emitters.push(emitter);
    }
    let systems = Systems::new(&mut world)?;

    let mut timer = FrameTimer::new(60);
    let mut profiler = PhaseProfiler::new();
    for frame in 0..frames {
        timer.frame(|| -> anyhow::Result<()> {
            if frame % 30 == 0 {
                profiler.time_phase("spawn", || spawn_system(&mut world, &emitters, frame))?;
            }
            profiler.time_phase("movement", || movement_system(&mut world, systems.movement))?;
            profiler.time_phase("aging", || aging_system(&mut world, systems.aging))?;
            Ok(())
        })?;

        if frame % 60 == 59 {
            let stats = world.stats();
            info!(
                frame = frame + 1,
                entities = stats.entities,
                tables = stats.tables,
                merges = stats.merges,
                frame_ms = timer.spread().mean_ms(),
                worst_ms = timer.spread().max.as_secs_f64() * 1000.0,
                "frame stats"
            );
            for (phase, time) in profiler.iter() {
                debug!(phase, micros = time.as_micros() as u64, "phase timing");
            }
        }
    }

    world.check_integrity()?;
    let stats = world.stats();
    for (name, value) in &stats.counters {
        info!(counter = *name, value = *value, "final counter");
    }
    info!(entities = stats.entities, tables = stats.tables, "simulation finished");
    Ok(())
}
