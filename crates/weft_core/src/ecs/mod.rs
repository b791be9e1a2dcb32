//! Entity Component System core.
//!
//! Entities live in tables, one table per distinct set of ids. Tables are
//! linked by add/remove edges so that structural changes walk a graph
//! instead of hashing a full type. Every id keeps a cache of the tables
//! that contain it, and cached queries keep their own lists of matching
//! tables up to date as tables are created and deleted.
//!
//! Structural changes made while the world is deferred are queued on a
//! stage and applied at the next merge point. Worker threads get their
//! own stages through [`World::stage_writers`].

mod archetype;
mod cleanup;
mod component;
mod config;
mod entity;
mod entity_index;
mod error;
mod flush;
mod id_record;
mod observer;
mod poly;
pub mod query;
mod stage;
mod stats;
pub mod storage;
mod table_cache;
mod world;

pub use archetype::Type;
pub use cleanup::{CleanupAction, CleanupPolicy};
pub use component::{Component, CopyHook, CtorHook, DtorHook, MoveHook, TypeHooks, TypeInfo};
pub use config::{ConfigError, WorldConfig};
pub use entity::{
    Entity, EntityIdx, Generation, Id, CHILD_OF, MAX_PAIR_FIRST, PAIR_FLAG, WILDCARD,
    WILDCARD_PAIR,
};
pub(crate) use entity::{BUILTIN_COUNT, CHILD_OF_INDEX, WILDCARD_INDEX};
pub use entity_index::Record;
pub use error::{ComponentError, EcsError, EcsResult, InvariantError, QueryError};
pub use observer::{Event, EventKind, ObserverCallback, ObserverDesc, ObserverId};
pub use poly::{ObjectId, ObjectKind};
pub use query::{
    ComponentRef, InOut, Oper, QueryBuilder, QueryId, QueryIter, RuleIter, RuleRow, TableIter,
    Term, TermRef, Traverse, THIS_VAR,
};
pub use stage::{Commands, StageWriter};
pub use stats::WorldStats;
pub use storage::{Column, Table, TableGraph, TableId};
pub use world::World;
