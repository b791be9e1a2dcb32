// stage.rs - Deferred command queues
//
// A stage buffers structural changes while the world is deferred. Stage 0
// belongs to the main thread; the others are handed to worker threads by
// `par_run` and `stage_writers`. Only `merge` applies queued commands to the
// table graph.

use crate::ecs::component::{Component, ComponentRegistry, TypeInfo};
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::error::{pair_id, ComponentError, EcsError, EcsResult};
use crate::ecs::storage::Column;
use crate::ecs::{Entity, Id, World};
use std::cell::RefCell;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use tracing::warn;

/// A component value detached from any table, waiting to be written.
pub(crate) struct ErasedValue {
    column: Column,
}

impl ErasedValue {
    pub fn new<T: Component>(info: Arc<TypeInfo>, value: T) -> Self {
        debug_assert!(info.is_type::<T>());
        let mut column = Column::new(info, 1);
        let mut value = ManuallyDrop::new(value);
        // SAFETY: the column was built from T's type info and the value is
        // never dropped here after being moved.
        unsafe { column.push_moved(&mut *value as *mut T as *mut u8) };
        Self { column }
    }

    pub fn from_bytes(info: Arc<TypeInfo>, bytes: &[u8]) -> Result<Self, ComponentError> {
        let mut column = Column::new(info, 1);
        column.push_default();
        column.write_bytes(0, bytes)?;
        Ok(Self { column })
    }

    pub fn info(&self) -> &Arc<TypeInfo> {
        self.column.info()
    }

    /// Move the value into `row` of `dst`, dropping what was there.
    pub fn write_into(mut self, dst: &mut Column, row: usize) {
        let src = self.column.ptr_mut(0);
        // SAFETY: callers pick `dst` by id, so both columns share type info.
        unsafe { dst.replace_moved(row, src) };
        self.column.swap_remove_forget(0);
    }
}

/// One queued structural change.
pub(crate) enum Command {
    New { entity: Entity },
    Add { entity: Entity, id: Id },
    Remove { entity: Entity, id: Id },
    Set { entity: Entity, id: Id, value: ErasedValue },
    Modified { entity: Entity, id: Id },
    Clear { entity: Entity },
    Delete { entity: Entity },
    SetName { entity: Entity, name: String },
    Clone { src: Entity, dst: Entity, copy: bool },
    DeleteWith { id: Id },
    RemoveAll { id: Id },
}

impl Command {
    /// Entity targeted by a command that can be folded into a batch.
    pub fn batch_entity(&self) -> Option<Entity> {
        match self {
            Command::Add { entity, .. }
            | Command::Remove { entity, .. }
            | Command::Set { entity, .. }
            | Command::Modified { entity, .. } => Some(*entity),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::New { .. } => "new",
            Command::Add { .. } => "add",
            Command::Remove { .. } => "remove",
            Command::Set { .. } => "set",
            Command::Modified { .. } => "modified",
            Command::Clear { .. } => "clear",
            Command::Delete { .. } => "delete",
            Command::SetName { .. } => "set_name",
            Command::Clone { .. } => "clone",
            Command::DeleteWith { .. } => "delete_with",
            Command::RemoveAll { .. } => "remove_all",
        }
    }
}

pub(crate) struct Stage {
    id: usize,
    queue: RefCell<Vec<Command>>,
    /// Freed entity ids claimed for this stage's `new_entity`.
    recycled: RefCell<Vec<Entity>>,
}

impl Stage {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            queue: RefCell::new(Vec::new()),
            recycled: RefCell::new(Vec::new()),
        }
    }

    pub fn take_recycled(&self) -> Option<Entity> {
        self.recycled.borrow_mut().pop()
    }

    pub fn recycled_mut(&mut self) -> &mut Vec<Entity> {
        self.recycled.get_mut()
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn push(&self, command: Command) {
        self.queue.borrow_mut().push(command);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Move every queued command to the end of `out`, keeping order.
    pub fn drain_into(&mut self, out: &mut Vec<Command>) {
        out.append(self.queue.get_mut());
    }
}

/// Queues structural changes on one stage.
///
/// Entities created here are reserved immediately and become alive when the
/// stage is merged. Ids freed before the stage was handed out are reused
/// first; a fresh index is taken once the stage's share runs out. Every command is validated against the state the world
/// had when it was deferred; commands that became invalid by the time they
/// are applied are discarded with a warning.
pub struct Commands<'a> {
    stage: &'a Stage,
    entities: &'a EntityIndex,
    components: &'a ComponentRegistry,
}

impl<'a> Commands<'a> {
    pub(crate) fn new(stage: &'a Stage, entities: &'a EntityIndex, components: &'a ComponentRegistry) -> Self {
        Self {
            stage,
            entities,
            components,
        }
    }

    /// Index of the stage these commands go to.
    pub fn stage_id(&self) -> usize {
        self.stage.id()
    }

    /// Number of commands waiting on this stage.
    pub fn pending(&self) -> usize {
        self.stage.len()
    }

    fn check(&self, entity: Entity) -> EcsResult<()> {
        if self.entities.is_valid(entity) && !entity.is_null() {
            Ok(())
        } else {
            Err(EcsError::invalid_entity(entity))
        }
    }

    fn check_id(&self, id: Id) -> EcsResult<()> {
        if id.is_wildcard() {
            return Err(EcsError::component(id, ComponentError::Wildcard));
        }
        let alive = |idx| self.entities.alive_by_index(idx).is_some();
        if id.is_pair() {
            if !alive(id.first()) || !alive(id.second()) {
                return Err(EcsError::component(id, ComponentError::NotAComponent));
            }
        } else if let Some(e) = id.entity() {
            if !self.entities.is_alive(e) {
                return Err(EcsError::invalid_entity(e));
            }
        }
        Ok(())
    }

    fn component_id<T: Component>(&self) -> EcsResult<(Id, Arc<TypeInfo>)> {
        let not_registered = || EcsError::component(Id::NULL, ComponentError::NotAComponent);
        let idx = self.components.lookup_type::<T>().ok_or_else(not_registered)?;
        let entity = self.entities.alive_by_index(idx).ok_or_else(not_registered)?;
        let info = self.components.get(idx).cloned().ok_or_else(not_registered)?;
        Ok((entity.id(), info))
    }

    pub fn new_entity(&self) -> Entity {
        let entity = match self.stage.take_recycled() {
            Some(entity) => entity,
            None => self.entities.reserve_id(),
        };
        self.stage.push(Command::New { entity });
        entity
    }

    pub fn add<T: Component>(&self, entity: Entity) -> EcsResult<()> {
        let (id, _) = self.component_id::<T>()?;
        self.add_id(entity, id)
    }

    pub fn add_id(&self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        let id = id.into();
        self.check(entity)?;
        self.check_id(id)?;
        self.stage.push(Command::Add { entity, id });
        Ok(())
    }

    pub fn add_pair(&self, entity: Entity, rel: Entity, target: Entity) -> EcsResult<()> {
        self.add_id(entity, pair_id(rel, target)?)
    }

    pub fn remove<T: Component>(&self, entity: Entity) -> EcsResult<()> {
        let (id, _) = self.component_id::<T>()?;
        self.remove_id(entity, id)
    }

    pub fn remove_id(&self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        let id = id.into();
        self.check(entity)?;
        self.stage.push(Command::Remove { entity, id });
        Ok(())
    }

    pub fn set<T: Component>(&self, entity: Entity, value: T) -> EcsResult<()> {
        let (id, info) = self.component_id::<T>()?;
        self.check(entity)?;
        if info.is_tag() {
            self.stage.push(Command::Add { entity, id });
        } else {
            let value = ErasedValue::new(info, value);
            self.stage.push(Command::Set { entity, id, value });
        }
        Ok(())
    }

    pub fn modified<T: Component>(&self, entity: Entity) -> EcsResult<()> {
        let (id, _) = self.component_id::<T>()?;
        self.check(entity)?;
        self.stage.push(Command::Modified { entity, id });
        Ok(())
    }

    pub fn clear(&self, entity: Entity) -> EcsResult<()> {
        self.check(entity)?;
        self.stage.push(Command::Clear { entity });
        Ok(())
    }

    pub fn delete(&self, entity: Entity) -> EcsResult<()> {
        self.check(entity)?;
        self.stage.push(Command::Delete { entity });
        Ok(())
    }

    pub fn set_name(&self, entity: Entity, name: impl Into<String>) -> EcsResult<()> {
        self.check(entity)?;
        self.stage.push(Command::SetName {
            entity,
            name: name.into(),
        });
        Ok(())
    }

    pub fn delete_with(&self, id: impl Into<Id>) {
        self.stage.push(Command::DeleteWith { id: id.into() });
    }

    pub fn remove_all(&self, id: impl Into<Id>) {
        self.stage.push(Command::RemoveAll { id: id.into() });
    }
}

/// Exclusive handle on a worker stage, for producers running on other
/// threads. Commands queued here are applied by the next merge.
pub struct StageWriter<'a> {
    stage: &'a mut Stage,
    entities: &'a EntityIndex,
    components: &'a ComponentRegistry,
}

impl StageWriter<'_> {
    pub fn stage_id(&self) -> usize {
        self.stage.id()
    }

    pub fn commands(&self) -> Commands<'_> {
        Commands::new(self.stage, self.entities, self.components)
    }
}

impl World {
    /// True while structural changes are queued instead of applied.
    #[inline]
    pub fn is_deferred(&self) -> bool {
        self.defer_depth > 0 && self.suspended == 0
    }

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Start queueing structural changes. Nests.
    pub fn defer_begin(&mut self) {
        self.defer_depth += 1;
    }

    /// Leave a deferred region. The outermost call merges every stage.
    pub fn defer_end(&mut self) {
        if self.defer_depth == 0 {
            warn!("defer_end without matching defer_begin");
            return;
        }
        self.defer_depth -= 1;
        if self.defer_depth == 0 {
            self.merge();
        }
    }

    /// Apply operations immediately inside a deferred region until the
    /// matching `defer_resume`.
    pub fn defer_suspend(&mut self) {
        self.suspended += 1;
    }

    pub fn defer_resume(&mut self) {
        if self.suspended == 0 {
            warn!("defer_resume without matching defer_suspend");
            return;
        }
        self.suspended -= 1;
    }

    /// Enter a readonly region: direct structural changes are rejected and
    /// must go through stage commands.
    pub fn readonly_begin(&mut self) {
        self.readonly = true;
    }

    /// Leave the readonly region and merge what the stages queued.
    pub fn readonly_end(&mut self) {
        self.readonly = false;
        if self.defer_depth == 0 {
            self.merge();
        }
    }

    /// Command buffer of the main stage.
    pub fn commands(&self) -> Commands<'_> {
        Commands::new(&self.stages[0], &self.entities, &self.components)
    }

    /// One writer per stage, for use on worker threads.
    pub fn stage_writers(&mut self) -> Vec<StageWriter<'_>> {
        self.stock_stages();
        let entities = &self.entities;
        let components = &self.components;
        self.stages
            .iter_mut()
            .map(|stage| StageWriter {
                stage,
                entities,
                components,
            })
            .collect()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Commands queued on all stages and not yet merged.
    pub fn pending_commands(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    /// Share freed entity ids out to the stages round-robin, up to
    /// `stage_recycled_ids` each, so stages recycle instead of growing the
    /// index.
    pub(crate) fn stock_stages(&mut self) {
        let cap = self.config.stage_recycled_ids;
        loop {
            let mut stocked = false;
            for stage in &mut self.stages {
                let pool = stage.recycled_mut();
                if pool.len() >= cap {
                    continue;
                }
                let Some(entity) = self.entities.recycle_reserved() else {
                    return;
                };
                pool.push(entity);
                stocked = true;
            }
            if !stocked {
                return;
            }
        }
    }

    /// Hand ids the stages did not use back to the entity index.
    pub(crate) fn unstock_stages(&mut self) {
        for stage in &mut self.stages {
            for entity in stage.recycled_mut().drain(..) {
                self.entities.unreserve(entity);
            }
        }
    }

    /// Queue on the main stage when deferred, otherwise apply now.
    pub(crate) fn submit(&mut self, command: Command) -> EcsResult<()> {
        if self.is_deferred() {
            self.stages[0].push(command);
            return Ok(());
        }
        if self.readonly {
            return Err(EcsError::ReadonlyViolation { op: command.name() });
        }
        // Observers triggered by the operation queue their changes; they are
        // applied once it completes.
        self.defer_depth += 1;
        let result = self.apply_command(command);
        self.defer_depth -= 1;
        if self.defer_depth == 0 && self.pending_commands() > 0 {
            self.flush_queues();
        }
        self.rematch_dependents();
        result
    }
}
