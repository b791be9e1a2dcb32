// world.rs - ECS World: entity storage, components and structural operations
//
// Every structural operation is expressed as a `Command`. When the world is
// deferred the command is queued on the main stage; otherwise it is applied
// right away through the same code path the merge uses.

use crate::ecs::archetype::Type;
use crate::ecs::cleanup::{CleanupAction, CleanupPolicy};
use crate::ecs::component::{Component, ComponentRegistry, TypeInfo};
use crate::ecs::config::{ConfigError, WorldConfig};
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::error::{fatal, pair_id, ComponentError, EcsError, EcsResult};
use crate::ecs::id_record::IdIndex;
use crate::ecs::observer::{Event, EventKind};
use crate::ecs::poly::ObjectArena;
use crate::ecs::stage::{Command, ErasedValue, Stage};
use crate::ecs::storage::{RowChange, TableGraph, TableId};
use crate::ecs::table_cache::CacheList;
use crate::ecs::{
    Entity, EntityIdx, Id, BUILTIN_COUNT, CHILD_OF, CHILD_OF_INDEX, MAX_PAIR_FIRST, WILDCARD,
    WILDCARD_INDEX, WILDCARD_PAIR,
};
use std::collections::HashMap;
use tracing::{debug, info, trace};
use weft_metrics::Counter;

/// Traits of an entity used as a relationship or component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RelationTraits {
    /// An entity holds at most one `(R, *)` pair.
    pub exclusive: bool,
    pub cleanup: CleanupPolicy,
}

/// The main ECS world containing all entities, tables and queries.
pub struct World {
    pub(crate) config: WorldConfig,
    pub(crate) entities: EntityIndex,
    pub(crate) graph: TableGraph,
    pub(crate) ids: IdIndex,
    pub(crate) components: ComponentRegistry,
    pub(crate) objects: ObjectArena,
    pub(crate) stages: Vec<Stage>,
    /// Reused buffer the merge drains stage queues into.
    pub(crate) spare: Vec<Command>,
    pub(crate) defer_depth: u32,
    pub(crate) suspended: u32,
    pub(crate) readonly: bool,
    names: HashMap<String, Entity>,
    entity_names: HashMap<EntityIdx, String>,
    pub(crate) traits: HashMap<EntityIdx, RelationTraits>,
    /// An entity some query depends on changed table since the last rematch.
    pub(crate) rematch_pending: bool,
    pub(crate) counters: Counter,
    pub(crate) merges: u64,
}

impl World {
    /// Create a world with the default configuration.
    pub fn new() -> Self {
        Self::build(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: WorldConfig) -> Self {
        let components = ComponentRegistry::new();
        let graph = TableGraph::new(&components, config.table_capacity);
        let mut world = Self {
            entities: EntityIndex::with_capacity(config.entity_capacity),
            graph,
            ids: IdIndex::new(),
            components,
            objects: ObjectArena::default(),
            stages: (0..config.stage_count).map(Stage::new).collect(),
            spare: Vec::new(),
            defer_depth: 0,
            suspended: 0,
            readonly: false,
            names: HashMap::new(),
            entity_names: HashMap::new(),
            traits: HashMap::new(),
            rematch_pending: false,
            counters: Counter::new(),
            merges: 0,
            config,
        };
        world.init_builtins();
        info!(
            stages = world.config.stage_count,
            table_capacity = world.config.table_capacity,
            "world created"
        );
        world
    }

    fn init_builtins(&mut self) {
        for (entity, name) in [(WILDCARD, "*"), (CHILD_OF, "ChildOf")] {
            if let Err(err) = self.place_builtin(entity) {
                fatal("init_builtins", err);
            }
            self.names.insert(name.to_string(), entity);
            self.entity_names.insert(entity.index(), name.to_string());
        }
        self.traits.insert(
            CHILD_OF_INDEX,
            RelationTraits {
                exclusive: true,
                cleanup: CleanupPolicy {
                    on_delete: CleanupAction::Remove,
                    on_delete_target: CleanupAction::Delete,
                },
            },
        );
        // Wildcard records stay alive for the lifetime of the world.
        self.ids.ensure_claimed(WILDCARD.id());
        self.ids.ensure_claimed(WILDCARD_PAIR);
    }

    fn place_builtin(&mut self, entity: Entity) -> EcsResult<()> {
        self.entities.ensure(entity)?;
        self.graph.place_new(&mut self.entities, entity, TableId::ROOT)?;
        Ok(())
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ----- Entities -----------------------------------------------------

    /// Create an empty entity.
    ///
    /// While deferred (or readonly) the id is reserved now, recycling a
    /// freed one when possible, and the entity becomes alive at the next
    /// merge.
    pub fn new_entity(&mut self) -> Entity {
        if self.is_deferred() || self.readonly {
            let entity = self.entities.reserve_recycled();
            self.stages[0].push(Command::New { entity });
            return entity;
        }
        let entity = self.entities.new_id();
        if let Err(err) = self.place_in_root(entity) {
            fatal("new_entity", err);
        }
        trace!(%entity, "created entity");
        entity
    }

    /// Entity with this name, created if it does not exist yet.
    pub fn new_named(&mut self, name: &str) -> EcsResult<Entity> {
        if let Some(entity) = self.lookup(name) {
            return Ok(entity);
        }
        let entity = self.new_entity();
        self.set_name(entity, name)?;
        Ok(entity)
    }

    pub(crate) fn place_in_root(&mut self, entity: Entity) -> EcsResult<()> {
        let change = self.graph.place_new(&mut self.entities, entity, TableId::ROOT)?;
        self.note_change(None, Some(TableId::ROOT), change);
        Ok(())
    }

    /// Make a reserved id alive in the root table.
    pub(crate) fn apply_new(&mut self, entity: Entity) -> EcsResult<()> {
        use crate::ecs::entity_index::Ensured;
        if self.entities.ensure(entity)? == Ensured::Created {
            self.place_in_root(entity)?;
            trace!(%entity, "created reserved entity");
        }
        Ok(())
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Alive, or a reserved id that has not been made alive yet.
    #[inline]
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.entities.is_valid(entity)
    }

    /// Number of live entities, builtins included.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entity an operation is about to target. Deferred operations accept
    /// reserved ids; immediate ones need a live entity.
    pub(crate) fn check_target(&self, entity: Entity) -> EcsResult<()> {
        let ok = if self.is_deferred() || self.readonly {
            self.entities.is_valid(entity)
        } else {
            self.entities.is_alive(entity)
        };
        if ok {
            Ok(())
        } else {
            Err(EcsError::invalid_entity(entity))
        }
    }

    /// Id that can be stored on an entity: concrete, with live halves.
    pub(crate) fn check_id(&self, id: Id) -> EcsResult<()> {
        if id == Id::NULL {
            return Err(EcsError::component(id, ComponentError::NotAComponent));
        }
        if id.is_wildcard() {
            return Err(EcsError::component(id, ComponentError::Wildcard));
        }
        if id.is_pair() {
            for index in [id.first(), id.second()] {
                if self.entities.alive_by_index(index).is_none() {
                    return Err(EcsError::invalid_entity(Entity::from_parts(index, 0)));
                }
            }
        } else if let Some(entity) = id.entity() {
            if !self.entities.is_alive(entity) {
                return Err(EcsError::invalid_entity(entity));
            }
        }
        Ok(())
    }

    pub fn add<T: Component>(&mut self, entity: Entity) -> EcsResult<()> {
        let id = self.component::<T>()?.id();
        self.add_id(entity, id)
    }

    /// Add an id. Adding an id the entity already has does nothing.
    pub fn add_id(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        let id = id.into();
        self.check_id(id)?;
        self.check_target(entity)?;
        self.submit(Command::Add { entity, id })
    }

    pub fn add_pair(&mut self, entity: Entity, rel: Entity, target: Entity) -> EcsResult<()> {
        self.add_id(entity, pair_id(rel, target)?)
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> EcsResult<()> {
        match self.component_of::<T>() {
            Some(cid) => self.remove_id(entity, cid),
            None => self.check_target(entity),
        }
    }

    /// Remove an id, or every id matching a wildcard pattern.
    pub fn remove_id(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<()> {
        let id = id.into();
        self.check_target(entity)?;
        self.submit(Command::Remove { entity, id })
    }

    pub fn remove_pair(&mut self, entity: Entity, rel: Entity, target: Entity) -> EcsResult<()> {
        self.remove_id(entity, pair_id(rel, target)?)
    }

    /// Write a component value, adding the component first if needed.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        let cid = self.component::<T>()?;
        self.check_target(entity)?;
        let info = self
            .components
            .get(cid.index())
            .cloned()
            .ok_or(EcsError::component(cid.id(), ComponentError::NotAComponent))?;
        if info.is_tag() {
            return self.submit(Command::Add { entity, id: cid.id() });
        }
        let value = ErasedValue::new(info, value);
        self.submit(Command::Set {
            entity,
            id: cid.id(),
            value,
        })
    }

    /// Write raw bytes into a runtime-registered component.
    pub fn set_id(&mut self, entity: Entity, id: impl Into<Id>, bytes: &[u8]) -> EcsResult<()> {
        let id = id.into();
        self.check_id(id)?;
        self.check_target(entity)?;
        let info = self
            .components
            .for_id(id)
            .cloned()
            .ok_or(EcsError::component(id, ComponentError::NotAComponent))?;
        if info.type_id.is_some() {
            return Err(EcsError::component(id, ComponentError::TypeMismatch));
        }
        let value = ErasedValue::from_bytes(info, bytes).map_err(|reason| EcsError::component(id, reason))?;
        self.submit(Command::Set { entity, id, value })
    }

    /// Id of `T` if it has been registered in this world.
    pub(crate) fn component_of<T: Component>(&self) -> Option<Id> {
        let index = self.components.lookup_type::<T>()?;
        self.entities.alive_by_index(index).map(Entity::id)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let cid = self.component_of::<T>()?;
        let record = self.entities.get(entity)?;
        let table = self.graph.get(record.table)?;
        let column = table.column_index(cid)?;
        table.column(column).as_slice::<T>().get(record.row as usize)
    }

    /// Mutable access to a component value. Marks the table as changed.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let cid = self.component_of::<T>()?;
        let record = *self.entities.get(entity)?;
        let table = self.graph.get_mut(record.table)?;
        let column = table.column_index(cid)?;
        table.touch();
        table.column_mut(column).as_slice_mut::<T>().get_mut(record.row as usize)
    }

    /// Raw bytes of a component value.
    pub fn get_id(&self, entity: Entity, id: impl Into<Id>) -> Option<&[u8]> {
        let record = self.entities.get(entity)?;
        let table = self.graph.get(record.table)?;
        let column = table.column_index(id.into())?;
        Some(table.column(column).row_bytes(record.row as usize))
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.component_of::<T>()
            .is_some_and(|id| self.has_id(entity, id))
    }

    /// True if the entity has `id`, or any id matching a wildcard pattern.
    pub fn has_id(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        let Some(table) = self.entities.get(entity).and_then(|r| self.graph.get(r.table)) else {
            return false;
        };
        if id.is_wildcard() {
            table.ty().find_match(id, 0).is_some()
        } else {
            table.ty().contains(id)
        }
    }

    pub fn has_pair(&self, entity: Entity, rel: Entity, target: Entity) -> bool {
        Id::try_pair(rel, target).is_some_and(|id| self.has_id(entity, id))
    }

    /// Signal that a value was changed in place.
    pub fn modified<T: Component>(&mut self, entity: Entity) -> EcsResult<()> {
        let id = self.component::<T>()?.id();
        self.check_target(entity)?;
        self.submit(Command::Modified { entity, id })
    }

    /// Remove every id from an entity.
    pub fn clear(&mut self, entity: Entity) -> EcsResult<()> {
        self.check_target(entity)?;
        self.submit(Command::Clear { entity })
    }

    /// Sorted ids of an entity.
    pub fn type_of(&self, entity: Entity) -> EcsResult<Type> {
        let record = self.entities.record(entity)?;
        Ok(self.graph.table(record.table)?.ty().clone())
    }

    pub fn table_of(&self, entity: Entity) -> EcsResult<TableId> {
        Ok(self.entities.record(entity)?.table)
    }

    /// New entity with the same ids as `src`; values are copied through the
    /// copy hooks when `copy` is set, default-constructed otherwise.
    pub fn clone_entity(&mut self, src: Entity, copy: bool) -> EcsResult<Entity> {
        self.check_target(src)?;
        let dst = if self.is_deferred() || self.readonly {
            self.entities.reserve_id()
        } else {
            let dst = self.entities.new_id();
            self.place_in_root(dst)?;
            dst
        };
        self.submit(Command::Clone { src, dst, copy })?;
        Ok(dst)
    }

    pub(crate) fn clone_into(&mut self, src: Entity, dst: Entity, copy: bool) -> EcsResult<()> {
        let from = self.entities.record(src)?;
        let row = self.commit(dst, from.table)?;
        if !copy {
            return Ok(());
        }
        let table = self.graph.table_mut(from.table)?;
        let mut copied = Vec::with_capacity(table.column_count());
        for c in 0..table.column_count() {
            let column = table.column_mut(c);
            let info = column.info().clone();
            let src_ptr = column.ptr(from.row as usize);
            let dst_ptr = column.ptr_mut(row as usize);
            // SAFETY: both rows are initialized and distinct. On failure the
            // destination is reconstructed before returning.
            unsafe {
                info.destruct(dst_ptr);
                if let Err(reason) = info.copy_into(dst_ptr, src_ptr) {
                    info.construct(dst_ptr);
                    return Err(EcsError::component(table.column_id(c), reason));
                }
            }
            copied.push(table.column_id(c));
        }
        table.touch();
        for id in copied {
            self.emit(Event {
                kind: EventKind::OnSet,
                entity: dst,
                id,
                table: Some(from.table),
                row,
            });
        }
        Ok(())
    }

    // ----- Relationships -------------------------------------------------

    /// The `n`th target of `rel` on `entity`.
    pub fn target(&self, entity: Entity, rel: Entity, n: usize) -> Option<Entity> {
        let record = self.entities.get(entity)?;
        let table = self.graph.get(record.table)?;
        table
            .ty()
            .ids()
            .iter()
            .filter(|id| id.is_pair() && id.first() == rel.index())
            .nth(n)
            .and_then(|id| self.entities.alive_by_index(id.second()))
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.target(entity, CHILD_OF, 0)
    }

    /// Entities holding `(ChildOf, parent)`.
    pub fn children(&self, parent: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        if !self.entities.is_alive(parent) {
            return out;
        }
        let Some(record) = self.ids.lookup(Id::pair(CHILD_OF, parent)) else {
            return out;
        };
        for (tid, _) in record.cache.iter(CacheList::NonEmpty) {
            if let Some(table) = self.graph.get(tid) {
                out.extend_from_slice(table.entities());
            }
        }
        out
    }

    /// Mark `rel` as exclusive: adding `(rel, b)` replaces any `(rel, a)`.
    pub fn set_exclusive(&mut self, rel: Entity) -> EcsResult<()> {
        if !self.entities.is_alive(rel) {
            return Err(EcsError::invalid_entity(rel));
        }
        self.traits.entry(rel.index()).or_default().exclusive = true;
        Ok(())
    }

    /// What happens to entities referencing `entity` when it is deleted.
    pub fn set_cleanup(&mut self, entity: Entity, policy: CleanupPolicy) -> EcsResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::invalid_entity(entity));
        }
        self.traits.entry(entity.index()).or_default().cleanup = policy;
        Ok(())
    }

    pub(crate) fn is_exclusive(&self, rel: EntityIdx) -> bool {
        self.traits.get(&rel).is_some_and(|t| t.exclusive)
    }

    pub(crate) fn cleanup_policy(&self, index: EntityIdx) -> CleanupPolicy {
        self.traits.get(&index).map(|t| t.cleanup).unwrap_or_default()
    }

    // ----- Names ---------------------------------------------------------

    pub fn set_name(&mut self, entity: Entity, name: &str) -> EcsResult<()> {
        self.check_target(entity)?;
        self.submit(Command::SetName {
            entity,
            name: name.to_string(),
        })
    }

    /// Bind `name` to `entity`. A name belongs to one entity at a time.
    pub(crate) fn set_name_now(&mut self, entity: Entity, name: String) -> EcsResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::invalid_entity(entity));
        }
        self.forget_name(entity.index());
        if let Some(previous) = self.names.insert(name.clone(), entity) {
            self.entity_names.remove(&previous.index());
        }
        self.entity_names.insert(entity.index(), name);
        Ok(())
    }

    pub(crate) fn forget_name(&mut self, index: EntityIdx) {
        if let Some(old) = self.entity_names.remove(&index) {
            if self.names.get(&old).is_some_and(|e| e.index() == index) {
                self.names.remove(&old);
            }
        }
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.entity_names.get(&entity.index()).map(String::as_str)
    }

    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.names
            .get(name)
            .copied()
            .filter(|e| self.entities.is_alive(*e))
    }

    // ----- Components ----------------------------------------------------

    /// Register `T` once and return its id. Registration is never deferred.
    pub fn component<T: Component>(&mut self) -> EcsResult<Entity> {
        if let Some(entity) = self
            .components
            .lookup_type::<T>()
            .and_then(|index| self.entities.alive_by_index(index))
        {
            return Ok(entity);
        }
        let entity = self.entities.new_id();
        self.place_in_root(entity)?;
        self.components
            .insert(entity.index(), TypeInfo::of::<T>())
            .map_err(|reason| EcsError::component(entity.id(), reason))?;
        if !self.names.contains_key(T::NAME) {
            self.names.insert(T::NAME.to_string(), entity);
            self.entity_names.insert(entity.index(), T::NAME.to_string());
        }
        debug!(component = T::NAME, %entity, "registered component");
        Ok(entity)
    }

    /// Register a component described only by its layout and hooks.
    pub fn register_component(&mut self, name: &str, info: TypeInfo) -> EcsResult<Entity> {
        info.validate()
            .map_err(|reason| EcsError::component(Id::NULL, reason))?;
        let entity = self.entities.new_id();
        self.place_in_root(entity)?;
        self.components
            .insert(entity.index(), info)
            .map_err(|reason| EcsError::component(entity.id(), reason))?;
        self.set_name_now(entity, name.to_string())?;
        debug!(component = name, %entity, "registered runtime component");
        Ok(entity)
    }

    /// Attach type info to an existing entity so it can carry data.
    pub fn register_component_for(&mut self, entity: Entity, info: TypeInfo) -> EcsResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::invalid_entity(entity));
        }
        let mut uses = vec![entity.id(), Id::pair_from_indices(WILDCARD_INDEX, entity.index())];
        if entity.index() <= MAX_PAIR_FIRST {
            uses.push(Id::pair_from_indices(entity.index(), WILDCARD_INDEX));
        }
        let in_use: usize = uses
            .into_iter()
            .filter_map(|id| self.ids.lookup(id))
            .map(|record| record.cache.len())
            .sum();
        let current = self.components.get(entity.index()).map(|i| (i.size, i.align));
        if in_use > 0 && current != Some((info.size, info.align)) {
            return Err(EcsError::component(
                entity.id(),
                ComponentError::AlreadyInUse { tables: in_use },
            ));
        }
        self.components
            .insert(entity.index(), info)
            .map_err(|reason| EcsError::component(entity.id(), reason))?;
        Ok(())
    }

    /// Type info registered for an id.
    pub fn type_info(&self, id: impl Into<Id>) -> Option<&TypeInfo> {
        self.components.for_id(id.into()).map(|info| &**info)
    }

    pub(crate) fn is_builtin(entity: Entity) -> bool {
        entity.index() < BUILTIN_COUNT
    }

    // ----- Transitions ---------------------------------------------------

    /// Follow one edge from `from`, registering the destination table if
    /// the edge created it.
    fn traverse(&mut self, from: TableId, id: Id, add: bool) -> EcsResult<TableId> {
        let step = if add {
            self.graph.traverse_add(from, id, &self.components)?
        } else {
            self.graph.traverse_remove(from, id, &self.components)?
        };
        if step.created {
            self.table_created(step.table)?;
        }
        Ok(step.table)
    }

    fn table_created(&mut self, tid: TableId) -> EcsResult<()> {
        let table = self.graph.table_mut(tid)?;
        self.ids.register_table(table);
        self.match_new_table(tid);
        self.counters.increment("tables_created", 1);
        Ok(())
    }

    /// Table reached from `from` by adding or removing `id`.
    ///
    /// Removing a wildcard removes every matching id. Adding a pair of an
    /// exclusive relationship first removes the pairs it replaces.
    pub(crate) fn destination(&mut self, from: TableId, id: Id, add: bool) -> EcsResult<TableId> {
        let replaced: Vec<Id> = {
            let ty = self.graph.table(from)?.ty();
            if !add && id.is_wildcard() {
                ty.ids().iter().copied().filter(|x| x.matches(id)).collect()
            } else if add && id.is_pair() && self.is_exclusive(id.first()) {
                ty.ids()
                    .iter()
                    .copied()
                    .filter(|x| x.is_pair() && x.first() == id.first() && *x != id)
                    .collect()
            } else {
                Vec::new()
            }
        };
        let mut table = from;
        for old in replaced {
            table = self.traverse(table, old, false)?;
        }
        if add || !id.is_wildcard() {
            table = self.traverse(table, id, add)?;
        }
        Ok(table)
    }

    /// Move `entity` to `dst` and notify observers of the net id change.
    /// Returns the entity's row in `dst`.
    pub(crate) fn commit(&mut self, entity: Entity, dst: TableId) -> EcsResult<u32> {
        let record = self.entities.record(entity)?;
        let src = record.table;
        if src == dst {
            return Ok(record.row);
        }
        let (added, removed): (Vec<Id>, Vec<Id>) = {
            let from = self.graph.table(src)?.ty();
            let to = self.graph.table(dst)?.ty();
            (to.difference(from).collect(), from.difference(to).collect())
        };
        let change = self.graph.move_entity(&mut self.entities, entity, dst)?;
        self.note_change(Some(src), Some(dst), change);
        for (kind, ids) in [(EventKind::OnRemove, removed), (EventKind::OnAdd, added)] {
            for id in ids {
                self.emit(Event {
                    kind,
                    entity,
                    id,
                    table: Some(dst),
                    row: change.row,
                });
            }
        }
        Ok(change.row)
    }

    /// Keep id records and query caches in step with a row change.
    pub(crate) fn note_change(&mut self, src: Option<TableId>, dst: Option<TableId>, change: RowChange) {
        if let (Some(src), true) = (src, change.src_emptied) {
            self.set_table_empty(src, true);
        }
        if let (Some(dst), true) = (dst, change.dst_filled) {
            self.set_table_empty(dst, false);
        }
        if change.observed_moved {
            self.rematch_pending = true;
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        info!(
            entities = self.entities.len(),
            tables = self.graph.len(),
            merges = self.merges,
            "world destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_component;

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    define_component!(Position);

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }
    define_component!(Velocity);

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Frozen;
    define_component!(Frozen);

    #[test]
    fn builtins_exist() {
        let world = World::new();
        assert!(world.is_alive(WILDCARD));
        assert!(world.is_alive(CHILD_OF));
        assert_eq!(world.lookup("ChildOf"), Some(CHILD_OF));
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn set_then_get() {
        let mut world = World::new();
        let e = world.new_entity();
        world.set(e, Position { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        assert!(world.has::<Position>(e));
        assert!(!world.has::<Velocity>(e));

        world.get_mut::<Position>(e).unwrap().x = 5.0;
        assert_eq!(world.get::<Position>(e).unwrap().x, 5.0);
    }

    #[test]
    fn add_is_idempotent() {
        let mut world = World::new();
        let e = world.new_entity();
        world.add::<Position>(e).unwrap();
        let table = world.table_of(e).unwrap();
        world.add::<Position>(e).unwrap();
        assert_eq!(world.table_of(e).unwrap(), table);
        assert_eq!(world.get::<Position>(e), Some(&Position::default()));
    }

    #[test]
    fn tags_have_no_value() {
        let mut world = World::new();
        let e = world.new_entity();
        world.set(e, Frozen).unwrap();
        assert!(world.has::<Frozen>(e));
        assert!(world.get::<Frozen>(e).is_none());
        world.remove::<Frozen>(e).unwrap();
        assert!(!world.has::<Frozen>(e));
    }

    #[test]
    fn dead_entities_are_rejected() {
        let mut world = World::new();
        let e = world.new_entity();
        world.delete(e).unwrap();
        assert_eq!(world.add::<Position>(e), Err(EcsError::invalid_entity(e)));
        assert!(world.type_of(e).is_err());
    }

    #[test]
    fn wildcards_cannot_be_added() {
        let mut world = World::new();
        let e = world.new_entity();
        let err = world.add_id(e, WILDCARD).unwrap_err();
        assert!(matches!(
            err,
            EcsError::InvalidComponent {
                reason: ComponentError::Wildcard,
                ..
            }
        ));
    }

    #[test]
    fn exclusive_relationship_replaces_target() {
        let mut world = World::new();
        let a = world.new_entity();
        let b = world.new_entity();
        let child = world.new_entity();
        world.add_pair(child, CHILD_OF, a).unwrap();
        world.add_pair(child, CHILD_OF, b).unwrap();
        assert_eq!(world.parent(child), Some(b));
        assert!(!world.has_pair(child, CHILD_OF, a));
        assert_eq!(world.children(b), vec![child]);
        assert!(world.children(a).is_empty());
    }

    #[test]
    fn targets_in_type_order() {
        let mut world = World::new();
        let likes = world.new_entity();
        let a = world.new_entity();
        let b = world.new_entity();
        let e = world.new_entity();
        world.add_pair(e, likes, b).unwrap();
        world.add_pair(e, likes, a).unwrap();
        assert_eq!(world.target(e, likes, 0), Some(a));
        assert_eq!(world.target(e, likes, 1), Some(b));
        assert_eq!(world.target(e, likes, 2), None);
        assert!(world.has_id(e, Id::pair(likes, WILDCARD)));
        world.remove_id(e, Id::pair(likes, WILDCARD)).unwrap();
        assert!(world.type_of(e).unwrap().is_empty());
    }

    #[test]
    fn clone_copies_values() {
        let mut world = World::new();
        let e = world.new_entity();
        world.set(e, Position { x: 3.0, y: 4.0 }).unwrap();
        world.add::<Frozen>(e).unwrap();

        let copy = world.clone_entity(e, true).unwrap();
        assert_eq!(world.get::<Position>(copy), Some(&Position { x: 3.0, y: 4.0 }));
        assert!(world.has::<Frozen>(copy));

        let blank = world.clone_entity(e, false).unwrap();
        assert_eq!(world.get::<Position>(blank), Some(&Position::default()));
        assert_eq!(world.table_of(blank).unwrap(), world.table_of(e).unwrap());
    }

    #[test]
    fn names_follow_entities() {
        let mut world = World::new();
        let e = world.new_named("player").unwrap();
        assert_eq!(world.new_named("player").unwrap(), e);
        assert_eq!(world.name(e), Some("player"));
        world.set_name(e, "hero").unwrap();
        assert_eq!(world.lookup("player"), None);
        assert_eq!(world.lookup("hero"), Some(e));
        world.delete(e).unwrap();
        assert_eq!(world.lookup("hero"), None);
    }

    #[test]
    fn components_are_named_entities() {
        let mut world = World::new();
        let pos = world.component::<Position>().unwrap();
        assert_eq!(world.component::<Position>().unwrap(), pos);
        assert_eq!(world.lookup("Position"), Some(pos));
        assert_eq!(world.type_info(pos).map(|i| i.size), Some(8));
    }

    #[test]
    fn runtime_components_take_bytes() {
        let mut world = World::new();
        let blob = world
            .register_component("Blob", TypeInfo::from_layout("Blob", 4, 4, Default::default()))
            .unwrap();
        let e = world.new_entity();
        world.set_id(e, blob, &7u32.to_ne_bytes()).unwrap();
        assert_eq!(world.get_id(e, blob), Some(&7u32.to_ne_bytes()[..]));

        let err = world.set_id(e, blob, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            EcsError::InvalidComponent {
                reason: ComponentError::SizeMismatch { expected: 4, actual: 2 },
                ..
            }
        ));
    }

    #[test]
    fn registering_layout_on_used_id_is_rejected() {
        let mut world = World::new();
        let marker = world.new_entity();
        let e = world.new_entity();
        world.add_id(e, marker).unwrap();
        let err = world
            .register_component_for(marker, TypeInfo::from_layout("m", 4, 4, Default::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            EcsError::InvalidComponent {
                reason: ComponentError::AlreadyInUse { .. },
                ..
            }
        ));
    }

    #[test]
    fn bad_layouts_are_rejected() {
        let mut world = World::new();
        let err = world
            .register_component("Odd", TypeInfo::from_layout("Odd", 6, 4, Default::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            EcsError::InvalidComponent {
                reason: ComponentError::SizeNotAligned { size: 6, align: 4 },
                ..
            }
        ));
    }

    #[test]
    fn oversized_relationship_is_an_error() {
        use crate::ecs::entity::MAX_PAIR_FIRST;

        let mut world = World::new();
        let e = world.new_entity();
        let target = world.new_entity();
        let rel = Entity::from_parts(MAX_PAIR_FIRST + 1, 0);

        let err = world.add_pair(e, rel, target).unwrap_err();
        assert!(matches!(
            err,
            EcsError::InvalidComponent {
                reason: ComponentError::RelationshipTooLarge { index },
                ..
            } if index == MAX_PAIR_FIRST + 1
        ));
        assert!(world.remove_pair(e, rel, target).is_err());
        assert!(!world.has_pair(e, rel, target));
        assert!(world.commands().add_pair(e, rel, target).is_err());
        assert!(world.type_of(e).unwrap().is_empty());
    }
}
