//! Entity deletion and the cleanup of everything that referenced it.
//!
//! Deleting an entity also deals with the ids built from it: the entity as
//! a component or tag, as a relationship `(e, *)` and as a target `(*, e)`.
//! Each holder either loses the id or is deleted too, depending on the
//! [`CleanupPolicy`] of the deleted entity (for the first two) or of the
//! relationship (for targets). Tables left empty by a cleanup are deleted
//! so that a recycled index never matches a stale pair.

use crate::ecs::error::{ComponentError, EcsError, EcsResult};
use crate::ecs::observer::{Event, EventKind};
use crate::ecs::stage::Command;
use crate::ecs::storage::TableId;
use crate::ecs::table_cache::CacheList;
use crate::ecs::{Entity, Id, World, MAX_PAIR_FIRST, WILDCARD_INDEX};
use std::collections::VecDeque;
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CleanupAction {
    /// Remove the id from every entity holding it.
    #[default]
    Remove,
    /// Delete every entity holding the id.
    Delete,
}

/// What happens to holders of ids built from an entity when it is deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Applies to `e` and `(e, *)`.
    pub on_delete: CleanupAction,
    /// Applies to `(e, x)` pairs whose target `x` is deleted.
    pub on_delete_target: CleanupAction,
}

impl World {
    /// Delete an entity. Builtins cannot be deleted.
    pub fn delete(&mut self, entity: Entity) -> EcsResult<()> {
        if Self::is_builtin(entity) {
            return Err(EcsError::component(entity.id(), ComponentError::Builtin));
        }
        self.check_target(entity)?;
        self.submit(Command::Delete { entity })
    }

    /// Delete every entity that has `id` (which may be a wildcard).
    pub fn delete_with(&mut self, id: impl Into<Id>) -> EcsResult<()> {
        self.submit(Command::DeleteWith { id: id.into() })
    }

    /// Remove `id` (which may be a wildcard) from every entity.
    pub fn remove_all(&mut self, id: impl Into<Id>) -> EcsResult<()> {
        self.submit(Command::RemoveAll { id: id.into() })
    }

    pub(crate) fn delete_now(&mut self, entity: Entity) -> EcsResult<()> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::invalid_entity(entity));
        }
        let mut pending = VecDeque::from([entity]);
        let mut touched = Vec::new();
        while let Some(next) = pending.pop_front() {
            if !self.entities.is_alive(next) || Self::is_builtin(next) {
                continue;
            }
            self.delete_one(next, &mut pending, &mut touched)?;
        }
        self.reclaim_tables(touched);
        Ok(())
    }

    fn delete_one(&mut self, entity: Entity, pending: &mut VecDeque<Entity>, touched: &mut Vec<TableId>) -> EcsResult<()> {
        let record = self.entities.record(entity)?;
        let ty = self.graph.table(record.table)?.ty().clone();
        let change = self.graph.delete_entity_row(&mut self.entities, entity)?;
        self.note_change(Some(record.table), None, change);
        self.entities.remove(entity)?;
        self.counters.increment("entities_deleted", 1);
        trace!(%entity, table = %record.table, "deleted entity");

        for &id in ty.ids() {
            self.emit(Event {
                kind: EventKind::OnRemove,
                entity,
                id,
                table: None,
                row: change.row,
            });
        }
        self.cleanup_references(entity, pending, touched)?;

        self.forget_name(entity.index());
        self.components.remove(entity.index());
        self.traits.remove(&entity.index());
        Ok(())
    }

    fn cleanup_references(&mut self, entity: Entity, pending: &mut VecDeque<Entity>, touched: &mut Vec<TableId>) -> EcsResult<()> {
        let policy = self.cleanup_policy(entity.index());
        let mut uses = vec![(entity.id(), policy.on_delete)];
        if entity.index() <= MAX_PAIR_FIRST {
            uses.push((Id::pair_from_indices(entity.index(), WILDCARD_INDEX), policy.on_delete));
        }
        for id in self.ids.matching_ids(Id::pair_from_indices(WILDCARD_INDEX, entity.index())) {
            uses.push((id, self.cleanup_policy(id.first()).on_delete_target));
        }

        for (id, action) in uses {
            let Some(record) = self.ids.lookup(id) else {
                continue;
            };
            for tid in record.cache.tables(CacheList::All) {
                touched.push(tid);
                let Some(table) = self.graph.get(tid) else {
                    continue;
                };
                let holders = table.entities().to_vec();
                match action {
                    CleanupAction::Delete => pending.extend(holders),
                    CleanupAction::Remove => {
                        for holder in holders {
                            let from = self.entities.record(holder)?.table;
                            let to = self.destination(from, id, false)?;
                            touched.push(to);
                            self.commit(holder, to)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn delete_with_now(&mut self, id: Id) -> EcsResult<()> {
        let holders = self.holders_of(id);
        for holder in holders {
            if self.entities.is_alive(holder) && !Self::is_builtin(holder) {
                self.delete_now(holder)?;
            }
        }
        Ok(())
    }

    pub(crate) fn remove_all_now(&mut self, id: Id) -> EcsResult<()> {
        let mut touched = Vec::new();
        for holder in self.holders_of(id) {
            let from = self.entities.record(holder)?.table;
            let to = self.destination(from, id, false)?;
            touched.push(from);
            self.commit(holder, to)?;
        }
        self.reclaim_tables(touched);
        Ok(())
    }

    fn holders_of(&self, id: Id) -> Vec<Entity> {
        let Some(record) = self.ids.lookup(id) else {
            return Vec::new();
        };
        record
            .cache
            .iter(CacheList::NonEmpty)
            .filter_map(|(tid, _)| self.graph.get(tid))
            .flat_map(|table| table.entities().iter().copied())
            .collect()
    }

    /// Delete the tables in `tables` that ended up empty.
    fn reclaim_tables(&mut self, mut tables: Vec<TableId>) {
        tables.sort_unstable();
        tables.dedup();
        for tid in tables {
            self.delete_table(tid);
        }
    }

    /// Delete every empty table except the root. Returns how many were
    /// deleted.
    pub fn delete_empty_tables(&mut self) -> EcsResult<usize> {
        if self.is_deferred() || self.readonly {
            return Err(EcsError::ReadonlyViolation {
                op: "delete empty tables",
            });
        }
        let empty: Vec<TableId> = self
            .graph
            .iter()
            .filter(|t| t.id() != TableId::ROOT && t.is_empty())
            .map(|t| t.id())
            .collect();
        Ok(empty.into_iter().filter(|&tid| self.delete_table(tid)).count())
    }

    /// Delete tables that stayed empty for longer than the configured grace.
    pub(crate) fn reclaim_empty_tables(&mut self) -> usize {
        let grace = self.config.empty_table_grace_merges;
        let mut doomed = Vec::new();
        let ids: Vec<TableId> = self.graph.ids().collect();
        for tid in ids {
            if tid == TableId::ROOT {
                continue;
            }
            let Some(table) = self.graph.get_mut(tid) else {
                continue;
            };
            if table.is_empty() {
                table.empty_merges += 1;
                if table.empty_merges > grace {
                    doomed.push(tid);
                }
            } else {
                table.empty_merges = 0;
            }
        }
        doomed.into_iter().filter(|&tid| self.delete_table(tid)).count()
    }

    /// Remove an empty table from the graph, the id records and every query
    /// cache.
    pub(crate) fn delete_table(&mut self, tid: TableId) -> bool {
        match self.graph.get(tid) {
            Some(table) if tid != TableId::ROOT && table.is_empty() => {}
            _ => return false,
        }
        let Some(mut table) = self.graph.remove(tid) else {
            return false;
        };
        self.unmatch_table(&table);
        self.ids.unregister_table(&mut table);
        self.counters.increment("tables_deleted", 1);
        debug!(table = %tid, ty = ?table.ty(), "deleted table");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::CHILD_OF;

    #[test]
    fn deleting_parent_deletes_children() {
        let mut world = World::new();
        let root = world.new_entity();
        let child = world.new_entity();
        let grandchild = world.new_entity();
        world.add_pair(child, CHILD_OF, root).unwrap();
        world.add_pair(grandchild, CHILD_OF, child).unwrap();

        world.delete(root).unwrap();
        assert!(!world.is_alive(root));
        assert!(!world.is_alive(child));
        assert!(!world.is_alive(grandchild));
        world.check_integrity().unwrap();
    }

    #[test]
    fn deleting_target_removes_pairs_by_default() {
        let mut world = World::new();
        let likes = world.new_entity();
        let bob = world.new_entity();
        let alice = world.new_entity();
        world.add_pair(alice, likes, bob).unwrap();
        let stale = Id::pair(likes, bob);

        world.delete(bob).unwrap();
        assert!(world.is_alive(alice));
        assert!(world.type_of(alice).unwrap().is_empty());
        assert!(world.ids.lookup(stale).is_none());
        world.check_integrity().unwrap();
    }

    #[test]
    fn deleting_tag_removes_it_or_deletes_holders() {
        let mut world = World::new();
        let tag = world.new_entity();
        let doomed = world.new_entity();
        let holder = world.new_entity();
        world.add_id(holder, tag).unwrap();
        world.delete(tag).unwrap();
        assert!(world.is_alive(holder));
        assert!(!world.has_id(holder, tag));

        let tag = world.new_entity();
        world
            .set_cleanup(
                tag,
                CleanupPolicy {
                    on_delete: CleanupAction::Delete,
                    ..Default::default()
                },
            )
            .unwrap();
        world.add_id(doomed, tag).unwrap();
        world.delete(tag).unwrap();
        assert!(!world.is_alive(doomed));
        world.check_integrity().unwrap();
    }

    #[test]
    fn builtins_cannot_be_deleted() {
        let mut world = World::new();
        assert!(world.delete(CHILD_OF).is_err());
        assert!(world.is_alive(CHILD_OF));
    }

    #[test]
    fn delete_with_and_remove_all() {
        let mut world = World::new();
        let tag = world.new_entity();
        let a = world.new_entity();
        let b = world.new_entity();
        world.add_id(a, tag).unwrap();
        world.add_id(b, tag).unwrap();
        world.remove_all(tag).unwrap();
        assert!(!world.has_id(a, tag) && !world.has_id(b, tag));

        world.add_id(a, tag).unwrap();
        world.delete_with(tag).unwrap();
        assert!(!world.is_alive(a));
        assert!(world.is_alive(b));
    }

    #[test]
    fn empty_tables_are_deleted_on_request() {
        let mut world = World::new();
        let tag = world.new_entity();
        let e = world.new_entity();
        world.add_id(e, tag).unwrap();
        let table = world.table_of(e).unwrap();
        world.remove_id(e, tag).unwrap();
        assert!(world.graph.get(table).is_some());

        assert_eq!(world.delete_empty_tables().unwrap(), 1);
        assert!(world.graph.get(table).is_none());
        world.check_integrity().unwrap();
    }
}
