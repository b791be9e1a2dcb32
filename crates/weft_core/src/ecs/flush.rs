// flush.rs - Applying queued commands at merge points
//
// Stage queues are drained in stage order into one buffer and applied FIFO.
// Commands queued while applying (by observers) land back on the stages and
// are picked up by the next round, until every queue is empty.

use crate::ecs::error::{EcsError, EcsResult};
use crate::ecs::observer::{Event, EventKind};
use crate::ecs::stage::{Command, ErasedValue};
use crate::ecs::storage::TableId;
use crate::ecs::{Entity, Id, World};
use tracing::{debug, debug_span, trace, warn};

impl World {
    /// Apply every queued command, then bring queries and table storage up
    /// to date.
    pub fn merge(&mut self) {
        let span = debug_span!("flush", merge = self.merges + 1);
        let _enter = span.enter();

        let queued = self.pending_commands();
        self.flush_queues();
        self.merges += 1;
        self.counters.increment("merges", 1);
        self.sync_queries();
        let reclaimed = if self.config.delete_empty_tables {
            self.reclaim_empty_tables()
        } else {
            0
        };
        debug!(queued, reclaimed, tables = self.graph.len(), "merged stages");
    }

    /// Drain and apply stage queues until they stay empty.
    pub(crate) fn flush_queues(&mut self) {
        self.unstock_stages();
        self.defer_depth += 1;
        loop {
            let mut batch = std::mem::take(&mut self.spare);
            for stage in &mut self.stages {
                stage.drain_into(&mut batch);
            }
            if batch.is_empty() {
                self.spare = batch;
                break;
            }
            self.apply_all(&mut batch);
            self.spare = batch;
        }
        self.defer_depth -= 1;
    }

    fn apply_all(&mut self, batch: &mut Vec<Command>) {
        let mut commands = batch.drain(..).peekable();
        while let Some(command) = commands.next() {
            let name = command.name();
            let (count, result) = match command.batch_entity() {
                Some(entity) => {
                    let mut group = vec![command];
                    while let Some(next) = commands.next_if(|c| c.batch_entity() == Some(entity)) {
                        group.push(next);
                    }
                    (group.len() as u64, self.apply_batch(entity, group))
                }
                None => (1, self.apply_command(command)),
            };
            match result {
                Ok(()) => {
                    trace!(command = name, count, "applied command");
                    self.counters.increment("commands_applied", count);
                }
                Err(err) => {
                    warn!(command = name, count, %err, "discarding command");
                    self.counters.increment("commands_discarded", count);
                }
            }
        }
    }

    /// Apply one command immediately.
    pub(crate) fn apply_command(&mut self, command: Command) -> EcsResult<()> {
        if let Some(entity) = command.batch_entity() {
            return self.apply_batch(entity, vec![command]);
        }
        match command {
            Command::New { entity } => self.apply_new(entity),
            Command::Clear { entity } => self.commit(entity, TableId::ROOT).map(drop),
            Command::Delete { entity } => self.delete_now(entity),
            Command::SetName { entity, name } => self.set_name_now(entity, name),
            Command::Clone { src, dst, copy } => {
                self.apply_new(dst)?;
                self.clone_into(src, dst, copy)
            }
            Command::DeleteWith { id } => self.delete_with_now(id),
            Command::RemoveAll { id } => self.remove_all_now(id),
            Command::Add { .. } | Command::Remove { .. } | Command::Set { .. } | Command::Modified { .. } => Ok(()),
        }
    }

    /// Fold consecutive changes to one entity into a single table move.
    ///
    /// Invalid commands in the batch are skipped; the first error is
    /// returned after the valid ones are applied.
    fn apply_batch(&mut self, entity: Entity, batch: Vec<Command>) -> EcsResult<()> {
        let record = self.entities.record(entity)?;
        let mut rejected: Option<EcsError> = None;
        let mut table = record.table;
        let mut values: Vec<(Id, ErasedValue)> = Vec::new();
        let mut modified: Vec<Id> = Vec::new();

        for command in batch {
            match command {
                Command::Add { id, .. } => match self.check_id(id) {
                    Ok(()) => table = self.destination(table, id, true)?,
                    Err(err) => {
                        rejected.get_or_insert(err);
                    }
                },
                Command::Remove { id, .. } => {
                    table = self.destination(table, id, false)?;
                    values.retain(|(v, _)| *v != id && !v.matches(id));
                }
                Command::Set { id, value, .. } => match self.check_id(id) {
                    Ok(()) => {
                        table = self.destination(table, id, true)?;
                        values.retain(|(v, _)| *v != id);
                        values.push((id, value));
                    }
                    Err(err) => {
                        rejected.get_or_insert(err);
                    }
                },
                Command::Modified { id, .. } => modified.push(id),
                _ => {}
            }
        }

        let row = self.commit(entity, table)?;
        let mut written: Vec<Id> = Vec::with_capacity(values.len() + modified.len());
        if !values.is_empty() {
            let storage = self.graph.table_mut(table)?;
            for (id, value) in values {
                let Some(column) = storage.column_index(id) else {
                    continue;
                };
                value.write_into(storage.column_mut(column), row as usize);
                written.push(id);
            }
        }
        if !modified.is_empty() {
            let storage = self.graph.table(table)?;
            written.extend(modified.into_iter().filter(|id| storage.ty().contains(*id)));
        }
        if !written.is_empty() {
            self.graph.table_mut(table)?.touch();
            for id in written {
                self.emit(Event {
                    kind: EventKind::OnSet,
                    entity,
                    id,
                    table: Some(table),
                    row,
                });
            }
        }
        trace!(%entity, table = %table, "applied batch");
        match rejected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::define_component;
    use crate::ecs::{EventKind, ObserverDesc, World};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Health(u32);
    define_component!(Health);

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Armor(u32);
    define_component!(Armor);

    #[test]
    fn batched_commands_report_net_changes() {
        let mut world = World::new();
        world.component::<Health>().unwrap();
        let armor = world.component::<Armor>().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        world
            .observer(ObserverDesc::new(
                armor,
                &[EventKind::OnAdd, EventKind::OnRemove, EventKind::OnSet],
                move |_, event| log.lock().unwrap().push(event.kind),
            ))
            .unwrap();
        let e = world.new_entity();

        world.defer_begin();
        world.set(e, Health(10)).unwrap();
        world.set(e, Armor(3)).unwrap();
        world.remove::<Armor>(e).unwrap();
        world.set(e, Health(12)).unwrap();
        assert!(world.get::<Health>(e).is_none());
        world.defer_end();

        assert_eq!(world.get::<Health>(e), Some(&Health(12)));
        assert!(!world.has::<Armor>(e));
        // Armor was added and removed within one batch: no net change.
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn commands_for_deleted_entity_are_discarded() {
        let mut world = World::new();
        let e = world.new_entity();
        world.defer_begin();
        world.delete(e).unwrap();
        world.set(e, Health(1)).unwrap();
        world.defer_end();
        assert!(!world.is_alive(e));
        assert_eq!(world.pending_commands(), 0);
    }

    #[test]
    fn observer_commands_are_flushed() {
        let mut world = World::new();
        let health = world.component::<Health>().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        world
            .observer(ObserverDesc::new(health, &[EventKind::OnSet], move |world, event| {
                log.lock().unwrap().push(event.entity);
                world.add::<Armor>(event.entity).unwrap();
            }))
            .unwrap();

        let e = world.new_entity();
        world.set(e, Health(5)).unwrap();
        assert!(world.has::<Armor>(e));
        assert_eq!(*seen.lock().unwrap(), vec![e]);
    }

    #[test]
    fn suspended_defer_applies_immediately() {
        let mut world = World::new();
        let e = world.new_entity();
        world.defer_begin();
        world.defer_suspend();
        world.set(e, Health(3)).unwrap();
        world.defer_resume();
        assert_eq!(world.get::<Health>(e), Some(&Health(3)));
        world.defer_end();
    }

    #[test]
    fn readonly_rejects_direct_changes() {
        let mut world = World::new();
        let e = world.new_entity();
        world.component::<Health>().unwrap();
        world.readonly_begin();
        assert!(matches!(
            world.set(e, Health(1)),
            Err(crate::ecs::EcsError::ReadonlyViolation { .. })
        ));
        world.commands().set(e, Health(2)).unwrap();
        world.readonly_end();
        assert_eq!(world.get::<Health>(e), Some(&Health(2)));
    }
}
