// stats.rs - World statistics and consistency checks

use crate::ecs::error::{EcsResult, InvariantError};
use crate::ecs::poly::{ObjectKind, WorldObject};
use crate::ecs::table_cache::CacheList;
use crate::ecs::{Entity, World};

/// Snapshot of world size and activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub entities: usize,
    /// Highest entity index handed out; grows only when no freed id was
    /// available for reuse.
    pub max_entity_index: u32,
    pub recyclable_ids: usize,
    pub tables: usize,
    pub empty_tables: usize,
    pub id_records: usize,
    pub id_records_created: u64,
    pub id_records_released: u64,
    pub queries: usize,
    pub observers: usize,
    pub merges: u64,
    pub pending_commands: usize,
    /// Named counters; empty when metrics are compiled out.
    pub counters: Vec<(&'static str, u64)>,
}

impl WorldStats {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .find(|(n, _)| *n == name)
            .map_or(0, |(_, v)| *v)
    }
}

impl World {
    pub fn stats(&self) -> WorldStats {
        let (created, released) = self.ids.churn();
        WorldStats {
            entities: self.entities.len(),
            max_entity_index: self.entities.max_index(),
            recyclable_ids: self.entities.recyclable(),
            tables: self.graph.len(),
            empty_tables: self.graph.iter().filter(|t| t.is_empty()).count(),
            id_records: self.ids.len(),
            id_records_created: created,
            id_records_released: released,
            queries: self.objects.count(ObjectKind::Query),
            observers: self.objects.count(ObjectKind::Observer),
            merges: self.merges,
            pending_commands: self.pending_commands(),
            counters: self.counters.snapshot(),
        }
    }

    /// Walk every record, table, edge and query cache and report the first
    /// broken link.
    pub fn check_integrity(&self) -> EcsResult<()> {
        self.check_records()?;
        self.check_tables()?;
        self.check_queries()?;
        Ok(())
    }

    fn check_records(&self) -> Result<(), InvariantError> {
        for entity in self.entities.iter() {
            let Some(record) = self.entities.get(entity) else {
                continue;
            };
            let table = self
                .graph
                .get(record.table)
                .ok_or(InvariantError::MissingTable {
                    table: record.table.raw(),
                })?;
            let found = table.entities().get(record.row as usize).copied();
            if found != Some(entity) {
                return Err(InvariantError::RecordMismatch {
                    entity,
                    table: record.table.raw(),
                    row: record.row,
                    found: found.unwrap_or(Entity::NULL),
                });
            }
        }
        Ok(())
    }

    fn check_tables(&self) -> Result<(), InvariantError> {
        for table in self.graph.iter() {
            let tid = table.id();
            if let Err(columns) = table.columns_in_sync() {
                return Err(InvariantError::ColumnLength {
                    table: tid.raw(),
                    columns,
                    entities: table.len(),
                });
            }
            for (row, &entity) in table.entities().iter().enumerate() {
                let record = self.entities.get(entity);
                if record.map(|r| (r.table, r.row)) != Some((tid, row as u32)) {
                    return Err(InvariantError::RecordMismatch {
                        entity,
                        table: tid.raw(),
                        row: row as u32,
                        found: entity,
                    });
                }
            }
            for &id in table.ty().ids() {
                if self.ids.table_record(id, tid).is_none() {
                    return Err(InvariantError::MissingCacheEntry { table: tid.raw(), id });
                }
            }
            for &(id, rid) in &table.records {
                let record = self
                    .ids
                    .record(rid)
                    .ok_or(InvariantError::MissingCacheEntry { table: tid.raw(), id })?;
                match record.cache.is_table_empty(tid) {
                    None => return Err(InvariantError::MissingCacheEntry { table: tid.raw(), id }),
                    Some(empty) if empty != table.is_empty() => {
                        return Err(InvariantError::WrongEmptiness { table: tid.raw(), id })
                    }
                    Some(_) => {}
                }
            }
            for (&id, &to) in &table.edges.add {
                let ok = self
                    .graph
                    .get(to)
                    .is_some_and(|dst| table.ty().with(id).as_ref() == Some(dst.ty()));
                if !ok {
                    return Err(InvariantError::BrokenEdge {
                        from: tid.raw(),
                        to: to.raw(),
                        id,
                    });
                }
            }
            for (&id, &to) in &table.edges.remove {
                let ok = self
                    .graph
                    .get(to)
                    .is_some_and(|dst| table.ty().without(id).as_ref() == Some(dst.ty()));
                if !ok {
                    return Err(InvariantError::BrokenEdge {
                        from: tid.raw(),
                        to: to.raw(),
                        id,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_queries(&self) -> Result<(), InvariantError> {
        for (oid, object) in self.objects.iter() {
            let Some(query) = object.as_query().and_then(|q| q.cached()) else {
                continue;
            };
            for tid in query.cache.tables(CacheList::All) {
                let live = self
                    .graph
                    .get(tid)
                    .is_some_and(|t| t.queries.contains(&oid));
                if !live {
                    return Err(InvariantError::StaleQueryTable {
                        query: oid.raw(),
                        table: tid.raw(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::EcsError;

    #[test]
    fn fresh_world_is_consistent() {
        let world = World::new();
        world.check_integrity().unwrap();
        let stats = world.stats();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.tables, 1);
        assert_eq!(stats.queries, 0);
    }

    #[test]
    fn corrupted_record_is_reported() {
        let mut world = World::new();
        let a = world.new_entity();
        let b = world.new_entity();
        world.entities.get_mut(a).unwrap().row = world.entities.get(b).unwrap().row;
        let err = world.check_integrity().unwrap_err();
        assert!(matches!(err, EcsError::Internal(InvariantError::RecordMismatch { .. })));
    }

    #[test]
    fn stats_track_tables() {
        let mut world = World::new();
        let tag = world.new_entity();
        let e = world.new_entity();
        world.add_id(e, tag).unwrap();
        let stats = world.stats();
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.empty_tables, 0);
        assert!(stats.id_records >= 2);
        assert!(stats.counter("tables_created") <= 1);
    }
}
