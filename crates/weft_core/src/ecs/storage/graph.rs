// graph.rs - Table graph with lazily cached add/remove edges
//
// Tables are found by Type hash. Moving between two tables that differ by a
// single id goes through an edge cached on both ends the first time the
// transition is taken, so steady-state transitions skip the hash lookup.
// Slots of deleted tables are reused, so the table list is bounded by the
// number of tables alive at once.

use super::table::{Table, TableId};
use crate::ecs::archetype::Type;
use crate::ecs::component::ComponentRegistry;
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::error::{invariant, EcsError, EcsResult, InvariantError};
use crate::ecs::{Entity, Id};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Result of following an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Traversal {
    pub table: TableId,
    /// The destination did not exist before this call.
    pub created: bool,
}

/// Bookkeeping produced by a row move or deletion.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RowChange {
    pub row: u32,
    /// The source table lost its last entity.
    pub src_emptied: bool,
    /// The destination table received its first entity.
    pub dst_filled: bool,
    /// An entity watched by a query changed table.
    pub observed_moved: bool,
}

pub struct TableGraph {
    tables: Vec<Option<Table>>,
    /// Slots of deleted tables, reused before the list grows.
    free: Vec<TableId>,
    by_type: HashMap<Type, TableId>,
    column_capacity: usize,
    live: usize,
}

impl TableGraph {
    pub(crate) fn new(registry: &ComponentRegistry, column_capacity: usize) -> Self {
        let root = Table::new(TableId::ROOT, Type::empty(), registry, column_capacity);
        let mut by_type = HashMap::new();
        by_type.insert(Type::empty(), TableId::ROOT);
        Self {
            tables: vec![Some(root)],
            free: Vec::new(),
            by_type,
            column_capacity,
            live: 1,
        }
    }

    /// Number of live tables, root included.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Table slots allocated, live or waiting for reuse.
    pub fn slots(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(crate) fn table(&self, id: TableId) -> EcsResult<&Table> {
        self.get(id).ok_or_else(|| missing_table(id))
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> EcsResult<&mut Table> {
        self.get_mut(id).ok_or_else(|| missing_table(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter_map(Option::as_ref)
    }

    pub fn ids(&self) -> impl Iterator<Item = TableId> + '_ {
        self.iter().map(Table::id)
    }

    pub fn find(&self, ty: &Type) -> Option<TableId> {
        self.by_type.get(ty).copied()
    }

    /// Look a table up by Type, creating it when absent.
    pub(crate) fn find_or_create(&mut self, ty: Type, registry: &ComponentRegistry) -> Traversal {
        if let Some(&table) = self.by_type.get(&ty) {
            return Traversal {
                table,
                created: false,
            };
        }
        let id = self
            .free
            .pop()
            .unwrap_or_else(|| TableId::from_raw(self.tables.len() as u32));
        debug!(table = %id, ty = ?ty, "creating table");
        self.by_type.insert(ty.clone(), id);
        let table = Some(Table::new(id, ty, registry, self.column_capacity));
        match self.tables.get_mut(id.index()) {
            Some(slot) => *slot = table,
            None => self.tables.push(table),
        }
        self.live += 1;
        Traversal {
            table: id,
            created: true,
        }
    }

    /// Table reached from `from` by adding `id`.
    pub(crate) fn traverse_add(
        &mut self,
        from: TableId,
        id: Id,
        registry: &ComponentRegistry,
    ) -> EcsResult<Traversal> {
        let src = self.table(from)?;
        if let Some(&table) = src.edges.add.get(&id) {
            return Ok(Traversal {
                table,
                created: false,
            });
        }
        let Some(ty) = src.ty().with(id) else {
            return Ok(Traversal {
                table: from,
                created: false,
            });
        };
        let traversal = self.find_or_create(ty, registry);
        self.link(from, traversal.table, id);
        Ok(traversal)
    }

    /// Table reached from `from` by removing `id`.
    pub(crate) fn traverse_remove(
        &mut self,
        from: TableId,
        id: Id,
        registry: &ComponentRegistry,
    ) -> EcsResult<Traversal> {
        let src = self.table(from)?;
        if let Some(&table) = src.edges.remove.get(&id) {
            return Ok(Traversal {
                table,
                created: false,
            });
        }
        let Some(ty) = src.ty().without(id) else {
            return Ok(Traversal {
                table: from,
                created: false,
            });
        };
        let traversal = self.find_or_create(ty, registry);
        self.link(traversal.table, from, id);
        Ok(traversal)
    }

    /// Cache `smaller --add id--> larger` and its reverse.
    fn link(&mut self, smaller: TableId, larger: TableId, id: Id) {
        if let Some(t) = self.get_mut(smaller) {
            t.edges.add.insert(id, larger);
        }
        if let Some(t) = self.get_mut(larger) {
            t.edges.remove.insert(id, smaller);
        }
    }

    /// Mutable access to two distinct tables at once.
    pub(crate) fn pair_mut(&mut self, a: TableId, b: TableId) -> EcsResult<(&mut Table, &mut Table)> {
        invariant!(a != b, "pair_mut called with the same table {a} twice");
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (left, right) = self.tables.split_at_mut(hi.index());
        let lo_table = left
            .get_mut(lo.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| missing_table(lo))?;
        let hi_table = right
            .first_mut()
            .and_then(Option::as_mut)
            .ok_or_else(|| missing_table(hi))?;
        if a < b {
            Ok((lo_table, hi_table))
        } else {
            Ok((hi_table, lo_table))
        }
    }

    /// Move `entity` to table `to`. Shared columns are moved, new columns
    /// default-constructed and dropped columns destroyed.
    pub(crate) fn move_entity(
        &mut self,
        index: &mut EntityIndex,
        entity: Entity,
        to: TableId,
    ) -> EcsResult<RowChange> {
        let record = index.record(entity)?;
        let from = record.table;
        if from == to {
            return Ok(RowChange {
                row: record.row,
                ..RowChange::default()
            });
        }
        let row = record.row as usize;
        let (src, dst) = self.pair_mut(from, to)?;
        let dst_was_empty = dst.is_empty();

        let new_row = dst.append_entity_only(entity);
        for j in 0..dst.column_count() {
            let id = dst.column_id(j);
            match src.column_index(id) {
                Some(i) => {
                    let ptr = src.column_mut(i).ptr_mut(row);
                    // SAFETY: same id means same type info; the source slot
                    // is forgotten below without running its destructor.
                    unsafe { dst.column_mut(j).push_moved(ptr) };
                }
                None => dst.column_mut(j).push_default(),
            }
        }
        for i in 0..src.column_count() {
            let id = src.column_id(i);
            if dst.column_index(id).is_some() {
                src.column_mut(i).swap_remove_forget(row);
            } else {
                src.column_mut(i).swap_remove(row);
            }
        }
        let displaced = src.remove_entity_slot(record.row);
        let src_emptied = src.is_empty();

        let mut observed_moved = record.observed;
        if let Some(rec) = index.get_mut(entity) {
            rec.table = to;
            rec.row = new_row;
        }
        if let Some(moved) = displaced {
            if let Some(rec) = index.get_mut(moved) {
                rec.row = record.row;
            }
        }
        if let Some(rec) = index.get(entity) {
            observed_moved |= rec.observed;
        }
        trace!(%entity, %from, %to, row = new_row, "moved entity");
        Ok(RowChange {
            row: new_row,
            src_emptied,
            dst_filled: dst_was_empty,
            observed_moved,
        })
    }

    /// Place a freshly created entity (record at root row 0) in `to`.
    pub(crate) fn place_new(
        &mut self,
        index: &mut EntityIndex,
        entity: Entity,
        to: TableId,
    ) -> EcsResult<RowChange> {
        let table = self.table_mut(to)?;
        let was_empty = table.is_empty();
        let row = table.append(entity);
        if let Some(rec) = index.get_mut(entity) {
            rec.table = to;
            rec.row = row;
        }
        Ok(RowChange {
            row,
            dst_filled: was_empty,
            ..RowChange::default()
        })
    }

    /// Destroy `entity`'s row. The entity stays alive in the index; the
    /// caller removes it.
    pub(crate) fn delete_entity_row(&mut self, index: &mut EntityIndex, entity: Entity) -> EcsResult<RowChange> {
        let record = index.record(entity)?;
        let table = self.table_mut(record.table)?;
        let displaced = table.delete_row(record.row);
        let src_emptied = table.is_empty();
        if let Some(moved) = displaced {
            if let Some(rec) = index.get_mut(moved) {
                rec.row = record.row;
            }
        }
        Ok(RowChange {
            row: record.row,
            src_emptied,
            observed_moved: record.observed,
            ..RowChange::default()
        })
    }

    /// Temporarily take a table out of the graph for exclusive access.
    pub(crate) fn take(&mut self, id: TableId) -> Option<Table> {
        self.tables.get_mut(id.index()).and_then(Option::take)
    }

    pub(crate) fn put_back(&mut self, table: Table) {
        let slot = &mut self.tables[table.id().index()];
        invariant!(slot.is_none(), "table {} put back twice", table.id());
        *slot = Some(table);
    }

    /// Remove a table from the graph, unlinking the edges that point at it.
    pub(crate) fn remove(&mut self, id: TableId) -> Option<Table> {
        if id == TableId::ROOT {
            return None;
        }
        let table = self.tables.get_mut(id.index()).and_then(Option::take)?;
        for (&edge_id, &larger) in &table.edges.add {
            if let Some(t) = self.get_mut(larger) {
                if t.edges.remove.get(&edge_id) == Some(&id) {
                    t.edges.remove.remove(&edge_id);
                }
            }
        }
        for (&edge_id, &smaller) in &table.edges.remove {
            if let Some(t) = self.get_mut(smaller) {
                if t.edges.add.get(&edge_id) == Some(&id) {
                    t.edges.add.remove(&edge_id);
                }
            }
        }
        self.by_type.remove(table.ty());
        self.free.push(id);
        self.live -= 1;
        debug!(table = %id, ty = ?table.ty(), "deleted table");
        Some(table)
    }
}

fn missing_table(id: TableId) -> EcsError {
    InvariantError::MissingTable { table: id.raw() }.into()
}
