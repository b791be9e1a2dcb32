// iter.rs - Per-table views handed to query callbacks
//
// A `TableIter` exposes one result: a slice of rows of one table plus the
// fields of the query for those rows. Fields on `$this` are column slices;
// fields on another source are a single value read from that entity.
//
// Mutable access is only granted while the world lends the table out
// exclusively (`World::run` / `World::par_run`). Column borrows are tracked
// per iterator so a column can't be handed out mutably twice.

use super::cache::{CachedQuery, QueryMatch};
use super::sort::SortedRun;
use super::term::InOut;
use crate::ecs::component::{Component, ComponentRegistry};
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::error::{ComponentError, EcsError, EcsResult};
use crate::ecs::stage::{Commands, Stage};
use crate::ecs::storage::{Column, Table, TableGraph, TableId};
use crate::ecs::table_cache::CacheList;
use crate::ecs::{Entity, Id};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// One unit of iteration, resolved against a query's cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PlanItem {
    /// `None` for queries whose terms all have fixed sources.
    pub table: Option<TableId>,
    /// Index into the table's match list (or the query's fixed list).
    pub matched: usize,
    pub offset: usize,
    pub count: usize,
}

impl PlanItem {
    fn from_run(run: &SortedRun) -> Self {
        Self {
            table: Some(run.table),
            matched: run.matched,
            offset: run.offset,
            count: run.count,
        }
    }
}

/// Build the iteration plan of a cached query.
///
/// `runs` are the sorted runs to follow for an ordered query.
pub(crate) fn plan(query: &CachedQuery, graph: &TableGraph, runs: Option<&[SortedRun]>) -> Vec<PlanItem> {
    if !query.has_this {
        return (0..query.fixed.len())
            .map(|matched| PlanItem {
                table: None,
                matched,
                offset: 0,
                count: 0,
            })
            .collect();
    }
    if let Some(runs) = runs {
        return runs.iter().map(PlanItem::from_run).collect();
    }
    let mut items = Vec::new();
    for (tid, matches) in query.cache.iter(CacheList::NonEmpty) {
        let Some(table) = graph.get(tid) else {
            continue;
        };
        for matched in 0..matches.len() {
            items.push(PlanItem {
                table: Some(tid),
                matched,
                offset: 0,
                count: table.len(),
            });
        }
    }
    items
}

/// Narrow a plan to the row holding `entity`.
pub(crate) fn restrict_to(items: &mut Vec<PlanItem>, entities: &EntityIndex, entity: Entity) {
    let Some(record) = entities.get(entity) else {
        items.clear();
        return;
    };
    let row = record.row as usize;
    items.retain_mut(|item| {
        if item.table != Some(record.table) || row < item.offset || row >= item.offset + item.count {
            return false;
        }
        item.offset = row;
        item.count = 1;
        true
    });
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Borrow {
    Free,
    Shared,
    Mut,
}

/// Storage a table iterator reads besides its own table.
#[derive(Clone, Copy)]
pub(crate) struct IterCtx<'w> {
    pub graph: &'w TableGraph,
    pub entities: &'w EntityIndex,
    pub components: &'w ComponentRegistry,
    pub stage: Option<&'w Stage>,
}

/// View of one query result.
pub struct TableIter<'w> {
    ctx: IterCtx<'w>,
    table: Option<NonNull<Table>>,
    exclusive: bool,
    matched: &'w QueryMatch,
    offset: usize,
    count: usize,
    borrows: RefCell<Vec<Borrow>>,
    _table: PhantomData<&'w Table>,
}

impl<'w> TableIter<'w> {
    /// Read-only view of a table that stays in the graph.
    pub(crate) fn shared(ctx: IterCtx<'w>, table: Option<&'w Table>, matched: &'w QueryMatch, item: PlanItem) -> Self {
        let columns = table.map_or(0, Table::column_count);
        Self {
            ctx,
            table: table.map(NonNull::from),
            exclusive: false,
            matched,
            offset: item.offset,
            count: item.count,
            borrows: RefCell::new(vec![Borrow::Free; columns]),
            _table: PhantomData,
        }
    }

    /// View of a table lent out of the graph for exclusive access.
    pub(crate) fn exclusive(ctx: IterCtx<'w>, table: &'w mut Table, matched: &'w QueryMatch, item: PlanItem) -> Self {
        let columns = table.column_count();
        Self {
            ctx,
            table: Some(NonNull::from(table)),
            exclusive: true,
            matched,
            offset: item.offset,
            count: item.count,
            borrows: RefCell::new(vec![Borrow::Free; columns]),
            _table: PhantomData,
        }
    }

    fn table_ref(&self) -> Option<&Table> {
        // SAFETY: the pointer comes from a reference valid for 'w; columns
        // are only mutated through views guarded by `borrows`.
        self.table.map(|t| unsafe { t.as_ref() })
    }

    /// Number of rows in this result.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn table_id(&self) -> Option<TableId> {
        self.table_ref().map(Table::id)
    }

    pub fn entities(&self) -> &[Entity] {
        match self.table_ref() {
            Some(table) => &table.entities()[self.offset..self.offset + self.count],
            None => &[],
        }
    }

    pub fn field_count(&self) -> usize {
        self.matched.ids.len()
    }

    /// Concrete id matched by field `i` (the term's pattern if unset).
    pub fn field_id(&self, i: usize) -> Id {
        self.matched.ids.get(i).copied().unwrap_or(Id::NULL)
    }

    /// Entity field `i` was matched on; `Entity::NULL` means the rows of
    /// this result.
    pub fn field_src(&self, i: usize) -> Entity {
        self.matched.sources.get(i).copied().unwrap_or(Entity::NULL)
    }

    /// Whether field `i` matched. Always true for `And` terms.
    pub fn is_set(&self, i: usize) -> bool {
        self.matched.set.get(i).copied().unwrap_or(false)
    }

    /// Declared access of field `i`.
    pub fn access(&self, i: usize) -> InOut {
        self.matched.access.get(i).copied().unwrap_or_default()
    }

    pub fn is_self(&self, i: usize) -> bool {
        self.field_src(i).is_null()
    }

    /// Whether any column was borrowed mutably.
    pub(crate) fn wrote(&self) -> bool {
        self.borrows.borrow().iter().any(|b| *b == Borrow::Mut)
    }

    /// Column and rows backing field `i`.
    fn locate(&self, i: usize) -> Option<(&Column, Option<usize>, usize, usize)> {
        if !self.is_set(i) {
            return None;
        }
        let src = self.field_src(i);
        if src.is_null() {
            let column = self.matched.columns.get(i).copied().flatten()?;
            let table = self.table_ref()?;
            return Some((table.column(column), Some(column), self.offset, self.count));
        }
        let record = self.ctx.entities.get(src)?;
        let own = self.table_ref().filter(|t| t.id() == record.table);
        let table = match own {
            Some(table) => table,
            None => self.ctx.graph.get(record.table)?,
        };
        let column = table.column_index(self.field_id(i))?;
        let tracked = own.map(|_| column);
        Some((table.column(column), tracked, record.row as usize, 1))
    }

    /// Read field `i` as a slice of `T`.
    ///
    /// Returns `None` if the field is unset, declared [`InOut::None`], has
    /// no data, holds another type, or is currently borrowed mutably.
    pub fn field<T: Component>(&self, i: usize) -> Option<&[T]> {
        if self.access(i) == InOut::None {
            return None;
        }
        let (column, tracked, offset, count) = self.locate(i)?;
        if !column.info().is_type::<T>() {
            return None;
        }
        if let Some(c) = tracked {
            let mut borrows = self.borrows.borrow_mut();
            match borrows[c] {
                Borrow::Mut => return None,
                _ => borrows[c] = Borrow::Shared,
            }
        }
        // SAFETY: type checked above; rows are in bounds; no mutable view
        // of this column exists.
        Some(unsafe { std::slice::from_raw_parts((column.base_ptr() as *const T).add(offset), count) })
    }

    /// Write access to a `$this` field.
    pub fn field_mut<T: Component>(&self, i: usize) -> EcsResult<&mut [T]> {
        if !self.exclusive {
            return Err(EcsError::ReadonlyViolation {
                op: "write a field of a shared query iterator",
            });
        }
        if !self.is_self(i) {
            return Err(EcsError::ReadonlyViolation {
                op: "write a field matched on another entity",
            });
        }
        if matches!(self.access(i), InOut::In | InOut::None) {
            return Err(EcsError::ReadonlyViolation {
                op: "write a field declared without write access",
            });
        }
        let id = self.field_id(i);
        let Some((column, Some(c), offset, count)) = self.locate(i) else {
            return Err(EcsError::component(id, ComponentError::NotAComponent));
        };
        if !column.info().is_type::<T>() {
            return Err(EcsError::component(id, ComponentError::TypeMismatch));
        }
        let mut borrows = self.borrows.borrow_mut();
        if borrows[c] != Borrow::Free {
            return Err(EcsError::ReadonlyViolation {
                op: "borrow a field mutably while it is borrowed",
            });
        }
        borrows[c] = Borrow::Mut;
        // SAFETY: the table was lent exclusively to this iterator and the
        // column is not borrowed elsewhere.
        Ok(unsafe { std::slice::from_raw_parts_mut((column.base_ptr() as *mut T).add(offset), count) })
    }

    /// Command buffer of the stage this result is processed on.
    pub fn commands(&self) -> EcsResult<Commands<'w>> {
        match self.ctx.stage {
            Some(stage) => Ok(Commands::new(stage, self.ctx.entities, self.ctx.components)),
            None => Err(EcsError::ReadonlyViolation {
                op: "queue commands from a shared query iterator",
            }),
        }
    }
}

/// Shared iteration over a cached query. See [`crate::ecs::World::query_iter`].
pub struct QueryIter<'w> {
    ctx: IterCtx<'w>,
    query: &'w CachedQuery,
    items: Vec<PlanItem>,
    pos: usize,
}

impl<'w> QueryIter<'w> {
    pub(crate) fn new(ctx: IterCtx<'w>, query: &'w CachedQuery, items: Vec<PlanItem>) -> Self {
        Self {
            ctx,
            query,
            items,
            pos: 0,
        }
    }

    /// Only yield the row of `entity`, if it matches.
    pub fn set_this(mut self, entity: Entity) -> Self {
        restrict_to(&mut self.items, self.ctx.entities, entity);
        self
    }

    /// Total number of rows left to yield.
    pub fn count_rows(&self) -> usize {
        self.items[self.pos..].iter().map(|i| i.count).sum()
    }
}

impl<'w> Iterator for QueryIter<'w> {
    type Item = TableIter<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(item) = self.items.get(self.pos).copied() {
            self.pos += 1;
            let (table, matched) = match item.table {
                Some(tid) => {
                    let Some(table) = self.ctx.graph.get(tid) else {
                        continue;
                    };
                    let Some(matched) = self.query.cache.get(tid).and_then(|m| m.get(item.matched)) else {
                        continue;
                    };
                    (Some(table), matched)
                }
                None => match self.query.fixed.get(item.matched) {
                    Some(matched) => (None, matched),
                    None => continue,
                },
            };
            return Some(TableIter::shared(self.ctx, table, matched, item));
        }
        None
    }
}
