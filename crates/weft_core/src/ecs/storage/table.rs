// table.rs - Columnar storage for one Type
//
// Every entity whose id set equals the table's Type lives in one row of the
// table. Data ids get a column each; tags only appear in the Type. Rows are
// kept dense with swap-remove, so the caller must fix up the record of the
// entity that moved into the vacated row.

use super::column::Column;
use crate::ecs::archetype::Type;
use crate::ecs::component::ComponentRegistry;
use crate::ecs::id_record::IdRecordId;
use crate::ecs::poly::ObjectId;
use crate::ecs::{Entity, Id};
use std::collections::HashMap;
use std::fmt;

/// Handle of a table. The slot of a deleted table is reused by the next
/// table created, so a handle is only meaningful while its table exists.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TableId(u32);

impl TableId {
    /// The table of entities with no ids.
    pub const ROOT: TableId = TableId(0);

    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Cached neighbours reachable by adding or removing a single id.
#[derive(Default, Debug)]
pub(crate) struct Edges {
    pub add: HashMap<Id, TableId>,
    pub remove: HashMap<Id, TableId>,
}

pub struct Table {
    id: TableId,
    ty: Type,
    columns: Vec<Column>,
    /// Id stored in each column.
    column_ids: Vec<Id>,
    /// Column of each type index, `None` for tags.
    column_map: Vec<Option<u16>>,
    entities: Vec<Entity>,
    pub(crate) edges: Edges,
    /// Id records this table is registered with, concrete and wildcard.
    pub(crate) records: Vec<(Id, IdRecordId)>,
    /// Cached queries holding this table.
    pub(crate) queries: Vec<ObjectId>,
    /// Bumped whenever rows move or values are written through the world.
    version: u64,
    /// Consecutive merge points this table has been empty for.
    pub(crate) empty_merges: u32,
}

impl Table {
    pub(crate) fn new(id: TableId, ty: Type, registry: &ComponentRegistry, capacity: usize) -> Self {
        let mut columns = Vec::new();
        let mut column_ids = Vec::new();
        let mut column_map = Vec::with_capacity(ty.len());
        for &cid in ty.ids() {
            match registry.for_id(cid) {
                Some(info) => {
                    column_map.push(Some(columns.len() as u16));
                    columns.push(Column::new(info.clone(), capacity));
                    column_ids.push(cid);
                }
                None => column_map.push(None),
            }
        }
        Self {
            id,
            ty,
            columns,
            column_ids,
            column_map,
            entities: Vec::with_capacity(capacity),
            edges: Edges::default(),
            records: Vec::new(),
            queries: Vec::new(),
            version: 0,
            empty_merges: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> TableId {
        self.id
    }

    #[inline]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub(crate) fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column holding `id`, if it is a data id of this table.
    pub fn column_index(&self, id: Id) -> Option<usize> {
        let i = self.ty.index_of(id)?;
        self.column_map[i].map(usize::from)
    }

    /// Column of the id at type index `i`.
    #[inline]
    pub(crate) fn column_of_type_index(&self, i: usize) -> Option<usize> {
        self.column_map.get(i).copied().flatten().map(usize::from)
    }

    #[inline]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    #[inline]
    pub(crate) fn column_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    #[inline]
    pub(crate) fn column_id(&self, index: usize) -> Id {
        self.column_ids[index]
    }

    /// Append `entity` with default-constructed values. Returns its row.
    pub(crate) fn append(&mut self, entity: Entity) -> u32 {
        let row = self.entities.len() as u32;
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_default();
        }
        self.touch();
        row
    }

    /// Append `entity` whose values will be pushed column by column by the
    /// caller. Columns are out of sync until every one has been pushed.
    pub(crate) fn append_entity_only(&mut self, entity: Entity) -> u32 {
        let row = self.entities.len() as u32;
        self.entities.push(entity);
        self.touch();
        row
    }

    /// Destroy row `row`. Returns the entity that now occupies it, if any.
    pub(crate) fn delete_row(&mut self, row: u32) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove(row as usize);
        }
        self.remove_entity_slot(row)
    }

    /// Remove the entity slot of `row` after its values were moved out or
    /// destroyed column by column.
    pub(crate) fn remove_entity_slot(&mut self, row: u32) -> Option<Entity> {
        let row = row as usize;
        self.entities.swap_remove(row);
        self.touch();
        self.entities.get(row).copied()
    }

    /// Whether every column has one value per entity.
    pub(crate) fn columns_in_sync(&self) -> Result<(), usize> {
        match self.columns.iter().find(|c| c.len() != self.entities.len()) {
            Some(column) => Err(column.len()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("type", &self.ty)
            .field("rows", &self.entities.len())
            .finish()
    }
}
