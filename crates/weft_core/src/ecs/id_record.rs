//! Per-id index of the tables that contain an id.
//!
//! There is one [`IdRecord`] for every id in use, including the wildcard
//! forms `*`, `(R, *)`, `(*, T)` and `(*, *)`. A record owns a
//! [`TableCache`] listing the tables that hold a matching id. Concrete pairs
//! are also threaded onto two sibling lists hanging off their wildcard
//! parents, so all `(R, x)` for a given `R` (or all `(x, T)` for a given
//! `T`) can be walked without scanning every id.
//!
//! Records are reference counted: each table registration, each concrete
//! child pair and each query term holds one claim. The record is torn down
//! when the last claim is released.

use crate::ecs::storage::{Table, TableId};
use crate::ecs::table_cache::TableCache;
use crate::ecs::{Id, WILDCARD, WILDCARD_PAIR};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct IdRecordId(u32);

impl IdRecordId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where an id sits in one table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TableRecord {
    /// Type index of the first matching id.
    pub index: usize,
    /// Number of matching ids (above one only for wildcard records).
    pub count: usize,
    /// Column of the first matching id, if it stores data.
    pub column: Option<usize>,
}

#[derive(Clone, Copy, Default, Debug)]
struct Link {
    prev: Option<IdRecordId>,
    next: Option<IdRecordId>,
}

#[derive(Debug)]
pub(crate) struct IdRecord {
    id: Id,
    refcount: u32,
    pub cache: TableCache<TableRecord>,
    parent_first: Option<IdRecordId>,
    parent_second: Option<IdRecordId>,
    first_link: Link,
    second_link: Link,
    first_head: Option<IdRecordId>,
    second_head: Option<IdRecordId>,
}

impl IdRecord {
    fn new(id: Id) -> Self {
        Self {
            id,
            refcount: 0,
            cache: TableCache::new(),
            parent_first: None,
            parent_second: None,
            first_link: Link::default(),
            second_link: Link::default(),
            first_head: None,
            second_head: None,
        }
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

/// Which sibling list to walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    /// Children `(R, x)` of `(R, *)`.
    First,
    /// Children `(x, T)` of `(*, T)`.
    Second,
}

#[derive(Default)]
pub(crate) struct IdIndex {
    records: Vec<Option<IdRecord>>,
    free: Vec<u32>,
    by_id: HashMap<Id, IdRecordId>,
    created: u64,
    released: u64,
}

impl IdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[inline]
    pub fn get(&self, id: Id) -> Option<IdRecordId> {
        self.by_id.get(&id).copied()
    }

    #[inline]
    pub fn record(&self, rid: IdRecordId) -> Option<&IdRecord> {
        self.records.get(rid.index()).and_then(Option::as_ref)
    }

    #[inline]
    fn record_mut(&mut self, rid: IdRecordId) -> Option<&mut IdRecord> {
        self.records.get_mut(rid.index()).and_then(Option::as_mut)
    }

    /// Record for `id`, if it exists.
    pub fn lookup(&self, id: Id) -> Option<&IdRecord> {
        self.get(id).and_then(|rid| self.record(rid))
    }

    /// Records created and released over the lifetime of the index.
    pub fn churn(&self) -> (u64, u64) {
        (self.created, self.released)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdRecord> {
        self.records.iter().filter_map(Option::as_ref)
    }

    /// Find or create the record for `id`. A new concrete pair also creates
    /// and links into its `(R, *)` and `(*, T)` parents.
    ///
    /// The returned record is unclaimed; callers that keep it must `claim`.
    pub fn ensure(&mut self, id: Id) -> IdRecordId {
        if let Some(rid) = self.get(id) {
            return rid;
        }
        let rid = match self.free.pop() {
            Some(slot) => {
                self.records[slot as usize] = Some(IdRecord::new(id));
                IdRecordId(slot)
            }
            None => {
                self.records.push(Some(IdRecord::new(id)));
                IdRecordId(self.records.len() as u32 - 1)
            }
        };
        self.by_id.insert(id, rid);
        self.created += 1;

        if id.is_pair() && !id.is_wildcard() {
            let first = self.ensure(id.with_wildcard_second());
            self.claim(first);
            self.link(first, rid, Side::First);
            let second = self.ensure(id.with_wildcard_first());
            self.claim(second);
            self.link(second, rid, Side::Second);
            if let Some(rec) = self.record_mut(rid) {
                rec.parent_first = Some(first);
                rec.parent_second = Some(second);
            }
        }
        debug!(id = ?id, "created id record");
        rid
    }

    /// Find or create the record for `id` and claim it.
    pub fn ensure_claimed(&mut self, id: Id) -> IdRecordId {
        let rid = self.ensure(id);
        self.claim(rid);
        rid
    }

    pub fn claim(&mut self, rid: IdRecordId) {
        if let Some(rec) = self.record_mut(rid) {
            rec.refcount += 1;
        }
    }

    /// Drop one claim. Returns true if the record was torn down.
    pub fn release(&mut self, rid: IdRecordId) -> bool {
        let Some(rec) = self.record_mut(rid) else {
            return false;
        };
        rec.refcount = rec.refcount.saturating_sub(1);
        if rec.refcount > 0 {
            return false;
        }
        self.teardown(rid);
        true
    }

    fn teardown(&mut self, rid: IdRecordId) {
        let (id, parent_first, parent_second) = match self.record(rid) {
            Some(rec) => (rec.id, rec.parent_first, rec.parent_second),
            None => return,
        };
        if let Some(parent) = parent_first {
            self.unlink(parent, rid, Side::First);
        }
        if let Some(parent) = parent_second {
            self.unlink(parent, rid, Side::Second);
        }
        self.by_id.remove(&id);
        self.records[rid.index()] = None;
        self.free.push(rid.0);
        self.released += 1;
        debug!(id = ?id, "released id record");

        if let Some(parent) = parent_first {
            self.release(parent);
        }
        if let Some(parent) = parent_second {
            self.release(parent);
        }
    }

    fn links_mut(&mut self, rid: IdRecordId, side: Side) -> Option<&mut Link> {
        self.record_mut(rid).map(|rec| match side {
            Side::First => &mut rec.first_link,
            Side::Second => &mut rec.second_link,
        })
    }

    fn head_mut(&mut self, parent: IdRecordId, side: Side) -> Option<&mut Option<IdRecordId>> {
        self.record_mut(parent).map(|rec| match side {
            Side::First => &mut rec.first_head,
            Side::Second => &mut rec.second_head,
        })
    }

    /// Push `child` at the front of `parent`'s sibling list.
    fn link(&mut self, parent: IdRecordId, child: IdRecordId, side: Side) {
        let old_head = self.head_mut(parent, side).and_then(|head| head.replace(child));
        if let Some(link) = self.links_mut(child, side) {
            link.prev = None;
            link.next = old_head;
        }
        if let Some(next) = old_head {
            if let Some(link) = self.links_mut(next, side) {
                link.prev = Some(child);
            }
        }
    }

    fn unlink(&mut self, parent: IdRecordId, child: IdRecordId, side: Side) {
        let Some(&mut Link { prev, next }) = self.links_mut(child, side) else {
            return;
        };
        match prev {
            Some(prev) => {
                if let Some(link) = self.links_mut(prev, side) {
                    link.next = next;
                }
            }
            None => {
                if let Some(head) = self.head_mut(parent, side) {
                    *head = next;
                }
            }
        }
        if let Some(next) = next {
            if let Some(link) = self.links_mut(next, side) {
                link.prev = prev;
            }
        }
    }

    fn children(&self, parent: IdRecordId, side: Side) -> Vec<IdRecordId> {
        let mut out = Vec::new();
        let Some(rec) = self.record(parent) else {
            return out;
        };
        let mut cursor = match side {
            Side::First => rec.first_head,
            Side::Second => rec.second_head,
        };
        while let Some(rid) = cursor {
            out.push(rid);
            cursor = self.record(rid).and_then(|rec| match side {
                Side::First => rec.first_link.next,
                Side::Second => rec.second_link.next,
            });
        }
        out
    }

    /// Concrete pairs `(R, x)` linked under the `(R, *)` record.
    pub fn first_children(&self, parent: IdRecordId) -> Vec<IdRecordId> {
        self.children(parent, Side::First)
    }

    /// Concrete pairs `(x, T)` linked under the `(*, T)` record.
    pub fn second_children(&self, parent: IdRecordId) -> Vec<IdRecordId> {
        self.children(parent, Side::Second)
    }

    /// Concrete ids matching `pattern` that currently have a record.
    ///
    /// Pair wildcards are resolved through the sibling lists; only `(*, *)`
    /// and `*` fall back to scanning.
    pub fn matching_ids(&self, pattern: Id) -> Vec<Id> {
        if !pattern.is_wildcard() {
            return self.get(pattern).map(|_| vec![pattern]).unwrap_or_default();
        }
        let side = if pattern.is_pair() && pattern.first() != WILDCARD.index() {
            Some(Side::First)
        } else if pattern.is_pair() && pattern.second() != WILDCARD.index() {
            Some(Side::Second)
        } else {
            None
        };
        match side {
            Some(side) => match self.get(pattern) {
                Some(parent) => self
                    .children(parent, side)
                    .into_iter()
                    .filter_map(|rid| self.record(rid).map(IdRecord::id))
                    .collect(),
                None => Vec::new(),
            },
            None => {
                let mut ids: Vec<Id> = self
                    .by_id
                    .keys()
                    .copied()
                    .filter(|id| !id.is_wildcard() && id.matches(pattern))
                    .collect();
                ids.sort_unstable();
                ids
            }
        }
    }

    /// Add `table` to the record of every id in its type and of every
    /// wildcard those ids match.
    pub fn register_table(&mut self, table: &mut Table) {
        let empty = table.is_empty();
        let mut entries: Vec<(Id, TableRecord)> = Vec::with_capacity(table.ty().len() * 2);
        let mut wildcards: Vec<(Id, TableRecord)> = Vec::new();
        for (i, &id) in table.ty().ids().iter().enumerate() {
            entries.push((
                id,
                TableRecord {
                    index: i,
                    count: 1,
                    column: table.column_of_type_index(i),
                },
            ));
            if id.is_pair() {
                bump_wildcard(&mut wildcards, id.with_wildcard_second(), i);
                bump_wildcard(&mut wildcards, id.with_wildcard_first(), i);
                bump_wildcard(&mut wildcards, WILDCARD_PAIR, i);
            } else {
                bump_wildcard(&mut wildcards, WILDCARD.id(), i);
            }
        }
        entries.extend(wildcards);

        for (id, tr) in entries {
            let rid = self.ensure_claimed(id);
            if let Some(rec) = self.record_mut(rid) {
                rec.cache.insert(table.id(), empty, tr);
            }
            table.records.push((id, rid));
        }
    }

    /// Remove `table` from every record it was registered with.
    pub fn unregister_table(&mut self, table: &mut Table) {
        let records = std::mem::take(&mut table.records);
        for (_, rid) in records {
            if let Some(rec) = self.record_mut(rid) {
                rec.cache.remove(table.id());
            }
            self.release(rid);
        }
    }

    /// Move `table` between the empty and non-empty lists of its records.
    pub fn set_table_empty(&mut self, table: &Table, empty: bool) {
        for &(_, rid) in &table.records {
            if let Some(rec) = self.record_mut(rid) {
                rec.cache.set_empty(table.id(), empty);
            }
        }
    }

    /// Table record of `id` in `table`.
    pub fn table_record(&self, id: Id, table: TableId) -> Option<TableRecord> {
        self.lookup(id).and_then(|rec| rec.cache.get(table).copied())
    }
}

fn bump_wildcard(wildcards: &mut Vec<(Id, TableRecord)>, id: Id, index: usize) {
    match wildcards.iter_mut().find(|(w, _)| *w == id) {
        Some((_, tr)) => tr.count += 1,
        None => wildcards.push((
            id,
            TableRecord {
                index,
                count: 1,
                column: None,
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::archetype::Type;
    use crate::ecs::component::ComponentRegistry;
    use crate::ecs::table_cache::CacheList;
    use crate::ecs::Entity;

    fn e(i: u32) -> Entity {
        Entity::from_parts(i, 0)
    }

    #[test]
    fn concrete_pairs_link_under_both_wildcards() {
        let mut index = IdIndex::new();
        let likes = e(10);
        let ab = index.ensure_claimed(Id::pair(likes, e(20)));
        let ac = index.ensure_claimed(Id::pair(likes, e(21)));
        let hates_b = index.ensure_claimed(Id::pair(e(11), e(20)));

        let likes_any = index.get(Id::pair(likes, WILDCARD)).unwrap();
        let mut kids = index.first_children(likes_any);
        kids.sort();
        assert_eq!(kids, vec![ab, ac]);

        let any_b = index.get(Id::pair(WILDCARD, e(20))).unwrap();
        let mut kids = index.second_children(any_b);
        kids.sort();
        assert_eq!(kids, vec![ab, hates_b]);

        let ids = index.matching_ids(Id::pair(likes, WILDCARD));
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&Id::pair(likes, e(21))));
    }

    #[test]
    fn releasing_last_child_tears_down_parents() {
        let mut index = IdIndex::new();
        let pair = index.ensure_claimed(Id::pair(e(10), e(20)));
        assert_eq!(index.len(), 3);
        assert!(index.release(pair));
        assert_eq!(index.len(), 0);
        assert!(index.get(Id::pair(e(10), WILDCARD)).is_none());
    }

    #[test]
    fn unlink_from_middle_of_sibling_list() {
        let mut index = IdIndex::new();
        let rel = e(10);
        let a = index.ensure_claimed(Id::pair(rel, e(20)));
        let b = index.ensure_claimed(Id::pair(rel, e(21)));
        let c = index.ensure_claimed(Id::pair(rel, e(22)));
        index.release(b);
        let parent = index.get(Id::pair(rel, WILDCARD)).unwrap();
        let mut kids = index.first_children(parent);
        kids.sort();
        assert_eq!(kids, vec![a, c]);
    }

    #[test]
    fn tables_register_with_concrete_and_wildcard_records() {
        let registry = ComponentRegistry::new();
        let mut index = IdIndex::new();
        let rel = e(10);
        let ty = Type::from_ids(vec![e(5).id(), Id::pair(rel, e(20)), Id::pair(rel, e(21))]);
        let mut table = Table::new(TableId::from_raw(3), ty, &registry, 0);
        index.register_table(&mut table);

        let tr = index.table_record(Id::pair(rel, WILDCARD), table.id()).unwrap();
        assert_eq!((tr.index, tr.count), (1, 2));
        let tr = index.table_record(WILDCARD_PAIR, table.id()).unwrap();
        assert_eq!(tr.count, 2);
        let tr = index.table_record(WILDCARD.id(), table.id()).unwrap();
        assert_eq!((tr.index, tr.count), (0, 1));

        let rec = index.lookup(e(5).id()).unwrap();
        assert_eq!(rec.cache.tables(CacheList::Empty), vec![table.id()]);
        index.set_table_empty(&table, false);
        let rec = index.lookup(e(5).id()).unwrap();
        assert_eq!(rec.cache.tables(CacheList::NonEmpty), vec![table.id()]);

        index.unregister_table(&mut table);
        assert_eq!(index.len(), 0);
        assert!(table.records.is_empty());
    }
}
