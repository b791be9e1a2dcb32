//! Emptiness-partitioned cache of tables.
//!
//! Each id record and each cached query keeps one of these. Entries live in
//! a slab and are threaded onto one of two intrusive doubly-linked lists
//! (non-empty / empty) by slab index, so moving a table between lists is
//! O(1) and growing the slab never invalidates a link. An auxiliary map
//! from table id to slab index gives O(1) lookup.

use crate::ecs::storage::TableId;
use std::collections::HashMap;

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheList {
    NonEmpty,
    Empty,
    All,
}

#[derive(Clone, Copy, Debug, Default)]
struct List {
    head: u32,
    tail: u32,
    len: usize,
}

impl List {
    const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

#[derive(Debug)]
struct Entry<T> {
    table: TableId,
    empty: bool,
    prev: u32,
    next: u32,
    payload: T,
}

#[derive(Debug)]
pub(crate) struct TableCache<T> {
    index: HashMap<TableId, u32>,
    slab: Vec<Option<Entry<T>>>,
    free: Vec<u32>,
    non_empty: List,
    empty: List,
}

impl<T> Default for TableCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TableCache<T> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            non_empty: List::new(),
            empty: List::new(),
        }
    }

    /// Total number of tables, empty or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn non_empty_count(&self) -> usize {
        self.non_empty.len
    }

    #[inline]
    pub fn empty_count(&self) -> usize {
        self.empty.len
    }

    #[inline]
    pub fn contains(&self, table: TableId) -> bool {
        self.index.contains_key(&table)
    }

    fn entry(&self, slot: u32) -> &Entry<T> {
        self.slab[slot as usize]
            .as_ref()
            .expect("table cache link points at a free slot")
    }

    fn entry_mut(&mut self, slot: u32) -> &mut Entry<T> {
        self.slab[slot as usize]
            .as_mut()
            .expect("table cache link points at a free slot")
    }

    fn list_mut(&mut self, empty: bool) -> &mut List {
        if empty {
            &mut self.empty
        } else {
            &mut self.non_empty
        }
    }

    fn link_tail(&mut self, slot: u32, empty: bool) {
        let tail = self.list_mut(empty).tail;
        {
            let entry = self.entry_mut(slot);
            entry.empty = empty;
            entry.prev = tail;
            entry.next = NIL;
        }
        if tail != NIL {
            self.entry_mut(tail).next = slot;
        }
        let list = self.list_mut(empty);
        if list.head == NIL {
            list.head = slot;
        }
        list.tail = slot;
        list.len += 1;
    }

    fn unlink(&mut self, slot: u32) {
        let (prev, next, empty) = {
            let entry = self.entry(slot);
            (entry.prev, entry.next, entry.empty)
        };
        if prev != NIL {
            self.entry_mut(prev).next = next;
        }
        if next != NIL {
            self.entry_mut(next).prev = prev;
        }
        let list = self.list_mut(empty);
        if list.head == slot {
            list.head = next;
        }
        if list.tail == slot {
            list.tail = prev;
        }
        list.len -= 1;
    }

    /// Add a table. Returns `false` (and leaves the cache untouched) if the
    /// table is already present.
    pub fn insert(&mut self, table: TableId, empty: bool, payload: T) -> bool {
        if self.index.contains_key(&table) {
            return false;
        }
        let entry = Entry {
            table,
            empty,
            prev: NIL,
            next: NIL,
            payload,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slab[slot as usize] = Some(entry);
                slot
            }
            None => {
                self.slab.push(Some(entry));
                (self.slab.len() - 1) as u32
            }
        };
        self.link_tail(slot, empty);
        self.index.insert(table, slot);
        true
    }

    pub fn remove(&mut self, table: TableId) -> Option<T> {
        let slot = self.index.remove(&table)?;
        self.unlink(slot);
        self.free.push(slot);
        self.slab[slot as usize].take().map(|entry| entry.payload)
    }

    /// Move a table between the empty and non-empty lists. Returns whether
    /// anything changed.
    pub fn set_empty(&mut self, table: TableId, empty: bool) -> bool {
        let Some(&slot) = self.index.get(&table) else {
            return false;
        };
        if self.entry(slot).empty == empty {
            return false;
        }
        self.unlink(slot);
        self.link_tail(slot, empty);
        true
    }

    pub fn is_table_empty(&self, table: TableId) -> Option<bool> {
        self.index.get(&table).map(|&slot| self.entry(slot).empty)
    }

    pub fn get(&self, table: TableId) -> Option<&T> {
        self.index.get(&table).map(|&slot| &self.entry(slot).payload)
    }

    pub fn get_mut(&mut self, table: TableId) -> Option<&mut T> {
        let slot = *self.index.get(&table)?;
        Some(&mut self.entry_mut(slot).payload)
    }

    /// Iterate tables in list order.
    pub fn iter(&self, which: CacheList) -> CacheIter<'_, T> {
        let (cursor, then) = match which {
            CacheList::NonEmpty => (self.non_empty.head, NIL),
            CacheList::Empty => (self.empty.head, NIL),
            CacheList::All => (self.non_empty.head, self.empty.head),
        };
        CacheIter {
            cache: self,
            cursor,
            then,
        }
    }

    /// Table ids in list order.
    pub fn tables(&self, which: CacheList) -> Vec<TableId> {
        self.iter(which).map(|(table, _)| table).collect()
    }
}

pub(crate) struct CacheIter<'a, T> {
    cache: &'a TableCache<T>,
    cursor: u32,
    then: u32,
}

impl<'a, T> Iterator for CacheIter<'a, T> {
    type Item = (TableId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            if self.then == NIL {
                return None;
            }
            self.cursor = std::mem::replace(&mut self.then, NIL);
        }
        let entry = self.cache.entry(self.cursor);
        self.cursor = entry.next;
        Some((entry.table, &entry.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(i: u32) -> TableId {
        TableId::from_raw(i)
    }

    #[test]
    fn partitions_by_emptiness() {
        let mut cache = TableCache::new();
        assert!(cache.insert(t(1), false, 'a'));
        assert!(cache.insert(t(2), true, 'b'));
        assert!(cache.insert(t(3), false, 'c'));
        assert!(!cache.insert(t(3), false, 'x'));

        assert_eq!(cache.tables(CacheList::NonEmpty), vec![t(1), t(3)]);
        assert_eq!(cache.tables(CacheList::Empty), vec![t(2)]);
        assert_eq!(cache.tables(CacheList::All), vec![t(1), t(3), t(2)]);
        assert_eq!(cache.get(t(3)), Some(&'c'));
    }

    #[test]
    fn set_empty_moves_between_lists() {
        let mut cache = TableCache::new();
        cache.insert(t(1), false, ());
        cache.insert(t(2), false, ());
        cache.insert(t(3), false, ());

        assert!(cache.set_empty(t(2), true));
        assert!(!cache.set_empty(t(2), true));
        assert_eq!(cache.tables(CacheList::NonEmpty), vec![t(1), t(3)]);
        assert_eq!(cache.tables(CacheList::Empty), vec![t(2)]);
        assert_eq!(cache.is_table_empty(t(2)), Some(true));

        assert!(cache.set_empty(t(2), false));
        assert_eq!(cache.tables(CacheList::NonEmpty), vec![t(1), t(3), t(2)]);
        assert_eq!(cache.empty_count(), 0);
        assert_eq!(cache.non_empty_count(), 3);
    }

    #[test]
    fn remove_relinks_neighbours_and_reuses_slots() {
        let mut cache = TableCache::new();
        for i in 1..=4 {
            cache.insert(t(i), false, i);
        }
        assert_eq!(cache.remove(t(1)), Some(1));
        assert_eq!(cache.remove(t(4)), Some(4));
        assert_eq!(cache.remove(t(4)), None);
        assert_eq!(cache.tables(CacheList::All), vec![t(2), t(3)]);

        cache.insert(t(9), true, 9);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.tables(CacheList::All), vec![t(2), t(3), t(9)]);
        *cache.get_mut(t(9)).unwrap() = 10;
        assert_eq!(cache.remove(t(9)), Some(10));
        assert!(cache.iter(CacheList::Empty).next().is_none());
    }
}
