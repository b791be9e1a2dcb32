// sort.rs - Sorted index for ordered queries
//
// An ordered query iterates runs of consecutive rows instead of whole
// tables. The runs are recomputed whenever cache membership changes or a
// matched table's version moved since the last build.

use super::cache::QueryMatch;
use crate::ecs::component::Component;
use crate::ecs::storage::{TableGraph, TableId};
use crate::ecs::table_cache::{CacheList, TableCache};
use crate::ecs::Id;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub(crate) type ErasedCompare = Arc<dyn Fn(*const u8, *const u8) -> Ordering + Send + Sync>;

/// Erase a typed comparator over component values.
pub(crate) fn erase_compare<T: Component>(compare: fn(&T, &T) -> Ordering) -> ErasedCompare {
    Arc::new(move |a, b| {
        // SAFETY: only called with pointers into a column registered for T.
        let (a, b) = unsafe { (&*(a as *const T), &*(b as *const T)) };
        compare(a, b)
    })
}

#[derive(Clone)]
pub(crate) struct OrderBy {
    pub id: Id,
    /// Field holding the sorted component.
    pub field: usize,
    pub compare: ErasedCompare,
}

impl fmt::Debug for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBy")
            .field("id", &self.id)
            .field("field", &self.field)
            .finish()
    }
}

/// Consecutive rows of one match that are adjacent in sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SortedRun {
    pub table: TableId,
    pub matched: usize,
    pub offset: usize,
    pub count: usize,
}

#[derive(Default, Debug)]
pub(crate) struct SortedIndex {
    pub runs: Vec<SortedRun>,
    built_for: Option<u64>,
    versions: Vec<(TableId, u64)>,
}

impl SortedIndex {
    pub fn is_stale(&self, generation: u64, cache: &TableCache<Vec<QueryMatch>>, graph: &TableGraph) -> bool {
        if self.built_for != Some(generation) {
            return true;
        }
        let current = table_versions(cache, graph);
        current != self.versions
    }

    pub fn rebuild(
        &mut self,
        order: &OrderBy,
        generation: u64,
        cache: &TableCache<Vec<QueryMatch>>,
        graph: &TableGraph,
    ) {
        self.runs = compute_runs(order, cache, graph);
        self.versions = table_versions(cache, graph);
        self.built_for = Some(generation);
    }
}

fn table_versions(cache: &TableCache<Vec<QueryMatch>>, graph: &TableGraph) -> Vec<(TableId, u64)> {
    cache
        .iter(CacheList::NonEmpty)
        .filter_map(|(tid, _)| graph.get(tid).map(|t| (tid, t.version())))
        .collect()
}

/// Sort every matched row by the ordered field and compress adjacent rows
/// of the same match into runs.
pub(crate) fn compute_runs(
    order: &OrderBy,
    cache: &TableCache<Vec<QueryMatch>>,
    graph: &TableGraph,
) -> Vec<SortedRun> {
    let mut rows: Vec<(*const u8, TableId, usize, usize)> = Vec::new();
    for (tid, matches) in cache.iter(CacheList::NonEmpty) {
        let Some(table) = graph.get(tid) else {
            continue;
        };
        for (m, matched) in matches.iter().enumerate() {
            let Some(column) = matched.columns.get(order.field).copied().flatten() else {
                continue;
            };
            let column = table.column(column);
            for row in 0..table.len() {
                rows.push((column.ptr(row), tid, m, row));
            }
        }
    }
    rows.sort_by(|a, b| {
        (order.compare)(a.0, b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
            .then(a.3.cmp(&b.3))
    });

    let mut runs: Vec<SortedRun> = Vec::new();
    for (_, table, matched, row) in rows {
        match runs.last_mut() {
            Some(run) if run.table == table && run.matched == matched && run.offset + run.count == row => {
                run.count += 1;
            }
            _ => runs.push(SortedRun {
                table,
                matched,
                offset: row,
                count: 1,
            }),
        }
    }
    runs
}
