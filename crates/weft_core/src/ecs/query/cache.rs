// cache.rs - Table matching for cached queries
//
// A cached query keeps, per matching table, the list of term-to-id
// assignments ("matches") that table satisfies. A table holding several ids
// that match a wildcard term gets one match per permutation. Tables are
// tested once when created; the cache is only rebuilt wholesale when an
// entity the query depends on from outside its tables changes table.

use super::sort::{OrderBy, SortedIndex};
use super::term::{InOut, Oper, Traverse, MAX_TRAVERSAL_DEPTH};
use crate::ecs::archetype::Type;
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::id_record::IdIndex;
use crate::ecs::storage::{Table, TableGraph, TableId};
use crate::ecs::table_cache::{CacheList, TableCache};
use crate::ecs::{Entity, Id};

/// Where a compiled term is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Src {
    This,
    Fixed(Entity),
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledTerm {
    pub id: Id,
    pub src: Src,
    pub oper: Oper,
    pub inout: InOut,
    pub trav: Option<Traverse>,
    /// End (exclusive) of the `Or` chain this term heads.
    pub chain_end: Option<usize>,
}

/// One way a table satisfies the query. Indexed by field (term).
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct QueryMatch {
    /// Concrete id matched by each field, or the term's pattern if unset.
    pub ids: Vec<Id>,
    /// Source of each field, `Entity::NULL` for the iterated table.
    pub sources: Vec<Entity>,
    /// Column in the iterated table, for self fields with data.
    pub columns: Vec<Option<usize>>,
    pub set: Vec<bool>,
    /// Declared access of each field.
    pub access: Vec<InOut>,
}

impl QueryMatch {
    fn new(terms: &[CompiledTerm]) -> Self {
        Self {
            ids: terms.iter().map(|t| t.id).collect(),
            sources: vec![Entity::NULL; terms.len()],
            columns: vec![None; terms.len()],
            set: vec![false; terms.len()],
            access: terms.iter().map(|t| t.inout).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    id: Id,
    src: Entity,
    column: Option<usize>,
}

/// Storage the matcher reads. Entity records are mutable so sources reached
/// outside the matched table can be flagged as observed.
pub(crate) struct MatchCtx<'a> {
    pub graph: &'a TableGraph,
    pub entities: &'a mut EntityIndex,
}

pub(crate) struct CachedQuery {
    pub terms: Vec<CompiledTerm>,
    pub cache: TableCache<Vec<QueryMatch>>,
    /// Results of a query without `$this` terms.
    pub fixed: Vec<QueryMatch>,
    pub has_this: bool,
    /// Depends on entities outside the matched tables.
    pub dependent: bool,
    pub order_by: Option<OrderBy>,
    pub sorted: SortedIndex,
    /// Bumped whenever cache membership changes.
    pub generation: u64,
}

impl CachedQuery {
    pub fn new(terms: Vec<CompiledTerm>, order_by: Option<OrderBy>) -> Self {
        let has_this = terms.iter().any(|t| t.src == Src::This);
        let dependent = terms
            .iter()
            .any(|t| matches!(t.src, Src::Fixed(_)) || t.trav.is_some());
        Self {
            terms,
            cache: TableCache::new(),
            fixed: Vec::new(),
            has_this,
            dependent,
            order_by,
            sorted: SortedIndex::default(),
            generation: 0,
        }
    }

    /// Tables worth testing: those in the smallest id record among the
    /// required self terms, or every table when there is none.
    pub fn seed_tables(&self, ids: &IdIndex, graph: &TableGraph) -> Vec<TableId> {
        let mut best: Option<(usize, Vec<TableId>)> = None;
        for term in &self.terms {
            if term.src != Src::This || term.oper != Oper::And || term.chain_end.is_some() {
                continue;
            }
            if term.trav.is_some() {
                continue;
            }
            let Some(rec) = ids.lookup(term.id) else {
                return Vec::new();
            };
            let size = rec.cache.len();
            if best.as_ref().map_or(true, |(n, _)| size < *n) {
                best = Some((size, rec.cache.tables(CacheList::All)));
            }
        }
        match best {
            Some((_, tables)) => tables,
            None => graph.ids().collect(),
        }
    }

    /// All ways `table` satisfies the terms (`None` for source-only queries).
    pub fn match_table(&self, ctx: &mut MatchCtx<'_>, table: Option<&Table>) -> Vec<QueryMatch> {
        let mut out = Vec::new();
        let mut current = QueryMatch::new(&self.terms);
        self.match_from(ctx, table, 0, &mut current, &mut out);
        out
    }

    fn match_from(
        &self,
        ctx: &mut MatchCtx<'_>,
        table: Option<&Table>,
        i: usize,
        current: &mut QueryMatch,
        out: &mut Vec<QueryMatch>,
    ) {
        let Some(term) = self.terms.get(i) else {
            out.push(current.clone());
            return;
        };

        if let Some(end) = term.chain_end {
            for member in i..end {
                let candidates = resolve(ctx, &self.terms[member], table);
                if candidates.is_empty() {
                    continue;
                }
                for field in i..end {
                    current.set[field] = false;
                    current.ids[field] = self.terms[field].id;
                    current.sources[field] = Entity::NULL;
                    current.columns[field] = None;
                }
                for cand in candidates {
                    assign(current, member, cand);
                    self.match_from(ctx, table, end, current, out);
                }
                return;
            }
            return;
        }

        let candidates = resolve(ctx, term, table);
        match term.oper {
            Oper::And | Oper::Or => {
                for cand in candidates {
                    assign(current, i, cand);
                    self.match_from(ctx, table, i + 1, current, out);
                }
            }
            Oper::Optional => {
                if candidates.is_empty() {
                    current.set[i] = false;
                    current.ids[i] = term.id;
                    current.columns[i] = None;
                    self.match_from(ctx, table, i + 1, current, out);
                }
                for cand in candidates {
                    assign(current, i, cand);
                    self.match_from(ctx, table, i + 1, current, out);
                }
            }
            Oper::Not => {
                if candidates.is_empty() {
                    current.set[i] = false;
                    self.match_from(ctx, table, i + 1, current, out);
                }
            }
        }
    }

    /// Re-run matching from scratch. Returns the tables that left and joined
    /// the cache so the caller can fix the tables' back-references.
    pub fn rematch(&mut self, ctx: &mut MatchCtx<'_>, ids: &IdIndex) -> (Vec<TableId>, Vec<TableId>) {
        self.generation += 1;
        if !self.has_this {
            self.fixed = self.match_table(ctx, None);
            return (Vec::new(), Vec::new());
        }
        let before = self.cache.tables(CacheList::All);
        let mut cache = TableCache::new();
        for tid in self.seed_tables(ids, ctx.graph) {
            let Some(table) = ctx.graph.get(tid) else {
                continue;
            };
            let matches = self.match_table(ctx, Some(table));
            if !matches.is_empty() {
                cache.insert(tid, table.is_empty(), matches);
            }
        }
        let left = before.iter().copied().filter(|t| !cache.contains(*t)).collect();
        let joined = cache
            .tables(CacheList::All)
            .into_iter()
            .filter(|t| !self.cache.contains(*t))
            .collect();
        self.cache = cache;
        (left, joined)
    }

    /// Test a newly created table. Returns true if it was added.
    pub fn on_table_created(&mut self, ctx: &mut MatchCtx<'_>, table: &Table) -> bool {
        if !self.has_this {
            return false;
        }
        let matches = self.match_table(ctx, Some(table));
        if matches.is_empty() {
            return false;
        }
        self.generation += 1;
        self.cache.insert(table.id(), table.is_empty(), matches)
    }

    pub fn on_table_deleted(&mut self, table: TableId) {
        if self.cache.remove(table).is_some() {
            self.generation += 1;
        }
    }
}

fn assign(current: &mut QueryMatch, field: usize, cand: Candidate) {
    current.ids[field] = cand.id;
    current.sources[field] = cand.src;
    current.columns[field] = cand.column;
    current.set[field] = true;
}

/// Type indices of `ty` matching `pattern`.
fn self_matches(ty: &Type, pattern: Id) -> impl Iterator<Item = (usize, Id)> + '_ {
    ty.ids()
        .iter()
        .copied()
        .enumerate()
        .filter(move |(_, id)| id.matches(pattern))
}

fn resolve(ctx: &mut MatchCtx<'_>, term: &CompiledTerm, table: Option<&Table>) -> Vec<Candidate> {
    let include_self = term.trav.map_or(true, |t| t.include_self);
    let mut out = Vec::new();
    match term.src {
        Src::This => {
            let Some(table) = table else {
                return out;
            };
            if include_self {
                out.extend(self_matches(table.ty(), term.id).map(|(i, id)| Candidate {
                    id,
                    src: Entity::NULL,
                    column: table.column_of_type_index(i),
                }));
            }
            if out.is_empty() {
                if let Some(trav) = term.trav {
                    if let Some((src, id)) = search_up(ctx, table.ty(), term.id, trav.rel, 0) {
                        out.push(Candidate {
                            id,
                            src,
                            column: None,
                        });
                    }
                }
            }
        }
        Src::Fixed(entity) => {
            let Some(record) = ctx.entities.get_mut(entity) else {
                return out;
            };
            record.observed = true;
            let tid = record.table;
            let Some(src_table) = ctx.graph.get(tid) else {
                return out;
            };
            if include_self {
                out.extend(self_matches(src_table.ty(), term.id).map(|(_, id)| Candidate {
                    id,
                    src: entity,
                    column: None,
                }));
            }
            if out.is_empty() {
                if let Some(trav) = term.trav {
                    let ty = src_table.ty().clone();
                    if let Some((src, id)) = search_up(ctx, &ty, term.id, trav.rel, 0) {
                        out.push(Candidate {
                            id,
                            src,
                            column: None,
                        });
                    }
                }
            }
        }
    }
    out
}

/// Walk `rel` targets of `ty` breadth-first per level until one holds an id
/// matching `pattern`. Every visited target is flagged as observed.
fn search_up(ctx: &mut MatchCtx<'_>, ty: &Type, pattern: Id, rel: Entity, depth: usize) -> Option<(Entity, Id)> {
    if depth >= MAX_TRAVERSAL_DEPTH {
        return None;
    }
    let rel_pattern = Id::pair_from_indices(rel.index(), crate::ecs::WILDCARD_INDEX);
    let targets: Vec<Entity> = self_matches(ty, rel_pattern)
        .filter_map(|(_, id)| ctx.entities.alive_by_index(id.second()))
        .collect();
    for target in &targets {
        let Some(record) = ctx.entities.get_mut(*target) else {
            continue;
        };
        record.observed = true;
        let tid = record.table;
        if let Some(found) = ctx
            .graph
            .get(tid)
            .and_then(|t| self_matches(t.ty(), pattern).next())
        {
            return Some((*target, found.1));
        }
    }
    for target in targets {
        let Some(ty) = ctx
            .entities
            .get(target)
            .and_then(|r| ctx.graph.get(r.table))
            .map(|t| t.ty().clone())
        else {
            continue;
        };
        if let Some(found) = search_up(ctx, &ty, pattern, rel, depth + 1) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentRegistry;
    use crate::ecs::WILDCARD;

    fn e(i: u32) -> Entity {
        Entity::from_parts(i, 0)
    }

    fn term(id: Id, oper: Oper) -> CompiledTerm {
        CompiledTerm {
            id,
            src: Src::This,
            oper,
            inout: InOut::InOut,
            trav: None,
            chain_end: None,
        }
    }

    struct Fixture {
        graph: TableGraph,
        entities: EntityIndex,
        registry: ComponentRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = ComponentRegistry::new();
            Self {
                graph: TableGraph::new(&registry, 0),
                entities: EntityIndex::with_capacity(8),
                registry,
            }
        }

        fn table(&mut self, ids: Vec<Id>) -> TableId {
            self.graph.find_or_create(Type::from_ids(ids), &self.registry).table
        }

        fn run(&mut self, query: &CachedQuery, table: TableId) -> Vec<QueryMatch> {
            let graph = &self.graph;
            let mut ctx = MatchCtx {
                graph,
                entities: &mut self.entities,
            };
            query.match_table(&mut ctx, graph.get(table))
        }
    }

    #[test]
    fn one_match_per_wildcard_permutation() {
        let mut f = Fixture::new();
        let likes = e(10);
        let t = f.table(vec![e(5).id(), Id::pair(likes, e(20)), Id::pair(likes, e(21))]);
        let q = CachedQuery::new(vec![term(Id::pair(likes, WILDCARD), Oper::And)], None);
        let matches = f.run(&q, t);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].ids[0], Id::pair(likes, e(20)));
        assert_eq!(matches[1].ids[0], Id::pair(likes, e(21)));
    }

    #[test]
    fn not_and_optional_terms() {
        let mut f = Fixture::new();
        let t = f.table(vec![e(5).id()]);
        let q = CachedQuery::new(
            vec![
                term(e(5).id(), Oper::And),
                term(e(6).id(), Oper::Optional),
                term(e(7).id(), Oper::Not),
            ],
            None,
        );
        let matches = f.run(&q, t);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].set, vec![true, false, false]);

        let t2 = f.table(vec![e(5).id(), e(7).id()]);
        assert!(f.run(&q, t2).is_empty());
    }

    #[test]
    fn or_chain_sets_first_matching_member() {
        let mut f = Fixture::new();
        let t = f.table(vec![e(6).id()]);
        let mut head = term(e(5).id(), Oper::And);
        head.chain_end = Some(2);
        let q = CachedQuery::new(vec![head, term(e(6).id(), Oper::Or)], None);
        let matches = f.run(&q, t);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].set, vec![false, true]);

        let t2 = f.table(vec![e(7).id()]);
        assert!(f.run(&q, t2).is_empty());
    }
}
