//! Queries: declarative term sets matched against the table graph.
//!
//! A query without variables compiles to a [`cache::CachedQuery`] that keeps
//! the list of matching tables up to date as tables are created, emptied and
//! deleted. A query with variables compiles to a [`rule::Rule`] which is
//! solved on demand.

mod builder;
pub(crate) mod cache;
mod iter;
pub(crate) mod rule;
pub(crate) mod sort;
mod term;

pub use builder::QueryBuilder;
pub use iter::{QueryIter, TableIter};
pub use rule::{RuleIter, RuleRow};
pub use term::{ComponentRef, InOut, Oper, Term, TermRef, Traverse, THIS_VAR};

use self::builder::OrderRequest;
use self::cache::{CachedQuery, CompiledTerm, MatchCtx, Src};
use self::iter::{IterCtx, PlanItem};
use self::rule::{Rule, RuleTerm, Slot, SolveCtx};
use self::sort::{compute_runs, OrderBy, SortedRun};
use crate::ecs::error::{EcsError, EcsResult, QueryError};
use crate::ecs::id_record::IdRecordId;
use crate::ecs::poly::{ObjectId, ObjectKind, Poly, WorldObject};
use crate::ecs::storage::{Table, TableId};
use crate::ecs::table_cache::CacheList;
use crate::ecs::{Entity, Id, World, MAX_PAIR_FIRST, WILDCARD, WILDCARD_INDEX};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Handle of a query owned by a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct QueryId(pub(crate) ObjectId);

pub(crate) enum Plan {
    Cached(CachedQuery),
    Rule(Rule),
}

pub(crate) struct Query {
    pub plan: Plan,
    pub claims: Vec<IdRecordId>,
}

impl Poly for Query {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Query
    }

    fn claims(&self) -> &[IdRecordId] {
        &self.claims
    }
}

impl Query {
    pub fn cached(&self) -> Option<&CachedQuery> {
        match &self.plan {
            Plan::Cached(q) => Some(q),
            Plan::Rule(_) => None,
        }
    }

    pub fn cached_mut(&mut self) -> Option<&mut CachedQuery> {
        match &mut self.plan {
            Plan::Cached(q) => Some(q),
            Plan::Rule(_) => None,
        }
    }
}

/// A term position after names and components were looked up.
#[derive(Clone, Debug, PartialEq)]
enum Resolved {
    Entity(Entity),
    Wildcard,
    Var(String),
    This,
}

impl World {
    fn resolve_ref(&mut self, r: &TermRef, term: usize) -> EcsResult<Resolved> {
        let entity = match r {
            TermRef::Entity(e) => *e,
            TermRef::Component(c) => c.resolve(self)?,
            TermRef::Name(name) => self.lookup(name).ok_or_else(|| QueryError::UnresolvedName {
                term,
                name: name.clone(),
            })?,
            TermRef::Var(v) => return Ok(Resolved::Var(v.clone())),
            TermRef::Wildcard => return Ok(Resolved::Wildcard),
            TermRef::This => return Ok(Resolved::This),
        };
        if entity.index() == WILDCARD_INDEX {
            Ok(Resolved::Wildcard)
        } else {
            Ok(Resolved::Entity(entity))
        }
    }

    /// Live handle for a pair half, which only carries an index.
    fn pair_half(&self, entity: Entity) -> EcsResult<Entity> {
        self.entities
            .alive_by_index(entity.index())
            .ok_or(EcsError::invalid_entity(entity))
    }

    pub(crate) fn build_query(&mut self, terms: Vec<Term>, order: Option<OrderRequest>) -> EcsResult<QueryId> {
        if terms.is_empty() {
            return Err(QueryError::Empty.into());
        }
        let object = if terms.iter().any(Term::needs_solver) {
            if order.is_some() {
                return Err(QueryError::InvalidTerm {
                    term: terms.len(),
                    reason: "ordering requires a query without variables",
                }
                .into());
            }
            Query {
                plan: Plan::Rule(self.compile_rule(&terms)?),
                claims: Vec::new(),
            }
        } else {
            self.compile_cached(&terms, order)?
        };

        let kind = if matches!(object.plan, Plan::Rule(_)) { "rule" } else { "cached" };
        let joined: Vec<TableId> = object
            .cached()
            .map(|q| q.cache.tables(CacheList::All))
            .unwrap_or_default();
        let qid = self.objects.insert(WorldObject::Query(object));
        for tid in joined {
            if let Some(table) = self.graph.get_mut(tid) {
                table.queries.push(qid);
            }
        }
        debug!(query = %qid, kind, terms = terms.len(), "query created");
        Ok(QueryId(qid))
    }

    fn compile_cached(&mut self, terms: &[Term], order: Option<OrderRequest>) -> EcsResult<Query> {
        let mut compiled = Vec::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            compiled.push(self.compile_term(i, term)?);
        }
        link_or_chains(&mut compiled)?;

        let order_by = match order {
            Some(request) => {
                let id = request.component.resolve(self)?.id();
                let field = compiled
                    .iter()
                    .position(|t| t.id == id && t.src == Src::This && t.oper == Oper::And && t.trav.is_none())
                    .ok_or(QueryError::InvalidTerm {
                        term: terms.len(),
                        reason: "ordered component is not a required field",
                    })?;
                Some(OrderBy {
                    id,
                    field,
                    compare: request.compare,
                })
            }
            None => None,
        };

        let claims = compiled.iter().map(|t| self.ids.ensure_claimed(t.id)).collect();
        let mut query = CachedQuery::new(compiled, order_by);
        let mut ctx = MatchCtx {
            graph: &self.graph,
            entities: &mut self.entities,
        };
        query.rematch(&mut ctx, &self.ids);
        if let Some(order) = query.order_by.clone() {
            query.sorted.rebuild(&order, query.generation, &query.cache, &self.graph);
        }
        Ok(Query {
            plan: Plan::Cached(query),
            claims,
        })
    }

    fn compile_term(&mut self, i: usize, term: &Term) -> EcsResult<CompiledTerm> {
        let first = self.resolve_ref(&term.first, i)?;
        let second = match &term.second {
            Some(s) => Some(self.resolve_ref(s, i)?),
            None => None,
        };
        let id = match (first, second) {
            (Resolved::Entity(e), None) => {
                if !self.entities.is_alive(e) {
                    return Err(EcsError::invalid_entity(e));
                }
                e.id()
            }
            (Resolved::Wildcard, None) => {
                return Err(QueryError::DanglingWildcard {
                    term: i,
                    id: WILDCARD.id(),
                }
                .into())
            }
            (Resolved::Entity(rel), Some(target)) => {
                let rel = self.pair_half(rel)?;
                if rel.index() > MAX_PAIR_FIRST {
                    return Err(QueryError::InvalidTerm {
                        term: i,
                        reason: "relationship cannot be used in a pair",
                    }
                    .into());
                }
                match target {
                    Resolved::Entity(t) => Id::pair(rel, self.pair_half(t)?),
                    _ => Id::pair_from_indices(rel.index(), WILDCARD_INDEX),
                }
            }
            (Resolved::Wildcard, Some(Resolved::Entity(t))) => {
                Id::pair_from_indices(WILDCARD_INDEX, self.pair_half(t)?.index())
            }
            (Resolved::Wildcard, Some(_)) => crate::ecs::WILDCARD_PAIR,
            _ => {
                return Err(QueryError::InvalidTerm {
                    term: i,
                    reason: "variable in a query without variables",
                }
                .into())
            }
        };

        let src = match self.resolve_ref(&term.src, i)? {
            Resolved::This => Src::This,
            Resolved::Entity(e) if self.entities.is_alive(e) => Src::Fixed(e),
            Resolved::Entity(e) => return Err(QueryError::UnresolvedSource { term: i, entity: e }.into()),
            _ => {
                return Err(QueryError::InvalidTerm {
                    term: i,
                    reason: "source must be $this or an entity",
                }
                .into())
            }
        };

        if let Some(trav) = term.trav {
            if !self.entities.is_alive(trav.rel) || trav.rel.index() > MAX_PAIR_FIRST {
                return Err(QueryError::InvalidTerm {
                    term: i,
                    reason: "traversal relationship is not a live relationship",
                }
                .into());
            }
        }

        Ok(CompiledTerm {
            id,
            src,
            oper: term.oper,
            inout: term.inout,
            trav: term.trav,
            chain_end: None,
        })
    }

    fn compile_rule(&mut self, terms: &[Term]) -> EcsResult<Rule> {
        let mut vars: Vec<String> = Vec::new();
        let mut compiled = Vec::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            if term.trav.is_some() {
                return Err(QueryError::InvalidTerm {
                    term: i,
                    reason: "traversal is not supported with variables",
                }
                .into());
            }
            let first = self.resolve_ref(&term.first, i)?;
            let second = match &term.second {
                Some(s) => Some(self.resolve_ref(s, i)?),
                None => None,
            };
            let src = self.resolve_ref(&term.src, i)?;
            let first = to_slot(first, &mut vars);
            let second = second.map(|s| to_slot(s, &mut vars));
            let src = to_slot(src, &mut vars);
            if let (Slot::Entity(rel), Some(_)) = (first, second) {
                if rel.index() > MAX_PAIR_FIRST {
                    return Err(QueryError::InvalidTerm {
                        term: i,
                        reason: "relationship cannot be used in a pair",
                    }
                    .into());
                }
            }
            if let Slot::Entity(e) = src {
                if !self.entities.is_alive(e) {
                    return Err(QueryError::UnresolvedSource { term: i, entity: e }.into());
                }
            }
            compiled.push(RuleTerm {
                first,
                second,
                src,
                oper: term.oper,
            });
        }
        Rule::new(vars, compiled)
    }

    fn query_ref(&self, q: QueryId) -> EcsResult<&Query> {
        self.objects
            .get(q.0)
            .and_then(WorldObject::as_query)
            .ok_or(EcsError::Resolution(QueryError::UnknownQuery { query: q.0.raw() }))
    }

    fn cached_ref(&self, q: QueryId) -> EcsResult<&CachedQuery> {
        self.query_ref(q)?
            .cached()
            .ok_or(EcsError::Resolution(QueryError::WrongKind {
                expected: "query without variables",
            }))
    }

    pub(crate) fn iter_ctx(&self, with_stage: bool) -> IterCtx<'_> {
        IterCtx {
            graph: &self.graph,
            entities: &self.entities,
            components: &self.components,
            stage: if with_stage { self.stages.first() } else { None },
        }
    }

    /// Shared iteration over the results of a query without variables.
    ///
    /// Fields can be read but not written; see [`World::run`] for write
    /// access.
    pub fn query_iter(&self, q: QueryId) -> EcsResult<QueryIter<'_>> {
        let query = self.cached_ref(q)?;
        let runs: Option<Cow<'_, [SortedRun]>> = query.order_by.as_ref().map(|order| {
            if query.sorted.is_stale(query.generation, &query.cache, &self.graph) {
                Cow::Owned(compute_runs(order, &query.cache, &self.graph))
            } else {
                Cow::Borrowed(query.sorted.runs.as_slice())
            }
        });
        let items = iter::plan(query, &self.graph, runs.as_deref());
        Ok(QueryIter::new(self.iter_ctx(false), query, items))
    }

    /// Solve a query with variables.
    pub fn rule_iter(&self, q: QueryId) -> EcsResult<RuleIter<'_>> {
        match &self.query_ref(q)?.plan {
            Plan::Rule(rule) => Ok(RuleIter::new(
                SolveCtx {
                    graph: &self.graph,
                    entities: &self.entities,
                    ids: &self.ids,
                },
                rule,
            )),
            Plan::Cached(_) => Err(QueryError::WrongKind {
                expected: "query with variables",
            }
            .into()),
        }
    }

    /// Number of rows the query currently yields.
    pub fn query_count(&self, q: QueryId) -> EcsResult<usize> {
        match &self.query_ref(q)?.plan {
            Plan::Cached(_) => Ok(self.query_iter(q)?.count_rows()),
            Plan::Rule(_) => Ok(self.rule_iter(q)?.count()),
        }
    }

    /// Tables currently matched by a cached query, non-empty ones first.
    pub fn query_tables(&self, q: QueryId) -> EcsResult<Vec<TableId>> {
        Ok(self.cached_ref(q)?.cache.tables(CacheList::All))
    }

    /// Results with their matches cloned, so tables can be lent out while
    /// the query is still reachable.
    fn owned_plan(&mut self, q: QueryId, sorted: bool) -> EcsResult<Vec<(PlanItem, cache::QueryMatch)>> {
        self.refresh_sorted(q)?;
        let query = self.cached_ref(q)?;
        let runs = if sorted { query.order_by.as_ref().map(|_| query.sorted.runs.as_slice()) } else { None };
        let items = iter::plan(query, &self.graph, runs);
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let matched = match item.table {
                Some(tid) => query.cache.get(tid).and_then(|m| m.get(item.matched)),
                None => query.fixed.get(item.matched),
            };
            if let Some(matched) = matched {
                out.push((item, matched.clone()));
            }
        }
        Ok(out)
    }

    /// Iterate a query with write access to `$this` fields.
    ///
    /// The world is deferred for the duration: structural changes go through
    /// [`TableIter::commands`] and are applied when iteration ends.
    pub fn run<F>(&mut self, q: QueryId, mut f: F) -> EcsResult<()>
    where
        F: FnMut(&mut TableIter<'_>),
    {
        let items = self.owned_plan(q, true)?;
        self.defer_begin();
        self.stock_stages();
        for (item, matched) in &items {
            let Some(tid) = item.table else {
                let mut it = TableIter::shared(self.iter_ctx(true), None, matched, *item);
                f(&mut it);
                continue;
            };
            let Some(mut table) = self.graph.take(tid) else {
                continue;
            };
            let wrote = {
                let mut it = TableIter::exclusive(self.iter_ctx(true), &mut table, matched, *item);
                f(&mut it);
                it.wrote()
            };
            if wrote {
                table.touch();
            }
            self.graph.put_back(table);
        }
        self.defer_end();
        Ok(())
    }

    /// Iterate a query on the worker stages in parallel.
    ///
    /// Matched tables are spread over the stages round-robin; each stage's
    /// commands are merged in stage order afterwards. Queries that read
    /// fields from entities other than `$this` are rejected since those
    /// entities may live in tables lent to another worker.
    pub fn par_run<F>(&mut self, q: QueryId, f: F) -> EcsResult<()>
    where
        F: Fn(&mut TableIter<'_>) + Sync,
    {
        {
            let query = self.cached_ref(q)?;
            if query.dependent || !query.has_this {
                return Err(EcsError::ReadonlyViolation {
                    op: "run a query with fixed or traversed sources in parallel",
                });
            }
        }
        let items = self.owned_plan(q, false)?;

        let stage_count = self.stages.len();
        let mut buckets: Vec<Vec<(Table, Vec<(PlanItem, cache::QueryMatch)>)>> =
            (0..stage_count).map(|_| Vec::new()).collect();
        let mut placed: HashMap<TableId, (usize, usize)> = HashMap::new();
        for (item, matched) in items {
            let Some(tid) = item.table else {
                continue;
            };
            if let Some(&(b, i)) = placed.get(&tid) {
                buckets[b][i].1.push((item, matched));
                continue;
            }
            let Some(table) = self.graph.take(tid) else {
                continue;
            };
            let b = placed.len() % stage_count;
            placed.insert(tid, (b, buckets[b].len()));
            buckets[b].push((table, vec![(item, matched)]));
        }

        self.defer_begin();
        self.stock_stages();
        let graph = &self.graph;
        let entities = &self.entities;
        let components = &self.components;
        let f = &f;
        let returned: Vec<Vec<Table>> = buckets
            .into_par_iter()
            .zip(self.stages.par_iter_mut())
            .map(|(bucket, stage)| {
                let stage = &*stage;
                bucket
                    .into_iter()
                    .map(|(mut table, items)| {
                        let ctx = IterCtx {
                            graph,
                            entities,
                            components,
                            stage: Some(stage),
                        };
                        let mut wrote = false;
                        for (item, matched) in &items {
                            let mut it = TableIter::exclusive(ctx, &mut table, matched, *item);
                            f(&mut it);
                            wrote |= it.wrote();
                        }
                        if wrote {
                            table.touch();
                        }
                        table
                    })
                    .collect()
            })
            .collect();
        for table in returned.into_iter().flatten() {
            self.graph.put_back(table);
        }
        self.defer_end();
        Ok(())
    }

    /// Dispose a query and release its id record claims.
    pub fn query_fini(&mut self, q: QueryId) -> EcsResult<()> {
        self.query_ref(q)?;
        let Some(WorldObject::Query(query)) = self.objects.remove(q.0) else {
            return Ok(());
        };
        if let Some(cached) = query.cached() {
            for tid in cached.cache.tables(CacheList::All) {
                if let Some(table) = self.graph.get_mut(tid) {
                    table.queries.retain(|o| *o != q.0);
                }
            }
        }
        for &rid in query.claims() {
            self.ids.release(rid);
        }
        debug!(query = %q.0, "query disposed");
        Ok(())
    }

    /// Test a new table against every cached query.
    pub(crate) fn match_new_table(&mut self, tid: TableId) {
        let Some(table) = self.graph.get(tid) else {
            return;
        };
        let mut joined = Vec::new();
        for qid in self.objects.ids_of(ObjectKind::Query) {
            let Some(query) = self
                .objects
                .get_mut(qid)
                .and_then(WorldObject::as_query_mut)
                .and_then(Query::cached_mut)
            else {
                continue;
            };
            let mut ctx = MatchCtx {
                graph: &self.graph,
                entities: &mut self.entities,
            };
            if query.on_table_created(&mut ctx, table) {
                joined.push(qid);
            }
        }
        if let Some(table) = self.graph.get_mut(tid) {
            table.queries.extend(joined);
        }
    }

    /// Drop a table that is about to be deleted from every query cache.
    pub(crate) fn unmatch_table(&mut self, table: &Table) {
        for &qid in &table.queries {
            if let Some(query) = self
                .objects
                .get_mut(qid)
                .and_then(WorldObject::as_query_mut)
                .and_then(Query::cached_mut)
            {
                query.on_table_deleted(table.id());
            }
        }
    }

    /// Move a table between the empty and non-empty lists of its id records
    /// and of the queries that match it.
    pub(crate) fn set_table_empty(&mut self, tid: TableId, empty: bool) {
        let Some(table) = self.graph.get(tid) else {
            return;
        };
        self.ids.set_table_empty(table, empty);
        for &qid in &table.queries {
            if let Some(query) = self
                .objects
                .get_mut(qid)
                .and_then(WorldObject::as_query_mut)
                .and_then(Query::cached_mut)
            {
                query.cache.set_empty(tid, empty);
            }
        }
    }

    /// Rebuild the caches of queries that depend on entities outside their
    /// matched tables, if any such entity moved.
    pub(crate) fn rematch_dependents(&mut self) {
        if !self.rematch_pending {
            return;
        }
        self.rematch_pending = false;
        for qid in self.objects.ids_of(ObjectKind::Query) {
            let Some(query) = self
                .objects
                .get_mut(qid)
                .and_then(WorldObject::as_query_mut)
                .and_then(Query::cached_mut)
            else {
                continue;
            };
            if !query.dependent {
                continue;
            }
            let mut ctx = MatchCtx {
                graph: &self.graph,
                entities: &mut self.entities,
            };
            let (left, joined) = query.rematch(&mut ctx, &self.ids);
            for tid in left {
                if let Some(table) = self.graph.get_mut(tid) {
                    table.queries.retain(|o| *o != qid);
                }
            }
            for tid in joined {
                if let Some(table) = self.graph.get_mut(tid) {
                    table.queries.push(qid);
                }
            }
            self.counters.increment("query_rematches", 1);
        }
    }

    /// Rebuild the sorted index of an ordered query if it is out of date.
    fn refresh_sorted(&mut self, q: QueryId) -> EcsResult<()> {
        let graph = &self.graph;
        let query = self
            .objects
            .get_mut(q.0)
            .and_then(WorldObject::as_query_mut)
            .ok_or(EcsError::Resolution(QueryError::UnknownQuery { query: q.0.raw() }))?;
        if let Some(query) = query.cached_mut() {
            if let Some(order) = query.order_by.clone() {
                if query.sorted.is_stale(query.generation, &query.cache, graph) {
                    query.sorted.rebuild(&order, query.generation, &query.cache, graph);
                }
            }
        }
        Ok(())
    }

    /// Bring every query up to date. Runs at merge points.
    pub(crate) fn sync_queries(&mut self) {
        self.rematch_dependents();
        for qid in self.objects.ids_of(ObjectKind::Query) {
            if let Err(err) = self.refresh_sorted(QueryId(qid)) {
                warn!(query = %qid, %err, "could not refresh sorted index");
            }
        }
    }
}

fn to_slot(resolved: Resolved, vars: &mut Vec<String>) -> Slot {
    let mut var = |name: &str| match vars.iter().position(|v| v == name) {
        Some(i) => i,
        None => {
            vars.push(name.to_string());
            vars.len() - 1
        }
    };
    match resolved {
        Resolved::Entity(e) => Slot::Entity(e),
        Resolved::Wildcard => Slot::Wildcard,
        Resolved::Var(name) => Slot::Var(var(&name)),
        Resolved::This => Slot::Var(var(THIS_VAR)),
    }
}

/// Turn runs of `Or` terms into chains headed by the preceding term.
fn link_or_chains(terms: &mut [CompiledTerm]) -> EcsResult<()> {
    if terms.first().is_some_and(|t| t.oper == Oper::Or) {
        return Err(QueryError::InvalidTerm {
            term: 0,
            reason: "or term without a preceding term",
        }
        .into());
    }
    let mut i = 0;
    while i < terms.len() {
        let mut end = i + 1;
        while end < terms.len() && terms[end].oper == Oper::Or {
            end += 1;
        }
        if end > i + 1 {
            if terms[i].oper != Oper::And {
                return Err(QueryError::InvalidTerm {
                    term: i,
                    reason: "or chain must start with a required term",
                }
                .into());
            }
            terms[i].chain_end = Some(end);
        }
        i = end;
    }
    Ok(())
}
