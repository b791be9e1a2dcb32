//! Constraint solver for queries with variables.
//!
//! A rule is a set of terms over entities, ids and named variables. Solving
//! it enumerates every consistent assignment of entities to variables.
//!
//! Solving runs in two phases:
//!
//! 1. Variable domains are narrowed by evaluating every required term
//!    against the current domains, repeatedly, until nothing changes. Cyclic
//!    variable dependencies simply converge here.
//! 2. A depth-first search over an explicit frame stack. Each step picks the
//!    unsolved required term with the fewest candidates under the current
//!    bindings, pushes a frame with those candidates, and binds the first
//!    one. An exhausted frame is popped, undoing its bindings. Optional
//!    terms are solved after all required terms, negated terms are checked
//!    once every positive term is solved.
//!
//! No variable is privileged, so a symmetric fact such as two entities
//! liking each other yields one row per consistent assignment.

use super::term::Oper;
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::error::{EcsResult, QueryError};
use crate::ecs::id_record::IdIndex;
use crate::ecs::storage::TableGraph;
use crate::ecs::table_cache::CacheList;
use crate::ecs::{Entity, Id, WILDCARD_INDEX};
use std::collections::HashSet;
use std::sync::Arc;

/// A term position after names and components were resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    Entity(Entity),
    Var(usize),
    Wildcard,
}

#[derive(Clone, Debug)]
pub(crate) struct RuleTerm {
    pub first: Slot,
    pub second: Option<Slot>,
    pub src: Slot,
    pub oper: Oper,
}

impl RuleTerm {
    fn vars(&self) -> impl Iterator<Item = usize> + '_ {
        [Some(self.src), Some(self.first), self.second]
            .into_iter()
            .flatten()
            .filter_map(|s| match s {
                Slot::Var(v) => Some(v),
                _ => None,
            })
    }
}

#[derive(Debug)]
pub(crate) struct Rule {
    pub vars: Arc<[String]>,
    pub terms: Vec<RuleTerm>,
}

impl Rule {
    /// Check the term set and build the rule.
    pub fn new(vars: Vec<String>, terms: Vec<RuleTerm>) -> EcsResult<Self> {
        if !terms.iter().any(|t| matches!(t.oper, Oper::And | Oper::Optional)) {
            return Err(QueryError::Empty.into());
        }
        let mut bound = vec![false; vars.len()];
        for term in terms.iter().filter(|t| t.oper == Oper::And || t.oper == Oper::Optional) {
            for v in term.vars() {
                bound[v] = true;
            }
        }
        for (i, term) in terms.iter().enumerate() {
            match term.oper {
                Oper::Or => {
                    return Err(QueryError::InvalidTerm {
                        term: i,
                        reason: "or chains are not supported with variables",
                    }
                    .into())
                }
                Oper::Not => {
                    if let Some(v) = term.vars().find(|v| !bound[*v]) {
                        return Err(QueryError::UnknownVariable {
                            term: i,
                            name: vars[v].clone(),
                        }
                        .into());
                    }
                }
                _ => {}
            }
            if term.src == Slot::Wildcard {
                return Err(QueryError::InvalidTerm {
                    term: i,
                    reason: "wildcard source",
                }
                .into());
            }
        }
        Ok(Self {
            vars: vars.into(),
            terms,
        })
    }

    pub fn var_index(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v == name)
    }
}

/// Storage the solver reads.
#[derive(Clone, Copy)]
pub(crate) struct SolveCtx<'w> {
    pub graph: &'w TableGraph,
    pub entities: &'w EntityIndex,
    pub ids: &'w IdIndex,
}

/// One way to satisfy a term: the variables it binds and the id it matched.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Candidate {
    binds: Vec<(usize, Entity)>,
    id: Id,
}

/// A slot under the current bindings.
#[derive(Clone, Copy, Debug)]
enum Value {
    Known(Entity),
    Free(usize),
    Any,
}

struct Frame {
    term: usize,
    candidates: Vec<Candidate>,
    next: usize,
    /// Variables bound by the candidate currently applied.
    applied: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Start,
    Descend,
    Advance,
    Done,
}

/// A solution: one entity per variable and the id each term matched.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleRow {
    vars: Arc<[String]>,
    values: Vec<Entity>,
    ids: Vec<Id>,
}

impl RuleRow {
    /// Value of variable `name` (without `$`). `Entity::NULL` when only an
    /// unmatched optional term mentions it.
    pub fn get(&self, name: &str) -> Option<Entity> {
        let name = name.strip_prefix('$').unwrap_or(name);
        self.vars.iter().position(|v| v == name).map(|i| self.values[i])
    }

    /// Value of `$this`, if the rule uses it.
    pub fn this(&self) -> Option<Entity> {
        self.get(super::term::THIS_VAR)
    }

    /// Id matched by term `term`, or `Id::NULL` for unmatched and negated
    /// terms.
    pub fn id(&self, term: usize) -> Id {
        self.ids.get(term).copied().unwrap_or(Id::NULL)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, Entity)> + '_ {
        self.vars.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

/// Lazy solver over a rule. See [`crate::ecs::World::rule_iter`].
pub struct RuleIter<'w> {
    ctx: SolveCtx<'w>,
    rule: &'w Rule,
    bindings: Vec<Option<Entity>>,
    domains: Vec<Option<HashSet<Entity>>>,
    solved: Vec<bool>,
    ids: Vec<Id>,
    stack: Vec<Frame>,
    state: State,
}

impl<'w> RuleIter<'w> {
    pub(crate) fn new(ctx: SolveCtx<'w>, rule: &'w Rule) -> Self {
        let vars = rule.vars.len();
        let terms = rule.terms.len();
        Self {
            ctx,
            rule,
            bindings: vec![None; vars],
            domains: vec![None; vars],
            solved: vec![false; terms],
            ids: vec![Id::NULL; terms],
            stack: Vec::new(),
            state: State::Start,
        }
    }

    /// Pre-bind variable `name` before iterating.
    pub fn set_var(mut self, name: &str, entity: Entity) -> EcsResult<Self> {
        let name = name.strip_prefix('$').unwrap_or(name);
        let Some(v) = self.rule.var_index(name) else {
            return Err(QueryError::UnknownVariable {
                term: 0,
                name: name.to_string(),
            }
            .into());
        };
        self.bindings[v] = Some(entity);
        self.domains[v] = Some(HashSet::from([entity]));
        Ok(self)
    }

    fn value(&self, slot: Slot) -> Value {
        match slot {
            Slot::Entity(e) => Value::Known(e),
            Slot::Var(v) => match self.bindings[v] {
                Some(e) => Value::Known(e),
                None => Value::Free(v),
            },
            Slot::Wildcard => Value::Any,
        }
    }

    fn allowed(&self, binds: &[(usize, Entity)]) -> bool {
        binds.iter().enumerate().all(|(i, &(v, e))| {
            let in_domain = self.domains[v].as_ref().map_or(true, |d| d.contains(&e));
            // The same variable in two positions must bind one entity.
            let consistent = binds[..i].iter().all(|&(w, f)| w != v || f == e);
            in_domain && consistent
        })
    }

    /// Candidates of term `t` under the current bindings and domains.
    fn candidates(&self, t: usize) -> Vec<Candidate> {
        let term = &self.rule.terms[t];
        let first = self.value(term.first);
        let second = term.second.map(|s| self.value(s));
        let mut out = Vec::new();
        match self.value(term.src) {
            Value::Known(src) => {
                let Some(table) = self.ctx.entities.get(src).and_then(|r| self.ctx.graph.get(r.table)) else {
                    return out;
                };
                for &id in table.ty().ids() {
                    if let Some(binds) = self.match_id(id, first, second) {
                        if self.allowed(&binds) {
                            out.push(Candidate { binds, id });
                        }
                    }
                }
            }
            Value::Free(src_var) => {
                let pattern = pattern_of(first, second);
                for id in self.ctx.ids.matching_ids(pattern) {
                    let Some(binds) = self.match_id(id, first, second) else {
                        continue;
                    };
                    let Some(record) = self.ctx.ids.lookup(id) else {
                        continue;
                    };
                    for (tid, _) in record.cache.iter(CacheList::NonEmpty) {
                        let Some(table) = self.ctx.graph.get(tid) else {
                            continue;
                        };
                        for &e in table.entities() {
                            let mut binds = binds.clone();
                            binds.push((src_var, e));
                            if self.allowed(&binds) {
                                out.push(Candidate { binds, id });
                            }
                        }
                    }
                }
            }
            Value::Any => {}
        }
        out
    }

    /// Bindings that make `id` match the first/second slots.
    fn match_id(&self, id: Id, first: Value, second: Option<Value>) -> Option<Vec<(usize, Entity)>> {
        let mut binds = Vec::new();
        match second {
            Some(second) => {
                if !id.is_pair() {
                    return None;
                }
                self.match_index(id.first(), first, &mut binds)?;
                self.match_index(id.second(), second, &mut binds)?;
            }
            None => {
                if id.is_pair() {
                    return None;
                }
                match first {
                    Value::Known(e) if e.id() != id => return None,
                    Value::Known(_) | Value::Any => {}
                    Value::Free(v) => {
                        let e = id.entity().filter(|e| self.ctx.entities.is_alive(*e))?;
                        binds.push((v, e));
                    }
                }
            }
        }
        Some(binds)
    }

    fn match_index(&self, index: u32, value: Value, binds: &mut Vec<(usize, Entity)>) -> Option<()> {
        match value {
            Value::Known(e) if e.index() != index => None,
            Value::Known(_) | Value::Any => Some(()),
            Value::Free(v) => {
                let e = self.ctx.entities.alive_by_index(index)?;
                binds.push((v, e));
                Some(())
            }
        }
    }

    /// Shrink variable domains until a fixed point. Returns false if a
    /// required term can never be satisfied.
    fn narrow(&mut self) -> bool {
        let required: Vec<usize> = (0..self.rule.terms.len())
            .filter(|&t| self.rule.terms[t].oper == Oper::And)
            .collect();
        loop {
            let mut changed = false;
            for &t in &required {
                let candidates = self.candidates(t);
                if candidates.is_empty() {
                    return false;
                }
                let vars: Vec<usize> = self.rule.terms[t].vars().collect();
                for v in vars {
                    if self.bindings[v].is_some() {
                        continue;
                    }
                    let seen: HashSet<Entity> = candidates
                        .iter()
                        .flat_map(|c| c.binds.iter())
                        .filter(|(w, _)| *w == v)
                        .map(|(_, e)| *e)
                        .collect();
                    // Candidates are already filtered by the domain, so equal
                    // sizes mean nothing was removed.
                    let narrowed = match &self.domains[v] {
                        Some(domain) if domain.len() <= seen.len() => continue,
                        Some(domain) => domain.intersection(&seen).copied().collect(),
                        None => seen,
                    };
                    if narrowed.is_empty() {
                        return false;
                    }
                    self.domains[v] = Some(narrowed);
                    changed = true;
                }
            }
            if !changed {
                return true;
            }
        }
    }

    /// Next term to solve: the required term with the fewest candidates,
    /// then optional terms in order.
    fn pick(&self) -> Option<(usize, Vec<Candidate>)> {
        let mut best: Option<(usize, Vec<Candidate>)> = None;
        for (t, term) in self.rule.terms.iter().enumerate() {
            if self.solved[t] || term.oper != Oper::And {
                continue;
            }
            let candidates = self.candidates(t);
            if best.as_ref().map_or(true, |(_, c)| candidates.len() < c.len()) {
                let empty = candidates.is_empty();
                best = Some((t, candidates));
                if empty {
                    break;
                }
            }
        }
        if best.is_some() {
            return best;
        }
        let t = (0..self.rule.terms.len()).find(|&t| !self.solved[t] && self.rule.terms[t].oper == Oper::Optional)?;
        let mut candidates = self.candidates(t);
        if candidates.is_empty() {
            candidates.push(Candidate {
                binds: Vec::new(),
                id: Id::NULL,
            });
        }
        Some((t, candidates))
    }

    fn negations_hold(&self) -> bool {
        (0..self.rule.terms.len())
            .filter(|&t| self.rule.terms[t].oper == Oper::Not)
            .all(|t| self.candidates(t).is_empty())
    }

    fn row(&self) -> RuleRow {
        RuleRow {
            vars: self.rule.vars.clone(),
            values: self.bindings.iter().map(|b| b.unwrap_or(Entity::NULL)).collect(),
            ids: self.ids.clone(),
        }
    }
}

/// Id pattern to look up candidates of a term whose source is unbound.
fn pattern_of(first: Value, second: Option<Value>) -> Id {
    let index = |v: Value| match v {
        Value::Known(e) => e.index(),
        Value::Free(_) | Value::Any => WILDCARD_INDEX,
    };
    match second {
        Some(second) => Id::pair_from_indices(index(first), index(second)),
        None => match first {
            Value::Known(e) => e.id(),
            _ => crate::ecs::WILDCARD.id(),
        },
    }
}

impl<'w> Iterator for RuleIter<'w> {
    type Item = RuleRow;

    fn next(&mut self) -> Option<RuleRow> {
        loop {
            match self.state {
                State::Done => return None,
                State::Start => {
                    self.state = if self.narrow() { State::Descend } else { State::Done };
                }
                State::Descend => match self.pick() {
                    Some((term, candidates)) => {
                        self.solved[term] = true;
                        self.stack.push(Frame {
                            term,
                            candidates,
                            next: 0,
                            applied: Vec::new(),
                        });
                        self.state = State::Advance;
                    }
                    None => {
                        self.state = State::Advance;
                        if self.negations_hold() {
                            return Some(self.row());
                        }
                    }
                },
                State::Advance => {
                    let Some(frame) = self.stack.last_mut() else {
                        self.state = State::Done;
                        continue;
                    };
                    for v in frame.applied.drain(..) {
                        self.bindings[v] = None;
                    }
                    match frame.candidates.get(frame.next) {
                        Some(candidate) => {
                            frame.next += 1;
                            for &(v, e) in &candidate.binds {
                                if self.bindings[v].is_none() {
                                    self.bindings[v] = Some(e);
                                    frame.applied.push(v);
                                }
                            }
                            self.ids[frame.term] = candidate.id;
                            self.state = State::Descend;
                        }
                        None => {
                            let term = frame.term;
                            self.stack.pop();
                            self.solved[term] = false;
                            self.ids[term] = Id::NULL;
                        }
                    }
                }
            }
        }
    }
}
