// builder.rs - Fluent construction of queries and rules
//
// Source, traversal and access modifiers apply to the most recently added
// term, so a term reads left to right:
//
//     QueryBuilder::new()
//         .with::<Position>()
//         .with::<Position>().up(CHILD_OF)
//         .with_pair("Likes", "$Y").src_var("X")

use super::sort::{erase_compare, ErasedCompare};
use super::term::{ComponentRef, InOut, Oper, Term, TermRef, Traverse};
use super::QueryId;
use crate::ecs::component::Component;
use crate::ecs::error::EcsResult;
use crate::ecs::{Entity, Id, World, WILDCARD_INDEX};
use std::cmp::Ordering;

/// Sort request recorded by the builder, resolved at build time.
#[derive(Clone)]
pub(crate) struct OrderRequest {
    pub component: ComponentRef,
    pub compare: ErasedCompare,
}

#[derive(Default, Clone)]
pub struct QueryBuilder {
    terms: Vec<Term>,
    order_by: Option<OrderRequest>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    pub fn with<T: Component>(self) -> Self {
        self.with_term(Term::new(TermRef::component::<T>()))
    }

    /// Term for a raw id; a pair id becomes a pair term.
    pub fn with_id(self, id: impl Into<Id>) -> Self {
        self.with_term(term_for_id(id.into()))
    }

    pub fn with_pair(self, rel: impl Into<TermRef>, target: impl Into<TermRef>) -> Self {
        self.with_term(Term::pair(rel, target))
    }

    pub fn without<T: Component>(self) -> Self {
        self.with_term(Term::new(TermRef::component::<T>()).oper(Oper::Not))
    }

    pub fn without_id(self, id: impl Into<Id>) -> Self {
        self.with_term(term_for_id(id.into()).oper(Oper::Not))
    }

    pub fn optional<T: Component>(self) -> Self {
        self.with_term(Term::new(TermRef::component::<T>()).oper(Oper::Optional))
    }

    pub fn optional_id(self, id: impl Into<Id>) -> Self {
        self.with_term(term_for_id(id.into()).oper(Oper::Optional))
    }

    /// Alternative to the previous term: the two (and any further `or`
    /// terms) form one chain satisfied by its first matching member.
    pub fn or<T: Component>(self) -> Self {
        self.with_term(Term::new(TermRef::component::<T>()).oper(Oper::Or))
    }

    pub fn or_id(self, id: impl Into<Id>) -> Self {
        self.with_term(term_for_id(id.into()).oper(Oper::Or))
    }

    fn last(&mut self) -> Option<&mut Term> {
        self.terms.last_mut()
    }

    /// Match the last term on a fixed entity instead of `$this`.
    pub fn src(mut self, entity: Entity) -> Self {
        if let Some(term) = self.last() {
            term.src = TermRef::Entity(entity);
        }
        self
    }

    /// Match the last term on the entity with this name.
    pub fn src_name(mut self, name: impl Into<String>) -> Self {
        if let Some(term) = self.last() {
            term.src = TermRef::Name(name.into());
        }
        self
    }

    /// Match the last term on a variable. Turns the query into a rule
    /// unless the variable is `this`.
    pub fn src_var(mut self, name: impl Into<String>) -> Self {
        if let Some(term) = self.last() {
            term.src = TermRef::var(name);
        }
        self
    }

    /// Search the last term's id on targets of `rel` only.
    pub fn up(mut self, rel: Entity) -> Self {
        if let Some(term) = self.last() {
            term.trav = Some(Traverse {
                rel,
                include_self: false,
            });
        }
        self
    }

    /// Search the last term's id on the source first, then up `rel`.
    pub fn self_up(mut self, rel: Entity) -> Self {
        if let Some(term) = self.last() {
            term.trav = Some(Traverse {
                rel,
                include_self: true,
            });
        }
        self
    }

    pub fn access(mut self, inout: InOut) -> Self {
        if let Some(term) = self.last() {
            term.inout = inout;
        }
        self
    }

    /// Iterate in the order of `T` values. `T` must be a required `$this`
    /// field of the query.
    pub fn order_by<T: Component>(mut self, compare: fn(&T, &T) -> Ordering) -> Self {
        self.order_by = Some(OrderRequest {
            component: ComponentRef::of::<T>(),
            compare: erase_compare(compare),
        });
        self
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn build(self, world: &mut World) -> EcsResult<QueryId> {
        world.build_query(self.terms, self.order_by)
    }
}

fn term_for_id(id: Id) -> Term {
    // Pair halves only carry indices; generations are resolved at build.
    let half = |index: u32| {
        if index == WILDCARD_INDEX {
            TermRef::Wildcard
        } else {
            TermRef::Entity(Entity::from_parts(index, 0))
        }
    };
    if id.is_pair() {
        Term::pair(half(id.first()), half(id.second()))
    } else if id.is_wildcard() {
        Term::new(TermRef::Wildcard)
    } else {
        Term::new(TermRef::Entity(Entity::from_bits(id.to_bits())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_component;

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Position {
        x: f32,
    }
    define_component!(Position);

    #[test]
    fn modifiers_apply_to_last_term() {
        let parent = Entity::from_parts(40, 0);
        let b = QueryBuilder::new()
            .with::<Position>()
            .with::<Position>()
            .src(parent)
            .access(InOut::In);
        assert_eq!(b.terms()[0].src, TermRef::This);
        assert_eq!(b.terms()[1].src, TermRef::Entity(parent));
        assert_eq!(b.terms()[1].inout, InOut::In);
    }

    #[test]
    fn pair_ids_become_pair_terms() {
        let rel = Entity::from_parts(12, 0);
        let b = QueryBuilder::new().with_id(Id::pair_from_indices(12, WILDCARD_INDEX));
        assert_eq!(b.terms()[0].first, TermRef::Entity(rel));
        assert_eq!(b.terms()[0].second, Some(TermRef::Wildcard));
    }

    #[test]
    fn variables_mark_rules() {
        let b = QueryBuilder::new().with_pair("Likes", "$Y").src_var("X");
        assert!(b.terms()[0].needs_solver());
        let b = QueryBuilder::new().with::<Position>().src_var("this");
        assert!(!b.terms()[0].needs_solver());
    }
}
