// term.rs - Query clauses
//
// A term names an id (or pair) pattern, the entity it is matched on and how
// it combines with the other terms. Terms are written against `TermRef`s so
// components, named entities and variables can be mixed freely; the builder
// resolves them against a world when the query is built.

use crate::ecs::component::Component;
use crate::ecs::error::EcsResult;
use crate::ecs::{Entity, World};
use std::fmt;

/// Name of the implicit variable bound to the entities being iterated.
pub const THIS_VAR: &str = "this";

/// Lazily registered Rust component.
#[derive(Clone, Copy)]
pub struct ComponentRef {
    name: &'static str,
    resolve: fn(&mut World) -> EcsResult<Entity>,
}

impl ComponentRef {
    pub fn of<T: Component>() -> Self {
        Self {
            name: T::NAME,
            resolve: |world| world.component::<T>(),
        }
    }

    pub(crate) fn resolve(&self, world: &mut World) -> EcsResult<Entity> {
        (self.resolve)(world)
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// One position of a term: relationship, target or source.
#[derive(Clone, Debug, PartialEq)]
pub enum TermRef {
    Entity(Entity),
    Component(ComponentRef),
    /// Entity looked up by name when the query is built.
    Name(String),
    /// Named variable. `"this"` is the iterated entity.
    Var(String),
    Wildcard,
    This,
}

impl TermRef {
    pub fn var(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.strip_prefix('$').map(str::to_string).unwrap_or(name);
        if name == THIS_VAR {
            TermRef::This
        } else {
            TermRef::Var(name)
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        TermRef::Name(name.into())
    }

    pub fn component<T: Component>() -> Self {
        TermRef::Component(ComponentRef::of::<T>())
    }

    /// Variable name, with `This` reported as `"this"`.
    pub(crate) fn var_name(&self) -> Option<&str> {
        match self {
            TermRef::Var(name) => Some(name),
            TermRef::This => Some(THIS_VAR),
            _ => None,
        }
    }
}

impl From<Entity> for TermRef {
    fn from(entity: Entity) -> Self {
        TermRef::Entity(entity)
    }
}

impl From<&str> for TermRef {
    /// `"$X"` is a variable, `"*"` the wildcard, anything else a name.
    fn from(s: &str) -> Self {
        if s == "*" {
            TermRef::Wildcard
        } else if s.starts_with('$') {
            TermRef::var(s)
        } else {
            TermRef::Name(s.to_string())
        }
    }
}

/// How a term combines with its neighbours.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Oper {
    #[default]
    And,
    /// Satisfied if this term or an adjacent `Or` term matches.
    Or,
    Not,
    Optional,
}

/// Declared data access of a term.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InOut {
    #[default]
    InOut,
    In,
    Out,
    /// Filter only; the field has no data access.
    None,
}

/// Search the id on the source, on entities reached through `rel`, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Traverse {
    pub rel: Entity,
    pub include_self: bool,
}

/// Maximum relationship depth walked by an `up` term.
pub(crate) const MAX_TRAVERSAL_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    pub first: TermRef,
    /// Target of a pair term, `None` for plain ids.
    pub second: Option<TermRef>,
    pub src: TermRef,
    pub oper: Oper,
    pub inout: InOut,
    pub trav: Option<Traverse>,
}

impl Term {
    pub fn new(first: impl Into<TermRef>) -> Self {
        Self {
            first: first.into(),
            second: None,
            src: TermRef::This,
            oper: Oper::And,
            inout: InOut::InOut,
            trav: None,
        }
    }

    pub fn pair(first: impl Into<TermRef>, second: impl Into<TermRef>) -> Self {
        Self {
            second: Some(second.into()),
            ..Self::new(first)
        }
    }

    pub fn src(mut self, src: impl Into<TermRef>) -> Self {
        self.src = src.into();
        self
    }

    pub fn oper(mut self, oper: Oper) -> Self {
        self.oper = oper;
        self
    }

    /// Does any position hold a variable other than `this` (or `this` in a
    /// position other than the source)?
    pub(crate) fn needs_solver(&self) -> bool {
        let is_var = |r: &TermRef| r.var_name().is_some();
        is_var(&self.first)
            || self.second.as_ref().is_some_and(is_var)
            || matches!(self.src, TermRef::Var(_))
    }
}
