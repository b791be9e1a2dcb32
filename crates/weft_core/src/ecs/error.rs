use crate::ecs::{Entity, Id};
use thiserror::Error;

pub type EcsResult<T> = Result<T, EcsError>;

/// Errors reported by world operations.
///
/// Everything except [`EcsError::Internal`] is detected before any storage
/// is touched, so the world is unchanged when one of them is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EcsError {
    #[error("entity {entity} is not alive")]
    InvalidEntity { entity: Entity },

    #[error("invalid component {id}: {reason}")]
    InvalidComponent { id: Id, reason: ComponentError },

    #[error("cannot {op} while the world is readonly; defer the operation through a stage")]
    ReadonlyViolation { op: &'static str },

    #[error(transparent)]
    Resolution(#[from] QueryError),

    #[error("internal invariant failure: {0}")]
    Internal(#[from] InvariantError),
}

impl EcsError {
    #[inline]
    pub(crate) fn invalid_entity(entity: Entity) -> Self {
        Self::InvalidEntity { entity }
    }

    #[inline]
    pub(crate) fn component(id: Id, reason: ComponentError) -> Self {
        Self::InvalidComponent { id, reason }
    }
}

/// `(rel, target)` as an id, rejecting relationships whose index does not
/// fit in a pair.
pub(crate) fn pair_id(rel: Entity, target: Entity) -> EcsResult<Id> {
    Id::try_pair(rel, target).ok_or(EcsError::InvalidComponent {
        id: rel.id(),
        reason: ComponentError::RelationshipTooLarge { index: rel.index() },
    })
}

/// Why a component registration or typed access was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    #[error("alignment {align} is not a power of two")]
    BadAlignment { align: usize },

    #[error("size {size} is not a multiple of alignment {align}")]
    SizeNotAligned { size: usize, align: usize },

    #[error("a {hook} hook requires a ctor hook")]
    MissingCtor { hook: &'static str },

    #[error("already registered with size {size} and alignment {align}")]
    LayoutMismatch { size: usize, align: usize },

    #[error("id is already stored in {tables} table(s)")]
    AlreadyInUse { tables: usize },

    #[error("id has no type info")]
    NotAComponent,

    #[error("expected {expected} bytes but received {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Rust type does not match the registered type")]
    TypeMismatch,

    #[error("cannot copy: no copy hook registered")]
    MissingCopy,

    #[error("wildcard ids cannot be stored on an entity")]
    Wildcard,

    #[error("builtin entities cannot be modified")]
    Builtin,

    #[error("entity index {index} is too large to be a relationship")]
    RelationshipTooLarge { index: u32 },
}

/// Why a query could not be built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query has no terms")]
    Empty,

    #[error("term {term}: fixed source {entity} is not alive")]
    UnresolvedSource { term: usize, entity: Entity },

    #[error("term {term}: no entity named '{name}'")]
    UnresolvedName { term: usize, name: String },

    #[error("term {term}: dangling wildcard {id}")]
    DanglingWildcard { term: usize, id: Id },

    #[error("term {term}: variable '{name}' is not bound by any term")]
    UnknownVariable { term: usize, name: String },

    #[error("term {term}: {reason}")]
    InvalidTerm { term: usize, reason: &'static str },

    #[error("query is not a {expected}")]
    WrongKind { expected: &'static str },

    #[error("no query with handle {query}")]
    UnknownQuery { query: u32 },
}

/// Corruption of table or id-record linkage. Never locally recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("record of {entity} points at table {table} row {row} which holds {found}")]
    RecordMismatch {
        entity: Entity,
        table: u32,
        row: u32,
        found: Entity,
    },

    #[error("table {table} is missing from the cache of id {id}")]
    MissingCacheEntry { table: u32, id: Id },

    #[error("table {table} is in the wrong emptiness list of id {id}")]
    WrongEmptiness { table: u32, id: Id },

    #[error("edge {id} from table {from} leads to invalid table {to}")]
    BrokenEdge { from: u32, to: u32, id: Id },

    #[error("table {table} does not exist")]
    MissingTable { table: u32 },

    #[error("query {query} caches dead table {table}")]
    StaleQueryTable { query: u32, table: u32 },

    #[error("column length {columns} differs from entity count {entities} in table {table}")]
    ColumnLength {
        table: u32,
        columns: usize,
        entities: usize,
    },
}

/// Raise an invariant failure. Storage has no rollback, so this aborts.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            ::tracing::error!($($arg)+);
            panic!("internal invariant failure: {}", format!($($arg)+));
        }
    };
}
pub(crate) use invariant;

/// Abort on an error that can only come from corrupted storage.
#[track_caller]
pub(crate) fn fatal(op: &'static str, err: EcsError) -> ! {
    ::tracing::error!(op, %err, "storage corrupted");
    panic!("internal invariant failure during {op}: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operand() {
        let e = Entity::from_parts(5, 1);
        let err = EcsError::invalid_entity(e);
        assert_eq!(err.to_string(), "entity 5v1 is not alive");

        let err: EcsError = QueryError::UnresolvedName {
            term: 0,
            name: "player".into(),
        }
        .into();
        assert!(matches!(err, EcsError::Resolution(_)));
        assert!(err.to_string().contains("player"));
    }
}
