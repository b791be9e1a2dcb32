//! Weft Core
//!
//! Table-based entity component system:
//! - Entities, components, tags and relationship pairs
//! - Cached queries and a rule solver with variables
//! - Deferred command stages merged at sync points
//! - Observers for add, remove and set events

pub mod ecs;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
