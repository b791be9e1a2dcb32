// mod.rs - Storage module exports

mod column;
mod graph;
mod table;

pub use column::Column;
pub use graph::TableGraph;
pub(crate) use graph::{RowChange, Traversal};
pub use table::{Table, TableId};
