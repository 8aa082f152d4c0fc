#![forbid(unsafe_code)]
//! Update orchestration for positional tree stores.
//! Nodes are addressed by their document-order position (pre value), so every
//! structural change shifts the nodes after it. This crate collects the updates of
//! one batch, merges and validates them, and applies them in an order that keeps
//! every queued position meaningful. Storage stays behind the traits in [`traits`].

pub mod basic;
pub mod error;
pub mod fragment;
pub mod ids;
pub mod memory;
pub mod name_pool;
pub mod options;
pub mod pending;
pub mod primitive;
pub mod serialize;
pub mod shift;
pub mod traits;

pub use basic::{BasicOperation, BasicSummary, BasicUpdates, OperationKind, OperationType};
pub use error::{Error, Result};
pub use fragment::{normalize, Clip, ClipNode, Fragment};
pub use ids::{NodeKind, Pre, QName, Target};
pub use memory::{MemoryCatalog, MemoryDatabase, MemoryTree};
pub use name_pool::{NameConflict, NamePool};
pub use options::UpdateOptions;
pub use pending::{ApplySummary, PendingUpdates, State};
pub use primitive::{
    Effect, Location, NodeInfo, Prepared, Primitive, PrimitiveKind, PrimitiveType,
};
pub use serialize::{serialize, serialize_all};
pub use shift::{ShiftMap, TextBoundaries};
pub use traits::{Catalog, TreeStore};
