use thiserror::Error;

use crate::basic::OperationType;
use crate::ids::{NodeKind, QName, Target};
use crate::primitive::PrimitiveType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("merge conflict: multiple {kind} primitives on {target}")]
    MergeConflict { target: Target, kind: PrimitiveType },
    #[error("conflicting primitives on {target}: {second} cannot follow {first}")]
    ConflictingPrimitives {
        target: Target,
        first: PrimitiveType,
        second: PrimitiveType,
    },
    #[error("resource {uri} is written more than once")]
    DuplicatePut { uri: String },
    #[error("duplicate attribute {name} on {target}")]
    DuplicateAttribute { target: Target, name: QName },
    #[error("namespace conflict on {target}: prefix '{prefix}' bound to {first} and {second}")]
    NamespaceConflict {
        target: Target,
        prefix: String,
        first: String,
        second: String,
    },
    #[error("kind mismatch on {target}: {reason}")]
    KindMismatch { target: Target, reason: String },
    #[error("database conflict: multiple {kind} operations on '{db}'")]
    DatabaseConflict { db: String, kind: OperationType },
    #[error("database '{db}' expects document nodes, found {found}")]
    DocumentExpected { db: String, found: NodeKind },
    #[error("unknown database: {0}")]
    UnknownDatabase(String),
    #[error("target {target} is outside the node table (size {len})")]
    TargetOutOfRange { target: Target, len: usize },
    #[error("i/o failure on {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
