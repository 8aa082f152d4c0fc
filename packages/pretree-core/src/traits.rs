use crate::error::Result;
use crate::fragment::Clip;
use crate::ids::{NodeKind, Pre, QName};

/// Positional node table the engine mutates.
///
/// Every node is addressed by its pre value. Structural calls shift the pre values
/// of all following nodes; callers are responsible for translating positions.
pub trait TreeStore {
    /// Number of rows in the table.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self, pre: Pre) -> NodeKind;

    /// Pre value of the parent, `None` for top-level document rows.
    fn parent(&self, pre: Pre, kind: NodeKind) -> Option<Pre>;

    /// Number of rows in the subtree rooted at `pre`, including itself.
    fn size(&self, pre: Pre, kind: NodeKind) -> usize;

    /// Number of attribute rows plus one; `1` for non-elements.
    fn att_size(&self, pre: Pre, kind: NodeKind) -> usize;

    fn name(&self, pre: Pre, kind: NodeKind) -> Option<&QName>;

    /// Text, comment, attribute and processing-instruction value, or document path.
    fn value(&self, pre: Pre, kind: NodeKind) -> Option<&str>;

    /// Copies the clip rows into the table at `pre`, below `parent`.
    fn insert(&mut self, pre: Pre, parent: Option<Pre>, clip: &Clip) -> Result<()>;

    /// Copies attribute rows into the attribute area of `parent`.
    fn insert_attr(&mut self, pre: Pre, parent: Pre, clip: &Clip) -> Result<()>;

    /// Removes the node at `pre` and its whole subtree.
    fn delete(&mut self, pre: Pre) -> Result<()>;

    fn replace(&mut self, pre: Pre, kind: NodeKind, value: &str) -> Result<()>;

    fn rename(&mut self, pre: Pre, kind: NodeKind, name: &QName) -> Result<()>;

    /// Store-specific structural optimization, run after bulk loads.
    fn optimize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Checks structural invariants. Intended for tests and debugging.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Named databases plus the resource side of database-level operations.
pub trait Catalog {
    type Store: TreeStore;

    fn contains(&self, db: &str) -> bool;

    fn store(&self, db: &str) -> Option<&Self::Store>;

    fn store_mut(&mut self, db: &str) -> Option<&mut Self::Store>;

    /// Fresh, empty store that is not yet registered under any name.
    fn new_store(&self) -> Self::Store;

    /// Registers `store` under `db`, replacing an existing database of that name.
    fn install(&mut self, db: &str, store: Self::Store) -> Result<()>;

    fn drop_database(&mut self, db: &str) -> Result<()>;

    /// Stores a binary resource at `path`.
    fn store_resource(&mut self, db: &str, path: &str, data: &[u8]) -> Result<()>;

    /// Renames binary resources at or below `from`; returns the number renamed.
    fn rename_resources(&mut self, db: &str, from: &str, to: &str) -> Result<usize>;

    /// Deletes binary resources at or below `path`; returns the number deleted.
    fn delete_resources(&mut self, db: &str, path: &str) -> Result<usize>;

    fn optimize(&mut self, db: &str, all: bool) -> Result<()>;

    fn flush(&mut self, db: &str) -> Result<()>;

    /// Writes serialized content to an external resource.
    fn write(&mut self, uri: &str, content: &[u8]) -> Result<()>;
}

/// Whether `path` equals `prefix` or lies below it.
pub(crate) fn path_matches(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Moves `path`, which lies at or below `from`, to the same place below `to`.
pub(crate) fn rebase_path(path: &str, from: &str, to: &str) -> String {
    let (from, to) = (from.trim_end_matches('/'), to.trim_end_matches('/'));
    if from.is_empty() {
        format!("{}/{}", to, path)
    } else {
        format!("{}{}", to, &path[from.len()..])
    }
}
