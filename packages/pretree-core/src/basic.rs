//! Database-level operations.
//!
//! These act on whole databases rather than single nodes and run after every
//! node-level primitive of the batch has been applied.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fragment::{Clip, Fragment};
use crate::ids::{NodeKind, Pre};
use crate::serialize::serialize_all;
use crate::traits::{path_matches, rebase_path, Catalog, TreeStore};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Database-level operation kinds in application order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OperationType {
    Add,
    Store,
    Rename,
    Delete,
    Optimize,
    Flush,
    Put,
    Drop,
    Create,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Add => "add",
            OperationType::Store => "store",
            OperationType::Rename => "rename",
            OperationType::Delete => "delete",
            OperationType::Optimize => "optimize",
            OperationType::Flush => "flush",
            OperationType::Put => "put",
            OperationType::Drop => "drop",
            OperationType::Create => "create",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OperationKind {
    /// Documents appended to the database.
    Add(Vec<Fragment>),
    /// Binary resources as `(path, data)`.
    Store(Vec<(String, Vec<u8>)>),
    /// Path moves as `(from, to)`, applied to documents and resources.
    Rename(Vec<(String, String)>),
    /// Paths whose documents and resources are removed.
    Delete(Vec<String>),
    Optimize { all: bool },
    Flush,
    /// URIs the whole database is serialized to.
    Put(Vec<String>),
    Drop,
    /// Initial documents of a new database.
    Create(Vec<Fragment>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicOperation {
    pub db: String,
    pub kind: OperationKind,
}

impl BasicOperation {
    pub fn new(db: impl Into<String>, kind: OperationKind) -> Self {
        Self { db: db.into(), kind }
    }

    pub fn add(db: impl Into<String>, documents: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(db, OperationKind::Add(documents.into_iter().collect()))
    }

    pub fn store(db: impl Into<String>, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(db, OperationKind::Store(vec![(path.into(), data.into())]))
    }

    pub fn rename(db: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(db, OperationKind::Rename(vec![(from.into(), to.into())]))
    }

    pub fn delete(db: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(db, OperationKind::Delete(vec![path.into()]))
    }

    pub fn optimize(db: impl Into<String>, all: bool) -> Self {
        Self::new(db, OperationKind::Optimize { all })
    }

    pub fn flush(db: impl Into<String>) -> Self {
        Self::new(db, OperationKind::Flush)
    }

    pub fn put(db: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::new(db, OperationKind::Put(vec![uri.into()]))
    }

    pub fn drop(db: impl Into<String>) -> Self {
        Self::new(db, OperationKind::Drop)
    }

    pub fn create(db: impl Into<String>, documents: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(db, OperationKind::Create(documents.into_iter().collect()))
    }

    pub fn operation_type(&self) -> OperationType {
        match self.kind {
            OperationKind::Add(_) => OperationType::Add,
            OperationKind::Store(_) => OperationType::Store,
            OperationKind::Rename(_) => OperationType::Rename,
            OperationKind::Delete(_) => OperationType::Delete,
            OperationKind::Optimize { .. } => OperationType::Optimize,
            OperationKind::Flush => OperationType::Flush,
            OperationKind::Put(_) => OperationType::Put,
            OperationKind::Drop => OperationType::Drop,
            OperationKind::Create(_) => OperationType::Create,
        }
    }

    /// URIs written by a whole-database put.
    pub fn uris(&self) -> &[String] {
        match &self.kind {
            OperationKind::Put(uris) => uris,
            _ => &[],
        }
    }

    /// Folds `other`, an operation of the same kind on the same database, into `self`.
    pub fn merge(&mut self, other: BasicOperation) -> Result<()> {
        let kind = self.operation_type();
        if self.db != other.db || kind != other.operation_type() {
            return Err(Error::InvalidOperation(format!(
                "cannot merge {} on '{}' into {} on '{}'",
                other.operation_type(),
                other.db,
                kind,
                self.db
            )));
        }
        match (&mut self.kind, other.kind) {
            (OperationKind::Add(ours), OperationKind::Add(theirs)) => ours.extend(theirs),
            (OperationKind::Store(ours), OperationKind::Store(theirs)) => ours.extend(theirs),
            (OperationKind::Rename(ours), OperationKind::Rename(theirs)) => ours.extend(theirs),
            (OperationKind::Delete(ours), OperationKind::Delete(theirs)) => ours.extend(theirs),
            (OperationKind::Optimize { all }, OperationKind::Optimize { all: other_all }) => {
                *all |= other_all;
            }
            (OperationKind::Put(ours), OperationKind::Put(theirs)) => {
                for uri in theirs {
                    if !ours.contains(&uri) {
                        ours.push(uri);
                    }
                }
            }
            (OperationKind::Flush, OperationKind::Flush) | (OperationKind::Drop, OperationKind::Drop) => {}
            _ => {
                return Err(Error::DatabaseConflict {
                    db: self.db.clone(),
                    kind,
                })
            }
        }
        Ok(())
    }

    fn validate<C: Catalog + ?Sized>(&self, catalog: &C) -> Result<()> {
        match &self.kind {
            OperationKind::Create(documents) => expect_documents(&self.db, documents),
            OperationKind::Add(documents) => {
                self.expect_database(catalog)?;
                expect_documents(&self.db, documents)
            }
            _ => self.expect_database(catalog),
        }
    }

    fn expect_database<C: Catalog + ?Sized>(&self, catalog: &C) -> Result<()> {
        if catalog.contains(&self.db) {
            Ok(())
        } else {
            Err(Error::UnknownDatabase(self.db.clone()))
        }
    }

    /// Returns the number of resources written.
    fn apply<C: Catalog + ?Sized>(self, catalog: &mut C) -> Result<usize> {
        let db = self.db;
        match self.kind {
            OperationKind::Add(documents) => {
                let store = store_mut(catalog, &db)?;
                for document in &documents {
                    let end = store.len();
                    store.insert(end, None, &Clip::document(document))?;
                }
            }
            OperationKind::Store(resources) => {
                for (path, data) in &resources {
                    catalog.store_resource(&db, path, data)?;
                }
            }
            OperationKind::Rename(moves) => {
                for (from, to) in &moves {
                    let store = store_mut(catalog, &db)?;
                    let matching = documents_at(&*store, from);
                    for &pre in &matching {
                        let path = store
                            .value(pre, NodeKind::Document)
                            .unwrap_or_default()
                            .to_string();
                        store.replace(pre, NodeKind::Document, &rebase_path(&path, from, to))?;
                    }
                    let resources = catalog.rename_resources(&db, from, to)?;
                    debug!(db = %db, from = %from, to = %to, documents = matching.len(), resources, "renamed paths");
                }
            }
            OperationKind::Delete(paths) => {
                for path in &paths {
                    let store = store_mut(catalog, &db)?;
                    let matching = documents_at(&*store, path);
                    for &pre in matching.iter().rev() {
                        store.delete(pre)?;
                    }
                    let resources = catalog.delete_resources(&db, path)?;
                    debug!(db = %db, path = %path, documents = matching.len(), resources, "deleted paths");
                }
            }
            OperationKind::Optimize { all } => catalog.optimize(&db, all)?,
            OperationKind::Flush => catalog.flush(&db)?,
            OperationKind::Put(uris) => {
                let store = catalog
                    .store(&db)
                    .ok_or_else(|| Error::UnknownDatabase(db.clone()))?;
                let content = serialize_all(store);
                for uri in &uris {
                    catalog.write(uri, content.as_bytes())?;
                }
                return Ok(uris.len());
            }
            OperationKind::Drop => catalog.drop_database(&db)?,
            OperationKind::Create(documents) => {
                let mut store = catalog.new_store();
                let built = documents.iter().try_for_each(|document| {
                    let end = store.len();
                    store.insert(end, None, &Clip::document(document))
                });
                if let Err(err) = built.and_then(|()| store.optimize()) {
                    warn!(db = %db, error = %err, "discarding database under construction");
                    return Err(err);
                }
                catalog.install(&db, store)?;
            }
        }
        Ok(0)
    }
}

fn store_mut<'a, C: Catalog + ?Sized>(catalog: &'a mut C, db: &str) -> Result<&'a mut C::Store> {
    catalog
        .store_mut(db)
        .ok_or_else(|| Error::UnknownDatabase(db.to_string()))
}

fn expect_documents(db: &str, documents: &[Fragment]) -> Result<()> {
    match documents.iter().find(|d| d.kind() != NodeKind::Document) {
        Some(other) => Err(Error::DocumentExpected {
            db: db.to_string(),
            found: other.kind(),
        }),
        None => Ok(()),
    }
}

/// Pre values of the documents whose path lies at or below `path`, ascending.
fn documents_at<S: TreeStore + ?Sized>(store: &S, path: &str) -> Vec<Pre> {
    let mut matching = Vec::new();
    let mut pre = 0;
    while pre < store.len() {
        let kind = store.kind(pre);
        if kind == NodeKind::Document
            && path_matches(store.value(pre, kind).unwrap_or_default(), path)
        {
            matching.push(pre);
        }
        pre += store.size(pre, kind);
    }
    matching
}

/// Outcome of the database-level phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicSummary {
    pub applied: usize,
    pub resources_written: usize,
}

/// Pending database-level operations keyed by kind and database.
#[derive(Clone, Debug, Default)]
pub struct BasicUpdates {
    operations: BTreeMap<(OperationType, String), BasicOperation>,
}

impl BasicUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn add(&mut self, operation: BasicOperation) -> Result<()> {
        let key = (operation.operation_type(), operation.db.clone());
        match self.operations.entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(operation),
            Entry::Vacant(slot) => {
                slot.insert(operation);
                Ok(())
            }
        }
    }

    /// Checks every operation against the catalog before any of them runs.
    pub fn validate<C: Catalog + ?Sized>(&self, catalog: &C) -> Result<()> {
        self.operations
            .values()
            .try_for_each(|operation| operation.validate(catalog))
    }

    /// Applies all operations in kind order.
    pub fn apply<C: Catalog + ?Sized>(self, catalog: &mut C) -> Result<BasicSummary> {
        let mut summary = BasicSummary::default();
        for ((kind, db), operation) in self.operations {
            debug!(db = %db, kind = %kind, "applying database operation");
            summary.resources_written += operation.apply(catalog)?;
            summary.applied += 1;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCatalog, MemoryTree};

    fn catalog() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        let tree = MemoryTree::from_documents(&[
            Fragment::document("a/one.xml").with_child(Fragment::element("one")),
            Fragment::document("b/two.xml").with_child(Fragment::element("two")),
        ])
        .unwrap();
        catalog.insert_database("db", tree);
        catalog
    }

    #[test]
    fn merges_follow_operation_kind() {
        let mut updates = BasicUpdates::new();
        updates.add(BasicOperation::optimize("db", false)).unwrap();
        updates.add(BasicOperation::optimize("db", true)).unwrap();
        updates.add(BasicOperation::flush("db")).unwrap();
        updates.add(BasicOperation::flush("db")).unwrap();
        updates.add(BasicOperation::delete("db", "a")).unwrap();
        updates.add(BasicOperation::delete("db", "b")).unwrap();
        assert_eq!(updates.len(), 3);
        let optimize = &updates.operations[&(OperationType::Optimize, "db".to_string())];
        assert_eq!(optimize.kind, OperationKind::Optimize { all: true });

        updates.add(BasicOperation::create("new", [])).unwrap();
        assert!(matches!(
            updates.add(BasicOperation::create("new", [])),
            Err(Error::DatabaseConflict {
                kind: OperationType::Create,
                ..
            })
        ));
    }

    #[test]
    fn validation_requires_databases_and_documents() {
        let catalog = catalog();
        let mut updates = BasicUpdates::new();
        updates.add(BasicOperation::flush("missing")).unwrap();
        assert!(matches!(
            updates.validate(&catalog),
            Err(Error::UnknownDatabase(db)) if db == "missing"
        ));

        let mut updates = BasicUpdates::new();
        updates
            .add(BasicOperation::create("fresh", [Fragment::element("x")]))
            .unwrap();
        assert!(matches!(
            updates.validate(&catalog),
            Err(Error::DocumentExpected {
                found: NodeKind::Element,
                ..
            })
        ));
    }

    #[test]
    fn rename_and_delete_act_on_document_paths() {
        let mut catalog = catalog();
        let mut updates = BasicUpdates::new();
        updates.add(BasicOperation::rename("db", "a", "c")).unwrap();
        updates.add(BasicOperation::delete("db", "b")).unwrap();
        updates.validate(&catalog).unwrap();
        let summary = updates.apply(&mut catalog).unwrap();
        assert_eq!(summary.applied, 2);

        let tree = &catalog.database("db").unwrap().tree;
        let docs = tree.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(tree.value(docs[0], NodeKind::Document), Some("c/one.xml"));
    }

    #[test]
    fn create_builds_and_installs_a_store() {
        let mut catalog = catalog();
        let mut updates = BasicUpdates::new();
        updates
            .add(BasicOperation::create(
                "fresh",
                [Fragment::document("x.xml").with_child(Fragment::element("x"))],
            ))
            .unwrap();
        updates.add(BasicOperation::put("db", "all.xml")).unwrap();
        updates.validate(&catalog).unwrap();
        let summary = updates.apply(&mut catalog).unwrap();
        assert_eq!(summary.resources_written, 1);
        assert_eq!(catalog.written("all.xml"), Some(&b"<one/><two/>"[..]));
        let fresh = &catalog.database("fresh").unwrap().tree;
        assert_eq!(serialize_all(fresh), "<x/>");
    }
}
