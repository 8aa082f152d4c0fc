use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fragment::{Clip, Fragment};
use crate::ids::{NodeKind, Pre, QName};
use crate::serialize::serialize_all;
use crate::traits::{path_matches, rebase_path, Catalog, TreeStore};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Row {
    kind: NodeKind,
    /// Distance to the parent row; `0` for top-level documents.
    dist: usize,
    size: usize,
    att_size: usize,
    name: Option<QName>,
    value: String,
}

/// Vector-backed positional table for tests, fragments and in-memory databases.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryTree {
    rows: Vec<Row>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table holding the given document fragments.
    pub fn from_documents(documents: &[Fragment]) -> Result<Self> {
        let mut tree = MemoryTree::new();
        for document in documents {
            tree.append_document(document)?;
        }
        Ok(tree)
    }

    /// Builds a table holding a single document at `path` with the given children.
    pub fn with_document(path: &str, children: Vec<Fragment>) -> Self {
        let mut tree = MemoryTree::new();
        let document = Fragment::Document {
            path: path.to_string(),
            children,
        };
        let clip = Clip::document(&document);
        tree.rows.extend(clip.nodes().iter().map(|node| Row {
            kind: node.kind,
            dist: node.dist,
            size: node.size,
            att_size: node.att_size,
            name: node.name.clone(),
            value: node.value.clone(),
        }));
        tree
    }

    /// Appends a document fragment as a new top-level row.
    pub fn append_document(&mut self, document: &Fragment) -> Result<()> {
        if document.kind() != NodeKind::Document {
            return Err(Error::InvalidOperation(format!(
                "expected a document, found {}",
                document.kind()
            )));
        }
        let end = self.rows.len();
        self.insert(end, None, &Clip::document(document))
    }

    /// Pre values of all top-level document rows.
    pub fn documents(&self) -> Vec<Pre> {
        let mut docs = Vec::new();
        let mut pre = 0;
        while pre < self.rows.len() {
            docs.push(pre);
            pre += self.rows[pre].size;
        }
        docs
    }

    fn parent_of(&self, pre: Pre) -> Option<Pre> {
        let dist = self.rows[pre].dist;
        (dist != 0).then(|| pre - dist)
    }

    /// Adds `delta` to the distance of the node at `pre` and of every following
    /// sibling of its ancestor-or-self axis.
    fn update_dist(&mut self, pre: Pre, delta: isize) {
        let mut p = pre;
        while p < self.rows.len() {
            let row = &mut self.rows[p];
            if row.dist != 0 {
                row.dist = (row.dist as isize + delta) as usize;
            }
            p += row.size;
        }
    }

    fn grow_ancestors(&mut self, parent: Option<Pre>, delta: isize) {
        let mut current = parent;
        while let Some(p) = current {
            let row = &mut self.rows[p];
            row.size = (row.size as isize + delta) as usize;
            current = self.parent_of(p);
        }
    }

    fn check_pre(&self, pre: Pre) -> Result<()> {
        if pre >= self.rows.len() {
            return Err(Error::Storage(format!(
                "pre {} outside table of size {}",
                pre,
                self.rows.len()
            )));
        }
        Ok(())
    }
}

impl TreeStore for MemoryTree {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn kind(&self, pre: Pre) -> NodeKind {
        self.rows[pre].kind
    }

    fn parent(&self, pre: Pre, _kind: NodeKind) -> Option<Pre> {
        self.parent_of(pre)
    }

    fn size(&self, pre: Pre, _kind: NodeKind) -> usize {
        self.rows[pre].size
    }

    fn att_size(&self, pre: Pre, _kind: NodeKind) -> usize {
        self.rows[pre].att_size
    }

    fn name(&self, pre: Pre, _kind: NodeKind) -> Option<&QName> {
        self.rows[pre].name.as_ref()
    }

    fn value(&self, pre: Pre, kind: NodeKind) -> Option<&str> {
        match kind {
            NodeKind::Element => None,
            _ => Some(self.rows[pre].value.as_str()),
        }
    }

    fn insert(&mut self, pre: Pre, parent: Option<Pre>, clip: &Clip) -> Result<()> {
        if pre > self.rows.len() {
            return Err(Error::Storage(format!(
                "insert position {} beyond table of size {}",
                pre,
                self.rows.len()
            )));
        }
        if let Some(p) = parent {
            self.check_pre(p)?;
            let row = &self.rows[p];
            if !row.kind.has_children() || pre <= p || pre > p + row.size {
                return Err(Error::Storage(format!(
                    "insert position {} is not inside the subtree of {}",
                    pre, p
                )));
            }
        }
        let count = clip.len();
        if count == 0 {
            return Ok(());
        }
        let rows = clip.nodes().iter().enumerate().map(|(offset, node)| Row {
            kind: node.kind,
            dist: match (node.dist, parent) {
                (0, Some(p)) => pre + offset - p,
                (dist, _) => dist,
            },
            size: node.size,
            att_size: node.att_size,
            name: node.name.clone(),
            value: node.value.clone(),
        });
        self.rows.splice(pre..pre, rows);
        self.grow_ancestors(parent, count as isize);
        self.update_dist(pre + count, count as isize);
        Ok(())
    }

    fn insert_attr(&mut self, pre: Pre, parent: Pre, clip: &Clip) -> Result<()> {
        self.check_pre(parent)?;
        if clip.nodes().iter().any(|node| node.kind != NodeKind::Attribute) {
            return Err(Error::Storage("attribute insert with non-attribute rows".into()));
        }
        let row = &self.rows[parent];
        if row.kind != NodeKind::Element || pre <= parent || pre > parent + row.att_size {
            return Err(Error::Storage(format!(
                "attribute position {} is not inside the attribute area of {}",
                pre, parent
            )));
        }
        self.insert(pre, Some(parent), clip)?;
        self.rows[parent].att_size += clip.len();
        Ok(())
    }

    fn delete(&mut self, pre: Pre) -> Result<()> {
        self.check_pre(pre)?;
        let kind = self.rows[pre].kind;
        let size = self.rows[pre].size;
        let parent = self.parent_of(pre);
        if kind == NodeKind::Attribute {
            if let Some(p) = parent {
                self.rows[p].att_size -= 1;
            }
        }
        self.grow_ancestors(parent, -(size as isize));
        self.rows.drain(pre..pre + size);
        self.update_dist(pre, -(size as isize));
        Ok(())
    }

    fn replace(&mut self, pre: Pre, kind: NodeKind, value: &str) -> Result<()> {
        self.check_pre(pre)?;
        if kind == NodeKind::Element {
            return Err(Error::Storage(format!("element {} has no value", pre)));
        }
        self.rows[pre].value = value.to_string();
        Ok(())
    }

    fn rename(&mut self, pre: Pre, kind: NodeKind, name: &QName) -> Result<()> {
        self.check_pre(pre)?;
        if !kind.is_named() {
            return Err(Error::Storage(format!("{} node {} has no name", kind, pre)));
        }
        self.rows[pre].name = Some(name.clone());
        Ok(())
    }

    fn optimize(&mut self) -> Result<()> {
        self.rows.shrink_to_fit();
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        let fail = |pre: Pre, msg: &str| Err(Error::Storage(format!("node {}: {}", pre, msg)));
        let mut top = 0;
        while top < self.rows.len() {
            if self.rows[top].dist != 0 {
                return fail(top, "top-level row has a parent");
            }
            top += self.rows[top].size.max(1);
        }
        if top != self.rows.len() {
            return fail(top, "top-level sizes overrun the table");
        }
        for (pre, row) in self.rows.iter().enumerate() {
            if row.size == 0 || pre + row.size > self.rows.len() {
                return fail(pre, "invalid subtree size");
            }
            if !row.kind.has_children() && (row.size != 1 || row.att_size != 1) {
                return fail(pre, "leaf with descendants");
            }
            if row.att_size == 0 || row.att_size > row.size {
                return fail(pre, "invalid attribute size");
            }
            for att in pre + 1..pre + row.att_size {
                if self.rows[att].kind != NodeKind::Attribute || self.rows[att].dist != att - pre {
                    return fail(att, "attribute area out of sync");
                }
            }
            let end = pre + row.size;
            let mut child = pre + row.att_size;
            let mut previous: Option<NodeKind> = None;
            while child < end {
                let c = &self.rows[child];
                if c.kind == NodeKind::Attribute {
                    return fail(child, "attribute outside attribute area");
                }
                if c.dist != child - pre {
                    return fail(child, "distance does not point to parent");
                }
                if c.kind == NodeKind::Text && previous == Some(NodeKind::Text) {
                    return fail(child, "adjacent text nodes");
                }
                previous = Some(c.kind);
                child += c.size.max(1);
            }
            if child != end {
                return fail(pre, "children overrun subtree size");
            }
        }
        Ok(())
    }
}

/// Database held by a [`MemoryCatalog`].
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    pub tree: MemoryTree,
    pub resources: BTreeMap<String, Vec<u8>>,
    pub flushes: usize,
    pub optimizations: usize,
}

/// In-memory catalog of named databases.
///
/// Resources written by `Put` and database snapshots written by `Flush` go to the
/// output directory when one is configured, and are kept in memory otherwise.
#[derive(Clone, Debug, Default)]
pub struct MemoryCatalog {
    databases: BTreeMap<String, MemoryDatabase>,
    output: Option<PathBuf>,
    written: BTreeMap<String, Vec<u8>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            output: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Registers a database; replaces an existing one of the same name.
    pub fn insert_database(&mut self, name: &str, tree: MemoryTree) {
        self.databases.insert(
            name.to_string(),
            MemoryDatabase {
                tree,
                ..MemoryDatabase::default()
            },
        );
    }

    pub fn database(&self, name: &str) -> Option<&MemoryDatabase> {
        self.databases.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.databases.keys().map(String::as_str)
    }

    /// Content written to `uri` when no output directory is configured.
    pub fn written(&self, uri: &str) -> Option<&[u8]> {
        self.written.get(uri).map(Vec::as_slice)
    }

    fn database_mut(&mut self, db: &str) -> Result<&mut MemoryDatabase> {
        self.databases
            .get_mut(db)
            .ok_or_else(|| Error::UnknownDatabase(db.to_string()))
    }

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, content).map_err(|source| Error::Io {
            resource: path.display().to_string(),
            source,
        })
    }
}

impl Catalog for MemoryCatalog {
    type Store = MemoryTree;

    fn contains(&self, db: &str) -> bool {
        self.databases.contains_key(db)
    }

    fn store(&self, db: &str) -> Option<&MemoryTree> {
        self.databases.get(db).map(|d| &d.tree)
    }

    fn store_mut(&mut self, db: &str) -> Option<&mut MemoryTree> {
        self.databases.get_mut(db).map(|d| &mut d.tree)
    }

    fn new_store(&self) -> MemoryTree {
        MemoryTree::new()
    }

    fn install(&mut self, db: &str, store: MemoryTree) -> Result<()> {
        self.insert_database(db, store);
        Ok(())
    }

    fn drop_database(&mut self, db: &str) -> Result<()> {
        self.databases
            .remove(db)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownDatabase(db.to_string()))
    }

    fn store_resource(&mut self, db: &str, path: &str, data: &[u8]) -> Result<()> {
        self.database_mut(db)?
            .resources
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn rename_resources(&mut self, db: &str, from: &str, to: &str) -> Result<usize> {
        let database = self.database_mut(db)?;
        let matching: Vec<String> = database
            .resources
            .keys()
            .filter(|path| path_matches(path, from))
            .cloned()
            .collect();
        for path in &matching {
            if let Some(data) = database.resources.remove(path) {
                database.resources.insert(rebase_path(path, from, to), data);
            }
        }
        Ok(matching.len())
    }

    fn delete_resources(&mut self, db: &str, path: &str) -> Result<usize> {
        let database = self.database_mut(db)?;
        let before = database.resources.len();
        database.resources.retain(|p, _| !path_matches(p, path));
        Ok(before - database.resources.len())
    }

    fn optimize(&mut self, db: &str, _all: bool) -> Result<()> {
        let database = self.database_mut(db)?;
        database.tree.optimize()?;
        database.optimizations += 1;
        Ok(())
    }

    fn flush(&mut self, db: &str) -> Result<()> {
        let output = self.output.clone();
        let database = self.database_mut(db)?;
        database.flushes += 1;
        if let Some(dir) = output {
            let snapshot = serialize_all(&database.tree);
            Self::write_file(&dir, &format!("{}.xml", db), snapshot.as_bytes())?;
        }
        Ok(())
    }

    fn write(&mut self, uri: &str, content: &[u8]) -> Result<()> {
        match &self.output {
            Some(dir) => Self::write_file(dir, uri, content),
            None => {
                self.written.insert(uri.to_string(), content.to_vec());
                Ok(())
            }
        }
    }
}
