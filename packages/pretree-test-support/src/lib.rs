//! Shared fixtures for pretree conformance suites.
//!
//! - [`TrackedTree`] wraps a [`MemoryTree`] and gives every row a stable identity,
//!   so tests can check which node each store call actually touched.
//! - [`Oracle`] replays a batch with pointer semantics (nodes addressed by
//!   identity, never by position) as a reference for the positional engine.

use std::collections::BTreeMap;

use pretree_core::{
    normalize, serialize_all, Catalog, Clip, Error, Fragment, MemoryTree, NodeKind, Pre,
    Primitive, PrimitiveKind, PrimitiveType, QName, Result, TreeStore,
};

/// Stable identity of a row in a [`TrackedTree`]. Rows present at construction
/// get their initial pre value as id.
pub type RowId = u64;

/// One mutating call received by a [`TrackedTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Insert { parent: Option<RowId>, count: usize },
    InsertAttr { parent: RowId, count: usize },
    Delete { node: RowId, size: usize },
    Replace { node: RowId },
    Rename { node: RowId },
}

/// Store wrapper that records every mutation by row identity.
#[derive(Clone, Debug, Default)]
pub struct TrackedTree {
    inner: MemoryTree,
    ids: Vec<RowId>,
    next: RowId,
    calls: Vec<Call>,
}

impl TrackedTree {
    pub fn new(inner: MemoryTree) -> Self {
        let ids: Vec<RowId> = (0..inner.len() as RowId).collect();
        Self {
            next: ids.len() as RowId,
            ids,
            inner,
            calls: Vec::new(),
        }
    }

    pub fn inner(&self) -> &MemoryTree {
        &self.inner
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn id_at(&self, pre: Pre) -> RowId {
        self.ids[pre]
    }

    pub fn pre_of(&self, id: RowId) -> Option<Pre> {
        self.ids.iter().position(|&row| row == id)
    }

    fn splice_new(&mut self, pre: Pre, count: usize) {
        let start = self.next;
        self.next += count as RowId;
        self.ids.splice(pre..pre, start..self.next);
    }
}

impl TreeStore for TrackedTree {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn kind(&self, pre: Pre) -> NodeKind {
        self.inner.kind(pre)
    }

    fn parent(&self, pre: Pre, kind: NodeKind) -> Option<Pre> {
        self.inner.parent(pre, kind)
    }

    fn size(&self, pre: Pre, kind: NodeKind) -> usize {
        self.inner.size(pre, kind)
    }

    fn att_size(&self, pre: Pre, kind: NodeKind) -> usize {
        self.inner.att_size(pre, kind)
    }

    fn name(&self, pre: Pre, kind: NodeKind) -> Option<&QName> {
        self.inner.name(pre, kind)
    }

    fn value(&self, pre: Pre, kind: NodeKind) -> Option<&str> {
        self.inner.value(pre, kind)
    }

    fn insert(&mut self, pre: Pre, parent: Option<Pre>, clip: &Clip) -> Result<()> {
        self.inner.insert(pre, parent, clip)?;
        self.calls.push(Call::Insert {
            parent: parent.map(|p| self.ids[p]),
            count: clip.len(),
        });
        self.splice_new(pre, clip.len());
        Ok(())
    }

    fn insert_attr(&mut self, pre: Pre, parent: Pre, clip: &Clip) -> Result<()> {
        self.inner.insert_attr(pre, parent, clip)?;
        self.calls.push(Call::InsertAttr {
            parent: self.ids[parent],
            count: clip.len(),
        });
        self.splice_new(pre, clip.len());
        Ok(())
    }

    fn delete(&mut self, pre: Pre) -> Result<()> {
        let size = self.inner.size(pre, self.inner.kind(pre));
        self.inner.delete(pre)?;
        self.calls.push(Call::Delete {
            node: self.ids[pre],
            size,
        });
        self.ids.drain(pre..pre + size);
        Ok(())
    }

    fn replace(&mut self, pre: Pre, kind: NodeKind, value: &str) -> Result<()> {
        self.inner.replace(pre, kind, value)?;
        self.calls.push(Call::Replace {
            node: self.ids[pre],
        });
        Ok(())
    }

    fn rename(&mut self, pre: Pre, kind: NodeKind, name: &QName) -> Result<()> {
        self.inner.rename(pre, kind, name)?;
        self.calls.push(Call::Rename {
            node: self.ids[pre],
        });
        Ok(())
    }

    fn optimize(&mut self) -> Result<()> {
        self.inner.optimize()
    }

    fn validate(&self) -> Result<()> {
        self.inner.validate()
    }
}

/// Catalog holding a single [`TrackedTree`] database; puts are kept in memory.
#[derive(Clone, Debug)]
pub struct TrackedCatalog {
    name: String,
    pub tree: TrackedTree,
    pub written: BTreeMap<String, Vec<u8>>,
}

impl TrackedCatalog {
    pub fn new(name: impl Into<String>, tree: MemoryTree) -> Self {
        Self {
            name: name.into(),
            tree: TrackedTree::new(tree),
            written: BTreeMap::new(),
        }
    }

    fn unsupported(&self, what: &str) -> Error {
        Error::InvalidOperation(format!("{} is not supported on tracked database '{}'", what, self.name))
    }
}

impl Catalog for TrackedCatalog {
    type Store = TrackedTree;

    fn contains(&self, db: &str) -> bool {
        db == self.name
    }

    fn store(&self, db: &str) -> Option<&TrackedTree> {
        (db == self.name).then_some(&self.tree)
    }

    fn store_mut(&mut self, db: &str) -> Option<&mut TrackedTree> {
        if db == self.name {
            Some(&mut self.tree)
        } else {
            None
        }
    }

    fn new_store(&self) -> TrackedTree {
        TrackedTree::default()
    }

    fn install(&mut self, _db: &str, _store: TrackedTree) -> Result<()> {
        Err(self.unsupported("create"))
    }

    fn drop_database(&mut self, _db: &str) -> Result<()> {
        Err(self.unsupported("drop"))
    }

    fn store_resource(&mut self, _db: &str, _path: &str, _data: &[u8]) -> Result<()> {
        Err(self.unsupported("store"))
    }

    fn rename_resources(&mut self, _db: &str, _from: &str, _to: &str) -> Result<usize> {
        Ok(0)
    }

    fn delete_resources(&mut self, _db: &str, _path: &str) -> Result<usize> {
        Ok(0)
    }

    fn optimize(&mut self, _db: &str, _all: bool) -> Result<()> {
        self.tree.optimize()
    }

    fn flush(&mut self, _db: &str) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, uri: &str, content: &[u8]) -> Result<()> {
        self.written.insert(uri.to_string(), content.to_vec());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Presence {
    Live,
    /// Removed itself; siblings inserted before it still land at its place.
    Anchor,
    /// Removed as part of an emptied element.
    Gone,
}

#[derive(Clone, Debug)]
struct OracleNode {
    kind: NodeKind,
    name: Option<QName>,
    value: String,
    parent: Option<usize>,
    attributes: Vec<usize>,
    children: Vec<usize>,
    presence: Presence,
}

/// Identity-addressed reference model of one document.
///
/// Nodes never move in memory; removed nodes stay in their parent's child list
/// as markers, so "insert before a removed node" keeps a well-defined place.
#[derive(Clone, Debug)]
pub struct Oracle {
    nodes: Vec<OracleNode>,
    path: String,
}

impl Oracle {
    /// Builds the model from the first document of `store`. Node `i` of the
    /// model is the row with pre value `i`.
    pub fn new<S: TreeStore + ?Sized>(store: &S) -> Self {
        let mut nodes: Vec<OracleNode> = Vec::with_capacity(store.len());
        for pre in 0..store.len() {
            let kind = store.kind(pre);
            let parent = store.parent(pre, kind);
            nodes.push(OracleNode {
                kind,
                name: store.name(pre, kind).cloned(),
                value: store.value(pre, kind).unwrap_or_default().to_string(),
                parent,
                attributes: Vec::new(),
                children: Vec::new(),
                presence: Presence::Live,
            });
            if let Some(p) = parent {
                if kind == NodeKind::Attribute {
                    nodes[p].attributes.push(pre);
                } else {
                    nodes[p].children.push(pre);
                }
            }
        }
        let path = nodes.first().map(|n| n.value.clone()).unwrap_or_default();
        Self { nodes, path }
    }

    /// Applies a batch of primitives whose targets are pre values of the
    /// document the model was built from. Puts are not modelled.
    pub fn apply(&mut self, batch: &[Primitive]) -> Result<()> {
        let mut merged: BTreeMap<(PrimitiveType, Pre), Primitive> = BTreeMap::new();
        for primitive in batch {
            let key = (primitive.primitive_type(), primitive.target.pre);
            match merged.get_mut(&key) {
                Some(existing) => existing.merge(primitive.clone())?,
                None => {
                    merged.insert(key, primitive.clone());
                }
            }
        }
        for ((kind, id), primitive) in merged {
            self.apply_one(kind, id, &primitive.kind);
        }
        Ok(())
    }

    fn apply_one(&mut self, kind: PrimitiveType, id: usize, primitive: &PrimitiveKind) {
        let live = self.is_live(id);
        if kind == PrimitiveType::InsertBefore {
            let anchored = self.nodes[id].presence == Presence::Anchor
                && self.nodes[id].parent.is_some_and(|p| self.is_live(p));
            if !(live || anchored) {
                return;
            }
        } else if !live {
            return;
        }
        match primitive {
            PrimitiveKind::InsertBefore(payload) => self.insert_sibling(id, payload, 0),
            PrimitiveKind::InsertAfter(payload) => self.insert_sibling(id, payload, 1),
            PrimitiveKind::InsertInto(payload) | PrimitiveKind::InsertIntoLast(payload) => {
                let at = self.nodes[id].children.len();
                self.insert_children(id, at, payload);
            }
            PrimitiveKind::InsertIntoFirst(payload) => self.insert_children(id, 0, payload),
            PrimitiveKind::Delete => self.nodes[id].presence = Presence::Anchor,
            PrimitiveKind::Rename(name) => self.nodes[id].name = Some(name.clone()),
            PrimitiveKind::ReplaceValue(value) => {
                if self.nodes[id].kind == NodeKind::Text && value.is_empty() {
                    self.nodes[id].presence = Presence::Anchor;
                } else {
                    self.nodes[id].value = value.clone();
                }
            }
            PrimitiveKind::ReplaceElementContent(value) => {
                for child in self.nodes[id].children.clone() {
                    self.nodes[child].presence = Presence::Gone;
                }
                let at = self.nodes[id].children.len();
                self.insert_children(id, at, &[Fragment::text(value.clone())]);
            }
            PrimitiveKind::ReplaceNode(payload) if self.nodes[id].kind == NodeKind::Attribute => {
                if let Some(parent) = self.nodes[id].parent {
                    let index = self.nodes[parent]
                        .attributes
                        .iter()
                        .position(|&att| att == id)
                        .unwrap_or(0);
                    self.insert_attributes(parent, index, payload);
                }
                self.nodes[id].presence = Presence::Anchor;
            }
            PrimitiveKind::ReplaceNode(payload) => {
                self.insert_sibling(id, payload, 1);
                self.nodes[id].presence = Presence::Anchor;
            }
            PrimitiveKind::InsertAttribute(payload) => self.insert_attributes(id, 0, payload),
            PrimitiveKind::Put(_) => {}
        }
    }

    fn is_live(&self, id: usize) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.nodes[node].presence != Presence::Live {
                return false;
            }
            current = self.nodes[node].parent;
        }
        true
    }

    fn insert_sibling(&mut self, id: usize, payload: &[Fragment], offset: usize) {
        let Some(parent) = self.nodes[id].parent else {
            return;
        };
        let index = self.nodes[parent]
            .children
            .iter()
            .position(|&child| child == id)
            .unwrap_or(0);
        self.insert_children(parent, index + offset, payload);
    }

    fn insert_children(&mut self, parent: usize, at: usize, payload: &[Fragment]) {
        let mut created = Vec::new();
        for fragment in normalize(payload) {
            created.push(self.build(&fragment, parent));
        }
        let children = &mut self.nodes[parent].children;
        let tail = children.split_off(at.min(children.len()));
        children.extend(created);
        children.extend(tail);
    }

    fn insert_attributes(&mut self, element: usize, at: usize, payload: &[Fragment]) {
        let created: Vec<usize> = payload
            .iter()
            .filter(|fragment| fragment.kind() == NodeKind::Attribute)
            .map(|fragment| self.build(fragment, element))
            .collect();
        let attributes = &mut self.nodes[element].attributes;
        let tail = attributes.split_off(at.min(attributes.len()));
        attributes.extend(created);
        attributes.extend(tail);
    }

    fn build(&mut self, fragment: &Fragment, parent: usize) -> usize {
        let id = self.nodes.len();
        let (name, value) = match fragment {
            Fragment::Element { name, .. } | Fragment::Attribute { name, .. } => {
                (Some(name.clone()), String::new())
            }
            Fragment::ProcessingInstruction { target, value } => {
                (Some(QName::new(target.clone())), value.clone())
            }
            Fragment::Text(value) | Fragment::Comment(value) => (None, value.clone()),
            Fragment::Document { path, .. } => (None, path.clone()),
        };
        let value = match fragment {
            Fragment::Attribute { value, .. } => value.clone(),
            _ => value,
        };
        self.nodes.push(OracleNode {
            kind: fragment.kind(),
            name,
            value,
            parent: Some(parent),
            attributes: Vec::new(),
            children: Vec::new(),
            presence: Presence::Live,
        });
        if let Fragment::Element {
            attributes,
            children,
            ..
        } = fragment
        {
            for (name, value) in attributes {
                let att = self.build(&Fragment::attribute(name.clone(), value.clone()), id);
                self.nodes[id].attributes.push(att);
            }
            for child in children {
                let child = self.build(child, id);
                self.nodes[id].children.push(child);
            }
        }
        id
    }

    /// Live content of the document as fragments.
    pub fn to_fragments(&self) -> Vec<Fragment> {
        match self.nodes.first() {
            Some(_) => self.children_of(0),
            None => Vec::new(),
        }
    }

    fn children_of(&self, id: usize) -> Vec<Fragment> {
        self.nodes[id]
            .children
            .iter()
            .filter(|&&child| self.nodes[child].presence == Presence::Live)
            .map(|&child| self.fragment(child))
            .collect()
    }

    fn fragment(&self, id: usize) -> Fragment {
        let node = &self.nodes[id];
        let name = || node.name.clone().unwrap_or_else(|| QName::new(""));
        match node.kind {
            NodeKind::Element => Fragment::Element {
                name: name(),
                attributes: node
                    .attributes
                    .iter()
                    .filter(|&&att| self.nodes[att].presence == Presence::Live)
                    .map(|&att| {
                        let att = &self.nodes[att];
                        (att.name.clone().unwrap_or_else(|| QName::new("")), att.value.clone())
                    })
                    .collect(),
                children: self.children_of(id),
            },
            NodeKind::Attribute => Fragment::attribute(name(), node.value.clone()),
            NodeKind::Text => Fragment::text(node.value.clone()),
            NodeKind::Comment => Fragment::comment(node.value.clone()),
            NodeKind::ProcessingInstruction => Fragment::pi(name().local, node.value.clone()),
            NodeKind::Document => Fragment::Document {
                path: node.value.clone(),
                children: self.children_of(id),
            },
        }
    }

    /// Serialization of the model, comparable with the engine's stores.
    pub fn serialize(&self) -> String {
        serialize_all(&MemoryTree::with_document(&self.path, self.to_fragments()))
    }
}

/// `<a><b>x</b></a>`: 0 document, 1 `a`, 2 `b`, 3 text `x`.
pub fn sample_tree() -> MemoryTree {
    MemoryTree::with_document(
        "doc.xml",
        vec![Fragment::element("a").with_child(Fragment::element("b").with_child(Fragment::text("x")))],
    )
}

/// Single-document tree at `doc.xml` holding `children`.
pub fn tree_of(children: Vec<Fragment>) -> MemoryTree {
    MemoryTree::with_document("doc.xml", children)
}
