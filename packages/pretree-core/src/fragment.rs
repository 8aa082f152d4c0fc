//! Detached payloads.
//!
//! A [`Fragment`] is the tree form in which callers hand nodes to the engine; a
//! [`Clip`] is the flat, store-independent buffer that `prepare()` builds from a
//! fragment list and that the store copies rows from. Neither ever borrows from a
//! live store.

use crate::ids::{NodeKind, Pre, QName};
use crate::traits::TreeStore;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node tree used as insertion payload.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Fragment {
    Document {
        path: String,
        children: Vec<Fragment>,
    },
    Element {
        name: QName,
        attributes: Vec<(QName, String)>,
        children: Vec<Fragment>,
    },
    Attribute {
        name: QName,
        value: String,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        value: String,
    },
}

impl Fragment {
    pub fn document(path: impl Into<String>) -> Self {
        Fragment::Document {
            path: path.into(),
            children: Vec::new(),
        }
    }

    pub fn element(name: impl Into<QName>) -> Self {
        Fragment::Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(name: impl Into<QName>, value: impl Into<String>) -> Self {
        Fragment::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Fragment::Text(value.into())
    }

    pub fn comment(value: impl Into<String>) -> Self {
        Fragment::Comment(value.into())
    }

    pub fn pi(target: impl Into<String>, value: impl Into<String>) -> Self {
        Fragment::ProcessingInstruction {
            target: target.into(),
            value: value.into(),
        }
    }

    /// Adds an attribute to an element; other kinds are returned unchanged.
    pub fn with_attribute(mut self, name: impl Into<QName>, value: impl Into<String>) -> Self {
        if let Fragment::Element { attributes, .. } = &mut self {
            attributes.push((name.into(), value.into()));
        }
        self
    }

    /// Appends a child to a document or element; attributes added to an element
    /// land in its attribute list. Other kinds are returned unchanged.
    pub fn with_child(mut self, child: Fragment) -> Self {
        match (&mut self, child) {
            (Fragment::Element { attributes, .. }, Fragment::Attribute { name, value }) => {
                attributes.push((name, value));
            }
            (Fragment::Document { children, .. } | Fragment::Element { children, .. }, child) => {
                children.push(child);
            }
            _ => {}
        }
        self
    }

    pub fn with_children(self, children: impl IntoIterator<Item = Fragment>) -> Self {
        children.into_iter().fold(self, Fragment::with_child)
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Fragment::Document { .. } => NodeKind::Document,
            Fragment::Element { .. } => NodeKind::Element,
            Fragment::Attribute { .. } => NodeKind::Attribute,
            Fragment::Text(_) => NodeKind::Text,
            Fragment::Comment(_) => NodeKind::Comment,
            Fragment::ProcessingInstruction { .. } => NodeKind::ProcessingInstruction,
        }
    }

    /// Materializes the subtree rooted at `pre` into a detached fragment.
    pub fn copy_of<S: TreeStore + ?Sized>(store: &S, pre: Pre) -> Fragment {
        let kind = store.kind(pre);
        let name = || store.name(pre, kind).cloned().unwrap_or_else(|| QName::new(""));
        let value = || store.value(pre, kind).unwrap_or_default().to_string();
        match kind {
            NodeKind::Document | NodeKind::Element => {
                let end = pre + store.size(pre, kind);
                let mut child = pre + store.att_size(pre, kind);
                let mut children = Vec::new();
                while child < end {
                    children.push(Fragment::copy_of(store, child));
                    child += store.size(child, store.kind(child));
                }
                if kind == NodeKind::Document {
                    return Fragment::Document {
                        path: value(),
                        children,
                    };
                }
                let attributes = (pre + 1..pre + store.att_size(pre, kind))
                    .map(|att| {
                        let name = store
                            .name(att, NodeKind::Attribute)
                            .cloned()
                            .unwrap_or_else(|| QName::new(""));
                        let value = store
                            .value(att, NodeKind::Attribute)
                            .unwrap_or_default()
                            .to_string();
                        (name, value)
                    })
                    .collect();
                Fragment::Element {
                    name: name(),
                    attributes,
                    children,
                }
            }
            NodeKind::Attribute => Fragment::Attribute {
                name: name(),
                value: value(),
            },
            NodeKind::Text => Fragment::Text(value()),
            NodeKind::Comment => Fragment::Comment(value()),
            NodeKind::ProcessingInstruction => Fragment::ProcessingInstruction {
                target: name().local,
                value: value(),
            },
        }
    }
}

/// Normalizes an insertion sequence: document nodes are replaced by their
/// children, empty texts are dropped and adjacent texts are concatenated, at
/// every level of the sequence.
pub fn normalize(fragments: &[Fragment]) -> Vec<Fragment> {
    let mut out: Vec<Fragment> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        match fragment {
            Fragment::Document { children, .. } => {
                for child in normalize(children) {
                    push_merged(&mut out, child);
                }
            }
            Fragment::Element {
                name,
                attributes,
                children,
            } => out.push(Fragment::Element {
                name: name.clone(),
                attributes: attributes.clone(),
                children: normalize(children),
            }),
            other => push_merged(&mut out, other.clone()),
        }
    }
    out
}

fn push_merged(out: &mut Vec<Fragment>, fragment: Fragment) {
    match (out.last_mut(), fragment) {
        (_, Fragment::Text(text)) if text.is_empty() => {}
        (Some(Fragment::Text(prev)), Fragment::Text(text)) => prev.push_str(&text),
        (_, fragment) => out.push(fragment),
    }
}

/// One row of a [`Clip`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipNode {
    pub kind: NodeKind,
    /// Distance to the parent row inside the clip; `0` for top-level rows.
    pub dist: usize,
    pub size: usize,
    /// Attribute rows plus the node itself (`1` for non-elements).
    pub att_size: usize,
    pub name: Option<QName>,
    pub value: String,
}

/// Flat, store-independent node buffer in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Clip {
    nodes: Vec<ClipNode>,
}

impl Clip {
    /// Flattens the fragments as given; callers normalize first when needed.
    pub fn from_fragments(fragments: &[Fragment]) -> Self {
        let mut clip = Clip::default();
        for fragment in fragments {
            clip.push(fragment, None);
        }
        clip
    }

    /// Rows of a document fragment with normalized children. Any other kind is
    /// flattened as is.
    pub fn document(document: &Fragment) -> Self {
        match document {
            Fragment::Document { path, children } => Clip::from_fragments(&[Fragment::Document {
                path: path.clone(),
                children: normalize(children),
            }]),
            other => Clip::from_fragments(std::slice::from_ref(other)),
        }
    }

    /// Single text row, or an empty clip for an empty value.
    pub fn text(value: &str) -> Self {
        if value.is_empty() {
            return Clip::default();
        }
        Clip::from_fragments(&[Fragment::text(value)])
    }

    pub fn nodes(&self) -> &[ClipNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level rows of the clip.
    pub fn roots(&self) -> impl Iterator<Item = &ClipNode> + '_ {
        let mut next = 0;
        self.nodes.iter().enumerate().filter_map(move |(pre, node)| {
            if pre != next {
                return None;
            }
            next += node.size;
            Some(node)
        })
    }

    /// Value of the clip when it consists of exactly one text row.
    pub fn single_text(&self) -> Option<&str> {
        match self.nodes.as_slice() {
            [node] if node.kind == NodeKind::Text => Some(&node.value),
            _ => None,
        }
    }

    /// Whether any attribute row sits outside the attribute area of an element.
    pub fn has_misplaced_attributes(&self) -> bool {
        self.nodes.iter().enumerate().any(|(pre, node)| {
            if node.kind != NodeKind::Attribute || node.dist == 0 {
                return false;
            }
            let parent = &self.nodes[pre - node.dist];
            parent.kind != NodeKind::Element || pre >= pre - node.dist + parent.att_size
        })
    }

    fn push(&mut self, fragment: &Fragment, parent: Option<usize>) {
        let pre = self.nodes.len();
        let dist = parent.map_or(0, |p| pre - p);
        let leaf = |kind, name, value: &str| ClipNode {
            kind,
            dist,
            size: 1,
            att_size: 1,
            name,
            value: value.to_string(),
        };
        match fragment {
            Fragment::Document { path, children } => {
                self.nodes.push(leaf(NodeKind::Document, None, path));
                for child in children {
                    self.push(child, Some(pre));
                }
                self.nodes[pre].size = self.nodes.len() - pre;
            }
            Fragment::Element {
                name,
                attributes,
                children,
            } => {
                self.nodes
                    .push(leaf(NodeKind::Element, Some(name.clone()), ""));
                for (offset, (att, value)) in attributes.iter().enumerate() {
                    self.nodes.push(ClipNode {
                        kind: NodeKind::Attribute,
                        dist: offset + 1,
                        size: 1,
                        att_size: 1,
                        name: Some(att.clone()),
                        value: value.clone(),
                    });
                }
                for child in children {
                    self.push(child, Some(pre));
                }
                let len = self.nodes.len();
                let node = &mut self.nodes[pre];
                node.att_size = attributes.len() + 1;
                node.size = len - pre;
            }
            Fragment::Attribute { name, value } => {
                self.nodes
                    .push(leaf(NodeKind::Attribute, Some(name.clone()), value));
            }
            Fragment::Text(value) => self.nodes.push(leaf(NodeKind::Text, None, value)),
            Fragment::Comment(value) => self.nodes.push(leaf(NodeKind::Comment, None, value)),
            Fragment::ProcessingInstruction { target, value } => self.nodes.push(leaf(
                NodeKind::ProcessingInstruction,
                Some(QName::new(target.as_str())),
                value,
            )),
        }
    }
}
