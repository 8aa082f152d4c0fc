use std::fmt;

use crate::error::{Error, Result};
use crate::fragment::{normalize, Clip, Fragment};
use crate::ids::{NodeKind, Pre, QName, Target};
use crate::serialize::serialize;
use crate::traits::TreeStore;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node-level primitive kinds in application order.
///
/// The derived `Ord` is the order in which kind groups are applied: kinds that
/// only add rows at or below a node's end run first, kinds that read the updated
/// node (`Put`) run before kinds that remove it, and `InsertBefore`, the only kind
/// that inserts at the unshifted target position, runs last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrimitiveType {
    InsertAfter,
    InsertInto,
    InsertIntoLast,
    InsertAttribute,
    InsertIntoFirst,
    ReplaceElementContent,
    ReplaceValue,
    Rename,
    Put,
    ReplaceNode,
    Delete,
    InsertBefore,
}

impl PrimitiveType {
    /// All kinds in application order.
    pub const ORDER: [PrimitiveType; 12] = [
        PrimitiveType::InsertAfter,
        PrimitiveType::InsertInto,
        PrimitiveType::InsertIntoLast,
        PrimitiveType::InsertAttribute,
        PrimitiveType::InsertIntoFirst,
        PrimitiveType::ReplaceElementContent,
        PrimitiveType::ReplaceValue,
        PrimitiveType::Rename,
        PrimitiveType::Put,
        PrimitiveType::ReplaceNode,
        PrimitiveType::Delete,
        PrimitiveType::InsertBefore,
    ];

    /// Insert kinds merge by concatenating payloads.
    pub fn is_insert(self) -> bool {
        matches!(
            self,
            PrimitiveType::InsertBefore
                | PrimitiveType::InsertAfter
                | PrimitiveType::InsertInto
                | PrimitiveType::InsertIntoFirst
                | PrimitiveType::InsertIntoLast
                | PrimitiveType::InsertAttribute
        )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::InsertAfter => "insert-after",
            PrimitiveType::InsertInto => "insert-into",
            PrimitiveType::InsertIntoLast => "insert-into-last",
            PrimitiveType::InsertAttribute => "insert-attribute",
            PrimitiveType::InsertIntoFirst => "insert-into-first",
            PrimitiveType::ReplaceElementContent => "replace-element-content",
            PrimitiveType::ReplaceValue => "replace-value",
            PrimitiveType::Rename => "rename",
            PrimitiveType::Put => "put",
            PrimitiveType::ReplaceNode => "replace-node",
            PrimitiveType::Delete => "delete",
            PrimitiveType::InsertBefore => "insert-before",
        };
        f.write_str(name)
    }
}

/// Kind-specific part of a primitive.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrimitiveKind {
    InsertBefore(Vec<Fragment>),
    InsertAfter(Vec<Fragment>),
    InsertInto(Vec<Fragment>),
    InsertIntoFirst(Vec<Fragment>),
    InsertIntoLast(Vec<Fragment>),
    InsertAttribute(Vec<Fragment>),
    Delete,
    Rename(QName),
    ReplaceNode(Vec<Fragment>),
    ReplaceValue(String),
    ReplaceElementContent(String),
    /// Resource URIs the serialized target is written to.
    Put(Vec<String>),
}

/// One mutation intent against a single node.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Primitive {
    pub target: Target,
    pub kind: PrimitiveKind,
}

impl Primitive {
    pub fn new(target: Target, kind: PrimitiveKind) -> Self {
        Self { target, kind }
    }

    pub fn insert_before(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::InsertBefore(payload.into_iter().collect()))
    }

    pub fn insert_after(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::InsertAfter(payload.into_iter().collect()))
    }

    pub fn insert_into(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::InsertInto(payload.into_iter().collect()))
    }

    pub fn insert_into_first(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::InsertIntoFirst(payload.into_iter().collect()))
    }

    pub fn insert_into_last(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::InsertIntoLast(payload.into_iter().collect()))
    }

    pub fn insert_attribute(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::InsertAttribute(payload.into_iter().collect()))
    }

    pub fn delete(target: Target) -> Self {
        Self::new(target, PrimitiveKind::Delete)
    }

    pub fn rename(target: Target, name: impl Into<QName>) -> Self {
        Self::new(target, PrimitiveKind::Rename(name.into()))
    }

    pub fn replace_node(target: Target, payload: impl IntoIterator<Item = Fragment>) -> Self {
        Self::new(target, PrimitiveKind::ReplaceNode(payload.into_iter().collect()))
    }

    pub fn replace_value(target: Target, value: impl Into<String>) -> Self {
        Self::new(target, PrimitiveKind::ReplaceValue(value.into()))
    }

    pub fn replace_element_content(target: Target, value: impl Into<String>) -> Self {
        Self::new(target, PrimitiveKind::ReplaceElementContent(value.into()))
    }

    pub fn put(target: Target, uri: impl Into<String>) -> Self {
        Self::new(target, PrimitiveKind::Put(vec![uri.into()]))
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        match self.kind {
            PrimitiveKind::InsertBefore(_) => PrimitiveType::InsertBefore,
            PrimitiveKind::InsertAfter(_) => PrimitiveType::InsertAfter,
            PrimitiveKind::InsertInto(_) => PrimitiveType::InsertInto,
            PrimitiveKind::InsertIntoFirst(_) => PrimitiveType::InsertIntoFirst,
            PrimitiveKind::InsertIntoLast(_) => PrimitiveType::InsertIntoLast,
            PrimitiveKind::InsertAttribute(_) => PrimitiveType::InsertAttribute,
            PrimitiveKind::Delete => PrimitiveType::Delete,
            PrimitiveKind::Rename(_) => PrimitiveType::Rename,
            PrimitiveKind::ReplaceNode(_) => PrimitiveType::ReplaceNode,
            PrimitiveKind::ReplaceValue(_) => PrimitiveType::ReplaceValue,
            PrimitiveKind::ReplaceElementContent(_) => PrimitiveType::ReplaceElementContent,
            PrimitiveKind::Put(_) => PrimitiveType::Put,
        }
    }

    /// Payload fragments of insert and replace-node primitives.
    pub fn payload(&self) -> Option<&[Fragment]> {
        match &self.kind {
            PrimitiveKind::InsertBefore(payload)
            | PrimitiveKind::InsertAfter(payload)
            | PrimitiveKind::InsertInto(payload)
            | PrimitiveKind::InsertIntoFirst(payload)
            | PrimitiveKind::InsertIntoLast(payload)
            | PrimitiveKind::InsertAttribute(payload)
            | PrimitiveKind::ReplaceNode(payload) => Some(payload),
            _ => None,
        }
    }

    /// Folds `other` into `self`. Both must share target and kind.
    ///
    /// Insert payloads are concatenated in arrival order, deletes and puts
    /// combine, and a second rename or replacement is a merge conflict.
    pub fn merge(&mut self, other: Primitive) -> Result<()> {
        let kind = self.primitive_type();
        if self.target != other.target || kind != other.primitive_type() {
            return Err(Error::InvalidOperation(format!(
                "cannot merge {} on {} into {} on {}",
                other.primitive_type(),
                other.target,
                kind,
                self.target
            )));
        }
        match (&mut self.kind, other.kind) {
            (PrimitiveKind::InsertBefore(ours), PrimitiveKind::InsertBefore(theirs))
            | (PrimitiveKind::InsertAfter(ours), PrimitiveKind::InsertAfter(theirs))
            | (PrimitiveKind::InsertInto(ours), PrimitiveKind::InsertInto(theirs))
            | (PrimitiveKind::InsertIntoFirst(ours), PrimitiveKind::InsertIntoFirst(theirs))
            | (PrimitiveKind::InsertIntoLast(ours), PrimitiveKind::InsertIntoLast(theirs))
            | (PrimitiveKind::InsertAttribute(ours), PrimitiveKind::InsertAttribute(theirs)) => {
                ours.extend(theirs);
                Ok(())
            }
            (PrimitiveKind::Delete, PrimitiveKind::Delete) => Ok(()),
            (PrimitiveKind::Put(ours), PrimitiveKind::Put(theirs)) => {
                for uri in theirs {
                    if !ours.contains(&uri) {
                        ours.push(uri);
                    }
                }
                Ok(())
            }
            _ => Err(Error::MergeConflict {
                target: self.target.clone(),
                kind,
            }),
        }
    }

    /// Checks the target and payload kinds against the store as it is before the
    /// batch and builds the detached payload buffer.
    pub fn prepare<S: TreeStore + ?Sized>(self, store: &S) -> Result<Prepared> {
        let pre = self.target.pre;
        if pre >= store.len() {
            return Err(Error::TargetOutOfRange {
                target: self.target.clone(),
                len: store.len(),
            });
        }
        let kind = store.kind(pre);
        let node = NodeInfo {
            kind,
            size: store.size(pre, kind),
            att_size: store.att_size(pre, kind),
            parent: store.parent(pre, kind),
        };
        let mismatch = |reason: String| Error::KindMismatch {
            target: self.target.clone(),
            reason,
        };
        let clip = match &self.kind {
            PrimitiveKind::InsertBefore(payload) | PrimitiveKind::InsertAfter(payload) => {
                if matches!(kind, NodeKind::Attribute | NodeKind::Document) || node.parent.is_none() {
                    return Err(mismatch(format!("cannot insert next to a {} node", kind)));
                }
                children_clip(payload).map_err(mismatch)?
            }
            PrimitiveKind::InsertInto(payload)
            | PrimitiveKind::InsertIntoFirst(payload)
            | PrimitiveKind::InsertIntoLast(payload) => {
                if !kind.has_children() {
                    return Err(mismatch(format!("cannot insert into a {} node", kind)));
                }
                children_clip(payload).map_err(mismatch)?
            }
            PrimitiveKind::InsertAttribute(payload) => {
                if kind != NodeKind::Element {
                    return Err(mismatch(format!("cannot add attributes to a {} node", kind)));
                }
                attribute_clip(payload).map_err(mismatch)?
            }
            PrimitiveKind::ReplaceNode(payload) => match kind {
                NodeKind::Document => return Err(mismatch("cannot replace a document node".into())),
                NodeKind::Attribute => attribute_clip(payload).map_err(mismatch)?,
                _ => children_clip(payload).map_err(mismatch)?,
            },
            PrimitiveKind::Delete => {
                if kind == NodeKind::Document {
                    return Err(mismatch("documents are deleted through database operations".into()));
                }
                Clip::default()
            }
            PrimitiveKind::Rename(_) => {
                if !kind.is_named() {
                    return Err(mismatch(format!("cannot rename a {} node", kind)));
                }
                Clip::default()
            }
            PrimitiveKind::ReplaceValue(value) => {
                check_value(kind, value).map_err(mismatch)?;
                Clip::default()
            }
            PrimitiveKind::ReplaceElementContent(value) => {
                if kind != NodeKind::Element {
                    return Err(mismatch(format!("cannot replace the content of a {} node", kind)));
                }
                Clip::text(value)
            }
            PrimitiveKind::Put(_) => {
                if !kind.has_children() {
                    return Err(mismatch(format!("cannot put a {} node", kind)));
                }
                Clip::default()
            }
        };
        Ok(Prepared {
            primitive: self,
            node,
            clip,
        })
    }
}

fn children_clip(payload: &[Fragment]) -> std::result::Result<Clip, String> {
    let fragments = normalize(payload);
    if let Some(attribute) = fragments.iter().find(|f| f.kind() == NodeKind::Attribute) {
        return Err(format!("unexpected attribute in payload: {:?}", attribute));
    }
    let clip = Clip::from_fragments(&fragments);
    if clip.has_misplaced_attributes() {
        return Err("payload contains attributes outside an attribute list".into());
    }
    Ok(clip)
}

fn attribute_clip(payload: &[Fragment]) -> std::result::Result<Clip, String> {
    if let Some(other) = payload.iter().find(|f| f.kind() != NodeKind::Attribute) {
        return Err(format!("expected attributes, found a {} node", other.kind()));
    }
    Ok(Clip::from_fragments(payload))
}

fn check_value(kind: NodeKind, value: &str) -> std::result::Result<(), String> {
    match kind {
        NodeKind::Attribute | NodeKind::Text => Ok(()),
        NodeKind::Comment if value.contains("--") || value.ends_with('-') => {
            Err(format!("invalid comment content: {:?}", value))
        }
        NodeKind::ProcessingInstruction if value.contains("?>") => {
            Err(format!("invalid processing-instruction content: {:?}", value))
        }
        NodeKind::Comment | NodeKind::ProcessingInstruction => Ok(()),
        NodeKind::Element | NodeKind::Document => {
            Err(format!("cannot replace the value of a {} node", kind))
        }
    }
}

/// Shape of the target node before the batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub kind: NodeKind,
    pub size: usize,
    pub att_size: usize,
    pub parent: Option<Pre>,
}

/// Current position of a primitive's target, and of the parent new siblings go under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub pre: Pre,
    pub parent: Option<Pre>,
}

/// What one `apply` call did to the table, in current coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    Inserted { at: Pre, count: usize },
    Removed { at: Pre, count: usize },
    Replaced { at: Pre, removed: usize, inserted: usize },
    Serialized(String),
}

impl Effect {
    /// Net change in the number of rows.
    pub fn shift(&self) -> isize {
        match *self {
            Effect::Inserted { count, .. } => count as isize,
            Effect::Removed { count, .. } => -(count as isize),
            Effect::Replaced {
                removed, inserted, ..
            } => inserted as isize - removed as isize,
            Effect::None | Effect::Serialized(_) => 0,
        }
    }
}

/// A validated primitive with its detached payload.
#[derive(Clone, Debug)]
pub struct Prepared {
    primitive: Primitive,
    node: NodeInfo,
    clip: Clip,
}

impl Prepared {
    pub fn primitive(&self) -> &Primitive {
        &self.primitive
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive.primitive_type()
    }

    pub fn target(&self) -> &Target {
        &self.primitive.target
    }

    /// Target shape before the batch.
    pub fn node(&self) -> NodeInfo {
        self.node
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }

    /// Resource URIs of a put primitive.
    pub fn uris(&self) -> &[String] {
        match &self.primitive.kind {
            PrimitiveKind::Put(uris) => uris,
            _ => &[],
        }
    }

    /// Performs the primitive at its current location.
    pub fn apply<S: TreeStore + ?Sized>(&self, store: &mut S, location: Location) -> Result<Effect> {
        let pre = location.pre;
        let kind = self.node.kind;
        let count = self.clip.len();
        let effect = match &self.primitive.kind {
            PrimitiveKind::InsertBefore(_) => {
                if count == 0 {
                    return Ok(Effect::None);
                }
                store.insert(pre, location.parent, &self.clip)?;
                Effect::Inserted { at: pre, count }
            }
            PrimitiveKind::InsertAfter(_) => {
                if count == 0 {
                    return Ok(Effect::None);
                }
                let at = pre + store.size(pre, kind);
                store.insert(at, location.parent, &self.clip)?;
                Effect::Inserted { at, count }
            }
            PrimitiveKind::InsertInto(_) | PrimitiveKind::InsertIntoLast(_) => {
                if count == 0 {
                    return Ok(Effect::None);
                }
                let at = pre + store.size(pre, kind);
                store.insert(at, Some(pre), &self.clip)?;
                Effect::Inserted { at, count }
            }
            PrimitiveKind::InsertIntoFirst(_) => {
                if count == 0 {
                    return Ok(Effect::None);
                }
                let at = pre + store.att_size(pre, kind);
                store.insert(at, Some(pre), &self.clip)?;
                Effect::Inserted { at, count }
            }
            PrimitiveKind::InsertAttribute(_) => {
                if count == 0 {
                    return Ok(Effect::None);
                }
                store.insert_attr(pre + 1, pre, &self.clip)?;
                Effect::Inserted { at: pre + 1, count }
            }
            PrimitiveKind::Delete => remove(store, pre, kind)?,
            PrimitiveKind::Rename(name) => {
                store.rename(pre, kind, name)?;
                Effect::None
            }
            PrimitiveKind::ReplaceValue(value) => {
                if kind == NodeKind::Text && value.is_empty() {
                    remove(store, pre, kind)?
                } else {
                    store.replace(pre, kind, value)?;
                    Effect::None
                }
            }
            PrimitiveKind::ReplaceElementContent(_) => {
                let att_size = store.att_size(pre, kind);
                let removed = store.size(pre, kind) - att_size;
                while store.size(pre, kind) > att_size {
                    store.delete(pre + att_size)?;
                }
                store.insert(pre + att_size, Some(pre), &self.clip)?;
                Effect::Replaced {
                    at: pre + att_size,
                    removed,
                    inserted: count,
                }
            }
            PrimitiveKind::ReplaceNode(_) => {
                // The old text is gone even though its row is reused.
                if let (NodeKind::Text, Some(value)) = (kind, self.clip.single_text()) {
                    store.replace(pre, kind, value)?;
                    return Ok(Effect::Replaced {
                        at: pre,
                        removed: 1,
                        inserted: 1,
                    });
                }
                let parent = location.parent.ok_or_else(|| {
                    Error::Storage(format!("replaced node {} has no parent", pre))
                })?;
                let removed = store.size(pre, kind);
                store.delete(pre)?;
                if kind == NodeKind::Attribute {
                    store.insert_attr(pre, parent, &self.clip)?;
                } else {
                    store.insert(pre, Some(parent), &self.clip)?;
                }
                Effect::Replaced {
                    at: pre,
                    removed,
                    inserted: count,
                }
            }
            PrimitiveKind::Put(_) => Effect::Serialized(serialize(store, pre)),
        };
        Ok(effect)
    }
}

fn remove<S: TreeStore + ?Sized>(store: &mut S, pre: Pre, kind: NodeKind) -> Result<Effect> {
    let count = store.size(pre, kind);
    store.delete(pre)?;
    Ok(Effect::Removed { at: pre, count })
}
