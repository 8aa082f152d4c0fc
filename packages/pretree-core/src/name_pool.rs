//! Conflict detection for the attribute and namespace names of one element.

use std::collections::{BTreeSet, HashMap};

use crate::ids::{NodeKind, Pre, QName};

#[derive(Clone, Debug)]
struct Contribution {
    name: QName,
    kind: NodeKind,
    /// Existing node that contributed the name; `None` for names introduced by payloads.
    node: Option<Pre>,
}

/// Name conflict found by [`NamePool::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameConflict {
    DuplicateAttribute(QName),
    Namespace {
        prefix: String,
        first: String,
        second: String,
    },
}

/// Names an element ends up with after all primitives of a batch.
///
/// Existing names are recorded with the node that carries them so that a delete,
/// replace or rename of that node can cancel them; removing a node twice has no
/// further effect.
#[derive(Clone, Debug, Default)]
pub struct NamePool {
    contributions: Vec<Contribution>,
    removed: BTreeSet<Pre>,
}

impl NamePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a name introduced by a primitive.
    pub fn add(&mut self, name: QName, kind: NodeKind) {
        self.contributions.push(Contribution {
            name,
            kind,
            node: None,
        });
    }

    /// Records the name an existing node carries.
    pub fn add_node(&mut self, node: Pre, name: QName, kind: NodeKind) {
        self.contributions.push(Contribution {
            name,
            kind,
            node: Some(node),
        });
    }

    /// Cancels the contribution of an existing node.
    pub fn remove(&mut self, node: Pre) {
        self.removed.insert(node);
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    fn live(&self) -> impl Iterator<Item = &Contribution> + '_ {
        self.contributions
            .iter()
            .filter(|c| c.node.map_or(true, |pre| !self.removed.contains(&pre)))
    }

    /// Fails on the first duplicate attribute name or conflicting prefix binding.
    pub fn check(&self) -> Result<(), NameConflict> {
        let mut attributes = HashMap::new();
        let mut prefixes: HashMap<&str, &str> = HashMap::new();
        for contribution in self.live() {
            let name = &contribution.name;
            if contribution.kind == NodeKind::Attribute
                && attributes.insert(name.expanded(), name).is_some()
            {
                return Err(NameConflict::DuplicateAttribute(name.clone()));
            }
            let prefix = name.prefix();
            let unprefixed_attribute = contribution.kind == NodeKind::Attribute && prefix.is_empty();
            if name.uri.is_none() || unprefixed_attribute {
                continue;
            }
            match prefixes.get(prefix) {
                Some(bound) if *bound != name.uri() => {
                    return Err(NameConflict::Namespace {
                        prefix: prefix.to_string(),
                        first: bound.to_string(),
                        second: name.uri().to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    prefixes.insert(prefix, name.uri());
                }
            }
        }
        Ok(())
    }
}
