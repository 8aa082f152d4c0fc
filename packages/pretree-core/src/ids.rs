use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Document-order position of a node in a flat node table.
///
/// A pre value is only meaningful until the next structural change at or before it.
pub type Pre = usize;

/// Kind of a node in the positional table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Attribute,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    /// Documents and elements own a subtree; every other kind has size 1.
    pub fn has_children(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::Element)
    }

    pub fn is_named(self) -> bool {
        matches!(
            self,
            NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Document => "document",
            NodeKind::Element => "element",
            NodeKind::Text => "text",
            NodeKind::Attribute => "attribute",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing-instruction",
        };
        f.write_str(name)
    }
}

/// Qualified name of an element, attribute or processing instruction.
///
/// Two names denote the same node name when their namespace URI and local part
/// agree; the prefix only matters for namespace bindings.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub uri: Option<String>,
}

impl QName {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            uri: None,
        }
    }

    /// Builds a namespaced name. An empty prefix denotes the default namespace.
    pub fn ns(prefix: &str, local: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            local: local.into(),
            uri: Some(uri.into()),
        }
    }

    /// Splits a lexical `prefix:local` name. No namespace URI is attached.
    pub fn parse(name: &str) -> Self {
        match name.split_once(':') {
            Some((prefix, local)) => Self {
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
                uri: None,
            },
            None => Self::new(name),
        }
    }

    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn uri(&self) -> &str {
        self.uri.as_deref().unwrap_or("")
    }

    /// `(uri, local)` pair used for name identity.
    pub fn expanded(&self) -> (&str, &str) {
        (self.uri(), &self.local)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Node addressed by database and pre value.
///
/// Equality is positional: two targets are the same node only while no structural
/// change has shifted either of them.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Target {
    pub db: String,
    pub pre: Pre,
}

impl Target {
    pub fn new(db: impl Into<String>, pre: Pre) -> Self {
        Self { db: db.into(), pre }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.db, self.pre)
    }
}

impl From<&str> for QName {
    fn from(name: &str) -> Self {
        QName::parse(name)
    }
}
