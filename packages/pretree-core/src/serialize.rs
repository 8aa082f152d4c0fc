//! XML serialization of table subtrees, used by `Put` and by tests.

use crate::ids::{NodeKind, Pre, QName};
use crate::traits::TreeStore;

/// Serializes the subtree rooted at `pre`.
pub fn serialize<S: TreeStore + ?Sized>(store: &S, pre: Pre) -> String {
    let mut out = String::new();
    let mut scope = Vec::new();
    write_node(store, pre, &mut out, &mut scope);
    out
}

/// Serializes every document of the table, one after another.
pub fn serialize_all<S: TreeStore + ?Sized>(store: &S) -> String {
    let mut out = String::new();
    let mut pre = 0;
    while pre < store.len() {
        out.push_str(&serialize(store, pre));
        pre += store.size(pre, store.kind(pre));
    }
    out
}

fn write_node<S: TreeStore + ?Sized>(
    store: &S,
    pre: Pre,
    out: &mut String,
    scope: &mut Vec<(String, String)>,
) {
    let kind = store.kind(pre);
    let value = store.value(pre, kind).unwrap_or_default();
    match kind {
        NodeKind::Document => write_children(store, pre, kind, out, scope),
        NodeKind::Element => {
            let name = store.name(pre, kind).cloned().unwrap_or_else(|| QName::new(""));
            let depth = scope.len();
            out.push('<');
            out.push_str(&name.to_string());
            declare(&name, true, out, scope);
            for att in pre + 1..pre + store.att_size(pre, kind) {
                out.push(' ');
                write_attribute(store, att, out, scope);
            }
            if store.size(pre, kind) == store.att_size(pre, kind) {
                out.push_str("/>");
            } else {
                out.push('>');
                write_children(store, pre, kind, out, scope);
                out.push_str("</");
                out.push_str(&name.to_string());
                out.push('>');
            }
            scope.truncate(depth);
        }
        NodeKind::Attribute => write_attribute(store, pre, out, scope),
        NodeKind::Text => escape(value, false, out),
        NodeKind::Comment => {
            out.push_str("<!--");
            out.push_str(value);
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction => {
            out.push_str("<?");
            if let Some(name) = store.name(pre, kind) {
                out.push_str(&name.local);
            }
            if !value.is_empty() {
                out.push(' ');
                out.push_str(value);
            }
            out.push_str("?>");
        }
    }
}

fn write_children<S: TreeStore + ?Sized>(
    store: &S,
    pre: Pre,
    kind: NodeKind,
    out: &mut String,
    scope: &mut Vec<(String, String)>,
) {
    let end = pre + store.size(pre, kind);
    let mut child = pre + store.att_size(pre, kind);
    while child < end {
        write_node(store, child, out, scope);
        child += store.size(child, store.kind(child));
    }
}

fn write_attribute<S: TreeStore + ?Sized>(
    store: &S,
    pre: Pre,
    out: &mut String,
    scope: &mut Vec<(String, String)>,
) {
    let name = store
        .name(pre, NodeKind::Attribute)
        .cloned()
        .unwrap_or_else(|| QName::new(""));
    if declare(&name, false, out, scope) {
        out.push(' ');
    }
    out.push_str(&name.to_string());
    out.push_str("=\"");
    escape(store.value(pre, NodeKind::Attribute).unwrap_or_default(), true, out);
    out.push('"');
}

/// Emits a namespace declaration when the name's binding is not yet in scope.
/// Unprefixed attributes never take the default namespace.
fn declare(name: &QName, element: bool, out: &mut String, scope: &mut Vec<(String, String)>) -> bool {
    let prefix = name.prefix();
    if !element && prefix.is_empty() {
        return false;
    }
    let uri = name.uri();
    let bound = scope
        .iter()
        .rev()
        .find(|(p, _)| p == prefix)
        .map(|(_, u)| u.as_str())
        .unwrap_or("");
    if bound == uri {
        return false;
    }
    if element {
        out.push(' ');
    }
    if prefix.is_empty() {
        out.push_str("xmlns=\"");
    } else {
        out.push_str("xmlns:");
        out.push_str(prefix);
        out.push_str("=\"");
    }
    escape(uri, true, out);
    out.push('"');
    scope.push((prefix.to_string(), uri.to_string()));
    true
}

fn escape(value: &str, attribute: bool, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}
