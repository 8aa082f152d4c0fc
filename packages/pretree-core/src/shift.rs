//! Position bookkeeping for a single apply pass.
//!
//! Primitives are addressed by the pre values they had when the batch was
//! collected. [`ShiftMap`] translates those original positions into current ones
//! while the pass mutates the table, and [`TextBoundaries`] remembers where
//! structural edits may have left two text nodes side by side.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::ids::{NodeKind, Pre};
use crate::traits::TreeStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Removal {
    end: Pre,
    /// The range starts with a node that was removed itself, not just emptied.
    node: bool,
}

/// Original-to-current pre translation.
///
/// Shifts are kept per boundary. Boundaries registered up front live in a
/// Fenwick tree over their sorted positions, so recording a shift and
/// translating a position both take logarithmic time. Shifts at other
/// boundaries fall back to a sorted map that is summed on lookup.
#[derive(Clone, Debug, Default)]
pub struct ShiftMap {
    boundaries: Vec<Pre>,
    tree: Vec<isize>,
    unregistered: BTreeMap<Pre, isize>,
    /// Disjoint original ranges whose nodes no longer exist.
    removed: BTreeMap<Pre, Removal>,
}

impl ShiftMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map prepared for shifts at the given boundaries.
    pub fn with_boundaries(boundaries: impl IntoIterator<Item = Pre>) -> Self {
        let mut boundaries: Vec<Pre> = boundaries.into_iter().collect();
        boundaries.sort_unstable();
        boundaries.dedup();
        Self {
            tree: vec![0; boundaries.len()],
            boundaries,
            ..Self::default()
        }
    }

    /// Records that `delta` rows appeared (or vanished) in front of every original
    /// node at or after `boundary`.
    pub fn shift(&mut self, boundary: Pre, delta: isize) {
        if delta == 0 {
            return;
        }
        match self.boundaries.binary_search(&boundary) {
            Ok(index) => {
                let mut i = index + 1;
                while i <= self.tree.len() {
                    self.tree[i - 1] += delta;
                    i += i & i.wrapping_neg();
                }
            }
            Err(_) => *self.unregistered.entry(boundary).or_insert(0) += delta,
        }
    }

    /// Marks the original range `start..end` as gone. `node` is set when the node
    /// at `start` was removed itself rather than only emptied.
    pub fn remove(&mut self, start: Pre, end: Pre, node: bool) {
        if start >= end {
            return;
        }
        let nested: Vec<Pre> = self.removed.range(start..end).map(|(k, _)| *k).collect();
        for key in nested {
            self.removed.remove(&key);
        }
        self.removed.insert(start, Removal { end, node });
    }

    pub fn is_removed(&self, pre: Pre) -> bool {
        self.removed
            .range(..=pre)
            .next_back()
            .is_some_and(|(_, removal)| removal.end > pre)
    }

    /// Whether `pre` lies inside a removed range without starting it.
    pub fn is_enclosed(&self, pre: Pre) -> bool {
        self.removed
            .range(..pre)
            .next_back()
            .is_some_and(|(_, removal)| removal.end > pre)
    }

    /// Current pre of an original node, `None` once it has been removed.
    pub fn resolve(&self, pre: Pre) -> Option<Pre> {
        if self.is_removed(pre) {
            return None;
        }
        Some(self.position(pre))
    }

    /// Current position a removed node used to occupy. Only defined for nodes
    /// that were removed themselves; nodes inside a removed subtree have none.
    pub fn anchor(&self, pre: Pre) -> Option<Pre> {
        self.removed
            .get(&pre)
            .filter(|removal| removal.node)
            .map(|_| self.position(pre))
    }

    /// Current position of original boundary `pre`, whether or not its node survives.
    pub fn position(&self, pre: Pre) -> Pre {
        let delta = self.cumulative_at(pre);
        (pre as isize + delta).max(0) as Pre
    }

    fn cumulative_at(&self, pre: Pre) -> isize {
        let mut i = self.boundaries.partition_point(|&b| b <= pre);
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i - 1];
            i &= i - 1;
        }
        sum + self.unregistered.range(..=pre).map(|(_, d)| d).sum::<isize>()
    }
}

/// Places where two text nodes may have become adjacent.
///
/// Boundaries are kept in original coordinates together with the number of rows
/// inserted there. Rows inserted at one boundary end up as a contiguous run in
/// front of the boundary's final position, so every seam lies in that run.
#[derive(Clone, Debug, Default)]
pub struct TextBoundaries {
    inserted: BTreeMap<Pre, usize>,
}

impl TextBoundaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inserted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
    }

    /// `count` rows were inserted in front of original boundary `boundary`.
    pub fn inserted(&mut self, boundary: Pre, count: usize) {
        *self.inserted.entry(boundary).or_insert(0) += count;
    }

    /// Rows ending at original boundary `boundary` were removed.
    pub fn removed(&mut self, boundary: Pre) {
        self.inserted.entry(boundary).or_insert(0);
    }

    /// Merges every text node that ends up directly after a text sibling into
    /// that sibling. Returns the number of merges.
    pub fn resolve<S: TreeStore + ?Sized>(self, store: &mut S, shifts: &ShiftMap) -> Result<usize> {
        let mut positions = Vec::new();
        for (boundary, count) in self.inserted {
            // Rows inserted inside a removed subtree went with it.
            if shifts.is_enclosed(boundary) {
                continue;
            }
            let end = shifts.position(boundary);
            positions.extend(end.saturating_sub(count)..=end);
        }
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        let mut merged = 0;
        for pre in positions {
            if pre == 0 || pre >= store.len() {
                continue;
            }
            let left = pre - 1;
            if store.kind(left) != NodeKind::Text || store.kind(pre) != NodeKind::Text {
                continue;
            }
            if store.parent(left, NodeKind::Text) != store.parent(pre, NodeKind::Text) {
                continue;
            }
            let value = format!(
                "{}{}",
                store.value(left, NodeKind::Text).unwrap_or_default(),
                store.value(pre, NodeKind::Text).unwrap_or_default()
            );
            store.replace(left, NodeKind::Text, &value)?;
            store.delete(pre)?;
            merged += 1;
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Fragment;
    use crate::memory::MemoryTree;
    use crate::serialize::serialize_all;

    #[test]
    fn shifts_apply_from_their_boundary_on() {
        let mut shifts = ShiftMap::new();
        shifts.shift(5, 2);
        shifts.shift(3, 1);
        assert_eq!(shifts.resolve(2), Some(2));
        assert_eq!(shifts.resolve(3), Some(4));
        assert_eq!(shifts.resolve(5), Some(8));
        shifts.shift(5, -3);
        assert_eq!(shifts.resolve(4), Some(5));
        assert_eq!(shifts.resolve(6), Some(6));
    }

    #[test]
    fn removed_ranges_hide_their_nodes() {
        let mut shifts = ShiftMap::new();
        shifts.remove(4, 7, false);
        shifts.shift(7, -3);
        assert_eq!(shifts.resolve(3), Some(3));
        assert_eq!(shifts.resolve(4), None);
        assert_eq!(shifts.resolve(6), None);
        assert_eq!(shifts.resolve(7), Some(4));
        assert_eq!(shifts.anchor(4), None);
    }

    #[test]
    fn removed_nodes_keep_an_anchor() {
        let mut shifts = ShiftMap::new();
        shifts.shift(2, 1);
        shifts.remove(3, 6, true);
        shifts.shift(6, -3);
        assert_eq!(shifts.anchor(3), Some(4));
        assert_eq!(shifts.anchor(4), None);
        assert_eq!(shifts.resolve(6), Some(4));
    }

    #[test]
    fn enclosing_removal_absorbs_nested_ranges() {
        let mut shifts = ShiftMap::new();
        shifts.remove(5, 8, false);
        shifts.remove(4, 8, true);
        assert!(shifts.is_removed(4));
        assert!(shifts.is_removed(7));
        assert!(!shifts.is_removed(8));
        assert_eq!(shifts.anchor(4), Some(4));
    }

    #[test]
    fn registered_and_unregistered_boundaries_agree() {
        let edits: [(Pre, isize); 6] = [(9, 2), (3, -1), (9, 1), (0, 4), (6, -2), (12, 5)];
        let mut fast = ShiftMap::with_boundaries([0, 3, 6, 9, 12]);
        let mut slow = ShiftMap::new();
        let mut mixed = ShiftMap::with_boundaries([3, 9]);
        for (boundary, delta) in edits {
            fast.shift(boundary, delta);
            slow.shift(boundary, delta);
            mixed.shift(boundary, delta);
        }
        for pre in 0..15 {
            assert_eq!(fast.resolve(pre), slow.resolve(pre), "pre {}", pre);
            assert_eq!(mixed.resolve(pre), slow.resolve(pre), "pre {}", pre);
        }
        assert_eq!(fast.resolve(2), Some(6));
        assert_eq!(fast.resolve(13), Some(22));
    }

    #[test]
    fn enclosed_positions_exclude_the_range_start() {
        let mut shifts = ShiftMap::new();
        shifts.remove(4, 7, true);
        assert!(!shifts.is_enclosed(4));
        assert!(shifts.is_enclosed(5));
        assert!(!shifts.is_enclosed(7));
    }

    #[test]
    fn merges_adjacent_texts_at_recorded_boundaries() {
        // 0 doc, 1 <a>, 2 "x", 3 <b/>, 4 "y"
        let mut tree = MemoryTree::with_document(
            "d.xml",
            vec![Fragment::element("a").with_children([
                Fragment::text("x"),
                Fragment::element("b"),
                Fragment::text("y"),
            ])],
        );
        let mut shifts = ShiftMap::new();
        let mut boundaries = TextBoundaries::new();
        tree.delete(3).unwrap();
        shifts.remove(3, 4, true);
        shifts.shift(4, -1);
        boundaries.removed(4);
        assert_eq!(boundaries.resolve(&mut tree, &shifts).unwrap(), 1);
        assert_eq!(serialize_all(&tree), "<a>xy</a>");
        tree.validate().unwrap();
    }

    #[test]
    fn inserted_runs_merge_on_both_sides() {
        // 0 doc, 1 <a>, 2 "l", 3 "r" after inserting "m" in front of original 3
        let mut tree = MemoryTree::with_document(
            "d.xml",
            vec![Fragment::element("a").with_children([
                Fragment::text("l"),
                Fragment::element("b"),
                Fragment::text("r"),
            ])],
        );
        let mut shifts = ShiftMap::new();
        let mut boundaries = TextBoundaries::new();
        tree.insert(4, Some(1), &crate::fragment::Clip::text("m")).unwrap();
        shifts.shift(4, 1);
        boundaries.inserted(4, 1);
        tree.delete(3).unwrap();
        shifts.remove(3, 4, true);
        shifts.shift(4, -1);
        boundaries.removed(4);
        assert_eq!(boundaries.resolve(&mut tree, &shifts).unwrap(), 2);
        assert_eq!(serialize_all(&tree), "<a>lmr</a>");
    }

    #[test]
    fn runs_inside_removed_subtrees_are_ignored() {
        let mut shifts = ShiftMap::new();
        shifts.remove(2, 6, true);
        shifts.shift(6, -4);
        let mut boundaries = TextBoundaries::new();
        boundaries.inserted(4, 3);
        boundaries.removed(6);
        let mut tree = MemoryTree::with_document("d.xml", vec![Fragment::element("a")]);
        assert_eq!(boundaries.resolve(&mut tree, &shifts).unwrap(), 0);
    }
}
