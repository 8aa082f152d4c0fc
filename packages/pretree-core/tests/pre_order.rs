use std::collections::BTreeSet;

use proptest::prelude::*;
use pretree_core::{Fragment, PendingUpdates, Pre, Primitive, Target, UpdateOptions};
use pretree_test_support::{tree_of, Call, RowId, TrackedCatalog};

/// 0 doc, 1 <r>, 2 <a>, 3 <b>, 4 <c>, 5 <d>, 6 <e>, 7 <f>, 8 <g>, 9 <h>
/// with a/b, c/d/e, f/g/h nested as written.
fn tracked() -> TrackedCatalog {
    let tree = tree_of(vec![Fragment::element("r").with_children([
        Fragment::element("a").with_child(Fragment::element("b")),
        Fragment::element("c")
            .with_child(Fragment::element("d").with_child(Fragment::element("e"))),
        Fragment::element("f").with_children([Fragment::element("g"), Fragment::element("h")]),
    ])]);
    TrackedCatalog::new("db", tree)
}

const ELEMENTS: [Pre; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 9];

fn at(pre: Pre) -> Target {
    Target::new("db", pre)
}

struct Recorded {
    renamed: BTreeSet<RowId>,
    deleted: BTreeSet<RowId>,
    insert_parents: BTreeSet<RowId>,
}

fn run(renames: &BTreeSet<Pre>, deletes: &BTreeSet<Pre>, inserts: &BTreeSet<Pre>) -> Recorded {
    let mut catalog = tracked();
    let mut updates = PendingUpdates::new(UpdateOptions::new().merge_texts(false));
    for &pre in renames {
        updates.add(Primitive::rename(at(pre), "x")).unwrap();
    }
    for &pre in deletes {
        updates.add(Primitive::delete(at(pre))).unwrap();
    }
    for &pre in inserts {
        updates
            .add(Primitive::insert_into(at(pre), [Fragment::element("new")]))
            .unwrap();
    }
    updates.execute(&mut catalog).unwrap();

    let mut recorded = Recorded {
        renamed: BTreeSet::new(),
        deleted: BTreeSet::new(),
        insert_parents: BTreeSet::new(),
    };
    for call in catalog.tree.calls() {
        match *call {
            Call::Rename { node } => {
                recorded.renamed.insert(node);
            }
            Call::Delete { node, .. } => {
                recorded.deleted.insert(node);
            }
            Call::Insert {
                parent: Some(parent),
                ..
            } => {
                recorded.insert_parents.insert(parent);
            }
            _ => {}
        }
    }
    recorded
}

fn ids(pres: &BTreeSet<Pre>) -> BTreeSet<RowId> {
    pres.iter().map(|&pre| pre as RowId).collect()
}

#[test]
fn every_call_lands_on_its_original_target() {
    let renames = BTreeSet::from([2, 5, 9]);
    let deletes = BTreeSet::from([3, 4, 5, 8]);
    let inserts = BTreeSet::from([1, 2, 6, 7]);
    let recorded = run(&renames, &deletes, &inserts);
    assert_eq!(recorded.renamed, ids(&renames));
    assert_eq!(recorded.deleted, ids(&deletes));
    assert_eq!(recorded.insert_parents, ids(&inserts));
}

proptest! {
    #[test]
    fn descending_order_never_uses_a_stale_position(
        renames in prop::sample::subsequence(ELEMENTS.to_vec(), 0..=9),
        deletes in prop::sample::subsequence(ELEMENTS.to_vec(), 0..=9),
        inserts in prop::sample::subsequence(ELEMENTS.to_vec(), 0..=9),
    ) {
        let renames: BTreeSet<Pre> = renames.into_iter().collect();
        let deletes: BTreeSet<Pre> = deletes.into_iter().collect();
        let inserts: BTreeSet<Pre> = inserts.into_iter().collect();
        let recorded = run(&renames, &deletes, &inserts);
        prop_assert_eq!(recorded.renamed, ids(&renames));
        prop_assert_eq!(recorded.deleted, ids(&deletes));
        prop_assert_eq!(recorded.insert_parents, ids(&inserts));
    }
}
