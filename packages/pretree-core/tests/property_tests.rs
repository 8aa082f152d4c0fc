use std::collections::HashSet;

use proptest::prelude::*;
use pretree_core::{
    serialize_all, Error, Fragment, MemoryCatalog, MemoryTree, NodeKind, PendingUpdates, Pre,
    Primitive, PrimitiveType, QName, Target, TreeStore,
};
use pretree_test_support::{tree_of, Oracle};

/// 0 doc, 1 <r x>, 2 @x, 3 <a>, 4 "t1", 5 <b y/>, 6 @y, 7 "t2", 8 <c>, 9 <d>,
/// 10 "t3", 11 <e/>, 12 "t4", 13 <f x/>, 14 @x
fn base_tree() -> MemoryTree {
    tree_of(vec![Fragment::element("r").with_attribute("x", "1").with_children([
        Fragment::element("a").with_children([
            Fragment::text("t1"),
            Fragment::element("b").with_attribute("y", "2"),
            Fragment::text("t2"),
        ]),
        Fragment::element("c").with_children([
            Fragment::element("d").with_child(Fragment::text("t3")),
            Fragment::element("e"),
        ]),
        Fragment::text("t4"),
        Fragment::element("f").with_attribute("x", "3"),
    ])])
}

const ELEMENTS: [Pre; 7] = [1, 3, 5, 8, 9, 11, 13];

fn payload(choice: u8) -> Vec<Fragment> {
    match choice % 4 {
        0 => vec![Fragment::text("p")],
        1 => vec![Fragment::element("n")],
        2 => vec![
            Fragment::text("q"),
            Fragment::element("m").with_child(Fragment::text("z")),
        ],
        _ => Vec::new(),
    }
}

fn value(choice: u8) -> &'static str {
    if choice % 2 == 0 {
        "v"
    } else {
        ""
    }
}

fn at(pre: Pre) -> Target {
    Target::new("db", pre)
}

/// Maps raw choices onto a batch that is valid for the base tree. Kinds match
/// their targets, attribute names never collide, a node gets each exclusive
/// kind at most once and never both a rename and a replacement.
fn batch_from(choices: &[(u8, Pre, u8)]) -> Vec<Primitive> {
    let tree = base_tree();
    let mut taken: HashSet<(PrimitiveType, Pre)> = HashSet::new();
    let mut batch = Vec::new();
    for (i, &(op, pre, choice)) in choices.iter().enumerate() {
        let fresh = |prefix: &str| QName::new(format!("{}{}", prefix, i));
        let primitive = match tree.kind(pre) {
            NodeKind::Attribute => match op % 4 {
                0 => Primitive::rename(at(pre), fresh("r")),
                1 => Primitive::replace_value(at(pre), value(choice)),
                2 => Primitive::replace_node(at(pre), [Fragment::attribute(fresh("p"), "w")]),
                _ => Primitive::delete(at(pre)),
            },
            NodeKind::Element => match op % 12 {
                0 => Primitive::insert_before(at(pre), payload(choice)),
                1 => Primitive::insert_after(at(pre), payload(choice)),
                2 => Primitive::insert_into(at(pre), payload(choice)),
                3 => Primitive::insert_into_first(at(pre), payload(choice)),
                4 => Primitive::insert_into_last(at(pre), payload(choice)),
                5 | 6 => Primitive::insert_attribute(at(pre), [Fragment::attribute(fresh("n"), "w")]),
                7 => Primitive::rename(at(pre), "renamed"),
                8 => Primitive::replace_element_content(at(pre), value(choice)),
                9 => Primitive::replace_node(at(pre), payload(choice)),
                _ => Primitive::delete(at(pre)),
            },
            _ => match op % 6 {
                0 => Primitive::insert_before(at(pre), payload(choice)),
                1 => Primitive::insert_after(at(pre), payload(choice)),
                2 | 3 => Primitive::replace_value(at(pre), value(choice)),
                4 => Primitive::replace_node(at(pre), payload(choice)),
                _ => Primitive::delete(at(pre)),
            },
        };
        let kind = primitive.primitive_type();
        let conflicting = match kind {
            PrimitiveType::Rename => Some(PrimitiveType::ReplaceNode),
            PrimitiveType::ReplaceNode => Some(PrimitiveType::Rename),
            _ => None,
        };
        if conflicting.is_some_and(|other| taken.contains(&(other, pre))) {
            continue;
        }
        let merges = kind.is_insert() || kind == PrimitiveType::Delete;
        if !merges && !taken.insert((kind, pre)) {
            continue;
        }
        batch.push(primitive);
    }
    batch
}

fn execute(tree: MemoryTree, batch: &[Primitive]) -> Result<MemoryTree, Error> {
    let mut catalog = MemoryCatalog::new();
    catalog.insert_database("db", tree);
    let mut updates = PendingUpdates::default();
    for primitive in batch {
        updates.add(primitive.clone())?;
    }
    updates.execute(&mut catalog)?;
    Ok(catalog.database("db").unwrap().tree.clone())
}

fn batches() -> impl Strategy<Value = Vec<Primitive>> {
    prop::collection::vec((0u8..12, 1usize..15, 0u8..4), 1..10)
        .prop_map(|choices| batch_from(&choices))
}

proptest! {
    #[test]
    fn positional_engine_matches_identity_model(batch in batches()) {
        let tree = base_tree();
        let mut oracle = Oracle::new(&tree);
        oracle.apply(&batch).unwrap();
        let updated = execute(tree, &batch).unwrap();
        prop_assert_eq!(serialize_all(&updated), oracle.serialize());
    }

    #[test]
    fn text_siblings_never_end_up_adjacent(batch in batches()) {
        let updated = execute(base_tree(), &batch).unwrap();
        prop_assert!(updated.validate().is_ok());
        for pre in 1..updated.len() {
            let both_text = updated.kind(pre - 1) == NodeKind::Text && updated.kind(pre) == NodeKind::Text;
            prop_assert!(
                !both_text
                    || updated.parent(pre - 1, NodeKind::Text) != updated.parent(pre, NodeKind::Text)
            );
        }
    }

    #[test]
    fn merged_inserts_equal_sequential_batches(
        first in 0u8..4,
        second in 0u8..4,
        target in prop::sample::select(vec![3usize, 5, 8, 9, 13]),
        kind in 0u8..3,
    ) {
        let make = |pre: Pre, choice: u8| match kind {
            0 => Primitive::insert_into(at(pre), payload(choice)),
            1 => Primitive::insert_into_last(at(pre), payload(choice)),
            _ => Primitive::insert_before(at(pre), payload(choice)),
        };
        let merged = execute(base_tree(), &[make(target, first), make(target, second)]).unwrap();

        let tree = base_tree();
        let before = tree.len();
        let once = execute(tree, &[make(target, first)]).unwrap();
        // Inserting before the target moves it back by the inserted rows.
        let shifted = if kind == 2 { target + once.len() - before } else { target };
        let twice = execute(once, &[make(shifted, second)]).unwrap();
        prop_assert_eq!(serialize_all(&merged), serialize_all(&twice));
    }

    #[test]
    fn duplicate_attribute_names_abort_unchanged(
        element in prop::sample::select(ELEMENTS.to_vec()),
        name in prop::sample::select(vec!["x", "y"]),
        others in prop::collection::vec((0u8..12, 1usize..15, 0u8..4), 0..6),
    ) {
        let mut batch = batch_from(&others);
        batch.push(Primitive::insert_attribute(at(element), [Fragment::attribute(name, "1")]));
        batch.push(Primitive::insert_attribute(at(element), [Fragment::attribute(name, "2")]));
        // Removing the element itself cancels its name checks.
        batch.retain(|p| {
            p.target.pre != element
                || !matches!(p.primitive_type(), PrimitiveType::Delete | PrimitiveType::ReplaceNode)
        });

        let mut catalog = MemoryCatalog::new();
        catalog.insert_database("db", base_tree());
        let mut updates = PendingUpdates::default();
        for primitive in batch {
            updates.add(primitive).unwrap();
        }
        let err = updates.execute(&mut catalog).unwrap_err();
        let is_duplicate = matches!(err, Error::DuplicateAttribute { .. });
        prop_assert!(is_duplicate);
        prop_assert_eq!(&catalog.database("db").unwrap().tree, &base_tree());
    }
}
