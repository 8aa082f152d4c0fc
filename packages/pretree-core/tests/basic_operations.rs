use pretree_core::{
    serialize_all, BasicOperation, Error, Fragment, MemoryCatalog, MemoryTree, NodeKind,
    OperationType, PendingUpdates, Primitive, Target, TreeStore,
};

// 0 doc a/one.xml, 1 <one>, 2 doc b/two.xml, 3 <two>
fn catalog() -> MemoryCatalog {
    let tree = MemoryTree::from_documents(&[
        Fragment::document("a/one.xml").with_child(Fragment::element("one")),
        Fragment::document("b/two.xml").with_child(Fragment::element("two")),
    ])
    .unwrap();
    let mut catalog = MemoryCatalog::new();
    catalog.insert_database("db", tree);
    catalog
}

fn paths(tree: &MemoryTree) -> Vec<String> {
    tree.documents()
        .into_iter()
        .map(|pre| tree.value(pre, NodeKind::Document).unwrap().to_string())
        .collect()
}

#[test]
fn path_operations_run_in_kind_order() {
    let mut catalog = catalog();
    let mut updates = PendingUpdates::default();
    // Queued out of order: delete sees the added document and rename moves the stored resource.
    updates.add_operation(BasicOperation::delete("db", "b")).unwrap();
    updates.add_operation(BasicOperation::rename("db", "a", "c")).unwrap();
    updates.add_operation(BasicOperation::store("db", "a/r.bin", vec![1u8, 2, 3])).unwrap();
    updates
        .add_operation(BasicOperation::add(
            "db",
            [Fragment::document("b/three.xml").with_child(Fragment::element("three"))],
        ))
        .unwrap();
    let summary = updates.execute(&mut catalog).unwrap();
    assert_eq!(summary.operations, 4);
    assert_eq!(summary.applied, 0);

    let database = catalog.database("db").unwrap();
    assert_eq!(paths(&database.tree), ["c/one.xml"]);
    assert_eq!(serialize_all(&database.tree), "<one/>");
    assert_eq!(database.resources.keys().collect::<Vec<_>>(), ["c/r.bin"]);
    database.tree.validate().unwrap();
}

#[test]
fn deleting_a_path_removes_resources_below_it() {
    let mut catalog = catalog();
    let mut first = PendingUpdates::default();
    first.add_operation(BasicOperation::store("db", "a/x.bin", vec![0u8])).unwrap();
    first.add_operation(BasicOperation::store("db", "ab/y.bin", vec![0u8])).unwrap();
    first.execute(&mut catalog).unwrap();

    let mut second = PendingUpdates::default();
    second.add_operation(BasicOperation::delete("db", "a")).unwrap();
    second.execute(&mut catalog).unwrap();

    let database = catalog.database("db").unwrap();
    assert_eq!(paths(&database.tree), ["b/two.xml"]);
    assert_eq!(database.resources.keys().collect::<Vec<_>>(), ["ab/y.bin"]);
}

#[test]
fn node_changes_are_committed_before_database_operations() {
    let mut catalog = catalog();
    let mut updates = PendingUpdates::default();
    updates.add_operation(BasicOperation::put("db", "all.xml")).unwrap();
    updates.add(Primitive::rename(Target::new("db", 3), "renamed")).unwrap();
    updates
        .add(Primitive::insert_into(Target::new("db", 1), [Fragment::text("t")]))
        .unwrap();
    let summary = updates.execute(&mut catalog).unwrap();
    assert_eq!(summary.applied, 2);
    assert_eq!(summary.operations, 1);
    assert_eq!(summary.resources_written, 1);
    assert_eq!(catalog.written("all.xml"), Some(&b"<one>t</one><renamed/>"[..]));
}

#[test]
fn optimize_flush_and_drop() {
    let mut catalog = catalog();
    catalog.insert_database("other", MemoryTree::new());
    let mut updates = PendingUpdates::default();
    updates.add_operation(BasicOperation::optimize("db", false)).unwrap();
    updates.add_operation(BasicOperation::optimize("db", true)).unwrap();
    updates.add_operation(BasicOperation::flush("db")).unwrap();
    updates.add_operation(BasicOperation::drop("other")).unwrap();
    let summary = updates.execute(&mut catalog).unwrap();
    assert_eq!(summary.operations, 3);

    let database = catalog.database("db").unwrap();
    assert_eq!(database.optimizations, 1);
    assert_eq!(database.flushes, 1);
    assert!(catalog.database("other").is_none());
    assert_eq!(catalog.names().collect::<Vec<_>>(), ["db"]);
}

#[test]
fn create_installs_a_new_database() {
    let mut catalog = catalog();
    let mut updates = PendingUpdates::default();
    updates
        .add_operation(BasicOperation::create(
            "fresh",
            [
                Fragment::document("x.xml").with_child(Fragment::element("x")),
                Fragment::document("y.xml").with_child(Fragment::text("y")),
            ],
        ))
        .unwrap();
    updates.execute(&mut catalog).unwrap();

    let fresh = &catalog.database("fresh").unwrap().tree;
    assert_eq!(paths(fresh), ["x.xml", "y.xml"]);
    assert_eq!(serialize_all(fresh), "<x/>y");
}

#[test]
fn second_create_of_one_database_conflicts() {
    let mut updates = PendingUpdates::default();
    updates.add_operation(BasicOperation::create("fresh", [])).unwrap();
    let err = updates
        .add_operation(BasicOperation::create("fresh", []))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DatabaseConflict {
            kind: OperationType::Create,
            ref db,
        } if db == "fresh"
    ));
}

#[test]
fn non_document_content_aborts_before_any_change() {
    let mut catalog = catalog();
    let before = catalog.database("db").unwrap().tree.clone();
    let mut updates = PendingUpdates::default();
    updates.add(Primitive::delete(Target::new("db", 3))).unwrap();
    updates.add_operation(BasicOperation::flush("db")).unwrap();
    updates
        .add_operation(BasicOperation::add("db", [Fragment::element("loose")]))
        .unwrap();
    let err = updates.execute(&mut catalog).unwrap_err();
    assert!(matches!(
        err,
        Error::DocumentExpected {
            found: NodeKind::Element,
            ..
        }
    ));
    assert_eq!(
        err.to_string(),
        "database 'db' expects document nodes, found element"
    );
    let database = catalog.database("db").unwrap();
    assert_eq!(database.tree, before);
    assert_eq!(database.flushes, 0);
}

#[test]
fn operations_on_unknown_databases_are_rejected() {
    let mut catalog = catalog();
    let mut updates = PendingUpdates::default();
    updates.add_operation(BasicOperation::optimize("nope", false)).unwrap();
    assert!(matches!(
        updates.execute(&mut catalog),
        Err(Error::UnknownDatabase(db)) if db == "nope"
    ));
}

#[test]
fn whole_database_put_shares_the_uri_namespace_with_node_puts() {
    let mut updates = PendingUpdates::default();
    updates.add(Primitive::put(Target::new("db", 1), "out.xml")).unwrap();
    let err = updates
        .add_operation(BasicOperation::put("db", "out.xml"))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicatePut { ref uri } if uri == "out.xml"));
}

#[test]
fn flush_writes_a_snapshot_to_the_output_directory() {
    let dir = std::env::temp_dir().join(format!("pretree-flush-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let mut catalog = MemoryCatalog::with_output_dir(&dir);
    catalog.insert_database("db", catalog_tree());

    let mut updates = PendingUpdates::default();
    updates.add(Primitive::rename(Target::new("db", 1), "first")).unwrap();
    updates.add_operation(BasicOperation::flush("db")).unwrap();
    updates.add_operation(BasicOperation::put("db", "copy.xml")).unwrap();
    updates.execute(&mut catalog).unwrap();

    let snapshot = std::fs::read_to_string(dir.join("db.xml")).unwrap();
    let copy = std::fs::read_to_string(dir.join("copy.xml")).unwrap();
    std::fs::remove_dir_all(&dir).unwrap();
    assert_eq!(snapshot, "<first/><two/>");
    assert_eq!(copy, snapshot);
}

fn catalog_tree() -> MemoryTree {
    catalog().database("db").unwrap().tree.clone()
}
